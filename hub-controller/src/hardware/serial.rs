//! Serial-bridge hardware: a line protocol spoken to a microcontroller over
//! a serial port (spec §4.3).
//!
//! Design note "serial bridge mutex → owned by a single worker": instead of
//! a mutex shared between callers, one task owns the port exclusively and
//! drains a request channel, replying on a per-request oneshot. The lock
//! disappears; serialization is just "one task, one port".

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_serial::SerialPortBuilderExt;
use tracing::error;

use super::{
    Actuator, ActuatorCommand, ActuatorError, ActuatorStatus, PowerMeter, PowerSample,
    ProximitySample, ProximitySensor,
};
use crate::pipes::PIPE_SIZE;
use crate::spawn;

const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

/// How long to wait for more stale bytes before deciding the input is
/// drained (spec §4.3: "each request flushes the input buffer first").
const DISCARD_TIMEOUT: Duration = Duration::from_millis(5);

enum Request {
    GetDistance(oneshot::Sender<Option<ProximitySample>>),
    GetPower(oneshot::Sender<Option<PowerSample>>),
    SetActuator(ActuatorCommand, oneshot::Sender<()>),
}

/// A handle to the serial-bridge worker task. Cloning shares the same
/// underlying port; all I/O is still serialized through the one task.
#[derive(Clone)]
pub struct SerialBridge {
    tx: mpsc::Sender<Request>,
}

impl SerialBridge {
    /// Open `path` and spawn the owning worker task.
    ///
    /// # Errors
    ///
    /// If the serial port cannot be opened.
    pub fn open(path: &str) -> Result<Self, tokio_serial::Error> {
        let port = tokio_serial::new(path, 9600).open_native_async()?;
        let (tx, rx) = mpsc::channel(PIPE_SIZE);
        spawn(run(port, rx));
        Ok(Self { tx })
    }
}

async fn run(port: tokio_serial::SerialStream, mut rx: mpsc::Receiver<Request>) {
    let mut reader = BufReader::new(port);

    while let Some(request) = rx.recv().await {
        match request {
            Request::GetDistance(reply) => {
                let sample = round_trip(&mut reader, "GET:DIST\n")
                    .await
                    .and_then(|line| parse_distance(&line));
                let _ = reply.send(sample);
            }
            Request::GetPower(reply) => {
                let sample = round_trip(&mut reader, "GET:PWR\n")
                    .await
                    .and_then(|line| parse_power(&line));
                let _ = reply.send(sample);
            }
            Request::SetActuator(command, reply) => {
                let on_off = if command.status == ActuatorStatus::On {
                    "ON"
                } else {
                    "OFF"
                };
                let line = format!("SET:L298:{}:{on_off}\n", command.pwm_level);
                if let Err(err) = reader.get_mut().write_all(line.as_bytes()).await {
                    error!("serial bridge: write failed: {err}");
                }
                let _ = reply.send(());
            }
        }
    }
}

/// Drop any bytes left over from a previous, abandoned round trip: first the
/// reader's own buffered-but-unread bytes, then anything still arriving from
/// the port within `DISCARD_TIMEOUT`.
async fn discard_stale_input<R>(reader: &mut BufReader<R>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let buffered = reader.buffer().len();
    if buffered > 0 {
        Pin::new(&mut *reader).consume(buffered);
    }

    let mut discard = [0u8; 256];
    loop {
        match tokio::time::timeout(DISCARD_TIMEOUT, reader.read(&mut discard)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                error!("serial bridge: error discarding stale input: {err}");
                break;
            }
        }
    }
}

async fn round_trip<R>(reader: &mut BufReader<R>, request: &str) -> Option<String>
where
    R: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    discard_stale_input(reader).await;

    if let Err(err) = reader.get_mut().write_all(request.as_bytes()).await {
        error!("serial bridge: write failed: {err}");
        return None;
    }

    let mut line = String::new();
    match tokio::time::timeout(REQUEST_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(Ok(0)) => {
            error!("serial bridge: port closed");
            None
        }
        Ok(Ok(_)) => Some(line.trim_end().to_string()),
        Ok(Err(err)) => {
            error!("serial bridge: read failed: {err}");
            None
        }
        Err(_) => {
            error!("serial bridge: request timed out");
            None
        }
    }
}

fn parse_distance(line: &str) -> Option<ProximitySample> {
    let value = line.strip_prefix("DIST:")?;
    let distance_cm: f64 = value.parse().ok()?;
    Some(ProximitySample { distance_cm })
}

fn parse_power(line: &str) -> Option<PowerSample> {
    let value = line.strip_prefix("PWR:")?;
    let mut parts = value.split(':');
    let voltage: f64 = parts.next()?.parse().ok()?;
    let current: f64 = parts.next()?.parse().ok()?;
    let power_kw: f64 = parts.next()?.parse().ok()?;
    Some(PowerSample {
        voltage,
        current,
        power_kw,
    })
}

/// A serial-backed power meter. On I/O failure, retains the last cached
/// reading (spec §7 "sensor read failure").
pub struct SerialPowerMeter {
    bridge: SerialBridge,
    last: tokio::sync::Mutex<PowerSample>,
}

impl SerialPowerMeter {
    /// Wrap a bridge, starting from an all-zero cached reading.
    #[must_use]
    pub fn new(bridge: SerialBridge) -> Self {
        Self {
            bridge,
            last: tokio::sync::Mutex::new(PowerSample {
                voltage: 0.0,
                current: 0.0,
                power_kw: 0.0,
            }),
        }
    }
}

#[async_trait]
impl PowerMeter for SerialPowerMeter {
    async fn measure(&self) -> PowerSample {
        let (tx, rx) = oneshot::channel();
        if self.bridge.tx.send(Request::GetPower(tx)).await.is_ok() {
            if let Ok(Some(sample)) = rx.await {
                *self.last.lock().await = sample;
                return sample;
            }
        }
        error!("serial power meter: read failed, reusing last cached value");
        *self.last.lock().await
    }
}

/// A serial-backed proximity sensor. Same retain-last-value-on-failure
/// policy as `SerialPowerMeter`.
pub struct SerialProximitySensor {
    bridge: SerialBridge,
    last: tokio::sync::Mutex<ProximitySample>,
}

impl SerialProximitySensor {
    /// Wrap a bridge, starting from a far-away cached reading.
    #[must_use]
    pub fn new(bridge: SerialBridge) -> Self {
        Self {
            bridge,
            last: tokio::sync::Mutex::new(ProximitySample { distance_cm: 999.0 }),
        }
    }
}

#[async_trait]
impl ProximitySensor for SerialProximitySensor {
    async fn measure(&self) -> ProximitySample {
        let (tx, rx) = oneshot::channel();
        if self.bridge.tx.send(Request::GetDistance(tx)).await.is_ok() {
            if let Ok(Some(sample)) = rx.await {
                *self.last.lock().await = sample;
                return sample;
            }
        }
        error!("serial proximity sensor: read failed, reusing last cached value");
        *self.last.lock().await
    }
}

/// A serial-backed actuator.
pub struct SerialActuator {
    bridge: SerialBridge,
}

impl SerialActuator {
    /// Wrap a bridge.
    #[must_use]
    pub fn new(bridge: SerialBridge) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Actuator for SerialActuator {
    async fn apply(&self, command: ActuatorCommand) -> Result<(), ActuatorError> {
        let (tx, rx) = oneshot::channel();
        self.bridge
            .tx
            .send(Request::SetActuator(command, tx))
            .await
            .map_err(|err| ActuatorError(err.to_string()))?;
        rx.await.map_err(|err| ActuatorError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_distance() {
        let sample = parse_distance("DIST:12.5").unwrap();
        assert!((sample.distance_cm - 12.5).abs() < f64::EPSILON);
        assert!(parse_distance("GARBAGE").is_none());
    }

    #[test]
    fn test_parse_power() {
        let sample = parse_power("PWR:12.0:2.0:0.024").unwrap();
        assert!((sample.voltage - 12.0).abs() < f64::EPSILON);
        assert!((sample.current - 2.0).abs() < f64::EPSILON);
        assert!((sample.power_kw - 0.024).abs() < f64::EPSILON);
        assert!(parse_power("GARBAGE").is_none());
    }
}
