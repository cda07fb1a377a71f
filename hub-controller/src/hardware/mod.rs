//! Hardware abstraction: two sensors and one actuator, each with a
//! simulation mode and a serial-bridge mode (spec §4.3, design note
//! "runtime-typed values dict → typed record").

pub mod serial;
pub mod sim;

use async_trait::async_trait;

/// A power-meter reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerSample {
    /// Volts.
    pub voltage: f64,
    /// Amps.
    pub current: f64,
    /// `voltage * current / 1000`, in kW.
    pub power_kw: f64,
}

/// A proximity-sensor reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximitySample {
    /// Distance in centimetres.
    pub distance_cm: f64,
}

/// Actuator on/off plus duty cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorStatus {
    /// Actuator engaged.
    On,
    /// Actuator disengaged.
    Off,
}

/// A command to the L298N-equivalent actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorCommand {
    /// On/off.
    pub status: ActuatorStatus,
    /// Duty cycle, \[0, 255\].
    pub pwm_level: u8,
}

impl ActuatorCommand {
    /// Compute the PWM level for a given power limit, per spec §4.1:
    /// `round((limit/max) * 255)`.
    #[must_use]
    pub fn for_limit(limit_kw: f64, max_kw: f64) -> Self {
        let pwm = if max_kw > 0.0 {
            ((limit_kw / max_kw) * 255.0).round().clamp(0.0, 255.0) as u8
        } else {
            0
        };
        Self {
            status: if pwm > 0 {
                ActuatorStatus::On
            } else {
                ActuatorStatus::Off
            },
            pwm_level: pwm,
        }
    }

    /// The fully-off command.
    #[must_use]
    pub fn off() -> Self {
        Self {
            status: ActuatorStatus::Off,
            pwm_level: 0,
        }
    }
}

/// A power meter: measure and cache voltage/current/power.
#[async_trait]
pub trait PowerMeter: Send + Sync {
    /// Take a fresh reading.
    async fn measure(&self) -> PowerSample;
}

/// A proximity sensor: measure and cache distance.
#[async_trait]
pub trait ProximitySensor: Send + Sync {
    /// Take a fresh reading.
    async fn measure(&self) -> ProximitySample;
}

/// The PWM actuator driving a node's charging pad.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Apply a command. Failures are logged by the caller (spec §7); this
    /// returns `Err` so the caller can retain the last-applied command.
    async fn apply(&self, command: ActuatorCommand) -> Result<(), ActuatorError>;
}

/// An actuator I/O failure.
#[derive(Debug, thiserror::Error)]
#[error("actuator apply failed: {0}")]
pub struct ActuatorError(pub String);
