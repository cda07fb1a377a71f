//! Bounded-random simulated hardware (spec §4.3).

use std::sync::Mutex;

use async_trait::async_trait;
use rand::Rng;

use super::{
    Actuator, ActuatorCommand, ActuatorError, PowerMeter, PowerSample, ProximitySample,
    ProximitySensor,
};

/// Simulated power meter: 0-26V, 0-3.2A.
#[derive(Default)]
pub struct SimPowerMeter;

#[async_trait]
impl PowerMeter for SimPowerMeter {
    async fn measure(&self) -> PowerSample {
        let mut rng = rand::thread_rng();
        let voltage = rng.gen_range(0.0..=26.0);
        let current = rng.gen_range(0.0..=3.2);
        PowerSample {
            voltage,
            current,
            power_kw: voltage * current / 1000.0,
        }
    }
}

/// Simulated proximity sensor: 2-50cm.
#[derive(Default)]
pub struct SimProximitySensor;

#[async_trait]
impl ProximitySensor for SimProximitySensor {
    async fn measure(&self) -> ProximitySample {
        let distance_cm = rand::thread_rng().gen_range(2.0..=50.0);
        ProximitySample { distance_cm }
    }
}

/// Simulated actuator: just remembers the last command.
#[derive(Default)]
pub struct SimActuator {
    last: Mutex<Option<ActuatorCommand>>,
}

#[async_trait]
impl Actuator for SimActuator {
    async fn apply(&self, command: ActuatorCommand) -> Result<(), ActuatorError> {
        let mut last = self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *last = Some(command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[tokio::test]
    async fn test_sim_power_meter_within_bounds() {
        let meter = SimPowerMeter;
        for _ in 0..50 {
            let sample = meter.measure().await;
            assert!((0.0..=26.0).contains(&sample.voltage));
            assert!((0.0..=3.2).contains(&sample.current));
        }
    }

    #[tokio::test]
    async fn test_sim_proximity_within_bounds() {
        let sensor = SimProximitySensor;
        for _ in 0..50 {
            let sample = sensor.measure().await;
            assert!((2.0..=50.0).contains(&sample.distance_cm));
        }
    }

    #[tokio::test]
    async fn test_sim_actuator_always_succeeds() {
        let actuator = SimActuator::default();
        let result = actuator
            .apply(ActuatorCommand::for_limit(10.0, 22.0))
            .await;
        assert!(result.is_ok());
    }
}
