//! Ultrasonic ranging.
//!
//! Each measurement holds the trigger low to settle, raises it for a short
//! pulse, and reads the echo pulse width. Sound covers about 29 µs per
//! centimetre, and the echo travels there and back.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Deserialize;
use tracing::{trace, warn};

use crate::system::shared_state::{SharedState, Worker};

use super::transport::TransportError;

const MICROS_PER_CM: f64 = 29.0;

/// Digital trigger line and pulse-width input of the range sensor.
pub trait RangingInput: Send {
    fn trigger(&mut self, high: bool) -> Result<(), TransportError>;
    /// Width of the last echo pulse.
    fn echo_pulse(&mut self) -> Result<Duration, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangingReading {
    pub distance_cm: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RangingParams {
    pub poll_interval_ms: u64,
    pub settle_ms: u64,
    pub trigger_pulse_ns: u64,
}

impl Default for RangingParams {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            settle_ms: 5,
            trigger_pulse_ns: 10,
        }
    }
}

/// Distance for an echo pulse width.
pub fn echo_to_cm(echo: Duration) -> f64 {
    echo.as_secs_f64() * 1e6 / MICROS_PER_CM / 2.0
}

/// Run one trigger/echo cycle.
pub fn measure(input: &mut dyn RangingInput, params: &RangingParams) -> Result<RangingReading, TransportError> {
    input.trigger(false)?;
    thread::sleep(Duration::from_millis(params.settle_ms));
    input.trigger(true)?;
    thread::sleep(Duration::from_nanos(params.trigger_pulse_ns));
    input.trigger(false)?;
    let echo = input.echo_pulse()?;
    Ok(RangingReading {
        distance_cm: echo_to_cm(echo),
    })
}

/// Thread that keeps `SharedState::ranging` current.
pub struct RangingPoller {
    handle: Option<JoinHandle<()>>,
    shared: Arc<SharedState>,
}

impl RangingPoller {
    pub fn spawn(mut input: Box<dyn RangingInput>, params: RangingParams, shared: Arc<SharedState>) -> Self {
        let thread_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || {
            let interval = Duration::from_millis(params.poll_interval_ms);
            while !thread_shared.should_stop(Worker::Ranging) {
                match measure(input.as_mut(), &params) {
                    Ok(reading) => {
                        trace!(distance_cm = reading.distance_cm, "range");
                        thread_shared.ranging.publish(reading);
                    }
                    Err(TransportError::Disconnected) => {
                        warn!("range sensor disconnected, stopping poller");
                        break;
                    }
                    Err(e) => warn!("range measurement failed: {}", e),
                }
                thread::sleep(interval);
            }
        });
        Self {
            handle: Some(handle),
            shared,
        }
    }

    pub fn shutdown(&mut self) {
        self.shared.request_stop(Worker::Ranging);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RangingPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedRanging;
    use approx::assert_relative_eq;

    #[test]
    fn test_echo_conversion() {
        assert_relative_eq!(echo_to_cm(Duration::from_micros(5800)), 100.0, epsilon = 1e-9);
        assert_relative_eq!(echo_to_cm(Duration::ZERO), 0.0);
    }

    #[test]
    fn test_trigger_sequence() {
        let mut sensor = SimulatedRanging::new(50.0);
        let reading = measure(&mut sensor, &RangingParams::default()).unwrap();
        assert_relative_eq!(reading.distance_cm, 50.0, epsilon = 1e-6);
        assert_eq!(sensor.trigger_log(), vec![false, true, false]);
    }

    #[test]
    fn test_failures_keep_last_value() {
        let shared = SharedState::new();
        let sensor = SimulatedRanging::new(120.0).failing_after(1);
        let params = RangingParams {
            poll_interval_ms: 1,
            settle_ms: 0,
            trigger_pulse_ns: 0,
        };
        let mut poller = RangingPoller::spawn(Box::new(sensor), params, Arc::clone(&shared));
        thread::sleep(Duration::from_millis(50));
        poller.shutdown();
        let reading = shared.ranging.get().unwrap();
        assert_relative_eq!(reading.distance_cm, 120.0, epsilon = 1e-6);
    }
}
