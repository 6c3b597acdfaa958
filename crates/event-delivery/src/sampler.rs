//! Admission control consulted by transports before any I/O.

use crate::error::{ConfigError, ConfigResult};
use crate::event::Event;
use rand::Rng;

/// Decides whether an event is sent at all.
pub trait EventSampler: Send + Sync + std::fmt::Debug {
    fn should_send_event(&self, event: &Event) -> bool;
}

/// Keeps each event independently with a fixed probability.
#[derive(Debug, Clone, Copy)]
pub struct RandomEventSampler {
    rate: f64,
}

impl RandomEventSampler {
    /// `rate` must be within `[0, 1]`.
    pub fn new(rate: f64) -> ConfigResult<Self> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::Invalid(format!(
                "sample rate must be between 0 and 1, got {rate}"
            )));
        }
        Ok(Self { rate })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl EventSampler for RandomEventSampler {
    fn should_send_event(&self, _event: &Event) -> bool {
        rand::thread_rng().gen::<f64>() < self.rate
    }
}
