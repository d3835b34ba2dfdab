use crate::message::PlatformMessage;

use super::{RouteContext, RouteOutcome, Router};

pub const DEFAULT_MAX_DATA_POINTS: usize = 25;

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    LatitudeOutOfRange(f64),
    LongitudeOutOfRange(f64),
    TooManyDataPoints { count: usize, max: usize },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::LatitudeOutOfRange(v) => write!(f, "latitude {} out of range", v),
            ValidationError::LongitudeOutOfRange(v) => write!(f, "longitude {} out of range", v),
            ValidationError::TooManyDataPoints { count, max } => {
                write!(f, "{} data points exceeds maximum of {}", count, max)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Geo bounds and data point ceiling.
pub struct ValidationRouter {
    max_data_points: usize,
}

impl Default for ValidationRouter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DATA_POINTS)
    }
}

impl ValidationRouter {
    pub fn new(max_data_points: usize) -> Self {
        Self { max_data_points }
    }

    pub fn validate(&self, message: &PlatformMessage) -> Result<(), ValidationError> {
        if let Some(location) = message.location() {
            if !location.is_unset() {
                // NaN fails both range checks
                if !(-90.0..=90.0).contains(&location.latitude) {
                    return Err(ValidationError::LatitudeOutOfRange(location.latitude));
                }
                if !(-180.0..=180.0).contains(&location.longitude) {
                    return Err(ValidationError::LongitudeOutOfRange(location.longitude));
                }
            }
        }

        if let PlatformMessage::Measurement(m) = message {
            if m.data.len() > self.max_data_points {
                return Err(ValidationError::TooManyDataPoints {
                    count: m.data.len(),
                    max: self.max_data_points,
                });
            }
        }
        Ok(())
    }
}

impl Router for ValidationRouter {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn route(&self, ctx: &mut RouteContext<'_>) -> RouteOutcome {
        match self.validate(ctx.message) {
            Ok(()) => RouteOutcome::Continue,
            Err(e) => RouteOutcome::Rejected(e.into()),
        }
    }
}
