//! Per-message decision pipeline.
//!
//! Each stage reads the routing cache and the message, records what it did on
//! the [`RouteContext`], and at most enqueues onto a remote queue. Stages never
//! perform I/O themselves.

mod authorization;
mod composite;
mod fanout;
mod network_event;
mod validation;

use std::sync::Arc;

use crate::message::{NetworkEventAction, PlatformMessage};
use crate::model::Sensor;

pub use authorization::{AuthorizationError, AuthorizationRouter};
pub use composite::{CompositeRouter, RouterStats, RouterStatsSnapshot};
pub use fanout::{LiveDataRouter, PublicRouter, StorageRouter, TriggerRouter, ID_NEEDLE};
pub use network_event::NetworkEventRouter;
pub use validation::{ValidationError, ValidationRouter};

/// Why a message was dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    Validation(ValidationError),
    Authorization(AuthorizationError),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Validation(e) => write!(f, "validation failed: {}", e),
            RejectReason::Authorization(e) => write!(f, "authorization failed: {}", e),
        }
    }
}

impl std::error::Error for RejectReason {}

impl From<ValidationError> for RejectReason {
    fn from(e: ValidationError) -> Self {
        RejectReason::Validation(e)
    }
}

impl From<AuthorizationError> for RejectReason {
    fn from(e: AuthorizationError) -> Self {
        RejectReason::Authorization(e)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Keep going with the next stage.
    Continue,
    /// Disposition settled; only bookkeeping stages still run.
    Handled,
    Rejected(RejectReason),
}

/// State carried through one pass of the pipeline.
#[derive(Debug)]
pub struct RouteContext<'a> {
    pub message: &'a PlatformMessage,
    /// Set once authorization resolves the sensor.
    pub sensor: Option<Arc<Sensor>>,
    pub actions: Vec<NetworkEventAction>,
    pub rejection: Option<RejectReason>,
}

impl<'a> RouteContext<'a> {
    pub fn new(message: &'a PlatformMessage) -> Self {
        Self {
            message,
            sensor: None,
            actions: Vec::new(),
            rejection: None,
        }
    }

    pub fn record(&mut self, action: NetworkEventAction) {
        if !self.actions.contains(&action) {
            self.actions.push(action);
        }
    }
}

/// One stage of the pipeline.
pub trait Router: Send + Sync {
    fn name(&self) -> &'static str;

    fn route(&self, ctx: &mut RouteContext<'_>) -> RouteOutcome;

    /// Bookkeeping stages run even after an earlier stage rejected or handled the message.
    fn is_bookkeeping(&self) -> bool {
        false
    }
}
