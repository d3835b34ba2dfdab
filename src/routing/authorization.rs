use std::sync::Arc;
use tracing::debug;

use crate::cache::RoutingCache;
use crate::model::Sensor;

use super::{RouteContext, RouteOutcome, Router};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    UnknownSensor(String),
    UnknownAccount(String),
    AccountBanned,
    BillingLockout,
    UnknownApiKey,
    ApiKeyRevoked,
    ApiKeyAccountMismatch,
    ApiKeyReadOnly,
}

impl std::fmt::Display for AuthorizationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthorizationError::UnknownSensor(id) => write!(f, "unknown sensor {}", id),
            AuthorizationError::UnknownAccount(id) => write!(f, "unknown account {}", id),
            AuthorizationError::AccountBanned => write!(f, "account is banned"),
            AuthorizationError::BillingLockout => write!(f, "account is under billing lockout"),
            AuthorizationError::UnknownApiKey => write!(f, "unknown api key"),
            AuthorizationError::ApiKeyRevoked => write!(f, "api key is revoked"),
            AuthorizationError::ApiKeyAccountMismatch => {
                write!(f, "api key belongs to a different account")
            }
            AuthorizationError::ApiKeyReadOnly => write!(f, "api key is read-only"),
        }
    }
}

impl std::error::Error for AuthorizationError {}

/// Resolves the sensor and checks its account, the sensor's own key and any
/// key the message presents. Anything not in the cache is rejected.
pub struct AuthorizationRouter {
    cache: Arc<RoutingCache>,
}

impl AuthorizationRouter {
    pub fn new(cache: Arc<RoutingCache>) -> Self {
        Self { cache }
    }

    pub fn authorize(
        &self,
        sensor_id: &str,
        api_key: Option<&str>,
    ) -> Result<Arc<Sensor>, AuthorizationError> {
        let sensor = self
            .cache
            .sensor(sensor_id)
            .map_err(|_| AuthorizationError::UnknownSensor(sensor_id.to_string()))?;

        let account = self
            .cache
            .account(&sensor.account_id)
            .map_err(|_| AuthorizationError::UnknownAccount(sensor.account_id.clone()))?;
        if !account.is_usable() {
            return Err(if account.banned {
                AuthorizationError::AccountBanned
            } else {
                AuthorizationError::BillingLockout
            });
        }

        self.check_key(&sensor, &sensor.secret)?;
        match api_key {
            Some(key) if key != sensor.secret => self.check_key(&sensor, key)?,
            _ => {}
        }
        Ok(sensor)
    }

    fn check_key(&self, sensor: &Sensor, key: &str) -> Result<(), AuthorizationError> {
        let key = self
            .cache
            .api_key(key)
            .map_err(|_| AuthorizationError::UnknownApiKey)?;
        if key.revoked {
            return Err(AuthorizationError::ApiKeyRevoked);
        }
        if key.account_id != sensor.account_id {
            return Err(AuthorizationError::ApiKeyAccountMismatch);
        }
        // every ingested message is a write
        if key.read_only {
            return Err(AuthorizationError::ApiKeyReadOnly);
        }
        Ok(())
    }
}

impl Router for AuthorizationRouter {
    fn name(&self) -> &'static str {
        "authorization"
    }

    fn route(&self, ctx: &mut RouteContext<'_>) -> RouteOutcome {
        match self.authorize(ctx.message.sensor_id(), ctx.message.api_key()) {
            Ok(sensor) => {
                ctx.sensor = Some(sensor);
                RouteOutcome::Continue
            }
            Err(e) => {
                debug!(sensor_id = %ctx.message.sensor_id(), reason = %e, "message not authorized");
                RouteOutcome::Rejected(e.into())
            }
        }
    }
}
