//! Subscription primitive the updater assumes from the remote-config
//! transport: versioned JSON payloads keyed by config ID, and an
//! acknowledgement sink that must be called exactly once per delivered ID.
//! The transport itself (polling, authentication, persistence) lives outside
//! this crate.

use std::collections::HashMap;
use std::sync::Arc;

/// One versioned configuration document as delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RawConfig {
    pub config: Vec<u8>,
}

impl RawConfig {
    pub fn new(config: impl Into<Vec<u8>>) -> Self {
        Self {
            config: config.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyState {
    Acknowledged,
    Error,
}

/// Outcome reported back to the sender for one config ID.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyStatus {
    pub state: ApplyState,
    pub error: String,
}

impl ApplyStatus {
    pub fn acknowledged() -> Self {
        Self {
            state: ApplyState::Acknowledged,
            error: String::new(),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            state: ApplyState::Error,
            error: msg.into(),
        }
    }
}

/// Receives exactly one acknowledgement per delivered config ID.
pub trait ApplyStatusSink {
    fn ack(&self, config_id: &str, status: ApplyStatus);
}

/// Implemented by subscribers; invoked by the transport whenever the set of
/// configs for a subscribed product changes.
pub trait ConfigUpdateHandler: Send + Sync {
    fn on_update(&self, configs: &HashMap<String, RawConfig>, sink: &dyn ApplyStatusSink);
}

/// The slice of the remote-config client the updater depends on.
pub trait RemoteConfigClient {
    fn subscribe(&self, product: &str, handler: Arc<dyn ConfigUpdateHandler>);
}
