//! Concrete capabilities for the EchoFlow engine.
//!
//! Each adapter implements [`echoflow_engine::Capability`] and is registered
//! with a [`echoflow_engine::CapabilityRegistry`] by the host.

pub mod error;
pub mod n8n_webhook;

pub use error::{AdapterError, Result};
pub use n8n_webhook::{N8nWebhookCapability, N8nWebhookConfig};
