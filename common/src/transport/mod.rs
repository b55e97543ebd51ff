// Delivery transport interface
// One implementation per delivery channel; the scheduler never talks HTTP directly.

pub mod registry;
pub mod webhook;

pub use registry::{PlatformRegistry, PlatformRoute};
pub use webhook::WebhookTransport;

use crate::credentials::Credential;
use crate::errors::TransportError;
use crate::transform::PlatformPayload;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the platform returned for a created post
///
/// The permalink is untrusted until it has been parsed into a `Permalink`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePost {
    pub remote_id: String,
    #[serde(default)]
    pub permalink: String,
}

#[async_trait]
pub trait PlatformTransport: Send + Sync {
    async fn publish(
        &self,
        payload: &PlatformPayload,
        credential: &Credential,
    ) -> Result<RemotePost, TransportError>;
}
