//! Collaborator interfaces: generation backend and notification sink.
//!
//! The engine never talks to a model vendor directly; it issues one
//! [`GenerationRequest`] per stage run through [`GenerationClient`] and
//! reports user-visible status through [`Notifier`].

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// One generation request, fully assembled by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// When present, generation is constrained to this schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// The collaborator's reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
}

/// The external generation collaborator.
///
/// # Contract
///
/// - At most one underlying invocation per `generate` call.
/// - The `cancel` token must be honored promptly: once signalled, the
///   call settles (with any result or error) instead of blocking; the
///   engine discards whatever it returns after cancellation.
/// - The collaborator bounds its own request time so the call always
///   eventually settles.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationResponse>;
}

/// One-way, fire-and-forget sink for user-visible status messages.
pub trait Notifier: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default notifier that forwards to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn info(&self, message: &str) {
        tracing::info!(target: "recast::notify", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "recast::notify", "{message}");
    }
}
