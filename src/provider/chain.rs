//! Ordered failover across providers.
//!
//! Primaries run in declared order with the full request; the first success
//! wins. Rate limits and transient failures advance the chain immediately
//! (no backoff, someone is waiting on the reply). Once the primaries are
//! exhausted, the fallback provider gets exactly one attempt with the
//! degraded request shape.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::provider::{ModelProvider, ModelRequest, ModelResult};

pub struct ProviderChain {
    primaries: Vec<Arc<dyn ModelProvider>>,
    fallback: Option<Arc<dyn ModelProvider>>,
}

impl ProviderChain {
    pub fn new(
        primaries: Vec<Arc<dyn ModelProvider>>,
        fallback: Option<Arc<dyn ModelProvider>>,
    ) -> Self {
        Self { primaries, fallback }
    }

    /// Run the request down the chain. Returns `Success` from the first
    /// provider that produces text, otherwise the terminal failure.
    pub async fn generate(&self, request: &ModelRequest) -> ModelResult {
        for provider in &self.primaries {
            match self.attempt(provider.as_ref(), request).await {
                ModelResult::Success { text } => return ModelResult::Success { text },
                ModelResult::RateLimited => {
                    warn!(provider = %provider.name(), "Rate limited, advancing chain");
                }
                ModelResult::TransientError => {
                    warn!(provider = %provider.name(), "Transient failure, advancing chain");
                }
                ModelResult::FatalError { detail } => {
                    error!(provider = %provider.name(), %detail, "Fatal failure, advancing chain");
                }
            }
        }

        let Some(ref fallback) = self.fallback else {
            warn!("All primary providers exhausted and no fallback configured");
            return ModelResult::FatalError {
                detail: "all providers exhausted".into(),
            };
        };

        // The fallback family is text-only, so it gets the degraded shape.
        let degraded = request.degraded();
        match self.attempt(fallback.as_ref(), &degraded).await {
            ModelResult::Success { text } => ModelResult::Success { text },
            ModelResult::RateLimited => {
                warn!(provider = %fallback.name(), "Fallback rate limited");
                ModelResult::FatalError {
                    detail: "all providers exhausted".into(),
                }
            }
            ModelResult::TransientError => {
                warn!(provider = %fallback.name(), "Fallback failed transiently");
                ModelResult::FatalError {
                    detail: "all providers exhausted".into(),
                }
            }
            ModelResult::FatalError { detail } => {
                error!(provider = %fallback.name(), %detail, "Fallback failed");
                ModelResult::FatalError { detail }
            }
        }
    }

    async fn attempt(&self, provider: &dyn ModelProvider, request: &ModelRequest) -> ModelResult {
        let started = Instant::now();
        let result = provider.generate(request).await;
        if let ModelResult::Success { .. } = result {
            info!(
                provider = %provider.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Generation succeeded"
            );
        }
        result
    }
}
