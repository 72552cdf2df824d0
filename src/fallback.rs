use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::SearchBackend;
use crate::error::{GraylogMcpError, Result, VariantFailure};
use crate::payload::PayloadVariant;

/// The winning variant's raw reply plus the failures that preceded it.
#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    pub label: &'static str,
    pub raw: Value,
    pub failures: Vec<VariantFailure>,
}

/// 回退执行器：依次尝试每个载荷变体，第一个成功即返回。
///
/// Variants are tried strictly in order, each exactly once. This finds
/// which payload shape the backend accepts; it is not a retry loop.
#[derive(Clone, Default)]
pub struct FallbackExecutor;

impl FallbackExecutor {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self, variants: Vec<PayloadVariant>, backend: &dyn SearchBackend) -> Result<FallbackOutcome> {
        let mut failures = Vec::with_capacity(variants.len());
        for variant in variants {
            match backend.execute(&variant.payload).await {
                Ok(raw) => {
                    debug!(variant = variant.label, skipped = failures.len(), "aggregation variant accepted");
                    return Ok(FallbackOutcome {
                        label: variant.label,
                        raw,
                        failures,
                    });
                }
                Err(e) => {
                    warn!(variant = variant.label, error = %e, "aggregation variant failed");
                    failures.push(VariantFailure {
                        label: variant.label.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Err(GraylogMcpError::AllVariantsFailed { attempts: failures })
    }
}
