// src/tier/mod.rs — Tier adapter layer
//
// Adapters wrap an external extraction capability (a local parser, an OCR
// engine, a hosted vision model). The pipeline only ever sees the
// `TierAdapter` contract below.

pub mod command;
pub mod http;
pub mod retry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::types::Tier;
use crate::infra::config::Config;
use crate::infra::errors::BillwiseError;

pub use command::CommandAdapter;
pub use http::HttpAdapter;

/// Core trait that every tier adapter implements.
#[async_trait]
pub trait TierAdapter: Send + Sync {
    fn tier(&self) -> Tier;

    /// Whether the adapter's dependency is installed / reachable.
    /// Checked once per document before invoking.
    async fn is_available(&self) -> Result<(), String>;

    async fn extract(&self, bytes: &[u8], media_type: &str) -> Result<TierOutput, TierFailure>;
}

/// Raw output of one successful adapter call.
#[derive(Debug, Clone, Default)]
pub struct TierOutput {
    pub fields: Map<String, Value>,
    pub confidence: Option<f64>,
    /// Text the adapter worked from; required for evidence anchoring.
    pub raw_text: Option<String>,
    /// Actual cost of the call, when the backend reports one.
    pub cost: Option<f64>,
    pub latency: Option<Duration>,
}

/// Adapter failure contract.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TierFailure {
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("transient failure: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("rejected: {0}")]
    Rejected(String),
}

impl TierFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        TierFailure::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, TierFailure::Transient { .. })
    }

    /// Server-supplied wait before the next call, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TierFailure::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// JSON document an external adapter returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterResponse {
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub raw_text: Option<String>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

impl AdapterResponse {
    pub fn parse(body: &[u8]) -> Result<Self, TierFailure> {
        serde_json::from_slice(body)
            .map_err(|e| TierFailure::Rejected(format!("invalid adapter response: {e}")))
    }

    pub fn into_output(self, measured: Duration) -> TierOutput {
        TierOutput {
            fields: self.fields,
            confidence: self.confidence,
            raw_text: self.raw_text,
            cost: self.cost,
            latency: Some(
                self.latency_ms
                    .map(Duration::from_millis)
                    .unwrap_or(measured),
            ),
        }
    }
}

/// Adapters by tier.
#[derive(Default, Clone)]
pub struct TierRegistry {
    adapters: HashMap<Tier, Arc<dyn TierAdapter>>,
}

impl TierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn TierAdapter>) {
        self.adapters.insert(adapter.tier(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn TierAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, tier: Tier) -> Result<&Arc<dyn TierAdapter>, BillwiseError> {
        self.adapters
            .get(&tier)
            .ok_or_else(|| BillwiseError::TierNotConfigured {
                tier: tier.to_string(),
            })
    }

    pub fn tiers(&self) -> Vec<Tier> {
        let mut tiers: Vec<Tier> = self.adapters.keys().copied().collect();
        tiers.sort();
        tiers
    }

    /// Build adapters from `[tiers.*]`. A tier with a `command` gets a
    /// process adapter, one with an `endpoint` an HTTP adapter; disabled
    /// or unwired tiers are left out and later reported unavailable.
    pub fn from_config(config: &Config) -> Result<Self, BillwiseError> {
        let mut registry = Self::new();
        for tier in Tier::ALL {
            let settings = config.tiers.get(tier);
            if !settings.enabled {
                tracing::debug!(tier = %tier, "Tier disabled in config");
                continue;
            }
            if let Some(command) = &settings.command {
                registry.register(Arc::new(CommandAdapter::new(
                    tier,
                    command,
                    settings.args.clone(),
                    Duration::from_secs(settings.request_timeout_secs),
                )));
            } else if let Some(endpoint) = &settings.endpoint {
                registry.register(Arc::new(HttpAdapter::new(
                    tier,
                    endpoint,
                    &settings.headers,
                    Duration::from_secs(settings.request_timeout_secs),
                )?));
            }
        }
        Ok(registry)
    }
}
