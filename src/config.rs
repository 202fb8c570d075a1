//! Adapter configuration.

use crate::error::{AdapterError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Subscription name handed to the backend when none is configured.
pub const DEFAULT_SUBSCRIPTION_NAME: &str = "realtime-adapter";

/// Per-model settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPolicy {
    /// Establish a live watch after successful reads of this model.
    pub watch: bool,

    /// Backend collection name (None = the model name).
    pub collection: Option<String>,
}

/// Adapter configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Name the adapter registers its watches under.
    /// Default: "realtime-adapter"
    pub subscription_name: String,

    /// Reject models that have no entry in `models`.
    /// Default: false
    pub strict_models: bool,

    /// Policies by model name.
    pub models: HashMap<String, ModelPolicy>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            subscription_name: DEFAULT_SUBSCRIPTION_NAME.to_string(),
            strict_models: false,
            models: HashMap::new(),
        }
    }
}

impl AdapterConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: AdapterConfig = serde_json::from_str(json)
            .map_err(|e| AdapterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.subscription_name.trim().is_empty() {
            return Err(AdapterError::Config(
                "subscription_name must not be empty".to_string(),
            ));
        }
        for (model, policy) in &self.models {
            if let Some(collection) = &policy.collection {
                if collection.trim().is_empty() {
                    return Err(AdapterError::Config(format!(
                        "model '{}' has an empty collection override",
                        model
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn with_subscription_name(mut self, name: impl Into<String>) -> Self {
        self.subscription_name = name.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>, policy: ModelPolicy) -> Self {
        self.models.insert(model.into(), policy);
        self
    }

    /// Mark a model as watch-eligible, keeping any other settings it has.
    pub fn watch_model(mut self, model: impl Into<String>) -> Self {
        self.models.entry(model.into()).or_default().watch = true;
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict_models = true;
        self
    }

    pub fn policy(&self, model: &str) -> Option<&ModelPolicy> {
        self.models.get(model)
    }

    pub fn is_watch_eligible(&self, model: &str) -> bool {
        self.policy(model).map(|p| p.watch).unwrap_or(false)
    }

    /// Backend collection for a model.
    pub fn collection_for<'a>(&'a self, model: &'a str) -> &'a str {
        self.policy(model)
            .and_then(|p| p.collection.as_deref())
            .unwrap_or(model)
    }

    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            name: self.subscription_name.clone(),
        }
    }
}

/// Options passed along with every backend watch call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchOptions {
    pub name: String,
}
