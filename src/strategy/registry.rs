//! Startup-time mapping from strategy kind to constructor.

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use super::{CheapHedge, PremiumSell, RangeBreakout, Strategy, StrategyInstance};
use crate::config::StrategyConfig;
use crate::utils::TradingCalendar;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("strategy '{id}': unknown kind '{kind}'")]
    UnknownKind { id: String, kind: String },

    #[error("strategy '{0}' is configured more than once")]
    DuplicateInstance(String),

    #[error("strategy '{id}': invalid params: {message}")]
    InvalidParams { id: String, message: String },
}

/// Builds a strategy from its free-form `params`.
pub type StrategyFactory = fn(&serde_json::Value) -> Result<Box<dyn Strategy>, String>;

/// Decode strategy params; an absent block means defaults.
pub(crate) fn decode_params<T: DeserializeOwned + Default>(
    params: &serde_json::Value,
) -> Result<T, String> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone()).map_err(|e| e.to_string())
}

pub struct StrategyRegistry {
    factories: HashMap<&'static str, StrategyFactory>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every bundled strategy.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(PremiumSell::KIND, |params| {
            Ok(Box::new(PremiumSell::new(decode_params(params)?)))
        });
        registry.register(RangeBreakout::KIND, |params| {
            Ok(Box::new(RangeBreakout::new(decode_params(params)?)))
        });
        registry.register(CheapHedge::KIND, |params| {
            Ok(Box::new(CheapHedge::new(decode_params(params)?)))
        });
        registry
    }

    pub fn register(&mut self, kind: &'static str, factory: StrategyFactory) {
        self.factories.insert(kind, factory);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Check every configured instance without building it.
    pub fn validate(&self, configs: &[StrategyConfig]) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for config in configs {
            if !seen.insert(config.id.as_str()) {
                return Err(RegistryError::DuplicateInstance(config.id.clone()));
            }
            self.construct(config)?;
        }
        Ok(())
    }

    fn construct(&self, config: &StrategyConfig) -> Result<Box<dyn Strategy>, RegistryError> {
        let factory = self
            .factories
            .get(config.kind.as_str())
            .ok_or_else(|| RegistryError::UnknownKind {
                id: config.id.clone(),
                kind: config.kind.clone(),
            })?;
        factory(&config.params).map_err(|message| RegistryError::InvalidParams {
            id: config.id.clone(),
            message,
        })
    }

    /// One instance per configured strategy, in configuration order.
    pub fn build(
        &self,
        configs: &[StrategyConfig],
        multiplier: Decimal,
        calendar: Arc<TradingCalendar>,
    ) -> Result<Vec<Arc<StrategyInstance>>, RegistryError> {
        self.validate(configs)?;

        let mut instances = Vec::with_capacity(configs.len());
        for config in configs {
            let strategy = self.construct(config)?;
            info!(
                strategy = %config.id,
                kind = %config.kind,
                enabled = config.enabled,
                "Strategy registered"
            );
            instances.push(Arc::new(StrategyInstance::new(
                config.clone(),
                strategy,
                multiplier,
                Arc::clone(&calendar),
            )));
        }
        Ok(instances)
    }
}
