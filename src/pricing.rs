// Versioned pricing: append-only rate history per (resource,
// deployment type), point-in-time lookup, atomic table swap on reload.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{MeterError, MeterResult};
use crate::models::{DeploymentType, PricingRate, RateUnit, ResourceType};

/// Immutable view of all rates at one pricing version. Lookups resolve
/// to the most recent rate whose `effective_from` is at or before the
/// asked-for instant; a miss is an error, never a free sample.
pub struct PricingTable {
    version: u64,
    rates: HashMap<(ResourceType, DeploymentType), Vec<PricingRate>>,
}

impl PricingTable {
    /// Build a table from an unordered rate list. Each series is
    /// sorted by `effective_from`; on equal timestamps the later
    /// entry in the input wins.
    pub fn from_rates(version: u64, all: Vec<PricingRate>) -> Self {
        let mut rates: HashMap<(ResourceType, DeploymentType), Vec<PricingRate>> = HashMap::new();
        for rate in all {
            rates
                .entry((rate.resource_type, rate.deployment_type))
                .or_default()
                .push(rate);
        }
        for series in rates.values_mut() {
            series.sort_by_key(|r| r.effective_from);
        }
        Self { version, rates }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Rate in force for `resource`/`deployment_type` at `at_ms`.
    pub fn rate(
        &self,
        resource: ResourceType,
        deployment_type: DeploymentType,
        at_ms: i64,
    ) -> MeterResult<&PricingRate> {
        let not_found = || MeterError::RateNotFound {
            resource_type: resource,
            deployment_type,
            at: at_ms,
        };
        let series = self
            .rates
            .get(&(resource, deployment_type))
            .ok_or_else(not_found)?;
        let idx = series.partition_point(|r| r.effective_from <= at_ms);
        if idx == 0 {
            return Err(not_found());
        }
        Ok(&series[idx - 1])
    }

    /// Every rate in the table, newest first within each series.
    pub fn all_rates(&self) -> Vec<PricingRate> {
        let mut out: Vec<PricingRate> = self.rates.values().flatten().cloned().collect();
        out.sort_by(|a, b| {
            a.resource_type
                .as_str()
                .cmp(b.resource_type.as_str())
                .then(a.deployment_type.as_str().cmp(b.deployment_type.as_str()))
                .then(b.effective_from.cmp(&a.effective_from))
        });
        out
    }
}

/// Platform launch rates, installed once when the store has no pricing
/// rows at all: cpu $0.0416/core-hour, memory $0.0056/GiB-hour,
/// network $0.09/GB transferred, storage $0.10/GiB-month.
pub fn default_rates() -> Vec<PricingRate> {
    let mut rates = Vec::new();
    for dt in DeploymentType::ALL {
        rates.push(PricingRate {
            resource_type: ResourceType::Cpu,
            deployment_type: dt,
            price: Decimal::new(416, 4),
            unit: RateUnit::PerHour,
            currency: "USD".to_string(),
            effective_from: 0,
        });
        rates.push(PricingRate {
            resource_type: ResourceType::Memory,
            deployment_type: dt,
            price: Decimal::new(56, 4),
            unit: RateUnit::PerGbHour,
            currency: "USD".to_string(),
            effective_from: 0,
        });
        rates.push(PricingRate {
            resource_type: ResourceType::Network,
            deployment_type: dt,
            price: Decimal::new(9, 2),
            unit: RateUnit::PerGb,
            currency: "USD".to_string(),
            effective_from: 0,
        });
        rates.push(PricingRate {
            resource_type: ResourceType::Storage,
            deployment_type: dt,
            price: Decimal::new(10, 2),
            unit: RateUnit::PerGbMonth,
            currency: "USD".to_string(),
            effective_from: 0,
        });
    }
    rates
}

/// Shared handle to the current pricing table. Readers grab an `Arc`
/// and keep pricing consistent for their whole pass even if a new
/// table lands mid-flight.
pub struct SharedPricing {
    inner: RwLock<Arc<PricingTable>>,
}

impl SharedPricing {
    pub fn new(table: PricingTable) -> Self {
        Self {
            inner: RwLock::new(Arc::new(table)),
        }
    }

    pub async fn current(&self) -> Arc<PricingTable> {
        self.inner.read().await.clone()
    }

    /// Swap in a table rebuilt from the full rate list, one version up.
    pub async fn install(&self, all: Vec<PricingRate>) -> u64 {
        let mut guard = self.inner.write().await;
        let version = guard.version() + 1;
        *guard = Arc::new(PricingTable::from_rates(version, all));
        info!(version, rates = guard.rates.len(), "installed pricing table");
        version
    }
}
