// Pricing rates and cost breakdowns. Money is rust_decimal end to end;
// floats never touch a monetary value.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::DeploymentType;

/// Billable resource dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Cpu,
    Memory,
    Network,
    Storage,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Cpu => "cpu",
            ResourceType::Memory => "memory",
            ResourceType::Network => "network",
            ResourceType::Storage => "storage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cpu" => Some(ResourceType::Cpu),
            "memory" => Some(ResourceType::Memory),
            "network" => Some(ResourceType::Network),
            "storage" => Some(ResourceType::Storage),
            _ => None,
        }
    }

    pub const ALL: [ResourceType; 4] = [
        ResourceType::Cpu,
        ResourceType::Memory,
        ResourceType::Network,
        ResourceType::Storage,
    ];
}

/// Unit the price is quoted in. `PerGb` is per GB transferred (volume,
/// not time); `PerGbMonth` converts to an hourly charge at 730 h/month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateUnit {
    PerHour,
    PerGbHour,
    PerGb,
    PerGbMonth,
}

impl RateUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateUnit::PerHour => "per_hour",
            RateUnit::PerGbHour => "per_gb_hour",
            RateUnit::PerGb => "per_gb",
            RateUnit::PerGbMonth => "per_gb_month",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "per_hour" => Some(RateUnit::PerHour),
            "per_gb_hour" => Some(RateUnit::PerGbHour),
            "per_gb" => Some(RateUnit::PerGb),
            "per_gb_month" => Some(RateUnit::PerGbMonth),
            _ => None,
        }
    }
}

/// One versioned price point. Rates are append-only; the rate applied
/// to a sample is the latest one with `effective_from <= timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingRate {
    pub resource_type: ResourceType,
    pub deployment_type: DeploymentType,
    pub price: Decimal,
    pub unit: RateUnit,
    pub currency: String,
    /// Epoch millis from which this rate applies.
    pub effective_from: i64,
}

/// Monetary cost of one sample or one aggregated period, split by
/// resource. All components are non-negative and `total_cost` is
/// always their sum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    pub cpu_cost: Decimal,
    pub memory_cost: Decimal,
    pub network_cost: Decimal,
    pub storage_cost: Decimal,
    pub total_cost: Decimal,
}

impl CostBreakdown {
    pub fn new(cpu: Decimal, memory: Decimal, network: Decimal, storage: Decimal) -> Self {
        Self {
            cpu_cost: cpu,
            memory_cost: memory,
            network_cost: network,
            storage_cost: storage,
            total_cost: cpu + memory + network + storage,
        }
    }

    pub fn zero() -> Self {
        Self::new(
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
        )
    }
}

/// Result of pricing one snapshot. A missing rate is never a silent
/// zero; the sample stays in the books as unpriced until a rate
/// backfill and recompute heal it.
#[derive(Debug, Clone)]
pub enum SnapshotCost {
    Priced(CostBreakdown),
    Unpriced,
}
