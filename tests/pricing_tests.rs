// Pricing table tests: point-in-time rate lookup and table versioning

use meterd::error::MeterError;
use meterd::models::{DeploymentType, PricingRate, RateUnit, ResourceType};
use meterd::pricing::{PricingTable, SharedPricing, default_rates};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn rate(
    resource_type: ResourceType,
    deployment_type: DeploymentType,
    price: Decimal,
    effective_from: i64,
) -> PricingRate {
    PricingRate {
        resource_type,
        deployment_type,
        price,
        unit: RateUnit::PerHour,
        currency: "USD".to_string(),
        effective_from,
    }
}

#[test]
fn lookup_picks_latest_effective_rate() {
    let table = PricingTable::from_rates(
        1,
        vec![
            rate(ResourceType::Cpu, DeploymentType::Acp, dec!(0.04), 0),
            rate(ResourceType::Cpu, DeploymentType::Acp, dec!(0.05), 1_000),
            rate(ResourceType::Cpu, DeploymentType::Acp, dec!(0.06), 2_000),
        ],
    );

    let at = |ts| {
        table
            .rate(ResourceType::Cpu, DeploymentType::Acp, ts)
            .expect("rate in force")
            .price
    };
    assert_eq!(at(0), dec!(0.04));
    assert_eq!(at(500), dec!(0.04));
    // effective_from boundary is inclusive
    assert_eq!(at(1_000), dec!(0.05));
    assert_eq!(at(1_999), dec!(0.05));
    assert_eq!(at(2_000), dec!(0.06));
    assert_eq!(at(i64::MAX), dec!(0.06));
}

#[test]
fn lookup_before_first_effective_is_an_error() {
    let table = PricingTable::from_rates(
        1,
        vec![rate(ResourceType::Cpu, DeploymentType::Acp, dec!(0.04), 1_000)],
    );
    let err = table
        .rate(ResourceType::Cpu, DeploymentType::Acp, 999)
        .unwrap_err();
    assert!(matches!(err, MeterError::RateNotFound { .. }));
    assert!(err.to_string().contains("no cpu rate"));
}

#[test]
fn lookup_missing_series_is_an_error() {
    let table = PricingTable::from_rates(
        1,
        vec![rate(ResourceType::Cpu, DeploymentType::Acp, dec!(0.04), 0)],
    );
    let err = table
        .rate(ResourceType::Memory, DeploymentType::Acp, 5_000)
        .unwrap_err();
    assert!(matches!(err, MeterError::RateNotFound { .. }));
    let err = table
        .rate(ResourceType::Cpu, DeploymentType::Function, 5_000)
        .unwrap_err();
    assert!(matches!(err, MeterError::RateNotFound { .. }));
}

#[test]
fn equal_effective_from_later_entry_wins() {
    let table = PricingTable::from_rates(
        1,
        vec![
            rate(ResourceType::Cpu, DeploymentType::Acp, dec!(0.04), 1_000),
            rate(ResourceType::Cpu, DeploymentType::Acp, dec!(0.07), 1_000),
        ],
    );
    let r = table
        .rate(ResourceType::Cpu, DeploymentType::Acp, 1_000)
        .expect("rate in force");
    assert_eq!(r.price, dec!(0.07));
}

#[test]
fn default_rates_cover_every_resource_and_deployment_type() {
    let table = PricingTable::from_rates(1, default_rates());
    for resource in ResourceType::ALL {
        for deployment_type in DeploymentType::ALL {
            let r = table
                .rate(resource, deployment_type, 0)
                .expect("default rate present");
            assert_eq!(r.currency, "USD");
        }
    }
    // rate card spot checks
    let cpu = table
        .rate(ResourceType::Cpu, DeploymentType::Acp, 0)
        .unwrap();
    assert_eq!(cpu.price, dec!(0.0416));
    assert_eq!(cpu.unit, RateUnit::PerHour);
    let network = table
        .rate(ResourceType::Network, DeploymentType::Function, 0)
        .unwrap();
    assert_eq!(network.price, dec!(0.09));
    assert_eq!(network.unit, RateUnit::PerGb);
    let storage = table
        .rate(ResourceType::Storage, DeploymentType::Persistent, 0)
        .unwrap();
    assert_eq!(storage.price, dec!(0.10));
    assert_eq!(storage.unit, RateUnit::PerGbMonth);
}

#[test]
fn all_rates_returns_the_full_table() {
    let table = PricingTable::from_rates(1, default_rates());
    assert_eq!(table.all_rates().len(), 12);
    assert!(!table.is_empty());
    assert!(PricingTable::from_rates(1, vec![]).is_empty());
}

#[tokio::test]
async fn shared_pricing_install_bumps_version() {
    let shared = SharedPricing::new(PricingTable::from_rates(1, default_rates()));
    assert_eq!(shared.current().await.version(), 1);

    let mut rates = default_rates();
    rates.push(rate(
        ResourceType::Cpu,
        DeploymentType::Acp,
        dec!(0.05),
        9_000,
    ));
    let version = shared.install(rates).await;
    assert_eq!(version, 2);

    let table = shared.current().await;
    assert_eq!(table.version(), 2);
    let r = table
        .rate(ResourceType::Cpu, DeploymentType::Acp, 10_000)
        .expect("new rate in force");
    assert_eq!(r.price, dec!(0.05));
}

#[tokio::test]
async fn readers_keep_their_table_across_installs() {
    let shared = SharedPricing::new(PricingTable::from_rates(1, default_rates()));
    let held = shared.current().await;
    shared.install(vec![]).await;
    // the held Arc still prices with the old table
    assert_eq!(held.version(), 1);
    assert!(
        held.rate(ResourceType::Cpu, DeploymentType::Acp, 0).is_ok()
    );
    assert!(shared.current().await.is_empty());
}
