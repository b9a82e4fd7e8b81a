// Library for tests to access modules

pub mod aggregator;
pub mod backfill;
pub mod billing_store;
pub mod collector;
pub mod config;
pub mod cost;
pub mod docker_repo;
pub mod error;
pub mod metrics;
pub mod models;
pub mod pricing;
pub mod query;
pub mod rollup_worker;
pub mod routes;
pub mod version;
