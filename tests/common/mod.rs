// Shared test helpers: a scripted runtime standing in for the Docker
// socket.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use meterd::docker_repo::StatsSource;
use meterd::models::{Deployment, DeploymentStatus, DeploymentType, RawUsage};

pub fn running_usage(cpu_percent: f64, memory_bytes: u64) -> RawUsage {
    RawUsage {
        cpu_percent,
        memory_bytes,
        memory_limit_bytes: memory_bytes,
        network_rx_bytes: 0,
        network_tx_bytes: 0,
        block_read_bytes: 0,
        block_write_bytes: 0,
        status: DeploymentStatus::Running,
    }
}

pub fn deployment(id: &str, user_id: &str) -> Deployment {
    Deployment {
        id: id.into(),
        user_id: user_id.into(),
        agent_id: format!("agent-{id}"),
        hiring_id: format!("hiring-{id}"),
        container_name: format!("ctr-{id}"),
        deployment_type: DeploymentType::Acp,
        created_at: chrono::Utc::now().timestamp_millis(),
        terminated_at: None,
    }
}

/// Stats source driven by a script: each fetch pops the next step, and
/// once the script runs out every fetch returns the fallback reading.
pub struct ScriptedSource {
    steps: Mutex<VecDeque<anyhow::Result<RawUsage>>>,
    fallback: RawUsage,
    running: Mutex<HashSet<String>>,
    pub fetch_count: AtomicU32,
}

impl ScriptedSource {
    pub fn new(fallback: RawUsage) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fallback,
            running: Mutex::new(HashSet::new()),
            fetch_count: AtomicU32::new(0),
        }
    }

    pub fn push_ok(&self, usage: RawUsage) {
        self.steps.lock().unwrap().push_back(Ok(usage));
    }

    pub fn push_err(&self, msg: &str) {
        self.steps
            .lock()
            .unwrap()
            .push_back(Err(anyhow::anyhow!("{msg}")));
    }

    /// Replace the set of container names `list_running` reports.
    pub fn set_running(&self, names: &[&str]) {
        let mut running = self.running.lock().unwrap();
        running.clear();
        running.extend(names.iter().map(|n| n.to_string()));
    }

    pub fn fetches(&self) -> u32 {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

impl StatsSource for ScriptedSource {
    async fn fetch(&self, _container_name: &str) -> anyhow::Result<RawUsage> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        match self.steps.lock().unwrap().pop_front() {
            Some(step) => step,
            None => Ok(self.fallback.clone()),
        }
    }

    async fn list_running(&self) -> anyhow::Result<HashSet<String>> {
        Ok(self.running.lock().unwrap().clone())
    }
}
