// Deployment identity: the explicit container-to-billing mapping,
// persisted at creation time.

use serde::{Deserialize, Serialize};

use super::DeploymentType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    pub user_id: String,
    pub agent_id: String,
    pub hiring_id: String,
    /// Name of the container backing this deployment in the runtime.
    pub container_name: String,
    pub deployment_type: DeploymentType,
    /// Creation time, epoch millis.
    pub created_at: i64,
    /// Set when the deployment is terminated; terminated deployments
    /// are never sampled again.
    #[serde(default)]
    pub terminated_at: Option<i64>,
}

impl Deployment {
    pub fn is_active(&self) -> bool {
        self.terminated_at.is_none()
    }
}
