//! Fleetlab core types.
//!
//! The Fleet `GitRepo` view the controller reads, its status conditions, and
//! the GitLab records (projects, environments, deployments) it writes.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod condition;
pub mod gitrepo;

pub use condition::{latest_condition, Condition};
pub use gitrepo::{
    GitRepo, GitRepoDisplay, GitRepoSpec, GitRepoStatus, ResourceCounts, SyncLabels,
    LABEL_ENVIRONMENT, LABEL_ENVIRONMENT_URL, LABEL_REPO_NAME,
};

pub type ProjectId = i64;
pub type EnvironmentId = i64;
pub type DeploymentId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
}

/// A GitLab environment. `name` is the case-sensitive key within a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub name: String,
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Deployment lifecycle as GitLab spells it. Only `Running`, `Success` and
/// `Failed` are ever written by fleetlab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Created,
    Running,
    Success,
    Failed,
    Canceled,
    #[serde(other)]
    Other,
}

impl DeploymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentStatus::Created => "created",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Canceled => "canceled",
            DeploymentStatus::Other => "other",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub environment: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
    pub status: DeploymentStatus,
}

/// Payload for a new deployment. fleetlab only tracks branch commits, so
/// `tag` stays false for everything the reconciler creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDeployment {
    pub environment: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
    pub tag: bool,
}

pub mod prelude {
    pub use super::{
        latest_condition, Condition, Deployment, DeploymentId, DeploymentStatus, Environment,
        EnvironmentId, GitRepo, GitRepoStatus, NewDeployment, Project, ProjectId, SyncLabels,
    };
}
