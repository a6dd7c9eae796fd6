//! Fleet `GitRepo` (fleet.cattle.io/v1alpha1), reduced to the fields fleetlab reads.
//!
//! The CRD is owned and installed by Fleet; unknown fields are ignored on decode
//! and no schema is generated here.

use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// GitLab project searched for (first hit wins).
pub const LABEL_REPO_NAME: &str = "gitlab.com/repo-name";
/// GitLab environment name.
pub const LABEL_ENVIRONMENT: &str = "gitlab.com/environment";
/// External URL set when the environment is first created.
pub const LABEL_ENVIRONMENT_URL: &str = "gitlab.com/environment-url";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize)]
#[kube(group = "fleet.cattle.io", version = "v1alpha1", kind = "GitRepo", namespaced)]
#[kube(status = "GitRepoStatus", schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct GitRepoSpec {
    #[serde(default)]
    pub repo: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepoStatus {
    #[serde(default)]
    pub commit: String,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub resource_counts: ResourceCounts,
    #[serde(default)]
    pub display: GitRepoDisplay,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCounts {
    #[serde(default)]
    pub ready: i32,
    #[serde(default)]
    pub desired_ready: i32,
    #[serde(default)]
    pub wait_applied: i32,
    #[serde(default)]
    pub modified: i32,
    #[serde(default)]
    pub orphaned: i32,
    #[serde(default)]
    pub missing: i32,
    #[serde(default)]
    pub unknown: i32,
    #[serde(default)]
    pub not_ready: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepoDisplay {
    #[serde(default)]
    pub ready_bundle_deployments: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error: bool,
}

impl GitRepoStatus {
    pub const EMPTY: Self = Self {
        commit: String::new(),
        observed_generation: 0,
        resource_counts: ResourceCounts {
            ready: 0,
            desired_ready: 0,
            wait_applied: 0,
            modified: 0,
            orphaned: 0,
            missing: 0,
            unknown: 0,
            not_ready: 0,
        },
        display: GitRepoDisplay {
            ready_bundle_deployments: String::new(),
            state: String::new(),
            message: String::new(),
            error: false,
        },
        conditions: Vec::new(),
    };

    /// Every managed object Fleet wants ready is ready.
    pub fn all_ready(&self) -> bool {
        self.resource_counts.desired_ready == self.resource_counts.ready
    }

    pub fn has_error(&self) -> bool {
        self.display.error
    }
}

static EMPTY_STATUS: GitRepoStatus = GitRepoStatus::EMPTY;

/// The three label values a `GitRepo` must carry to be mirrored into GitLab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncLabels<'a> {
    pub repo_name: &'a str,
    pub environment: &'a str,
    pub environment_url: &'a str,
}

impl GitRepo {
    /// Status as reported, or the empty status when Fleet has not written one yet.
    pub fn observed(&self) -> &GitRepoStatus {
        self.status.as_ref().unwrap_or(&EMPTY_STATUS)
    }

    /// Ref a new deployment is recorded against: the tracked branch, or the
    /// pinned revision for GitRepos that follow one. A pinned revision is sent
    /// as a plain ref (`tag: false`) even when it names a tag.
    pub fn deploy_ref(&self) -> &str {
        if self.spec.branch.is_empty() {
            &self.spec.revision
        } else {
            &self.spec.branch
        }
    }

    /// Extract the required labels, or the keys that are missing.
    pub fn sync_labels(&self) -> Result<SyncLabels<'_>, Vec<&'static str>> {
        let labels = self.labels();
        let repo_name = labels.get(LABEL_REPO_NAME);
        let environment = labels.get(LABEL_ENVIRONMENT);
        let environment_url = labels.get(LABEL_ENVIRONMENT_URL);
        match (repo_name, environment, environment_url) {
            (Some(repo_name), Some(environment), Some(environment_url)) => Ok(SyncLabels {
                repo_name,
                environment,
                environment_url,
            }),
            _ => {
                let missing = [
                    (LABEL_REPO_NAME, repo_name.is_none()),
                    (LABEL_ENVIRONMENT, environment.is_none()),
                    (LABEL_ENVIRONMENT_URL, environment_url.is_none()),
                ];
                Err(missing.iter().filter(|(_, gone)| *gone).map(|(k, _)| *k).collect())
            }
        }
    }
}
