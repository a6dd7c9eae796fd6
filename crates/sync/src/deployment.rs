//! Deployment tracking: one deployment per commit per environment, status
//! advanced from the GitRepo's health.

use fleetlab_api::Directory;
use fleetlab_core::{DeploymentId, DeploymentStatus, GitRepo, GitRepoStatus, NewDeployment, ProjectId};
use metrics::counter;
use tracing::{debug, info, warn};

use crate::{Listing, MutationFailure, Strictness, SyncError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentReport {
    /// `None` when the GitRepo has no commit yet or creation failed.
    pub deployment: Option<DeploymentId>,
    pub created: bool,
    pub listing_degraded: bool,
    /// Status updates that went through, in the order sent.
    pub applied: Vec<DeploymentStatus>,
    pub failures: Vec<MutationFailure>,
}

/// Status updates implied by the GitRepo's health, in the order they must be
/// sent. Readiness is checked first and the error flag second, so a GitRepo
/// that is fully ready but flagged as erroring ends up `failed`. An empty
/// result leaves the deployment as it is.
pub fn status_transitions(status: &GitRepoStatus) -> Vec<DeploymentStatus> {
    let mut out = Vec::with_capacity(2);
    if status.all_ready() {
        out.push(DeploymentStatus::Success);
    }
    if status.has_error() {
        out.push(DeploymentStatus::Failed);
    }
    out
}

/// Find the deployment of the GitRepo's current commit in `environment`,
/// create it (running) if missing, then apply `status_transitions`.
pub async fn track_deployment(
    dir: &dyn Directory,
    project: ProjectId,
    environment: &str,
    repo: &GitRepo,
    strictness: Strictness,
) -> Result<DeploymentReport, SyncError> {
    let status = repo.observed();
    let sha = status.commit.as_str();
    let mut report = DeploymentReport::default();
    if sha.is_empty() {
        debug!(project, environment = %environment, "gitrepo has no commit yet; nothing to track");
        return Ok(report);
    }
    let err = |source| SyncError::Deployment {
        environment: environment.to_string(),
        sha: sha.to_string(),
        source,
    };

    let listing =
        Listing::from_result(dir.list_deployments(project, environment).await, strictness).map_err(err)?;
    if let Listing::Degraded(e) = &listing {
        warn!(project, environment = %environment, error = %e, "listing deployments failed; assuming none");
        report.listing_degraded = true;
    }

    let id = match listing.items().iter().find(|d| d.sha == sha) {
        Some(existing) => {
            debug!(project, environment = %environment, sha = %sha, id = existing.id, "deployment already tracked");
            existing.id
        }
        None => {
            let new = NewDeployment {
                environment: environment.to_string(),
                git_ref: repo.deploy_ref().to_string(),
                sha: sha.to_string(),
                tag: false,
            };
            match dir.create_deployment(project, &new).await {
                Ok(created) => {
                    counter!("fleetlab_deployments_created_total", 1u64);
                    info!(project, environment = %environment, sha = %sha, git_ref = %new.git_ref, id = created.id, "deployment created");
                    report.created = true;
                    created.id
                }
                Err(e) if strictness == Strictness::Strict => return Err(err(e)),
                Err(e) => {
                    warn!(project, environment = %environment, sha = %sha, error = %e, "creating deployment failed");
                    report.failures.push(MutationFailure { op: "create_deployment", error: e });
                    return Ok(report);
                }
            }
        }
    };
    report.deployment = Some(id);

    for next in status_transitions(status) {
        match dir.update_deployment_status(project, id, next).await {
            Ok(()) => {
                debug!(project, id, status = %next, "deployment status set");
                report.applied.push(next);
            }
            Err(e) if strictness == Strictness::Strict => return Err(err(e)),
            Err(e) => {
                warn!(project, id, status = %next, error = %e, "updating deployment status failed");
                report.failures.push(MutationFailure { op: "update_deployment_status", error: e });
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlab_core::{GitRepoDisplay, ResourceCounts};

    fn status(desired: i32, ready: i32, error: bool) -> GitRepoStatus {
        GitRepoStatus {
            commit: "abc123".into(),
            resource_counts: ResourceCounts { desired_ready: desired, ready, ..Default::default() },
            display: GitRepoDisplay { error, ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn ready_without_error_is_success() {
        assert_eq!(status_transitions(&status(3, 3, false)), vec![DeploymentStatus::Success]);
    }

    #[test]
    fn error_fails_regardless_of_readiness() {
        assert_eq!(status_transitions(&status(3, 1, true)), vec![DeploymentStatus::Failed]);
        // Failure is sent last and wins.
        assert_eq!(
            status_transitions(&status(3, 3, true)),
            vec![DeploymentStatus::Success, DeploymentStatus::Failed]
        );
    }

    #[test]
    fn neither_leaves_status_alone() {
        assert!(status_transitions(&status(3, 2, false)).is_empty());
    }
}
