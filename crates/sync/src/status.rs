//! Environment description from the GitRepo's latest condition.

use fleetlab_api::Directory;
use fleetlab_core::{latest_condition, Condition, EnvironmentId, ProjectId};
use tracing::{debug, warn};

use crate::{MutationFailure, Strictness, SyncError};

/// Fixed preamble of every description written to an environment.
pub const DESCRIPTION_PREFIX: &str = "This environment is currently being controlled by Rancher Fleet and \
GitLab messages are propagated via a custom Kubernetes controller. Please visit the Rancher Fleet page \
of your cluster deployment for more information. Here's the information from Fleet: \n\n";

const IN_SYNC: &str = "Environment is currently reconciled. Cluster-state is in sync with Repository";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    /// Description that was sent, if there was a condition to describe.
    pub description: Option<String>,
    pub failure: Option<MutationFailure>,
}

/// Description for a condition. An empty message means Fleet has nothing to
/// complain about.
pub fn describe(condition: &Condition) -> String {
    if condition.message.is_empty() {
        format!("{}{}", DESCRIPTION_PREFIX, IN_SYNC)
    } else {
        format!(
            "{}Status: {}, with message: {}",
            DESCRIPTION_PREFIX, condition.kind, condition.message
        )
    }
}

/// Push the description of the latest condition onto the environment. No
/// condition with a parseable timestamp means nothing is sent.
pub async fn propagate_status(
    dir: &dyn Directory,
    project: ProjectId,
    environment: EnvironmentId,
    conditions: &[Condition],
    strictness: Strictness,
) -> Result<StatusReport, SyncError> {
    let Some(latest) = latest_condition(conditions) else {
        debug!(project, environment, "no datable condition; description unchanged");
        return Ok(StatusReport::default());
    };
    let description = describe(latest);
    match dir.edit_environment(project, environment, &description).await {
        Ok(()) => {
            debug!(project, environment, condition = %latest.kind, "environment description updated");
            Ok(StatusReport { description: Some(description), failure: None })
        }
        Err(e) if strictness == Strictness::Strict => {
            Err(SyncError::Status { environment: environment.to_string(), source: e })
        }
        Err(e) => {
            warn!(project, environment, error = %e, "updating environment description failed");
            Ok(StatusReport {
                description: None,
                failure: Some(MutationFailure { op: "edit_environment", error: e }),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_is_quoted_with_type() {
        let c = Condition { kind: "Stalled".into(), message: "git clone failed".into(), ..Default::default() };
        let d = describe(&c);
        assert!(d.starts_with(DESCRIPTION_PREFIX));
        assert!(d.ends_with("Status: Stalled, with message: git clone failed"));
    }

    #[test]
    fn empty_message_reads_as_in_sync() {
        let c = Condition { kind: "Ready".into(), ..Default::default() };
        assert_eq!(describe(&c), format!("{}{}", DESCRIPTION_PREFIX, IN_SYNC));
    }
}
