//! Environment resolution: find by exact name, create when absent.

use fleetlab_api::Directory;
use fleetlab_core::{EnvironmentId, ProjectId};
use metrics::counter;
use tracing::{info, warn};

use crate::{Listing, Strictness, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedEnvironment {
    pub id: EnvironmentId,
    pub created: bool,
    /// Listing failed and creation was attempted blind.
    pub listing_degraded: bool,
}

/// Return the id of environment `name` in `project`, creating it with
/// `external_url` if no environment has exactly that name. The URL of an
/// existing environment is left alone.
pub async fn resolve_environment(
    dir: &dyn Directory,
    project: ProjectId,
    name: &str,
    external_url: &str,
    strictness: Strictness,
) -> Result<ResolvedEnvironment, SyncError> {
    let err = |source| SyncError::Environment { name: name.to_string(), source };

    let listing = Listing::from_result(dir.list_environments(project).await, strictness).map_err(err)?;
    if let Listing::Degraded(e) = &listing {
        warn!(project, environment = %name, error = %e, "listing environments failed; trying to create");
    }
    if let Some(env) = listing.items().iter().find(|e| e.name == name) {
        info!(project, environment = %name, id = env.id, "environment already exists");
        return Ok(ResolvedEnvironment { id: env.id, created: false, listing_degraded: false });
    }

    let env = dir.create_environment(project, name, external_url).await.map_err(err)?;
    counter!("fleetlab_environments_created_total", 1u64);
    info!(project, environment = %name, id = env.id, url = %external_url, "environment created");
    Ok(ResolvedEnvironment { id: env.id, created: true, listing_degraded: listing.is_degraded() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlab_api::{DirectoryError, MockDirectory, Op};
    use fleetlab_core::Environment;

    #[tokio::test]
    async fn name_match_is_case_sensitive() {
        let dir = MockDirectory::new().with_environment(
            1,
            Environment { id: 5, name: "Production".into(), external_url: None, description: None },
        );
        let got = resolve_environment(&dir, 1, "production", "p.example.com", Strictness::Lenient)
            .await
            .unwrap();
        assert!(got.created);
        assert_ne!(got.id, 5);
        assert_eq!(dir.environments(1).len(), 2);
    }

    #[tokio::test]
    async fn existing_url_is_not_rewritten() {
        let dir = MockDirectory::new().with_environment(
            1,
            Environment { id: 5, name: "prod".into(), external_url: Some("old.example.com".into()), description: None },
        );
        let got = resolve_environment(&dir, 1, "prod", "new.example.com", Strictness::Lenient)
            .await
            .unwrap();
        assert_eq!(got, ResolvedEnvironment { id: 5, created: false, listing_degraded: false });
        assert_eq!(dir.count(Op::CreateEnvironment), 0);
        assert_eq!(dir.environments(1)[0].external_url.as_deref(), Some("old.example.com"));
    }

    #[tokio::test]
    async fn creation_failure_is_fatal() {
        let dir = MockDirectory::new();
        dir.fail(Op::CreateEnvironment, DirectoryError::Status { status: 500, body: String::new() });
        let err = resolve_environment(&dir, 1, "prod", "p.example.com", Strictness::Lenient)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Environment { .. }));
    }
}
