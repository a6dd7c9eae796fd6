//! Fleetlab reconciliation.
//!
//! One pass takes a `GitRepo` and mirrors it into the directory:
//!
//! 1. resolve the project named by the `gitlab.com/repo-name` label,
//! 2. find or create the environment (`environment`),
//! 3. find or create the deployment for the current commit and advance its
//!    status from resource health (`deployment`),
//! 4. push a description built from the latest condition (`status`).
//!
//! Nothing is cached between passes; every pass re-resolves by name and SHA,
//! so a pass that fails part-way can simply be run again.

#![forbid(unsafe_code)]

use fleetlab_api::{DirectoryError, DirectoryResult};

pub mod deployment;
pub mod environment;
pub mod reconcile;
pub mod status;

pub use deployment::{status_transitions, track_deployment, DeploymentReport};
pub use environment::{resolve_environment, ResolvedEnvironment};
pub use reconcile::{PassOutcome, PassReport, Reconciler};
pub use status::{describe, propagate_status, StatusReport, DESCRIPTION_PREFIX};

/// How list and mutation failures inside a pass are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// List failures read as "nothing there yet"; deployment and status
    /// mutation failures are logged and reported but do not fail the pass.
    #[default]
    Lenient,
    /// Every directory failure fails the pass.
    Strict,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("resolving project {name}: {source}")]
    Project { name: String, #[source] source: DirectoryError },
    #[error("resolving environment {name}: {source}")]
    Environment { name: String, #[source] source: DirectoryError },
    #[error("tracking deployment of {sha} to {environment}: {source}")]
    Deployment { environment: String, sha: String, #[source] source: DirectoryError },
    #[error("updating status of environment {environment}: {source}")]
    Status { environment: String, #[source] source: DirectoryError },
}

/// Outcome of a list call under a given `Strictness`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing<T> {
    Fresh(Vec<T>),
    /// The call failed and the caller chose to carry on as if the list were empty.
    Degraded(DirectoryError),
}

impl<T> Listing<T> {
    /// Lenient turns a failure into `Degraded`; strict hands it back.
    pub fn from_result(res: DirectoryResult<Vec<T>>, strictness: Strictness) -> DirectoryResult<Self> {
        match (res, strictness) {
            (Ok(items), _) => Ok(Listing::Fresh(items)),
            (Err(e), Strictness::Lenient) => Ok(Listing::Degraded(e)),
            (Err(e), Strictness::Strict) => Err(e),
        }
    }

    pub fn items(&self) -> &[T] {
        match self {
            Listing::Fresh(items) => items,
            Listing::Degraded(_) => &[],
        }
    }

    pub fn is_degraded(&self) -> bool { matches!(self, Listing::Degraded(_)) }
}

/// A mutation that failed without failing the pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationFailure {
    pub op: &'static str,
    pub error: DirectoryError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_lenient_degrades_to_empty() {
        let l: Listing<u8> =
            Listing::from_result(Err(DirectoryError::Transport("timeout".into())), Strictness::Lenient)
                .unwrap();
        assert!(l.is_degraded());
        assert!(l.items().is_empty());
    }

    #[test]
    fn listing_strict_propagates() {
        let res: DirectoryResult<Listing<u8>> =
            Listing::from_result(Err(DirectoryError::Transport("timeout".into())), Strictness::Strict);
        assert_eq!(res.unwrap_err(), DirectoryError::Transport("timeout".into()));
    }

    #[test]
    fn listing_fresh_keeps_items() {
        let l = Listing::from_result(Ok(vec![1u8, 2]), Strictness::Strict).unwrap();
        assert!(!l.is_degraded());
        assert_eq!(l.items(), &[1, 2]);
    }
}
