//! Reconciliation pass over one GitRepo.

use std::sync::Arc;
use std::time::Instant;

use fleetlab_api::Directory;
use fleetlab_core::{GitRepo, Project};
use kube::ResourceExt;
use metrics::{counter, histogram};
use tracing::{info, warn};

use crate::deployment::{track_deployment, DeploymentReport};
use crate::environment::{resolve_environment, ResolvedEnvironment};
use crate::status::{propagate_status, StatusReport};
use crate::{MutationFailure, Strictness, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Required labels are missing; nothing was sent to the directory.
    Skipped { missing: Vec<&'static str> },
    Synced(PassReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub project: Project,
    pub environment: ResolvedEnvironment,
    pub deployment: DeploymentReport,
    pub status: StatusReport,
}

impl PassReport {
    /// Mutations that failed without failing the pass (lenient mode only).
    pub fn mutation_failures(&self) -> impl Iterator<Item = &MutationFailure> {
        self.deployment.failures.iter().chain(self.status.failure.iter())
    }
}

/// Runs passes against one shared directory client. Holds no state between
/// passes; safe to call concurrently for different GitRepos.
pub struct Reconciler {
    directory: Arc<dyn Directory>,
    strictness: Strictness,
}

impl Reconciler {
    pub fn new(directory: Arc<dyn Directory>, strictness: Strictness) -> Self {
        Self { directory, strictness }
    }

    pub fn strictness(&self) -> Strictness { self.strictness }

    /// One pass. Project and environment failures are returned so the caller
    /// can retry the whole pass; later failures only fail it in strict mode.
    pub async fn reconcile(&self, repo: &GitRepo) -> Result<PassOutcome, SyncError> {
        let t0 = Instant::now();
        let res = self.run(repo).await;
        let outcome = match &res {
            Ok(PassOutcome::Skipped { .. }) => "skipped",
            Ok(PassOutcome::Synced(report)) if report.mutation_failures().next().is_some() => "partial",
            Ok(PassOutcome::Synced(_)) => "synced",
            Err(_) => "error",
        };
        counter!("fleetlab_passes_total", 1u64, "outcome" => outcome);
        histogram!("fleetlab_pass_ms", t0.elapsed().as_secs_f64() * 1000.0);
        res
    }

    async fn run(&self, repo: &GitRepo) -> Result<PassOutcome, SyncError> {
        let name = repo.name_any();
        let ns = repo.namespace().unwrap_or_default();
        let labels = match repo.sync_labels() {
            Ok(labels) => labels,
            Err(missing) => {
                info!(gitrepo = %name, ns = %ns, missing = ?missing, "required labels not set; skipping");
                return Ok(PassOutcome::Skipped { missing });
            }
        };
        let dir = self.directory.as_ref();

        let project = dir
            .find_project_by_name(labels.repo_name)
            .await
            .map_err(|source| SyncError::Project { name: labels.repo_name.to_string(), source })?;

        let environment = resolve_environment(
            dir,
            project.id,
            labels.environment,
            labels.environment_url,
            self.strictness,
        )
        .await?;
        info!(gitrepo = %name, ns = %ns, project = project.id, environment = %labels.environment, created = environment.created, "environment prepared");

        let deployment =
            track_deployment(dir, project.id, labels.environment, repo, self.strictness).await?;
        info!(gitrepo = %name, environment = %labels.environment, deployment = ?deployment.deployment, applied = ?deployment.applied, "deployment reconciled");

        let status = propagate_status(
            dir,
            project.id,
            environment.id,
            &repo.observed().conditions,
            self.strictness,
        )
        .await?;
        info!(gitrepo = %name, environment = %labels.environment, described = status.description.is_some(), "environment status reconciled");

        let report = PassReport { project, environment, deployment, status };
        for f in report.mutation_failures() {
            counter!("fleetlab_mutation_failures_total", 1u64, "op" => f.op);
            warn!(gitrepo = %name, op = f.op, error = %f.error, "pass finished with a failed mutation");
        }
        Ok(PassOutcome::Synced(report))
    }
}
