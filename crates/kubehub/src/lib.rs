//! Fleetlab kubehub – GitRepo controller wiring.
//!
//! Every propagated pass error is handed to `error_policy`, which requeues the
//! GitRepo; the next pass starts from scratch. There is no backoff of our own.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context as _, Result};
use fleetlab_core::GitRepo;
use fleetlab_sync::{PassOutcome, Reconciler, SyncError};
use futures::StreamExt;
use kube::{
    api::{Api, ListParams},
    runtime::{
        controller::{Action, Controller},
        watcher,
    },
    Client, ResourceExt,
};
use metrics::counter;
use tracing::{debug, info, warn};

/// Build a client from kubeconfig or the in-cluster service account.
pub async fn kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client")
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Watch one namespace instead of all of them.
    pub namespace: Option<String>,
    /// Delay before a failed pass is retried.
    pub error_requeue: Duration,
    /// Run a pass on every change, including status-only updates. Off by
    /// default: passes run only when `metadata.generation` moves.
    pub every_change: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { namespace: None, error_requeue: Duration::from_secs(30), every_change: false }
    }
}

/// Last generation reconciled successfully, per GitRepo name. A generation is
/// only recorded after a pass succeeds, so a failed pass is retried on requeue.
/// Entries carry the object uid: a GitRepo deleted and recreated under the
/// same name starts again at generation 1 and must still get its pass.
#[derive(Default)]
pub struct GenerationGate {
    seen: Mutex<HashMap<String, (String, i64)>>,
}

impl GenerationGate {
    pub fn should_run(&self, key: &str, uid: &str, generation: Option<i64>) -> bool {
        match generation {
            Some(gen) => !matches!(self.lock().get(key), Some((seen_uid, seen)) if seen_uid == uid && *seen == gen),
            None => true,
        }
    }

    pub fn record(&self, key: &str, uid: &str, generation: Option<i64>) {
        if let Some(gen) = generation {
            self.lock().insert(key.to_string(), (uid.to_string(), gen));
        }
    }

    /// Drop the entry of a GitRepo that no longer exists.
    pub fn forget(&self, key: &str) {
        self.lock().remove(key);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (String, i64)>> {
        self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct Context {
    reconciler: Reconciler,
    gate: GenerationGate,
    cfg: ControllerConfig,
}

impl Context {
    pub fn new(reconciler: Reconciler, cfg: ControllerConfig) -> Self {
        Self { reconciler, gate: GenerationGate::default(), cfg }
    }
}

fn object_key(repo: &GitRepo) -> String {
    format!("{}/{}", repo.namespace().unwrap_or_default(), repo.name_any())
}

pub async fn reconcile(repo: Arc<GitRepo>, ctx: Arc<Context>) -> Result<Action, SyncError> {
    let key = object_key(&repo);
    let uid = repo.uid().unwrap_or_default();
    let generation = repo.metadata.generation;
    if repo.metadata.deletion_timestamp.is_some() {
        ctx.gate.forget(&key);
        debug!(gitrepo = %key, "gitrepo is being deleted; skipping");
        return Ok(Action::await_change());
    }
    if !ctx.cfg.every_change && !ctx.gate.should_run(&key, &uid, generation) {
        counter!("fleetlab_gate_skips_total", 1u64);
        debug!(gitrepo = %key, generation = ?generation, "generation already reconciled; skipping");
        return Ok(Action::await_change());
    }
    match ctx.reconciler.reconcile(&repo).await? {
        PassOutcome::Skipped { .. } => debug!(gitrepo = %key, "pass skipped"),
        PassOutcome::Synced(report) => info!(
            gitrepo = %key,
            project = report.project.id,
            environment = report.environment.id,
            deployment = ?report.deployment.deployment,
            failures = report.mutation_failures().count(),
            "pass complete"
        ),
    }
    ctx.gate.record(&key, &uid, generation);
    Ok(Action::await_change())
}

pub fn error_policy(repo: Arc<GitRepo>, err: &SyncError, ctx: Arc<Context>) -> Action {
    warn!(
        gitrepo = %object_key(&repo),
        error = %err,
        requeue_secs = ctx.cfg.error_requeue.as_secs(),
        "pass failed; requeueing"
    );
    Action::requeue(ctx.cfg.error_requeue)
}

/// Watch GitRepos and run passes until SIGINT/SIGTERM.
pub async fn run(client: Client, reconciler: Reconciler, cfg: ControllerConfig) -> Result<()> {
    let api: Api<GitRepo> = match cfg.namespace.as_deref() {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    // Fail fast when the CRD is missing or RBAC forbids listing.
    api.list(&ListParams::default().limit(1))
        .await
        .context("listing fleet.cattle.io/v1alpha1 GitRepos (is Fleet installed?)")?;
    info!(ns = ?cfg.namespace, every_change = cfg.every_change, strictness = ?reconciler.strictness(), "controller starting");

    let ctx = Arc::new(Context::new(reconciler, cfg));
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(gitrepo = %obj.name, "reconciled"),
                Err(e) => warn!(error = %e, "controller error"),
            }
        })
        .await;
    info!("controller stopped");
    Ok(())
}
