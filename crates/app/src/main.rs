use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use fleetlab_api::{GitlabConfig, GitlabDirectory, TokenKind};
use fleetlab_kubehub::ControllerConfig;
use fleetlab_sync::{Reconciler, Strictness};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fleetlab", version, about = "Mirror Fleet GitRepos into GitLab environments and deployments")]
struct Cli {
    /// GitLab API root, e.g. https://git.example.com/api/v4
    #[arg(long = "gitlab-url", env = "GITLAB_URL")]
    gitlab_url: String,

    /// GitLab access token
    #[arg(long = "gitlab-token", env = "GITLAB_TOKEN", hide_env_values = true)]
    gitlab_token: String,

    /// How the token is sent
    #[arg(long = "token-kind", env = "GITLAB_TOKEN_KIND", value_enum, default_value_t = TokenArg::Private)]
    token_kind: TokenArg,

    /// Per-request timeout for GitLab calls
    #[arg(long = "request-timeout-secs", env = "FLEETLAB_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    /// Only watch GitRepos in this namespace (default: all)
    #[arg(long = "namespace", env = "FLEETLAB_NAMESPACE")]
    namespace: Option<String>,

    /// Fail the pass on any GitLab error instead of logging and carrying on
    #[arg(long = "strict", env = "FLEETLAB_STRICT", action = ArgAction::SetTrue)]
    strict: bool,

    /// Delay before a failed pass is retried
    #[arg(long = "requeue-secs", env = "FLEETLAB_REQUEUE_SECS", default_value_t = 30)]
    requeue_secs: u64,

    /// Reconcile on every GitRepo change, not only generation bumps
    #[arg(long = "every-change", env = "FLEETLAB_EVERY_CHANGE", action = ArgAction::SetTrue)]
    every_change: bool,

    /// Prometheus exporter listen address (host:port)
    #[arg(long = "metrics-addr", env = "FLEETLAB_METRICS_ADDR")]
    metrics_addr: Option<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum TokenArg { Private, Oauth }

impl From<TokenArg> for TokenKind {
    fn from(v: TokenArg) -> Self {
        match v {
            TokenArg::Private => TokenKind::Private,
            TokenArg::Oauth => TokenKind::OAuth,
        }
    }
}

fn init_tracing() {
    let env = std::env::var("FLEETLAB_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn metrics_listen_addr(addr: &str) -> Option<std::net::SocketAddr> {
    match addr.parse::<std::net::SocketAddr>() {
        Ok(sock) => Some(sock),
        Err(_) => {
            tracing::warn!(addr = %addr, "invalid --metrics-addr / FLEETLAB_METRICS_ADDR; expected host:port");
            None
        }
    }
}

fn init_metrics(addr: Option<&str>) {
    let Some(sock) = addr.and_then(metrics_listen_addr) else { return };
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    match builder.with_http_listener(sock).install() {
        Ok(_) => tracing::info!(addr = %sock, "Prometheus metrics exporter listening"),
        Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    init_metrics(cli.metrics_addr.as_deref());

    let gitlab = GitlabConfig {
        base_url: cli.gitlab_url.clone(),
        token: cli.gitlab_token,
        token_kind: cli.token_kind.into(),
        timeout: Duration::from_secs(cli.request_timeout_secs),
    };
    let directory = GitlabDirectory::new(gitlab).context("configuring GitLab client")?;
    let strictness = if cli.strict { Strictness::Strict } else { Strictness::Lenient };
    let reconciler = Reconciler::new(Arc::new(directory), strictness);

    info!(gitlab = %cli.gitlab_url, ns = ?cli.namespace, strict = cli.strict, "fleetlab starting");
    let client = fleetlab_kubehub::kube_client().await?;
    let cfg = ControllerConfig {
        namespace: cli.namespace,
        error_requeue: Duration::from_secs(cli.requeue_secs.max(1)),
        every_change: cli.every_change,
    };
    fleetlab_kubehub::run(client, reconciler, cfg).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_with_defaults() {
        let cli = Cli::try_parse_from([
            "fleetlab",
            "--gitlab-url",
            "https://git.example.com/api/v4",
            "--gitlab-token",
            "glpat-x",
        ])
        .unwrap();
        assert_eq!(cli.token_kind, TokenArg::Private);
        assert_eq!(cli.request_timeout_secs, 30);
        assert_eq!(cli.requeue_secs, 30);
        assert!(!cli.strict);
        assert!(!cli.every_change);
    }

    #[test]
    fn parses_oauth_and_strict() {
        let cli = Cli::try_parse_from([
            "fleetlab",
            "--gitlab-url",
            "https://git.example.com/api/v4",
            "--gitlab-token",
            "t",
            "--token-kind",
            "oauth",
            "--strict",
            "--namespace",
            "fleet-default",
        ])
        .unwrap();
        assert_eq!(TokenKind::from(cli.token_kind), TokenKind::OAuth);
        assert!(cli.strict);
        assert_eq!(cli.namespace.as_deref(), Some("fleet-default"));
    }

    #[test]
    fn metrics_addr_must_be_host_port() {
        assert_eq!(metrics_listen_addr("0.0.0.0:9464"), Some("0.0.0.0:9464".parse().unwrap()));
        assert_eq!(metrics_listen_addr("9464"), None);
        assert_eq!(metrics_listen_addr("metrics:9464"), None);
    }
}
