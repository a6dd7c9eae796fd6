//! GitLab REST v4 transport for `Directory`.

use std::time::{Duration, Instant};

use fleetlab_core::{
    Deployment, DeploymentId, DeploymentStatus, Environment, EnvironmentId, NewDeployment, Project,
    ProjectId,
};
use metrics::{counter, histogram};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{Directory, DirectoryError, DirectoryResult};

const PER_PAGE: &str = "100";
const MAX_PAGES: u32 = 50;
const MAX_ERROR_BODY: usize = 512;

/// How the token is presented: personal/project access tokens go in
/// `PRIVATE-TOKEN`, OAuth tokens as a bearer `Authorization`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenKind {
    #[default]
    Private,
    OAuth,
}

#[derive(Debug, Clone)]
pub struct GitlabConfig {
    /// API root, e.g. `https://git.example.com/api/v4`.
    pub base_url: String,
    pub token: String,
    pub token_kind: TokenKind,
    pub timeout: Duration,
}

impl GitlabConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            token_kind: TokenKind::Private,
            timeout: Duration::from_secs(30),
        }
    }
}

/// `Directory` backed by a GitLab instance. Cheap to share behind an `Arc`;
/// holds no per-pass state.
pub struct GitlabDirectory {
    http: Client,
    base: String,
}

#[derive(Deserialize)]
struct DeploymentWire {
    id: DeploymentId,
    #[serde(rename = "ref", default)]
    git_ref: String,
    #[serde(default)]
    sha: String,
    status: DeploymentStatus,
    #[serde(default)]
    environment: Option<EnvironmentRef>,
}

#[derive(Deserialize)]
struct EnvironmentRef {
    name: String,
}

impl DeploymentWire {
    fn into_deployment(self, queried_env: &str) -> Deployment {
        Deployment {
            id: self.id,
            environment: self.environment.map(|e| e.name).unwrap_or_else(|| queried_env.to_string()),
            git_ref: self.git_ref,
            sha: self.sha,
            status: self.status,
        }
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) { cut -= 1; }
        body.truncate(cut);
    }
    body
}

impl GitlabDirectory {
    pub fn new(cfg: GitlabConfig) -> DirectoryResult<Self> {
        let base = cfg.base_url.trim_end_matches('/').to_string();
        if base.is_empty() {
            return Err(DirectoryError::Config("GitLab base URL is empty".into()));
        }
        if cfg.token.is_empty() {
            return Err(DirectoryError::Config("GitLab token is empty".into()));
        }
        let (name, raw) = match cfg.token_kind {
            TokenKind::Private => (HeaderName::from_static("private-token"), cfg.token.clone()),
            TokenKind::OAuth => (AUTHORIZATION, format!("Bearer {}", cfg.token)),
        };
        let mut value = HeaderValue::from_str(&raw)
            .map_err(|e| DirectoryError::Config(format!("token is not a valid header value: {}", e)))?;
        value.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(name, value);
        let http = Client::builder()
            .default_headers(headers)
            .timeout(cfg.timeout)
            .user_agent(concat!("fleetlab/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DirectoryError::Config(e.to_string()))?;
        Ok(Self { http, base })
    }

    fn url(&self, path: &str) -> String { format!("{}{}", self.base, path) }

    async fn execute(&self, op: &'static str, req: RequestBuilder) -> DirectoryResult<Response> {
        let t0 = Instant::now();
        let res = req.send().await;
        histogram!("fleetlab_gitlab_request_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => op);
        let resp = match res {
            Ok(r) => r,
            Err(e) => {
                counter!("fleetlab_gitlab_requests_total", 1u64, "op" => op, "outcome" => "transport");
                return Err(DirectoryError::Transport(e.to_string()));
            }
        };
        let status = resp.status();
        if !status.is_success() {
            counter!("fleetlab_gitlab_requests_total", 1u64, "op" => op, "outcome" => "rejected");
            let body = resp.text().await.unwrap_or_default();
            debug!(op, status = status.as_u16(), "gitlab: request rejected");
            return Err(DirectoryError::Status { status: status.as_u16(), body: truncate_body(body) });
        }
        counter!("fleetlab_gitlab_requests_total", 1u64, "op" => op, "outcome" => "ok");
        Ok(resp)
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> DirectoryResult<T> {
        resp.json::<T>().await.map_err(|e| DirectoryError::Decode(e.to_string()))
    }

    /// GET every page of a list endpoint, following `x-next-page`.
    async fn get_all<T: DeserializeOwned>(
        &self,
        op: &'static str,
        path: &str,
        query: &[(&str, &str)],
    ) -> DirectoryResult<Vec<T>> {
        let mut out = Vec::new();
        let mut page: u32 = 1;
        loop {
            let page_param = page.to_string();
            let req = self
                .http
                .get(self.url(path))
                .query(query)
                .query(&[("per_page", PER_PAGE), ("page", page_param.as_str())]);
            let resp = self.execute(op, req).await?;
            let next = resp
                .headers()
                .get("x-next-page")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u32>().ok());
            let mut items: Vec<T> = Self::decode(resp).await?;
            out.append(&mut items);
            match next {
                Some(n) if n > page && n <= MAX_PAGES => page = n,
                Some(n) if n > MAX_PAGES => {
                    warn!(op, max_pages = MAX_PAGES, "gitlab: list truncated");
                    break;
                }
                _ => break,
            }
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl Directory for GitlabDirectory {
    async fn find_project_by_name(&self, name: &str) -> DirectoryResult<Project> {
        let req = self.http.get(self.url("/projects")).query(&[("search", name), ("simple", "true")]);
        let resp = self.execute("find_project", req).await?;
        let projects: Vec<Project> = Self::decode(resp).await?;
        projects
            .into_iter()
            .next()
            .ok_or_else(|| DirectoryError::NotFound(format!("gitlab project {}", name)))
    }

    async fn list_environments(&self, project: ProjectId) -> DirectoryResult<Vec<Environment>> {
        self.get_all("list_environments", &format!("/projects/{}/environments", project), &[]).await
    }

    async fn create_environment(
        &self,
        project: ProjectId,
        name: &str,
        external_url: &str,
    ) -> DirectoryResult<Environment> {
        let body = serde_json::json!({ "name": name, "external_url": external_url });
        let req = self.http.post(self.url(&format!("/projects/{}/environments", project))).json(&body);
        let resp = self.execute("create_environment", req).await?;
        Self::decode(resp).await
    }

    async fn edit_environment(
        &self,
        project: ProjectId,
        environment: EnvironmentId,
        description: &str,
    ) -> DirectoryResult<()> {
        let body = serde_json::json!({ "description": description });
        let req = self
            .http
            .put(self.url(&format!("/projects/{}/environments/{}", project, environment)))
            .json(&body);
        self.execute("edit_environment", req).await?;
        Ok(())
    }

    async fn list_deployments(
        &self,
        project: ProjectId,
        environment: &str,
    ) -> DirectoryResult<Vec<Deployment>> {
        // Newest first, so a commit deployed more than once resolves to its latest record.
        let wire: Vec<DeploymentWire> = self
            .get_all(
                "list_deployments",
                &format!("/projects/{}/deployments", project),
                &[("environment", environment), ("order_by", "id"), ("sort", "desc")],
            )
            .await?;
        Ok(wire.into_iter().map(|d| d.into_deployment(environment)).collect())
    }

    async fn create_deployment(
        &self,
        project: ProjectId,
        deployment: &NewDeployment,
    ) -> DirectoryResult<Deployment> {
        let body = serde_json::json!({
            "environment": deployment.environment,
            "ref": deployment.git_ref,
            "tag": deployment.tag,
            "sha": deployment.sha,
            "status": DeploymentStatus::Running,
        });
        let req = self.http.post(self.url(&format!("/projects/{}/deployments", project))).json(&body);
        let resp = self.execute("create_deployment", req).await?;
        let wire: DeploymentWire = Self::decode(resp).await?;
        Ok(wire.into_deployment(&deployment.environment))
    }

    async fn update_deployment_status(
        &self,
        project: ProjectId,
        deployment: DeploymentId,
        status: DeploymentStatus,
    ) -> DirectoryResult<()> {
        let body = serde_json::json!({ "status": status });
        let req = self
            .http
            .put(self.url(&format!("/projects/{}/deployments/{}", project, deployment)))
            .json(&body);
        self.execute("update_deployment", req).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_config() {
        assert!(matches!(
            GitlabDirectory::new(GitlabConfig::new("", "t")),
            Err(DirectoryError::Config(_))
        ));
        assert!(matches!(
            GitlabDirectory::new(GitlabConfig::new("https://git.example.com/api/v4", "")),
            Err(DirectoryError::Config(_))
        ));
    }

    #[test]
    fn rejects_token_with_control_chars() {
        let cfg = GitlabConfig::new("https://git.example.com/api/v4", "bad\ntoken");
        assert!(matches!(GitlabDirectory::new(cfg), Err(DirectoryError::Config(_))));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let dir = GitlabDirectory::new(GitlabConfig::new("https://git.example.com/api/v4/", "t")).unwrap();
        assert_eq!(dir.url("/projects"), "https://git.example.com/api/v4/projects");
    }

    #[test]
    fn error_bodies_are_truncated_on_char_boundary() {
        let long = "é".repeat(MAX_ERROR_BODY);
        let cut = truncate_body(long);
        assert!(cut.len() <= MAX_ERROR_BODY);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[test]
    fn deployment_wire_prefers_embedded_environment() {
        let wire: DeploymentWire = serde_json::from_value(serde_json::json!({
            "id": 41,
            "iid": 3,
            "ref": "main",
            "sha": "abc123",
            "status": "success",
            "environment": { "id": 9, "name": "production" }
        }))
        .unwrap();
        let dep = wire.into_deployment("ignored");
        assert_eq!(dep.environment, "production");
        assert_eq!(dep.status, DeploymentStatus::Success);
    }
}
