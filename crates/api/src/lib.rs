//! Fleetlab directory API.
//!
//! `Directory` is the seam between the reconciler and the deployment-tracking
//! service. `GitlabDirectory` talks to a GitLab REST v4 endpoint;
//! `MockDirectory` keeps everything in memory and records every call for tests.

#![forbid(unsafe_code)]

use fleetlab_core::{
    Deployment, DeploymentId, DeploymentStatus, Environment, EnvironmentId, NewDeployment, Project,
    ProjectId,
};

mod gitlab;
mod mock;

pub use gitlab::{GitlabConfig, GitlabDirectory, TokenKind};
pub use mock::{Call, MockDirectory, Op};

/// Directory errors. Message-only so they can be cloned into reports and
/// injected by the mock.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("config: {0}")]
    Config(String),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Operations the reconciler needs from the tracking service. Each call is a
/// single request/response; callers issue them one after another.
#[async_trait::async_trait]
pub trait Directory: Send + Sync {
    /// First project matching a name search. No hit is `NotFound`.
    async fn find_project_by_name(&self, name: &str) -> DirectoryResult<Project>;

    async fn list_environments(&self, project: ProjectId) -> DirectoryResult<Vec<Environment>>;

    async fn create_environment(
        &self,
        project: ProjectId,
        name: &str,
        external_url: &str,
    ) -> DirectoryResult<Environment>;

    async fn edit_environment(
        &self,
        project: ProjectId,
        environment: EnvironmentId,
        description: &str,
    ) -> DirectoryResult<()>;

    async fn list_deployments(
        &self,
        project: ProjectId,
        environment: &str,
    ) -> DirectoryResult<Vec<Deployment>>;

    /// Create a deployment in `running` state.
    async fn create_deployment(
        &self,
        project: ProjectId,
        deployment: &NewDeployment,
    ) -> DirectoryResult<Deployment>;

    async fn update_deployment_status(
        &self,
        project: ProjectId,
        deployment: DeploymentId,
        status: DeploymentStatus,
    ) -> DirectoryResult<()>;
}
