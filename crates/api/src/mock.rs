//! In-memory directory for tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use fleetlab_core::{
    Deployment, DeploymentId, DeploymentStatus, Environment, EnvironmentId, NewDeployment, Project,
    ProjectId,
};

use crate::{Directory, DirectoryError, DirectoryResult};

/// Operation selector for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    FindProject,
    ListEnvironments,
    CreateEnvironment,
    EditEnvironment,
    ListDeployments,
    CreateDeployment,
    UpdateDeploymentStatus,
}

/// A recorded call with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FindProject { name: String },
    ListEnvironments { project: ProjectId },
    CreateEnvironment { project: ProjectId, name: String, external_url: String },
    EditEnvironment { project: ProjectId, environment: EnvironmentId, description: String },
    ListDeployments { project: ProjectId, environment: String },
    CreateDeployment { project: ProjectId, deployment: NewDeployment },
    UpdateDeploymentStatus { project: ProjectId, deployment: DeploymentId, status: DeploymentStatus },
}

impl Call {
    pub fn op(&self) -> Op {
        match self {
            Call::FindProject { .. } => Op::FindProject,
            Call::ListEnvironments { .. } => Op::ListEnvironments,
            Call::CreateEnvironment { .. } => Op::CreateEnvironment,
            Call::EditEnvironment { .. } => Op::EditEnvironment,
            Call::ListDeployments { .. } => Op::ListDeployments,
            Call::CreateDeployment { .. } => Op::CreateDeployment,
            Call::UpdateDeploymentStatus { .. } => Op::UpdateDeploymentStatus,
        }
    }
}

#[derive(Default)]
struct MockState {
    projects: Vec<Project>,
    environments: HashMap<ProjectId, Vec<Environment>>,
    deployments: HashMap<ProjectId, Vec<Deployment>>,
    faults: HashMap<Op, DirectoryError>,
    calls: Vec<Call>,
    next_id: i64,
}

/// In-memory `Directory`. Ids are handed out from one sequence, starting at 1000.
pub struct MockDirectory {
    state: Mutex<MockState>,
}

impl Default for MockDirectory {
    fn default() -> Self {
        Self { state: Mutex::new(MockState { next_id: 1000, ..Default::default() }) }
    }
}

impl MockDirectory {
    pub fn new() -> Self { Self::default() }

    pub fn with_project(self, id: ProjectId, name: &str) -> Self {
        self.lock().projects.push(Project { id, name: name.to_string() });
        self
    }

    pub fn with_environment(self, project: ProjectId, env: Environment) -> Self {
        self.lock().environments.entry(project).or_default().push(env);
        self
    }

    pub fn with_deployment(self, project: ProjectId, deployment: Deployment) -> Self {
        self.lock().deployments.entry(project).or_default().push(deployment);
        self
    }

    /// Make every subsequent call to `op` fail with `err` until cleared.
    pub fn fail(&self, op: Op, err: DirectoryError) {
        self.lock().faults.insert(op, err);
    }

    pub fn clear_fault(&self, op: Op) {
        self.lock().faults.remove(&op);
    }

    pub fn calls(&self) -> Vec<Call> { self.lock().calls.clone() }

    pub fn count(&self, op: Op) -> usize {
        self.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    pub fn reset_calls(&self) { self.lock().calls.clear(); }

    pub fn environments(&self, project: ProjectId) -> Vec<Environment> {
        self.lock().environments.get(&project).cloned().unwrap_or_default()
    }

    pub fn deployments(&self, project: ProjectId) -> Vec<Deployment> {
        self.lock().deployments.get(&project).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call, then fail if a fault is armed for its operation.
    fn enter(&self, call: Call) -> DirectoryResult<MutexGuard<'_, MockState>> {
        let mut st = self.lock();
        let op = call.op();
        st.calls.push(call);
        if let Some(err) = st.faults.get(&op).cloned() {
            return Err(err);
        }
        Ok(st)
    }
}

impl MockState {
    fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

#[async_trait::async_trait]
impl Directory for MockDirectory {
    async fn find_project_by_name(&self, name: &str) -> DirectoryResult<Project> {
        let st = self.enter(Call::FindProject { name: name.to_string() })?;
        st.projects
            .iter()
            .find(|p| p.name.contains(name))
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(format!("project {}", name)))
    }

    async fn list_environments(&self, project: ProjectId) -> DirectoryResult<Vec<Environment>> {
        let st = self.enter(Call::ListEnvironments { project })?;
        Ok(st.environments.get(&project).cloned().unwrap_or_default())
    }

    async fn create_environment(
        &self,
        project: ProjectId,
        name: &str,
        external_url: &str,
    ) -> DirectoryResult<Environment> {
        let mut st = self.enter(Call::CreateEnvironment {
            project,
            name: name.to_string(),
            external_url: external_url.to_string(),
        })?;
        // GitLab rejects a second environment with the same name.
        if st.environments.get(&project).is_some_and(|envs| envs.iter().any(|e| e.name == name)) {
            return Err(DirectoryError::Status {
                status: 400,
                body: format!("{{\"message\":{{\"name\":[\"{} has already been taken\"]}}}}", name),
            });
        }
        let env = Environment {
            id: st.next_id(),
            name: name.to_string(),
            external_url: Some(external_url.to_string()),
            description: None,
        };
        st.environments.entry(project).or_default().push(env.clone());
        Ok(env)
    }

    async fn edit_environment(
        &self,
        project: ProjectId,
        environment: EnvironmentId,
        description: &str,
    ) -> DirectoryResult<()> {
        let mut st = self.enter(Call::EditEnvironment {
            project,
            environment,
            description: description.to_string(),
        })?;
        let env = st
            .environments
            .get_mut(&project)
            .and_then(|envs| envs.iter_mut().find(|e| e.id == environment))
            .ok_or_else(|| DirectoryError::NotFound(format!("environment {}", environment)))?;
        env.description = Some(description.to_string());
        Ok(())
    }

    async fn list_deployments(
        &self,
        project: ProjectId,
        environment: &str,
    ) -> DirectoryResult<Vec<Deployment>> {
        let st = self.enter(Call::ListDeployments { project, environment: environment.to_string() })?;
        Ok(st
            .deployments
            .get(&project)
            .map(|deps| deps.iter().filter(|d| d.environment == environment).cloned().collect())
            .unwrap_or_default())
    }

    async fn create_deployment(
        &self,
        project: ProjectId,
        deployment: &NewDeployment,
    ) -> DirectoryResult<Deployment> {
        let mut st = self.enter(Call::CreateDeployment { project, deployment: deployment.clone() })?;
        let created = Deployment {
            id: st.next_id(),
            environment: deployment.environment.clone(),
            git_ref: deployment.git_ref.clone(),
            sha: deployment.sha.clone(),
            status: DeploymentStatus::Running,
        };
        st.deployments.entry(project).or_default().push(created.clone());
        Ok(created)
    }

    async fn update_deployment_status(
        &self,
        project: ProjectId,
        deployment: DeploymentId,
        status: DeploymentStatus,
    ) -> DirectoryResult<()> {
        let mut st = self.enter(Call::UpdateDeploymentStatus { project, deployment, status })?;
        let dep = st
            .deployments
            .get_mut(&project)
            .and_then(|deps| deps.iter_mut().find(|d| d.id == deployment))
            .ok_or_else(|| DirectoryError::NotFound(format!("deployment {}", deployment)))?;
        dep.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn project_search_is_substring_and_first_hit_wins() {
        let dir = MockDirectory::new().with_project(1, "demo-web").with_project(2, "demo-web-legacy");
        assert_eq!(dir.find_project_by_name("demo-web").await.unwrap().id, 1);
        assert_eq!(dir.find_project_by_name("legacy").await.unwrap().id, 2);
        assert!(matches!(
            dir.find_project_by_name("nope").await,
            Err(DirectoryError::NotFound(_))
        ));
        assert_eq!(dir.count(Op::FindProject), 3);
    }

    #[tokio::test]
    async fn faults_are_recorded_and_clearable() {
        let dir = MockDirectory::new().with_project(1, "demo");
        dir.fail(Op::ListEnvironments, DirectoryError::Transport("reset".into()));
        assert!(dir.list_environments(1).await.is_err());
        dir.clear_fault(Op::ListEnvironments);
        assert!(dir.list_environments(1).await.unwrap().is_empty());
        assert_eq!(dir.count(Op::ListEnvironments), 2);
    }

    #[tokio::test]
    async fn duplicate_environment_names_are_rejected() {
        let dir = MockDirectory::new();
        dir.create_environment(1, "prod", "a.example.com").await.unwrap();
        let err = dir.create_environment(1, "prod", "b.example.com").await.unwrap_err();
        assert!(matches!(err, DirectoryError::Status { status: 400, .. }));
        assert_eq!(dir.environments(1).len(), 1);
    }

    #[tokio::test]
    async fn deployments_are_filtered_by_environment() {
        let dir = MockDirectory::new();
        let new = |env: &str, sha: &str| NewDeployment {
            environment: env.to_string(),
            git_ref: "main".to_string(),
            sha: sha.to_string(),
            tag: false,
        };
        let a = dir.create_deployment(1, &new("prod", "aaa")).await.unwrap();
        dir.create_deployment(1, &new("staging", "bbb")).await.unwrap();
        assert_eq!(a.status, DeploymentStatus::Running);
        let prod = dir.list_deployments(1, "prod").await.unwrap();
        assert_eq!(prod.len(), 1);
        assert_eq!(prod[0].sha, "aaa");
        dir.update_deployment_status(1, a.id, DeploymentStatus::Success).await.unwrap();
        assert_eq!(dir.deployments(1)[0].status, DeploymentStatus::Success);
    }
}
