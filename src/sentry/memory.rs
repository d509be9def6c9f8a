//! In-memory Sentry organization used as a test double

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::error::{SentryError, SentryResult};
use super::types::{Project, ProjectParams, Team, TeamParams, TeamRef};
use super::SentryClient;

/// Sentry API operations, as recorded in the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListTeams,
    CreateTeam,
    UpdateTeam,
    DeleteTeam,
    ListProjects,
    ListOrganizationProjects,
    CreateProject,
    UpdateProject,
    DeleteProject,
    AddProjectTeam,
    RemoveProjectTeam,
}

impl Operation {
    pub fn is_mutating(self) -> bool {
        !matches!(
            self,
            Operation::ListTeams | Operation::ListProjects | Operation::ListOrganizationProjects
        )
    }
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    teams: Vec<Team>,
    projects: Vec<Project>,
    failures: HashMap<Operation, VecDeque<SentryError>>,
    calls: Vec<Operation>,
}

impl State {
    fn allocate_id(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        id.to_string()
    }

    /// Record the call and pop an injected failure, if one is queued
    fn enter(&mut self, op: Operation) -> SentryResult<()> {
        self.calls.push(op);
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn require_team(&self, slug: &str) -> SentryResult<()> {
        if self.teams.iter().any(|t| t.slug == slug) {
            Ok(())
        } else {
            Err(SentryError::NotFound(format!("team '{}' does not exist", slug)))
        }
    }

    fn project_mut(&mut self, slug: &str) -> SentryResult<&mut Project> {
        self.projects
            .iter_mut()
            .find(|p| p.slug == slug)
            .ok_or_else(|| SentryError::NotFound(format!("project '{}' does not exist", slug)))
    }
}

fn team_ref(slug: &str) -> TeamRef {
    TeamRef {
        slug: slug.to_string(),
    }
}

/// A single Sentry organization held in memory.
///
/// Every call is logged. Failures can be queued per operation with
/// [`InMemorySentry::fail_next`]; they are returned before the call has any effect.
#[derive(Debug)]
pub struct InMemorySentry {
    state: Mutex<State>,
}

impl Default for InMemorySentry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySentry {
    pub fn new() -> Self {
        Self::with_next_id(1)
    }

    /// Start the id sequence at `next_id`
    pub fn with_next_id(next_id: u64) -> Self {
        Self {
            state: Mutex::new(State {
                next_id,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a team that exists before reconciliation starts
    pub fn seed_team(&self, slug: &str, name: &str) -> Team {
        let mut state = self.lock();
        let team = Team {
            id: state.allocate_id(),
            slug: slug.to_string(),
            name: name.to_string(),
        };
        state.teams.push(team.clone());
        team
    }

    /// Seed a project created outside of the operator
    pub fn seed_project(&self, team_slug: &str, slug: &str, name: &str) -> Project {
        let mut state = self.lock();
        let project = Project {
            id: state.allocate_id(),
            slug: slug.to_string(),
            name: name.to_string(),
            team: None,
            teams: vec![team_ref(team_slug)],
        };
        state.projects.push(project.clone());
        project
    }

    /// Remove a project behind the operator's back
    pub fn remove_project(&self, slug: &str) {
        self.lock().projects.retain(|p| p.slug != slug);
    }

    /// Queue a failure for the next call of `op`
    pub fn fail_next(&self, op: Operation, err: SentryError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    pub fn projects(&self) -> Vec<Project> {
        self.lock().projects.clone()
    }

    pub fn teams(&self) -> Vec<Team> {
        self.lock().teams.clone()
    }

    pub fn project(&self, slug: &str) -> Option<Project> {
        self.lock().projects.iter().find(|p| p.slug == slug).cloned()
    }

    pub fn calls(&self) -> Vec<Operation> {
        self.lock().calls.clone()
    }

    pub fn count(&self, op: Operation) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    pub fn mutating_calls(&self) -> usize {
        self.lock().calls.iter().filter(|c| c.is_mutating()).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

#[async_trait]
impl SentryClient for InMemorySentry {
    async fn list_teams(&self, _organization: &str) -> SentryResult<Vec<Team>> {
        let mut state = self.lock();
        state.enter(Operation::ListTeams)?;
        Ok(state.teams.clone())
    }

    async fn create_team(&self, _organization: &str, params: &TeamParams) -> SentryResult<Team> {
        let mut state = self.lock();
        state.enter(Operation::CreateTeam)?;
        if state.teams.iter().any(|t| t.slug == params.slug) {
            return Err(SentryError::Conflict(format!(
                "team '{}' already exists",
                params.slug
            )));
        }
        let team = Team {
            id: state.allocate_id(),
            slug: params.slug.clone(),
            name: params.name.clone(),
        };
        state.teams.push(team.clone());
        Ok(team)
    }

    async fn update_team(
        &self,
        _organization: &str,
        team_slug: &str,
        params: &TeamParams,
    ) -> SentryResult<Team> {
        let mut state = self.lock();
        state.enter(Operation::UpdateTeam)?;
        if params.slug != team_slug && state.teams.iter().any(|t| t.slug == params.slug) {
            return Err(SentryError::Conflict(format!(
                "team '{}' already exists",
                params.slug
            )));
        }
        let team = state
            .teams
            .iter_mut()
            .find(|t| t.slug == team_slug)
            .ok_or_else(|| SentryError::NotFound(format!("team '{}' does not exist", team_slug)))?;
        team.name = params.name.clone();
        team.slug = params.slug.clone();
        let team = team.clone();

        // Projects embed the owning team's slug
        for owner in state.projects.iter_mut().flat_map(|p| p.teams.iter_mut()) {
            if owner.slug == team_slug {
                owner.slug = params.slug.clone();
            }
        }
        Ok(team)
    }

    async fn delete_team(&self, _organization: &str, team_slug: &str) -> SentryResult<()> {
        let mut state = self.lock();
        state.enter(Operation::DeleteTeam)?;
        state.require_team(team_slug)?;
        state.teams.retain(|t| t.slug != team_slug);
        // Projects outlive their team
        for project in state.projects.iter_mut() {
            project.teams.retain(|t| t.slug != team_slug);
        }
        Ok(())
    }

    async fn list_projects(
        &self,
        _organization: &str,
        team_slug: &str,
    ) -> SentryResult<Vec<Project>> {
        let mut state = self.lock();
        state.enter(Operation::ListProjects)?;
        state.require_team(team_slug)?;
        Ok(state
            .projects
            .iter()
            .filter(|p| p.belongs_to(team_slug))
            .cloned()
            .collect())
    }

    async fn list_organization_projects(&self, _organization: &str) -> SentryResult<Vec<Project>> {
        let mut state = self.lock();
        state.enter(Operation::ListOrganizationProjects)?;
        Ok(state.projects.clone())
    }

    async fn create_project(
        &self,
        _organization: &str,
        team_slug: &str,
        params: &ProjectParams,
    ) -> SentryResult<Project> {
        let mut state = self.lock();
        state.enter(Operation::CreateProject)?;
        state.require_team(team_slug)?;
        if state.projects.iter().any(|p| p.slug == params.slug) {
            return Err(SentryError::Conflict(format!(
                "project '{}' already exists",
                params.slug
            )));
        }
        let project = Project {
            id: state.allocate_id(),
            slug: params.slug.clone(),
            name: params.name.clone(),
            team: None,
            teams: vec![team_ref(team_slug)],
        };
        state.projects.push(project.clone());
        Ok(project)
    }

    async fn update_project(
        &self,
        _organization: &str,
        project_slug: &str,
        params: &ProjectParams,
    ) -> SentryResult<Project> {
        let mut state = self.lock();
        state.enter(Operation::UpdateProject)?;
        if params.slug != project_slug && state.projects.iter().any(|p| p.slug == params.slug) {
            return Err(SentryError::Conflict(format!(
                "project '{}' already exists",
                params.slug
            )));
        }
        let project = state.project_mut(project_slug)?;
        project.name = params.name.clone();
        project.slug = params.slug.clone();
        Ok(project.clone())
    }

    async fn delete_project(&self, _organization: &str, project_slug: &str) -> SentryResult<()> {
        let mut state = self.lock();
        state.enter(Operation::DeleteProject)?;
        if !state.projects.iter().any(|p| p.slug == project_slug) {
            return Err(SentryError::NotFound(format!(
                "project '{}' does not exist",
                project_slug
            )));
        }
        state.projects.retain(|p| p.slug != project_slug);
        Ok(())
    }

    async fn add_project_team(
        &self,
        _organization: &str,
        project_slug: &str,
        team_slug: &str,
    ) -> SentryResult<Project> {
        let mut state = self.lock();
        state.enter(Operation::AddProjectTeam)?;
        state.require_team(team_slug)?;
        let project = state.project_mut(project_slug)?;
        if !project.belongs_to(team_slug) {
            project.teams.push(team_ref(team_slug));
        }
        Ok(project.clone())
    }

    async fn remove_project_team(
        &self,
        _organization: &str,
        project_slug: &str,
        team_slug: &str,
    ) -> SentryResult<()> {
        let mut state = self.lock();
        state.enter(Operation::RemoveProjectTeam)?;
        state.require_team(team_slug)?;
        state.project_mut(project_slug)?.teams.retain(|t| t.slug != team_slug);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(name: &str, slug: &str) -> ProjectParams {
        ProjectParams {
            name: name.to_string(),
            slug: slug.to_string(),
        }
    }

    #[tokio::test]
    async fn test_project_slugs_are_unique_across_teams() {
        let sentry = InMemorySentry::with_next_id(42);
        sentry.seed_team("core", "Core");
        sentry.seed_team("web", "Web");

        let created = sentry
            .create_project("acme", "core", &params("Alpha", "alpha"))
            .await
            .unwrap();
        assert_eq!(created.id, "44");

        let err = sentry
            .create_project("acme", "web", &params("Alpha", "alpha"))
            .await
            .unwrap_err();
        assert!(matches!(err, SentryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_injected_failure_has_no_effect() {
        let sentry = InMemorySentry::new();
        sentry.seed_team("core", "Core");
        sentry.fail_next(Operation::CreateProject, SentryError::RateLimited);

        let err = sentry
            .create_project("acme", "core", &params("Alpha", "alpha"))
            .await
            .unwrap_err();
        assert_eq!(err, SentryError::RateLimited);
        assert!(sentry.projects().is_empty());

        // Only the next call fails
        assert!(sentry
            .create_project("acme", "core", &params("Alpha", "alpha"))
            .await
            .is_ok());
        assert_eq!(sentry.count(Operation::CreateProject), 2);
    }

    #[tokio::test]
    async fn test_list_projects_requires_team() {
        let sentry = InMemorySentry::new();
        let err = sentry.list_projects("acme", "missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(sentry.mutating_calls(), 0);
    }

    #[tokio::test]
    async fn test_projects_survive_their_team() {
        let sentry = InMemorySentry::new();
        sentry.seed_team("core", "Core");
        sentry.seed_project("core", "alpha", "Alpha");

        sentry.delete_team("acme", "core").await.unwrap();

        assert!(sentry.list_projects("acme", "core").await.is_err());
        let orphaned = sentry.list_organization_projects("acme").await.unwrap();
        assert_eq!(orphaned.len(), 1);
        assert_eq!(orphaned[0].team_slugs().count(), 0);
    }
}
