//! Sentry API client
//!
//! The reconcilers depend only on the [`SentryClient`] trait. [`HttpSentryClient`]
//! talks to a real Sentry installation, [`InMemorySentry`] backs the tests.

mod client;
mod error;
mod memory;
mod types;

use std::sync::Arc;

use async_trait::async_trait;

pub use client::{HttpSentryClient, DEFAULT_BASE_URL};
pub use error::{ErrorClass, SentryError, SentryResult};
pub use memory::{InMemorySentry, Operation};
pub use types::{Project, ProjectParams, Team, TeamParams, TeamRef};

/// Operations consumed from the Sentry web API.
///
/// Implementations perform no retries; every failure is returned to the caller.
#[async_trait]
pub trait SentryClient: Send + Sync {
    async fn list_teams(&self, organization: &str) -> SentryResult<Vec<Team>>;

    async fn create_team(&self, organization: &str, params: &TeamParams) -> SentryResult<Team>;

    async fn update_team(
        &self,
        organization: &str,
        team_slug: &str,
        params: &TeamParams,
    ) -> SentryResult<Team>;

    async fn delete_team(&self, organization: &str, team_slug: &str) -> SentryResult<()>;

    /// Projects owned by one team
    async fn list_projects(&self, organization: &str, team_slug: &str)
        -> SentryResult<Vec<Project>>;

    /// Every project in the organization, whichever team owns it
    async fn list_organization_projects(&self, organization: &str) -> SentryResult<Vec<Project>>;

    async fn create_project(
        &self,
        organization: &str,
        team_slug: &str,
        params: &ProjectParams,
    ) -> SentryResult<Project>;

    async fn update_project(
        &self,
        organization: &str,
        project_slug: &str,
        params: &ProjectParams,
    ) -> SentryResult<Project>;

    async fn delete_project(&self, organization: &str, project_slug: &str) -> SentryResult<()>;

    /// Give `team_slug` access to the project
    async fn add_project_team(
        &self,
        organization: &str,
        project_slug: &str,
        team_slug: &str,
    ) -> SentryResult<Project>;

    /// Revoke the access of `team_slug` to the project
    async fn remove_project_team(
        &self,
        organization: &str,
        project_slug: &str,
        team_slug: &str,
    ) -> SentryResult<()>;
}

/// A Sentry client bound to the organization it manages
#[derive(Clone)]
pub struct Sentry {
    pub organization: String,
    pub client: Arc<dyn SentryClient>,
}

impl Sentry {
    pub fn new(organization: impl Into<String>, client: Arc<dyn SentryClient>) -> Self {
        Self {
            organization: organization.into(),
            client,
        }
    }
}

impl std::fmt::Debug for Sentry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sentry")
            .field("organization", &self.organization)
            .finish_non_exhaustive()
    }
}
