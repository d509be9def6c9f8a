//! Team reconciler

use async_trait::async_trait;
use tracing::info;

use super::project::validate_slug;
use super::{RemoteRef, SentryResource};
use crate::crd::Team;
use crate::error::{Error, Result};
use crate::sentry::{self, Sentry, SentryError, SentryResult, TeamParams};

/// Validate the Team spec
pub fn validate(team: &Team) -> Result<()> {
    if team.spec.name.trim().is_empty() {
        return Err(Error::validation("Team name must not be empty"));
    }
    validate_slug(&team.spec.slug)
}

fn params(team: &Team) -> TeamParams {
    TeamParams {
        name: team.spec.name.clone(),
        slug: team.spec.slug.clone(),
    }
}

async fn find(
    sentry: &Sentry,
    matches: impl Fn(&sentry::Team) -> bool,
) -> SentryResult<Option<sentry::Team>> {
    let teams = sentry.client.list_teams(&sentry.organization).await?;
    Ok(teams.into_iter().find(|t| matches(t)))
}

#[async_trait]
impl SentryResource for Team {
    fn validate(&self) -> Result<()> {
        validate(self)
    }

    async fn create(&self, sentry: &Sentry) -> SentryResult<RemoteRef> {
        let slug = &self.spec.slug;

        if let Some(existing) = find(sentry, |t| &t.slug == slug).await? {
            info!(id = %existing.id, slug = %slug, "Adopting existing Sentry team");
            return Ok(RemoteRef::adopted(existing.id, existing.slug));
        }

        match sentry
            .client
            .create_team(&sentry.organization, &params(self))
            .await
        {
            Ok(created) => Ok(RemoteRef::created(created.id, created.slug)),
            Err(SentryError::Conflict(message)) => match find(sentry, |t| &t.slug == slug).await? {
                Some(existing) => Ok(RemoteRef::adopted(existing.id, existing.slug)),
                None => Err(SentryError::Conflict(message)),
            },
            Err(e) => Err(e),
        }
    }

    async fn update(&self, sentry: &Sentry, id: &str) -> SentryResult<Option<RemoteRef>> {
        let Some(current) = find(sentry, |t| t.id == id).await? else {
            return Ok(None);
        };

        if current.name == self.spec.name && current.slug == self.spec.slug {
            return Ok(Some(RemoteRef::created(current.id, current.slug)));
        }

        match sentry
            .client
            .update_team(&sentry.organization, &current.slug, &params(self))
            .await
        {
            Ok(updated) => Ok(Some(RemoteRef::created(updated.id, updated.slug))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, sentry: &Sentry, id: Option<&str>) -> SentryResult<()> {
        // A team without a recorded id was never confirmed as ours
        let Some(id) = id else {
            info!(slug = %self.spec.slug, "No Sentry team recorded, nothing to delete");
            return Ok(());
        };
        let Some(current) = find(sentry, |t| t.id == id).await? else {
            info!(id = %id, "Sentry team already gone");
            return Ok(());
        };

        sentry
            .client
            .delete_team(&sentry.organization, &current.slug)
            .await
    }
}
