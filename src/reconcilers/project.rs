//! Project reconciler
//!
//! New projects are matched by slug under their declared team. Once an id is
//! recorded the project is located by id across the whole organization, so a
//! change of team or slug is applied in place.

use async_trait::async_trait;
use tracing::info;

use super::{RemoteRef, SentryResource};
use crate::crd::Project;
use crate::error::{Error, Result};
use crate::sentry::{self, ProjectParams, Sentry, SentryError, SentryResult};

/// Validate the Project spec
pub fn validate(project: &Project) -> Result<()> {
    if project.spec.name.trim().is_empty() {
        return Err(Error::validation("Project name must not be empty"));
    }
    if project.spec.team.trim().is_empty() {
        return Err(Error::validation("Project team must not be empty"));
    }
    validate_slug(&project.spec.slug)
}

/// Sentry slugs are lowercase letters, digits, dashes and underscores
pub(crate) fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() {
        return Err(Error::validation("slug must not be empty"));
    }
    if slug.len() > 50 {
        return Err(Error::validation(format!(
            "slug '{}' is longer than 50 characters",
            slug
        )));
    }
    if let Some(c) = slug
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_'))
    {
        return Err(Error::validation(format!(
            "Invalid slug '{}': unexpected character '{}'",
            slug, c
        )));
    }
    Ok(())
}

fn params(project: &Project) -> ProjectParams {
    ProjectParams {
        name: project.spec.name.clone(),
        slug: project.spec.slug.clone(),
    }
}

async fn find_in_team(
    sentry: &Sentry,
    team: &str,
    slug: &str,
) -> SentryResult<Option<sentry::Project>> {
    let projects = sentry
        .client
        .list_projects(&sentry.organization, team)
        .await?;
    Ok(projects.into_iter().find(|p| p.slug == slug))
}

async fn find_in_organization(
    sentry: &Sentry,
    matches: impl Fn(&sentry::Project) -> bool,
) -> SentryResult<Option<sentry::Project>> {
    let projects = sentry
        .client
        .list_organization_projects(&sentry.organization)
        .await?;
    Ok(projects.into_iter().find(|p| matches(p)))
}

#[async_trait]
impl SentryResource for Project {
    fn validate(&self) -> Result<()> {
        validate(self)
    }

    async fn create(&self, sentry: &Sentry) -> SentryResult<RemoteRef> {
        let team = &self.spec.team;
        let slug = &self.spec.slug;

        if let Some(existing) = find_in_team(sentry, team, slug).await? {
            info!(id = %existing.id, slug = %slug, "Adopting existing Sentry project");
            return Ok(RemoteRef::adopted(existing.id, existing.slug));
        }

        match sentry
            .client
            .create_project(&sentry.organization, team, &params(self))
            .await
        {
            Ok(created) => Ok(RemoteRef::created(created.id, created.slug)),
            // Created by someone else between our lookup and the create
            Err(SentryError::Conflict(message)) => match find_in_team(sentry, team, slug).await? {
                Some(existing) => Ok(RemoteRef::adopted(existing.id, existing.slug)),
                None => Err(SentryError::Conflict(message)),
            },
            Err(e) => Err(e),
        }
    }

    async fn update(&self, sentry: &Sentry, id: &str) -> SentryResult<Option<RemoteRef>> {
        let Some(current) = find_in_organization(sentry, |p| p.id == id).await? else {
            return Ok(None);
        };
        let owners: Vec<String> = current.team_slugs().map(str::to_string).collect();

        let slug = if current.name == self.spec.name && current.slug == self.spec.slug {
            current.slug
        } else {
            match sentry
                .client
                .update_project(&sentry.organization, &current.slug, &params(self))
                .await
            {
                Ok(updated) => updated.slug,
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e),
            }
        };

        // The declared team ends up as the only team
        let team = &self.spec.team;
        if !owners.iter().any(|owner| owner == team) {
            info!(id = %id, team = %team, "Moving project to team");
            sentry
                .client
                .add_project_team(&sentry.organization, &slug, team)
                .await?;
        }
        for previous in owners.iter().filter(|owner| *owner != team) {
            sentry
                .client
                .remove_project_team(&sentry.organization, &slug, previous)
                .await?;
        }

        Ok(Some(RemoteRef::created(current.id, slug)))
    }

    async fn delete(&self, sentry: &Sentry, id: Option<&str>) -> SentryResult<()> {
        let target = match id {
            Some(id) => find_in_organization(sentry, |p| p.id == id).await?,
            // Without an id only a project under the declared team can be ours
            None => {
                find_in_organization(sentry, |p| {
                    p.slug == self.spec.slug && p.belongs_to(&self.spec.team)
                })
                .await?
            }
        };
        let Some(target) = target else {
            info!(slug = %self.spec.slug, "No Sentry project to delete");
            return Ok(());
        };

        sentry
            .client
            .delete_project(&sentry.organization, &target.slug)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_rules() {
        assert!(validate_slug("alpha-1_x").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("Alpha").is_err());
        assert!(validate_slug("has space").is_err());
        assert!(validate_slug(&"a".repeat(51)).is_err());
    }
}
