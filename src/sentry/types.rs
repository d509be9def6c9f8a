//! Sentry API payloads

use serde::{Deserialize, Serialize};

/// A Sentry team
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Team {
    pub id: String,
    pub slug: String,
    pub name: String,
}

/// A Sentry project
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Project {
    pub id: String,
    pub slug: String,
    pub name: String,

    /// Primary team, as embedded in single-team responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<TeamRef>,

    /// Every team with access to the project
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teams: Vec<TeamRef>,
}

impl Project {
    /// Slugs of the teams the project belongs to
    pub fn team_slugs(&self) -> impl Iterator<Item = &str> {
        self.team
            .iter()
            .chain(self.teams.iter())
            .map(|t| t.slug.as_str())
    }

    pub fn belongs_to(&self, team_slug: &str) -> bool {
        self.team_slugs().any(|slug| slug == team_slug)
    }
}

/// Team summary embedded in a project
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TeamRef {
    pub slug: String,
}

/// Body for creating or updating a team
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TeamParams {
    pub name: String,
    pub slug: String,
}

/// Body for creating or updating a project
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProjectParams {
    pub name: String,
    pub slug: String,
}
