//! HTTP client for the Sentry web API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LINK};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use super::error::{SentryError, SentryResult};
use super::types::{Project, ProjectParams, Team, TeamParams};
use super::SentryClient;

/// Default API root for sentry.io
pub const DEFAULT_BASE_URL: &str = "https://sentry.io/api/0/";

/// Sentry client authenticating with a bearer token
#[derive(Debug, Clone)]
pub struct HttpSentryClient {
    base_url: Url,
    token: String,
    http_client: reqwest::Client,
}

impl HttpSentryClient {
    /// Create a client for the given API root
    pub fn new(base_url: Url, token: impl Into<String>, timeout: Duration) -> SentryResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sentry-operator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        // Url::join drops the last segment unless the base ends with a slash
        let base_url = if base_url.path().ends_with('/') {
            base_url
        } else {
            let mut fixed = base_url;
            let path = format!("{}/", fixed.path());
            fixed.set_path(&path);
            fixed
        };

        Ok(Self {
            base_url,
            token: token.into(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> SentryResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| SentryError::Transport(format!("invalid url for '{}': {}", path, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, %url, "Sentry API request");
        self.http_client
            .request(method, url)
            .bearer_auth(&self.token)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> SentryResult<T> {
        let response = check(request.send().await?).await?;
        Ok(response.json::<T>().await?)
    }

    /// GET a list endpoint, following cursor links until the last page
    async fn get_all<T: DeserializeOwned>(&self, path: &str) -> SentryResult<Vec<T>> {
        let mut url = self.url(path)?;
        let mut items = Vec::new();
        loop {
            let response = check(self.request(Method::GET, url).send().await?).await?;
            let next = next_page(response.headers());
            items.extend(response.json::<Vec<T>>().await?);
            match next {
                Some(next) => url = next,
                None => return Ok(items),
            }
        }
    }

    async fn post<T: DeserializeOwned>(&self, path: &str) -> SentryResult<T> {
        self.send_json(self.request(Method::POST, self.url(path)?))
            .await
    }

    async fn write<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> SentryResult<T> {
        self.send_json(self.request(method, self.url(path)?).json(body))
            .await
    }

    async fn delete(&self, path: &str) -> SentryResult<()> {
        check(self.request(Method::DELETE, self.url(path)?).send().await?).await?;
        Ok(())
    }
}

/// Next page from a Sentry `Link` header, if it has results
fn next_page(headers: &HeaderMap) -> Option<Url> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',')
        .find(|part| part.contains(r#"rel="next""#) && part.contains(r#"results="true""#))
        .and_then(|part| {
            let start = part.find('<')? + 1;
            let end = part.find('>')?;
            Url::parse(part.get(start..end)?).ok()
        })
}

/// Turn a non-success response into a classified error
async fn check(response: Response) -> SentryResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SentryError::from_response(status, &body))
}

#[async_trait]
impl SentryClient for HttpSentryClient {
    async fn list_teams(&self, organization: &str) -> SentryResult<Vec<Team>> {
        self.get_all(&format!("organizations/{}/teams/", organization))
            .await
    }

    async fn create_team(&self, organization: &str, params: &TeamParams) -> SentryResult<Team> {
        self.write(
            Method::POST,
            &format!("organizations/{}/teams/", organization),
            params,
        )
        .await
    }

    async fn update_team(
        &self,
        organization: &str,
        team_slug: &str,
        params: &TeamParams,
    ) -> SentryResult<Team> {
        self.write(
            Method::PUT,
            &format!("teams/{}/{}/", organization, team_slug),
            params,
        )
        .await
    }

    async fn delete_team(&self, organization: &str, team_slug: &str) -> SentryResult<()> {
        self.delete(&format!("teams/{}/{}/", organization, team_slug))
            .await
    }

    async fn list_projects(
        &self,
        organization: &str,
        team_slug: &str,
    ) -> SentryResult<Vec<Project>> {
        self.get_all(&format!("teams/{}/{}/projects/", organization, team_slug))
            .await
    }

    async fn list_organization_projects(&self, organization: &str) -> SentryResult<Vec<Project>> {
        self.get_all(&format!("organizations/{}/projects/", organization))
            .await
    }

    async fn create_project(
        &self,
        organization: &str,
        team_slug: &str,
        params: &ProjectParams,
    ) -> SentryResult<Project> {
        self.write(
            Method::POST,
            &format!("teams/{}/{}/projects/", organization, team_slug),
            params,
        )
        .await
    }

    async fn update_project(
        &self,
        organization: &str,
        project_slug: &str,
        params: &ProjectParams,
    ) -> SentryResult<Project> {
        self.write(
            Method::PUT,
            &format!("projects/{}/{}/", organization, project_slug),
            params,
        )
        .await
    }

    async fn delete_project(&self, organization: &str, project_slug: &str) -> SentryResult<()> {
        self.delete(&format!("projects/{}/{}/", organization, project_slug))
            .await
    }

    async fn add_project_team(
        &self,
        organization: &str,
        project_slug: &str,
        team_slug: &str,
    ) -> SentryResult<Project> {
        self.post(&format!(
            "projects/{}/{}/teams/{}/",
            organization, project_slug, team_slug
        ))
        .await
    }

    async fn remove_project_team(
        &self,
        organization: &str,
        project_slug: &str,
        team_slug: &str,
    ) -> SentryResult<()> {
        self.delete(&format!(
            "projects/{}/{}/teams/{}/",
            organization, project_slug, team_slug
        ))
        .await
    }
}
