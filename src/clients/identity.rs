use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, Validation, decode};
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    error::IdentityError,
    models::{registry::UserRecord, retry::RetryConfig},
    utils::retry_with_backoff,
};

#[async_trait]
pub trait TokenLoader: Send + Sync {
    /// Returns a service token issued by the identity service at `uaa_host`.
    async fn load(&self, uaa_host: &str) -> Result<String, IdentityError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Looks up `{id, emails}` for each of `ids`. Unknown ids are simply absent.
    async fn users_emails_by_ids(
        &self,
        token: &str,
        ids: &[String],
    ) -> Result<Vec<UserRecord>, IdentityError>;
}

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub client_id: String,
    pub client_secret: String,
    pub max_url_length: usize,
    pub page_size: usize,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct TokenClaims {
    iss: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsersPage {
    #[serde(default, rename = "Resources", alias = "resources")]
    resources: Vec<ScimUser>,
    #[serde(default)]
    total_results: usize,
}

#[derive(Deserialize)]
struct ScimUser {
    id: String,
    #[serde(default)]
    emails: Vec<ScimEmail>,
}

#[derive(Deserialize)]
struct ScimEmail {
    value: String,
}

/// HTTP client for the UAA identity service.
///
/// User lookups go to the zone that issued the token (its `iss` claim), so a
/// token loaded for one UAA host is always used against that same host.
pub struct UaaClient {
    http_client: Client,
    config: IdentityConfig,
    retry_config: RetryConfig,
}

impl UaaClient {
    pub fn new(config: IdentityConfig, retry_config: RetryConfig) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!(client_id = %config.client_id, "Identity service client initialized");

        Ok(Self {
            http_client,
            config,
            retry_config,
        })
    }

    async fn fetch_page(
        &self,
        url: Url,
        token: &str,
    ) -> Result<UsersPage, IdentityError> {
        let response = retry_with_backoff(&self.retry_config, IdentityError::is_transient, || {
            let request = self.http_client.get(url.clone()).bearer_auth(token);

            async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| IdentityError::ServiceUnavailable(e.to_string()))?;
                classify(response).await
            }
        })
        .await?;

        response
            .json::<UsersPage>()
            .await
            .map_err(|e| IdentityError::Other(format!("Failed to parse users JSON: {}", e)))
    }

    async fn fetch_all_pages(
        &self,
        host: &str,
        token: &str,
        filter: &str,
    ) -> Result<Vec<UserRecord>, IdentityError> {
        let mut users = Vec::new();
        let mut start_index = 1;

        loop {
            let url = users_url(host, filter, self.config.page_size, start_index)?;
            let page = self.fetch_page(url, token).await?;
            let received = page.resources.len();

            users.extend(page.resources.into_iter().map(|user| UserRecord {
                id: user.id,
                emails: user.emails.into_iter().map(|email| email.value).collect(),
            }));

            debug!(
                start_index,
                received,
                total_results = page.total_results,
                "Fetched page of users"
            );

            if received == 0 || users.len() >= page.total_results {
                return Ok(users);
            }

            start_index += received;
        }
    }
}

#[async_trait]
impl TokenLoader for UaaClient {
    async fn load(&self, uaa_host: &str) -> Result<String, IdentityError> {
        let url = format!("{}/oauth/token", uaa_host.trim_end_matches('/'));

        let response = retry_with_backoff(&self.retry_config, IdentityError::is_transient, || {
            let request = self
                .http_client
                .post(&url)
                .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
                .form(&[("grant_type", "client_credentials")]);

            async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| IdentityError::ServiceUnavailable(e.to_string()))?;
                classify(response).await
            }
        })
        .await?;

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| IdentityError::Other(format!("Failed to parse token JSON: {}", e)))?;

        Ok(token.access_token)
    }
}

#[async_trait]
impl UserDirectory for UaaClient {
    async fn users_emails_by_ids(
        &self,
        token: &str,
        ids: &[String],
    ) -> Result<Vec<UserRecord>, IdentityError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let host = zone_host(token)?;
        let filters = batch_filters(
            &host,
            ids,
            self.config.page_size,
            self.config.max_url_length,
        )?;

        debug!(ids = ids.len(), batches = filters.len(), "Looking up user emails");

        let mut users = Vec::new();
        for filter in filters {
            users.extend(self.fetch_all_pages(&host, token, &filter).await?);
        }

        Ok(users)
    }
}

async fn classify(response: Response) -> Result<Response, IdentityError> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::NOT_FOUND {
        if body.contains("Requested route") && body.contains("does not exist") {
            return Err(IdentityError::ServiceUnavailable(body));
        }
        return Err(IdentityError::NotFound(body));
    }

    Err(IdentityError::ServiceUnavailable(format!(
        "identity service returned status {}",
        status
    )))
}

/// Base URL of the identity zone that issued `token`, taken from its `iss` claim.
///
/// The token is only read for routing; the identity service verifies it.
pub fn zone_host(token: &str) -> Result<String, IdentityError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let claims = decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| IdentityError::Other(format!("token has no readable issuer: {}", e)))?
        .claims;

    Ok(claims
        .iss
        .trim_end_matches('/')
        .trim_end_matches("/oauth/token")
        .to_string())
}

fn users_url(
    host: &str,
    filter: &str,
    count: usize,
    start_index: usize,
) -> Result<Url, IdentityError> {
    let count = count.to_string();
    let start_index = start_index.to_string();

    Url::parse_with_params(
        &format!("{}/Users", host),
        &[
            ("attributes", "emails,id"),
            ("filter", filter),
            ("count", count.as_str()),
            ("startIndex", start_index.as_str()),
        ],
    )
    .map_err(|e| IdentityError::Other(format!("invalid identity service URL: {}", e)))
}

/// Splits `ids` into `Id eq "…" or …` filters whose request URL stays within
/// `max_url_length`. An id that cannot fit even on its own gets its own batch.
pub fn batch_filters(
    host: &str,
    ids: &[String],
    count: usize,
    max_url_length: usize,
) -> Result<Vec<String>, IdentityError> {
    // Leave room for the widest start index a paged request could carry.
    let widest_index = usize::MAX;
    let fits = |filter: &str| -> Result<bool, IdentityError> {
        Ok(users_url(host, filter, count, widest_index)?.as_str().len() <= max_url_length)
    };

    let mut filters = Vec::new();
    let mut current = String::new();

    for id in ids {
        let clause = id_clause(id);

        if current.is_empty() {
            current = clause;
            continue;
        }

        let candidate = format!("{} or {}", current, clause);
        if fits(&candidate)? {
            current = candidate;
        } else {
            filters.push(std::mem::replace(&mut current, clause));
        }
    }

    if !current.is_empty() {
        filters.push(current);
    }

    Ok(filters)
}

/// SCIM equality clause, with backslashes and quotes in `id` escaped.
fn id_clause(id: &str) -> String {
    let escaped = id.replace('\\', "\\\\").replace('"', "\\\"");
    format!("Id eq \"{}\"", escaped)
}
