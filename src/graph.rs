use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::source::{ContentSource, Notebook, PageMeta, Section};

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0/me/onenote";
const GRAPH_HOST: &str = "graph.microsoft.com";
const TOKEN_URL: &str = "https://login.microsoftonline.com";
const API_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;
const PAGE_BATCH: usize = 100;

/// OAuth refresh-token grant settings.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub tenant: String,
    pub refresh_token: String,
}

/// Microsoft Graph OneNote client.
pub struct GraphClient {
    http: reqwest::Client,
    token: RwLock<String>,
    refresh: Mutex<Option<RefreshConfig>>,
}

impl GraphClient {
    pub fn new(access_token: String, refresh: Option<RefreshConfig>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .user_agent(concat!("onenote_export/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(GraphClient {
            http,
            token: RwLock::new(access_token),
            refresh: Mutex::new(refresh),
        })
    }

    /// GET with auth, one token refresh on 401, and backoff on throttling.
    async fn get(&self, url: &str, timeout: Duration) -> Result<Response> {
        let mut refreshed = false;
        let mut attempt = 0u32;

        loop {
            let mut request = self.http.get(url).timeout(timeout);
            if sends_token(url) {
                request = request.bearer_auth(self.token.read().await.as_str());
            }
            let response = request
                .send()
                .await
                .with_context(|| format!("GET {} failed", url))?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !refreshed && sends_token(url) {
                refreshed = true;
                if self.refresh_access_token().await? {
                    continue;
                }
                return Ok(response);
            }

            if should_retry(status) && attempt < MAX_RETRIES {
                let backoff = retry_after(&response)
                    .unwrap_or_else(|| Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt)));
                warn!(
                    "{} on {} (attempt {}/{}), backing off {:.1}s",
                    status,
                    url,
                    attempt + 1,
                    MAX_RETRIES,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
                continue;
            }

            return Ok(response);
        }
    }

    /// Returns `false` when no refresh credentials are configured.
    async fn refresh_access_token(&self) -> Result<bool> {
        let mut refresh = self.refresh.lock().await;
        let Some(config) = refresh.as_mut() else {
            return Ok(false);
        };

        info!("Refreshing access token");
        let url = format!("{}/{}/oauth2/v2.0/token", TOKEN_URL, config.tenant);
        let mut form = vec![
            ("client_id", config.client_id.clone()),
            ("refresh_token", config.refresh_token.clone()),
            ("grant_type", "refresh_token".to_string()),
        ];
        if let Some(secret) = &config.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        let body = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .context("Token refresh request failed")?
            .text()
            .await?;
        let grant = parse_token_response(&body)?;

        *self.token.write().await = grant.access_token;
        if let Some(rotated) = grant.refresh_token {
            config.refresh_token = rotated;
        }
        Ok(true)
    }

    /// Follow `@odata.nextLink` until the listing is exhausted.
    async fn list_all<T: DeserializeOwned>(&self, url: String) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next {
            let response = self.get(&url, API_TIMEOUT).await?;
            let status = response.status();
            if !status.is_success() {
                bail!("Listing {} returned {}", url, status);
            }
            let listing: Listing<T> = parse_listing(&response.text().await?)
                .with_context(|| format!("Unexpected listing from {}", url))?;
            items.extend(listing.value);
            next = listing.next_link;
        }
        Ok(items)
    }
}

impl ContentSource for GraphClient {
    async fn list_notebooks(&self) -> Result<Vec<Notebook>> {
        let entities: Vec<NamedEntity> = self.list_all(format!("{}/notebooks", GRAPH_BASE)).await?;
        debug!("Listed {} notebooks", entities.len());
        Ok(entities.into_iter().map(Into::into).collect())
    }

    async fn list_sections(&self, notebook_id: &str) -> Result<Vec<Section>> {
        let url = format!("{}/notebooks/{}/sections", GRAPH_BASE, notebook_id);
        let entities: Vec<NamedEntity> = self.list_all(url).await?;
        Ok(entities.into_iter().map(Into::into).collect())
    }

    async fn list_pages(&self, section_id: &str) -> Result<Vec<PageMeta>> {
        let url = format!("{}/sections/{}/pages?$top={}", GRAPH_BASE, section_id, PAGE_BATCH);
        let entities: Vec<PageEntity> = self.list_all(url).await?;
        Ok(entities.into_iter().map(Into::into).collect())
    }

    async fn fetch_page_markup(&self, page_id: &str) -> Result<Option<String>> {
        let url = format!("{}/pages/{}/content", GRAPH_BASE, page_id);
        let response = self.get(&url, API_TIMEOUT).await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => Ok(Some(response.text().await?)),
            status => bail!("Page content request returned {}", status),
        }
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.get(url, DOWNLOAD_TIMEOUT).await?;
        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {}", status);
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// The bearer token is only ever sent to Graph itself.
fn sends_token(url: &str) -> bool {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == GRAPH_HOST || h.ends_with(".graph.microsoft.com")))
        .unwrap_or(false)
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::SERVICE_UNAVAILABLE
        || status == StatusCode::BAD_GATEWAY
        || status == StatusCode::GATEWAY_TIMEOUT
        || status == StatusCode::INTERNAL_SERVER_ERROR
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// ── Wire types ──

#[derive(Debug, Deserialize)]
struct Listing<T> {
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

fn parse_listing<T: DeserializeOwned>(body: &str) -> Result<Listing<T>> {
    Ok(serde_json::from_str(body)?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamedEntity {
    id: String,
    display_name: Option<String>,
}

impl From<NamedEntity> for Notebook {
    fn from(e: NamedEntity) -> Self {
        Notebook {
            name: e.display_name.unwrap_or_else(|| e.id.clone()),
            id: e.id,
        }
    }
}

impl From<NamedEntity> for Section {
    fn from(e: NamedEntity) -> Self {
        Section {
            name: e.display_name.unwrap_or_else(|| e.id.clone()),
            id: e.id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageEntity {
    id: String,
    title: Option<String>,
    created_date_time: Option<String>,
    last_modified_date_time: Option<String>,
    created_by: Option<IdentitySet>,
}

#[derive(Debug, Deserialize)]
struct IdentitySet {
    user: Option<Identity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Identity {
    display_name: Option<String>,
}

impl From<PageEntity> for PageMeta {
    fn from(e: PageEntity) -> Self {
        PageMeta {
            id: e.id,
            title: e.title,
            created: e.created_date_time,
            modified: e.last_modified_date_time,
            author: e.created_by.and_then(|c| c.user).and_then(|u| u.display_name),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    error_description: Option<String>,
}

struct TokenGrant {
    access_token: String,
    refresh_token: Option<String>,
}

fn parse_token_response(body: &str) -> Result<TokenGrant> {
    let parsed: TokenResponse = serde_json::from_str(body).context("Malformed token response")?;
    match parsed.access_token {
        Some(access_token) => Ok(TokenGrant {
            access_token,
            refresh_token: parsed.refresh_token,
        }),
        None => bail!(
            "Token refresh rejected: {}",
            parsed.error_description.as_deref().unwrap_or("unknown error")
        ),
    }
}
