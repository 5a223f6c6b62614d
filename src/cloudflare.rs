//! Cloudflare implementation of the [`Provider`] trait.
//!
//! Talks to the v4 REST API with bearer-token auth. Listing calls paginate
//! at 100 rows; every call carries a 30 second deadline. 429 responses are
//! retried with bounded exponential backoff inside the call, everything
//! else surfaces to the caller for classification.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain_filter::DomainFilter;
use crate::endpoint::{ProviderRecord, Zone};
use crate::error::SherpaError;
use crate::provider::{Provider, ProviderError, RecordSpec};

const API_BASE: &str = "https://api.cloudflare.com/client/v4";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const PER_PAGE: u32 = 100;

/// Attempts per call when the API keeps answering 429.
const MAX_RATE_LIMIT_ATTEMPTS: u32 = 3;
const RATE_LIMIT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Cloudflare v4 API client.
pub struct CloudflareProvider {
    http: reqwest::Client,
    api_base: String,
    filter: DomainFilter,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[allow(dead_code)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    page: u32,
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct ZoneRow {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RecordRow {
    id: String,
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    content: String,
    #[serde(default)]
    ttl: u32,
    #[serde(default)]
    proxied: Option<bool>,
}

#[derive(Debug, Serialize)]
struct RecordBody<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    record_type: &'a str,
    content: &'a str,
    ttl: u32,
    proxied: bool,
}

impl<'a> From<&'a RecordSpec> for RecordBody<'a> {
    fn from(spec: &'a RecordSpec) -> Self {
        Self {
            name: &spec.name,
            record_type: &spec.record_type,
            content: &spec.content,
            ttl: spec.ttl,
            proxied: spec.proxied,
        }
    }
}

impl CloudflareProvider {
    /// Build a client with the given bearer token and zone filter.
    pub fn new(api_token: &str, filter: DomainFilter) -> Result<Self, SherpaError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {api_token}"))
            .map_err(|_| SherpaError::Config("api_token contains invalid characters".into()))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            api_base: API_BASE.to_string(),
            filter,
        })
    }

    /// Point the client at a different API base (for tests against a local
    /// stub).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Issue one API call, retrying on 429 with bounded backoff.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&RecordBody<'_>>,
    ) -> Result<Envelope<T>, ProviderError> {
        let url = format!("{}{}", self.api_base, path);
        let mut attempt = 0;
        loop {
            let mut req = self.http.request(method.clone(), &url);
            if let Some(body) = body {
                req = req.json(body);
            }
            let resp = req.send().await?;
            let status = resp.status();

            if status == StatusCode::TOO_MANY_REQUESTS && attempt + 1 < MAX_RATE_LIMIT_ATTEMPTS {
                attempt += 1;
                let backoff = RATE_LIMIT_BACKOFF_BASE * 2u32.pow(attempt - 1);
                warn!(%url, attempt, ?backoff, "rate limited, backing off");
                tokio::time::sleep(backoff).await;
                continue;
            }

            if !status.is_success() {
                let message = resp
                    .json::<Envelope<serde_json::Value>>()
                    .await
                    .ok()
                    .and_then(|env| env.errors.into_iter().next())
                    .map(|e| e.message)
                    .unwrap_or_default();
                return Err(ProviderError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let envelope: Envelope<T> = resp.json().await?;
            if !envelope.success {
                let message = envelope
                    .errors
                    .into_iter()
                    .next()
                    .map(|e| e.message)
                    .unwrap_or_else(|| "unknown API failure".to_string());
                return Err(ProviderError::Rejected(message));
            }
            return Ok(envelope);
        }
    }

    /// Fetch all pages of a listing endpoint.
    async fn list_paginated<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Vec<T>, ProviderError> {
        let mut rows = Vec::new();
        let mut page = 1;
        loop {
            let sep = if path.contains('?') { '&' } else { '?' };
            let paged = format!("{path}{sep}page={page}&per_page={PER_PAGE}");
            let envelope: Envelope<Vec<T>> = self.request(Method::GET, &paged, None).await?;
            let batch = envelope.result.unwrap_or_default();
            let done = match envelope.result_info {
                Some(info) => info.page >= info.total_pages,
                None => batch.len() < PER_PAGE as usize,
            };
            rows.extend(batch);
            if done {
                break;
            }
            page += 1;
        }
        Ok(rows)
    }
}

#[async_trait]
impl Provider for CloudflareProvider {
    async fn zones(&self) -> Result<Vec<Zone>, ProviderError> {
        let rows: Vec<ZoneRow> = self.list_paginated("/zones").await?;
        let zones: Vec<Zone> = rows
            .into_iter()
            .filter(|z| {
                let keep = self.filter.matches(&z.name);
                if !keep {
                    debug!(zone = %z.name, "zone excluded by domain filter");
                }
                keep
            })
            .map(|z| Zone {
                id: z.id,
                name: z.name,
            })
            .collect();
        debug!(count = zones.len(), "listed managed zones");
        Ok(zones)
    }

    async fn records(&self, zone: &Zone) -> Result<Vec<ProviderRecord>, ProviderError> {
        let rows: Vec<RecordRow> = self
            .list_paginated(&format!("/zones/{}/dns_records", zone.id))
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| ProviderRecord {
                id: r.id,
                zone_id: zone.id.clone(),
                name: r.name,
                record_type: r.record_type,
                content: r.content,
                ttl: r.ttl,
                proxied: r.proxied.unwrap_or(false),
            })
            .collect())
    }

    async fn create_record(
        &self,
        zone: &Zone,
        record: &RecordSpec,
    ) -> Result<String, ProviderError> {
        debug!(name = %record.name, record_type = %record.record_type, "creating record");
        let envelope: Envelope<RecordRow> = self
            .request(
                Method::POST,
                &format!("/zones/{}/dns_records", zone.id),
                Some(&record.into()),
            )
            .await?;
        envelope
            .result
            .map(|r| r.id)
            .ok_or_else(|| ProviderError::Rejected("create returned no record".to_string()))
    }

    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        record: &RecordSpec,
    ) -> Result<(), ProviderError> {
        debug!(name = %record.name, record_id, "updating record");
        let _: Envelope<RecordRow> = self
            .request(
                Method::PUT,
                &format!("/zones/{zone_id}/dns_records/{record_id}"),
                Some(&record.into()),
            )
            .await?;
        Ok(())
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<(), ProviderError> {
        debug!(record_id, "deleting record");
        let _: Envelope<serde_json::Value> = self
            .request(
                Method::DELETE,
                &format!("/zones/{zone_id}/dns_records/{record_id}"),
                None,
            )
            .await?;
        Ok(())
    }
}
