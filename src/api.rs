// ABOUTME: Blocking HTTP client for the QuickBooks accounting API
// ABOUTME: Handles throttling, bearer headers, transient retries, and status classification

use crate::{
    model::{Credential, EntityKind},
    util::truncate_str,
    Error, Result,
};
use rand::Rng;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use url::Url;

pub struct ApiClient {
    client: Client,
    base_url: String,
    realm_id: String,
    minor_version: u32,
    throttle_min: u64,
    throttle_max: u64,
    max_retries: u32,
    retry_base: Duration,
}

impl ApiClient {
    pub fn new(realm_id: String, base_url: Option<String>, timeout: Duration) -> Result<Self> {
        crate::storage::validate_realm(&realm_id)?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(ApiClient {
            client,
            base_url: base_url
                .unwrap_or_else(|| "https://sandbox-quickbooks.api.intuit.com".into())
                .trim_end_matches('/')
                .to_string(),
            realm_id,
            minor_version: 70,
            throttle_min: 100,
            throttle_max: 300,
            max_retries: 3,
            retry_base: Duration::from_millis(500),
        })
    }

    pub fn realm_id(&self) -> &str {
        &self.realm_id
    }

    pub fn with_minor_version(mut self, minor_version: u32) -> Self {
        self.minor_version = minor_version;
        self
    }

    pub fn with_throttle(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.throttle_min = min_ms;
        self.throttle_max = max_ms;
        self
    }

    pub fn disable_throttle(mut self) -> Self {
        self.throttle_min = 0;
        self.throttle_max = 0;
        self
    }

    pub fn with_retry(mut self, max_retries: u32, base: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base = base;
        self
    }

    fn throttle(&self) {
        if self.throttle_max > 0 {
            let sleep_ms = rand::thread_rng().gen_range(self.throttle_min..=self.throttle_max);
            std::thread::sleep(Duration::from_millis(sleep_ms));
        }
    }

    /// `{base}/v3/company/{realm}/{segment}?minorversion=N`, with any extra
    /// query parameters encoded by the URL serializer.
    fn company_url(&self, segment: &str, params: &[(&str, &str)]) -> Result<Url> {
        let raw = format!(
            "{}/v3/company/{}/{}",
            self.base_url, self.realm_id, segment
        );
        let mut url = Url::parse(&raw)
            .map_err(|e| Error::Config(format!("invalid API URL {}: {}", raw, e)))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
            pairs.append_pair("minorversion", &self.minor_version.to_string());
        }
        Ok(url)
    }

    /// Runs `op`, retrying transient failures with exponential backoff.
    fn retrying<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.retry_base.saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    tracing::warn!(
                        call = what,
                        attempt,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
    }

    pub fn query(&self, kind: EntityKind, credential: &Credential) -> Result<Vec<Value>> {
        let select = kind.select_all();
        let url = self.company_url("query", &[("query", &select)])?;
        let endpoint = url.path().to_string();

        self.retrying("query", || {
            tracing::debug!(%endpoint, query = %select, "querying");
            let response = self
                .client
                .get(url.clone())
                .bearer_auth(&credential.access_token)
                .header("Accept", "application/json")
                .header("User-Agent", "qbo-sync/0.1 (Rust)")
                .send()?;
            self.throttle();

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                return Err(Error::Unauthorized {
                    endpoint: endpoint.clone(),
                });
            }
            if !status.is_success() {
                let message = response.text().unwrap_or_default();
                return Err(Error::Api {
                    endpoint: endpoint.clone(),
                    status: status.as_u16(),
                    message: truncate_str(&message, 200),
                });
            }

            let body = read_json(response, &endpoint)?;
            extract_entities(&body, kind, &endpoint)
        })
    }

    /// Posts a full entity update. Only HTTP 200 counts as applied; 401 is
    /// reported as `Unauthorized` so the caller can refresh and retry.
    pub fn update(
        &self,
        kind: EntityKind,
        entity_id: &str,
        credential: &Credential,
        payload: &Value,
    ) -> Result<Value> {
        let url = self.company_url(kind.resource(), &[])?;
        let endpoint = url.path().to_string();

        self.retrying("update", || {
            tracing::debug!(%endpoint, entity_id, "posting update");
            let response = self
                .client
                .post(url.clone())
                .bearer_auth(&credential.access_token)
                .header("Accept", "application/json")
                .header("User-Agent", "qbo-sync/0.1 (Rust)")
                .json(payload)
                .send()?;
            self.throttle();

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                return Err(Error::Unauthorized {
                    endpoint: endpoint.clone(),
                });
            }
            if status != StatusCode::OK {
                return Err(Error::Conflict {
                    entity_id: entity_id.to_string(),
                    status: status.as_u16(),
                    body: response.text().unwrap_or_default(),
                });
            }

            read_json(response, &endpoint)
        })
    }
}

fn read_json(response: Response, endpoint: &str) -> Result<Value> {
    let body = response.text()?;
    if body.trim().is_empty() {
        return Err(Error::MalformedResponse {
            endpoint: endpoint.into(),
            reason: "empty response body".into(),
            body,
        });
    }

    match serde_json::from_str(&body) {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::warn!(
                endpoint,
                error = %e,
                body = %truncate_str(&body, 500),
                "failed to parse response"
            );
            Err(Error::MalformedResponse {
                endpoint: endpoint.into(),
                reason: e.to_string(),
                body,
            })
        }
    }
}

/// Pulls `QueryResponse.<Entity>` out of a query body. The remote omits the
/// entity key when nothing matches, so a missing key is an empty result; a
/// missing envelope is not.
pub fn extract_entities(body: &Value, kind: EntityKind, endpoint: &str) -> Result<Vec<Value>> {
    let malformed = |reason: &str| Error::MalformedResponse {
        endpoint: endpoint.into(),
        reason: reason.into(),
        body: body.to_string(),
    };

    let envelope = body
        .get("QueryResponse")
        .and_then(Value::as_object)
        .ok_or_else(|| malformed("missing QueryResponse envelope"))?;

    match envelope.get(kind.remote_name()) {
        None => Ok(Vec::new()),
        Some(Value::Array(entities)) => Ok(entities.clone()),
        Some(_) => Err(malformed("entity list is not an array")),
    }
}
