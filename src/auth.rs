// ABOUTME: OAuth2 authorization-code and refresh-token lifecycle for one realm
// ABOUTME: Validates CSRF state, persists credentials, and refreshes once on 401

use crate::{
    config::{ClientCredentials, Config},
    credentials::CredentialStore,
    model::{Credential, TokenResponse},
    storage::validate_realm,
    Error, Result,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use reqwest::blocking::Client;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Pending authorization states older than this are rejected.
pub const STATE_TTL_MINUTES: i64 = 10;

const STATE_LEN: usize = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Unauthenticated,
    Authorizing,
    Authenticated,
    Refreshing,
    /// Terminal until a new authorization cycle completes.
    Expired,
}

#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client: ClientCredentials,
    pub redirect_uri: String,
    pub scope: String,
    pub authorization_url: String,
    pub token_url: String,
}

impl OAuthSettings {
    pub fn from_config(config: &Config, client: ClientCredentials) -> Self {
        OAuthSettings {
            client,
            redirect_uri: config.redirect_uri.clone(),
            scope: config.scope.clone(),
            authorization_url: config.authorization_url.clone(),
            token_url: config.token_url.clone(),
        }
    }
}

/// Parameters delivered to the redirect URI after the user approves access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callback {
    pub code: String,
    pub state: String,
    pub realm_id: String,
}

/// Extracts `code`, `state` and `realmId` from a redirect URL.
pub fn parse_callback(callback_url: &str) -> Result<Callback> {
    let url = Url::parse(callback_url.trim())
        .map_err(|e| Error::NotAuthenticated(format!("invalid callback URL: {}", e)))?;

    let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();

    if let Some(error) = params.remove("error") {
        let reason = match params.remove("error_description") {
            Some(detail) if !detail.is_empty() => format!("{} ({})", error, detail),
            _ => error,
        };
        return Err(Error::NotAuthenticated(format!(
            "authorization denied: {}",
            reason
        )));
    }

    let state = params.remove("state").ok_or(Error::StateMismatch)?;
    let code = params
        .remove("code")
        .ok_or_else(|| Error::NotAuthenticated("callback is missing the code parameter".into()))?;
    let realm_id = params.remove("realmId").ok_or_else(|| {
        Error::NotAuthenticated("callback is missing the realmId parameter".into())
    })?;

    Ok(Callback {
        code,
        state,
        realm_id,
    })
}

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LEN)
        .map(char::from)
        .collect()
}

pub struct TokenManager {
    settings: OAuthSettings,
    http: Client,
    store: CredentialStore,
    realm: Option<String>,
    credential: Option<Credential>,
    pending: HashMap<String, DateTime<Utc>>,
    phase: AuthPhase,
}

impl TokenManager {
    pub fn new(settings: OAuthSettings, store: CredentialStore, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(TokenManager {
            settings,
            http,
            store,
            realm: None,
            credential: None,
            pending: HashMap::new(),
            phase: AuthPhase::Unauthenticated,
        })
    }

    /// Selects `realm` and loads its stored credential. Returns whether one
    /// was found.
    pub fn load_realm(&mut self, realm: &str) -> Result<bool> {
        validate_realm(realm)?;
        self.credential = self.store.load(realm)?;
        self.realm = Some(realm.to_string());
        self.phase = if self.credential.is_some() {
            AuthPhase::Authenticated
        } else {
            AuthPhase::Unauthenticated
        };
        Ok(self.credential.is_some())
    }

    pub fn phase(&self) -> AuthPhase {
        self.phase
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Issues a fresh CSRF state and returns the URL the user must visit.
    pub fn begin_authorization(&mut self) -> Result<Url> {
        let now = Utc::now();
        self.pending
            .retain(|_, issued| now - *issued <= ChronoDuration::minutes(STATE_TTL_MINUTES));

        let state = random_state();
        let mut url = Url::parse(&self.settings.authorization_url).map_err(|e| {
            Error::Config(format!(
                "invalid authorization URL {}: {}",
                self.settings.authorization_url, e
            ))
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.settings.client.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("scope", &self.settings.scope)
            .append_pair("response_type", "code")
            .append_pair("state", &state);

        self.pending.insert(state, now);
        self.phase = AuthPhase::Authorizing;
        tracing::debug!(pending = self.pending.len(), "authorization started");
        Ok(url)
    }

    /// Exchanges an authorization code for a credential after checking the
    /// returned state. Any outcome ends the authorization attempt: every
    /// pending state is discarded.
    pub fn complete_authorization(
        &mut self,
        code: &str,
        returned_state: &str,
        realm: &str,
    ) -> Result<Credential> {
        let issued = self.pending.remove(returned_state);
        self.pending.clear();

        let result = self.exchange_code(issued, code, realm);
        if result.is_err() {
            self.phase = if self.credential.is_some() {
                AuthPhase::Authenticated
            } else {
                AuthPhase::Unauthenticated
            };
        }
        result
    }

    fn exchange_code(
        &mut self,
        issued: Option<DateTime<Utc>>,
        code: &str,
        realm: &str,
    ) -> Result<Credential> {
        let issued = issued.ok_or_else(|| {
            tracing::warn!("callback state does not match a pending authorization");
            Error::StateMismatch
        })?;
        if Utc::now() - issued > ChronoDuration::minutes(STATE_TTL_MINUTES) {
            tracing::warn!("callback state expired");
            return Err(Error::StateMismatch);
        }
        validate_realm(realm)?;

        let (resp, body) = self.exchange(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
        ])?;
        let refresh_token = resp.refresh_token.ok_or_else(|| Error::MalformedResponse {
            endpoint: self.settings.token_url.clone(),
            reason: "token response has no refresh_token".into(),
            body: redact_tokens(&body),
        })?;
        let credential = Credential {
            access_token: resp.access_token,
            refresh_token,
        };

        self.store.save(realm, &credential)?;
        self.realm = Some(realm.to_string());
        self.credential = Some(credential.clone());
        self.phase = AuthPhase::Authenticated;
        tracing::info!(realm, "authorization complete");
        Ok(credential)
    }

    /// Trades `existing.refresh_token` for a new credential. The stored
    /// credential is only replaced on success.
    pub fn refresh(&mut self, existing: &Credential) -> Result<Credential> {
        let realm = self
            .realm
            .clone()
            .ok_or_else(|| Error::NotAuthenticated("no realm selected".into()))?;

        let previous = self.phase;
        self.phase = AuthPhase::Refreshing;
        tracing::debug!(realm = %realm, "refreshing access token");

        let resp = match self.exchange(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", existing.refresh_token.as_str()),
        ]) {
            Ok((resp, _)) => resp,
            Err(e) => {
                self.phase = match e {
                    Error::RemoteAuth { .. } => AuthPhase::Expired,
                    _ => previous,
                };
                return Err(e);
            }
        };

        let credential = Credential {
            access_token: resp.access_token,
            refresh_token: resp
                .refresh_token
                .unwrap_or_else(|| existing.refresh_token.clone()),
        };
        if let Err(e) = self.store.save(&realm, &credential) {
            self.phase = previous;
            return Err(e);
        }

        self.credential = Some(credential.clone());
        self.phase = AuthPhase::Authenticated;
        tracing::info!(realm = %realm, "access token refreshed");
        Ok(credential)
    }

    /// Runs `op` with the current credential. On a 401 it refreshes exactly
    /// once and retries once; a second 401, or a rejected refresh, is
    /// `AuthExpired`.
    pub fn ensure_valid<T>(&mut self, mut op: impl FnMut(&Credential) -> Result<T>) -> Result<T> {
        if self.phase == AuthPhase::Expired {
            return Err(Error::AuthExpired);
        }
        let credential = self.credential.clone().ok_or_else(|| {
            Error::NotAuthenticated("no stored credential; run `qbo-sync login`".into())
        })?;

        match op(&credential) {
            Err(Error::Unauthorized { endpoint }) => {
                tracing::info!(%endpoint, "access token rejected, refreshing");
            }
            other => return other,
        }

        let refreshed = match self.refresh(&credential) {
            Ok(c) => c,
            Err(Error::RemoteAuth { status, .. }) => {
                tracing::warn!(status, "refresh rejected");
                self.phase = AuthPhase::Expired;
                return Err(Error::AuthExpired);
            }
            Err(e) => return Err(e),
        };

        match op(&refreshed) {
            Err(Error::Unauthorized { endpoint }) => {
                tracing::warn!(%endpoint, "refreshed token rejected");
                self.phase = AuthPhase::Expired;
                Err(Error::AuthExpired)
            }
            other => other,
        }
    }

    /// Posts a grant to the token endpoint. Returns the parsed response and
    /// its raw body.
    fn exchange(&self, grant: &[(&str, &str)]) -> Result<(TokenResponse, String)> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.settings.client.client_id.as_str()),
            ("client_secret", self.settings.client.client_secret.as_str()),
        ];
        form.extend_from_slice(grant);

        let response = self
            .http
            .post(&self.settings.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(Error::RemoteAuth {
                status: status.as_u16(),
                body,
            });
        }

        match serde_json::from_str(&body) {
            Ok(resp) => Ok((resp, body)),
            Err(e) => Err(Error::MalformedResponse {
                endpoint: self.settings.token_url.clone(),
                reason: e.to_string(),
                body: redact_tokens(&body),
            }),
        }
    }
}

/// Copy of a token endpoint body safe to keep in errors and logs. Token
/// values in a JSON object are replaced; anything else is kept verbatim.
pub fn redact_tokens(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(mut fields)) => {
            for key in ["access_token", "refresh_token", "id_token"] {
                if let Some(v) = fields.get_mut(key) {
                    *v = serde_json::Value::String("<redacted>".into());
                }
            }
            serde_json::Value::Object(fields).to_string()
        }
        _ => body.to_string(),
    }
}
