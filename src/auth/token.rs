//! Token refresh state machine.
//!
//! The credential has two states, VALID and EXPIRED/UNSET. EXPIRED→VALID
//! happens via a refresh call that exchanges the long-lived refresh token
//! for a new access token; VALID→EXPIRED happens purely by wall-clock
//! comparison at read time. There is no background timer.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use thiserror::Error;

/// Safety margin subtracted from the response-declared TTL to avoid races
/// at the expiry boundary.
const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(15);

/// Connect timeout for the token endpoint.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Overall request timeout for the token endpoint.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from the token lifecycle.
///
/// Any of these is fatal for the site's batch: without a valid token no
/// subsequent authenticated call can succeed.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Failed to construct the HTTP client for the token endpoint.
    #[error("failed to build token endpoint client: {source}")]
    Client {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// The refresh request itself failed (DNS, connect, timeout).
    #[error("token refresh request failed: {source}")]
    Request {
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The token endpoint rejected the refresh credential.
    #[error("token endpoint rejected refresh (HTTP {status}); check the refresh token")]
    Rejected {
        /// The HTTP status code of the rejection.
        status: u16,
    },

    /// The token endpoint returned a body that could not be decoded.
    #[error("token response could not be decoded: {source}")]
    Decode {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A previous refresh failed; the manager refuses further attempts so
    /// every waiter observes the same fatal condition.
    #[error("token refresh previously failed: {detail}")]
    Unavailable {
        /// Description of the original failure.
        detail: String,
    },
}

/// Credential bootstrap for one authenticated site.
///
/// Adapters supply every value here; the manager performs no discovery.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Token exchange endpoint.
    pub token_url: String,
    /// Long-lived refresh credential.
    pub refresh_token: String,
    /// OAuth client ID the target API expects.
    pub client_id: String,
    /// OAuth client secret the target API expects.
    pub client_secret: String,
    /// User agent sent on every request to the site.
    pub user_agent: String,
    /// Static identity headers the target API requires (platform markers
    /// and the like), sent alongside the Authorization header.
    pub identity_headers: Vec<(String, String)>,
}

impl AuthConfig {
    /// Creates a config with no extra identity headers.
    #[must_use]
    pub fn new(
        token_url: impl Into<String>,
        refresh_token: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            refresh_token: refresh_token.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            user_agent: user_agent.into(),
            identity_headers: Vec::new(),
        }
    }

    /// Adds one static identity header.
    #[must_use]
    pub fn with_identity_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.identity_headers.push((name.into(), value.into()));
        self
    }
}

/// The bearer token plus its computed expiry.
#[derive(Debug, Clone)]
struct Credential {
    access_token: String,
    expires_at: Instant,
}

impl Credential {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Shape of the token endpoint's success response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
enum TokenState {
    Unset,
    Valid(Credential),
    Failed(String),
}

/// Owns and refreshes the bearer credential for one site.
///
/// Designed to be wrapped in `Arc` and shared across the worker pool's
/// tasks. The state mutex is held across the refresh HTTP call on purpose:
/// that is what serializes concurrent refreshes, so the other N−1 callers
/// block until the single refresh completes and then observe the new token.
#[derive(Debug)]
pub struct TokenManager {
    http: reqwest::Client,
    config: AuthConfig,
    state: Mutex<TokenState>,
}

impl TokenManager {
    /// Creates a manager for the given bootstrap config.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Client`] when the HTTP client cannot be built.
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|source| AuthError::Client { source })?;

        Ok(Self {
            http,
            config,
            state: Mutex::new(TokenState::Unset),
        })
    }

    /// Returns a currently valid access token, refreshing if needed.
    ///
    /// Concurrent callers are serialized: when N tasks discover an expired
    /// token simultaneously, exactly one refresh call is made and the rest
    /// observe its outcome.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure to every waiter; this is fatal for the
    /// site since no further authenticated call can succeed.
    #[instrument(skip(self))]
    pub async fn ensure_valid(&self) -> Result<String, AuthError> {
        let mut state = self.state.lock().await;
        match &*state {
            TokenState::Valid(credential) if credential.is_valid() => {
                return Ok(credential.access_token.clone());
            }
            TokenState::Failed(detail) => {
                return Err(AuthError::Unavailable {
                    detail: detail.clone(),
                });
            }
            TokenState::Valid(_) | TokenState::Unset => {}
        }

        debug!("access token expired or unset, refreshing");
        self.refresh_locked(&mut state).await
    }

    /// Refreshes after a mid-flight credential rejection (HTTP 401).
    ///
    /// Refreshes only if the rejected token is still the current one, so N
    /// concurrent rejections trigger a single refresh and the stragglers
    /// simply pick up the replacement.
    ///
    /// # Errors
    ///
    /// Same failure semantics as [`ensure_valid`](Self::ensure_valid).
    #[instrument(skip(self, rejected_token))]
    pub async fn refresh_after_rejection(&self, rejected_token: &str) -> Result<String, AuthError> {
        let mut state = self.state.lock().await;
        match &*state {
            TokenState::Valid(credential) if credential.access_token != rejected_token => {
                // Someone already replaced the rejected token.
                return Ok(credential.access_token.clone());
            }
            TokenState::Failed(detail) => {
                return Err(AuthError::Unavailable {
                    detail: detail.clone(),
                });
            }
            TokenState::Valid(_) | TokenState::Unset => {}
        }

        info!("credential rejected upstream, refreshing access token");
        self.refresh_locked(&mut state).await
    }

    /// Returns the site's static identity headers.
    #[must_use]
    pub fn identity_headers(&self) -> &[(String, String)] {
        &self.config.identity_headers
    }

    /// Returns the full header set for an authenticated request: the
    /// current token embedded in the Authorization header plus the static
    /// identity headers.
    ///
    /// # Errors
    ///
    /// Propagates refresh failures from [`ensure_valid`](Self::ensure_valid).
    pub async fn headers(&self) -> Result<Vec<(String, String)>, AuthError> {
        let token = self.ensure_valid().await?;
        let mut headers = self.config.identity_headers.clone();
        headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        Ok(headers)
    }

    /// Performs the refresh while the state lock is held.
    async fn refresh_locked(&self, state: &mut TokenState) -> Result<String, AuthError> {
        match self.exchange_refresh_token().await {
            Ok(credential) => {
                let token = credential.access_token.clone();
                *state = TokenState::Valid(credential);
                Ok(token)
            }
            Err(error) => {
                warn!(error = %error, "token refresh failed; site is unusable");
                *state = TokenState::Failed(error.to_string());
                Err(error)
            }
        }
    }

    /// Exchanges the long-lived refresh token for a fresh access token.
    async fn exchange_refresh_token(&self) -> Result<Credential, AuthError> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("include_policy", "true"),
                ("refresh_token", self.config.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|source| AuthError::Request { source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| AuthError::Request { source })?;
        let parsed: TokenResponse =
            serde_json::from_slice(&body).map_err(|source| AuthError::Decode { source })?;

        // Response-declared TTL minus a margin, so a token observed as
        // valid is still accepted upstream moments later.
        let ttl = Duration::from_secs(
            parsed
                .expires_in
                .saturating_sub(EXPIRY_SAFETY_MARGIN.as_secs()),
        );
        let expires_at = Instant::now() + ttl;

        info!(expires_in = parsed.expires_in, "access token refreshed");
        Ok(Credential {
            access_token: parsed.access_token,
            expires_at,
        })
    }
}
