//! Client for the identity backend.
//!
//! Only what the session core needs: exchange credentials for a bearer
//! token, fetch the signed-in user's profile, and make one-shot authorized
//! reads using the token straight from storage.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{get_stored_token, SessionManager, SessionStorage};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Base URL used when nothing is configured
pub const DEFAULT_BASE_URL: &str = "http://localhost:3001/api";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(alias = "access_token", alias = "accessToken")]
    token: String,
}

/// Client for the login and profile endpoints.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct AuthClient {
    client: Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Exchange credentials for a bearer token
    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        let url = self.url("auth/login");

        let response = self
            .client
            .post(&url)
            .json(&LoginRequest { email, password })
            .send()
            .await
            .map_err(ApiError::from)
            .context("Failed to send login request")?;

        let response = Self::check_response(response).await?;
        let login: LoginResponse = response.json().await.context("Failed to parse login response")?;
        Ok(login.token)
    }

    /// Fetch the profile of the user owning `token`
    pub async fn fetch_profile(&self, token: &str) -> Result<serde_json::Value> {
        self.get(&self.url("auth/me"), token).await
    }

    /// Full sign-in: token first, then the profile.
    ///
    /// A profile fetch rejected as unauthorized undoes the sign-in. Any other
    /// profile failure leaves the session signed in without a user record.
    pub async fn sign_in(&self, manager: &SessionManager, email: &str, password: &str) -> Result<()> {
        let token = self.login(email, password).await?;
        manager.set_token(Some(token.clone()));

        match self.fetch_profile(&token).await {
            Ok(user) => {
                manager.set_user(Some(user));
                info!("Sign-in complete");
                Ok(())
            }
            Err(e) => {
                let rejected = e
                    .downcast_ref::<ApiError>()
                    .map(ApiError::is_auth_failure)
                    .unwrap_or(false);
                if rejected {
                    manager.logout();
                    return Err(e.context("Profile fetch rejected the new token"));
                }
                warn!(error = %e, "Signed in but failed to fetch profile");
                Ok(())
            }
        }
    }

    /// One-shot authorized GET that reads the token from storage.
    /// Usable before any `SessionManager` has hydrated.
    pub async fn get_json_with_stored_token<T: DeserializeOwned>(
        &self,
        path: &str,
        storage: &dyn SessionStorage,
    ) -> Result<T> {
        let token = get_stored_token(storage).ok_or(ApiError::NotSignedIn)?;
        self.get(&self.url(path), &token).await
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: reqwest::Response) -> Result<Option<reqwest::Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, token: &str) -> Result<T> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            debug!(url = url, "GET");
            let response = self
                .client
                .get(url)
                .bearer_auth(token)
                .send()
                .await
                .map_err(ApiError::from)
                .with_context(|| format!("Failed to send GET request to {}", url))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    return response
                        .json()
                        .await
                        .with_context(|| format!("Failed to parse JSON response from {}", url));
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryStorage;

    #[test]
    fn test_url_joining() {
        let client = AuthClient::new("https://api.example.com/v1/").unwrap();
        assert_eq!(client.base_url(), "https://api.example.com/v1");
        assert_eq!(client.url("/auth/me"), "https://api.example.com/v1/auth/me");
        assert_eq!(client.url("clients"), "https://api.example.com/v1/clients");
    }

    #[test]
    fn test_login_response_aliases() {
        for json in [
            r#"{"token": "t1"}"#,
            r#"{"access_token": "t1", "expires_in": 900}"#,
            r#"{"accessToken": "t1"}"#,
        ] {
            let parsed: LoginResponse = serde_json::from_str(json).unwrap();
            assert_eq!(parsed.token, "t1");
        }
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        // Reserve a free port, then close it so connections are refused
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = AuthClient::new(format!("http://127.0.0.1:{}", port)).unwrap();

        let err = client.login("nurse@example.com", "secret").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::NetworkError(_))));
    }

    #[tokio::test]
    async fn test_stored_token_required() {
        let client = AuthClient::new(DEFAULT_BASE_URL).unwrap();
        let storage = MemoryStorage::new();

        let err = client
            .get_json_with_stored_token::<serde_json::Value>("visits", &storage)
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::NotSignedIn)));
    }
}
