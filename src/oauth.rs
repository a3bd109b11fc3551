//! Third-party sign-in.
//!
//! An [`OAuthProvider`] turns an authorization code into an
//! [`OAuthIdentity`]. [`OAuthStates`] hands out the one-time `state` values
//! that tie a callback to the redirect that started it.

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::GoogleConfig;
use crate::error::{AppError, AppResult};

const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// How long a started sign-in may take before its state is rejected
pub const STATE_TTL: Duration = Duration::from_secs(10 * 60);

/// Who the provider says the user is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthIdentity {
    pub provider: String,
    pub subject: String,
    pub email: String,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Short name used in routes and on the user record, e.g. `google`
    fn name(&self) -> &str;

    /// Where to send the browser to start signing in
    fn authorize_url(&self, state: &str) -> String;

    /// Trade the callback's code for the user's identity
    async fn exchange_code(&self, code: &str) -> AppResult<OAuthIdentity>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UserInfo {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

/// Google sign-in over the OpenID Connect endpoints
pub struct GoogleOAuth {
    config: GoogleConfig,
    http_client: reqwest::Client,
}

impl GoogleOAuth {
    pub fn new(config: GoogleConfig) -> Self {
        GoogleOAuth {
            config,
            http_client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl OAuthProvider for GoogleOAuth {
    fn name(&self) -> &str {
        "google"
    }

    fn authorize_url(&self, state: &str) -> String {
        format!(
            "{GOOGLE_AUTHORIZE_URL}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_url),
            urlencoding::encode("openid email"),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code(&self, code: &str) -> AppResult<OAuthIdentity> {
        let response = self
            .http_client
            .post(GOOGLE_TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AppError::OAuth(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::OAuth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::OAuth(format!("unreadable token response: {e}")))?;

        let info: UserInfo = self
            .http_client
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::OAuth(format!("userinfo request failed: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::OAuth(format!("unreadable userinfo response: {e}")))?;

        let email = info
            .email
            .filter(|_| info.email_verified)
            .ok_or_else(|| AppError::OAuth("Google account has no verified email".to_string()))?;

        Ok(OAuthIdentity {
            provider: self.name().to_string(),
            subject: info.sub,
            email,
        })
    }
}

/// Random value for the `state` parameter
pub fn generate_state() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();

    (0..32)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Outstanding sign-in attempts, each usable once
#[derive(Default)]
pub struct OAuthStates {
    pending: Mutex<HashMap<String, Instant>>,
}

impl OAuthStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an attempt and return its state value
    pub fn issue(&self) -> String {
        let state = generate_state();
        let now = Instant::now();
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|_, issued| now.duration_since(*issued) < STATE_TTL);
        pending.insert(state.clone(), now);
        state
    }

    /// Check and forget a state from a callback
    ///
    /// # Errors
    /// * `AppError::BadRequest` if the state is unknown, already used or expired
    pub fn consume(&self, state: &str) -> AppResult<()> {
        let issued = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(state);

        match issued {
            Some(issued) if issued.elapsed() < STATE_TTL => Ok(()),
            Some(_) => Err(AppError::BadRequest("Sign-in took too long, try again".into())),
            None => Err(AppError::BadRequest("Unknown sign-in state".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_state() {
        let a = generate_state();
        let b = generate_state();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_state_is_single_use() {
        let states = OAuthStates::new();
        let state = states.issue();
        assert!(states.consume(&state).is_ok());
        assert!(matches!(states.consume(&state), Err(AppError::BadRequest(_))));
        assert!(states.consume("forged").is_err());
    }

    #[test]
    fn test_google_authorize_url() {
        let google = GoogleOAuth::new(GoogleConfig {
            client_id: "client".into(),
            client_secret: "secret".into(),
            redirect_url: "http://localhost:3000/auth/google/callback".into(),
        });
        let url = google.authorize_url("xyz");
        assert!(url.starts_with(GOOGLE_AUTHORIZE_URL));
        assert!(url.contains("client_id=client"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fauth%2Fgoogle%2Fcallback"));
        assert!(url.contains("scope=openid%20email"));
        assert!(url.contains("state=xyz"));
        assert!(!url.contains("secret"));
    }
}
