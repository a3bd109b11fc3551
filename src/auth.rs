#![cfg(not(tarpaulin_include))]

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    Form,
    extract::{Query, Request, State},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::{AppError, AppResult};
use crate::oauth::OAuthIdentity;

const SESSION_COOKIE: &str = "session";
const MIN_PASSWORD_LEN: usize = 6;

lazy_static! {
    static ref EMAIL: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

/// A provider account linked to a user
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LinkedAccount {
    pub provider: String,
    pub subject: String,
}

/// Registered user, as stored in `users.json`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    /// Stable id that owns expense collections
    pub id: String,

    /// Lower-cased email, also the key in `users.json`
    pub email: String,

    /// Argon2 hash; `None` for accounts created through a provider
    #[serde(default)]
    pub password_hash: Option<String>,

    #[serde(default)]
    pub providers: Vec<LinkedAccount>,

    pub created_at: DateTime<Utc>,
}

/// Email and password as posted by the login and signup forms
#[derive(Debug, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// The signed-in user attached to each authenticated request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
}

/// Signed-in session
#[derive(Debug, Clone)]
pub struct Session {
    pub user: CurrentUser,
    pub expires_at: SystemTime,
}

/// Identity changes, broadcast to anyone who subscribed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(CurrentUser),
    SignedOut(CurrentUser),
}

/// Email/password and provider sign-in over a JSON users file
///
/// Sessions live in memory only and are lost on restart.
pub struct AuthGateway {
    users_path: PathBuf,
    users_lock: Mutex<()>,
    sessions: RwLock<HashMap<String, Session>>,
    session_ttl: Duration,
    events: broadcast::Sender<AuthEvent>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Hash a password using Argon2
///
/// # Errors
/// * `AppError::Storage` if hashing fails
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Storage(format!("password hashing failed: {e}")))
}

/// Check a plaintext password against a stored Argon2 hash
///
/// # Returns
/// * `Ok(false)` when the password does not match
///
/// # Errors
/// * `AppError::Storage` if the stored hash is malformed
pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AppError::Storage(format!("invalid password hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

impl AuthGateway {
    /// Open the gateway, creating an empty users file if needed
    pub fn open(users_path: impl AsRef<Path>, session_ttl: Duration) -> AppResult<Self> {
        let users_path = users_path.as_ref().to_path_buf();
        if let Some(dir) = users_path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        if !users_path.exists() {
            fs::write(&users_path, b"{}")?;
        }

        let (events, _) = broadcast::channel(32);
        Ok(AuthGateway {
            users_path,
            users_lock: Mutex::new(()),
            sessions: RwLock::new(HashMap::new()),
            session_ttl,
            events,
        })
    }

    /// Receive every later sign-in and sign-out
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn read_users(&self) -> AppResult<HashMap<String, User>> {
        let contents = fs::read_to_string(&self.users_path)?;
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&contents).map_err(|e| {
            AppError::Storage(format!("{} is unreadable: {e}", self.users_path.display()))
        })
    }

    fn write_users(&self, users: &HashMap<String, User>) -> AppResult<()> {
        let json = serde_json::to_string_pretty(users)?;
        let tmp = self.users_path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.users_path)?;
        Ok(())
    }

    /// Register a new email/password account
    ///
    /// # Errors
    /// * `AppError::BadRequest` for a missing or malformed email or a weak password
    /// * `AppError::Conflict` if the email is already registered
    pub async fn sign_up(&self, email: &str, password: &str) -> AppResult<User> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(AppError::BadRequest(
                "Email and password are required.".into(),
            ));
        }
        if !EMAIL.is_match(&email) {
            return Err(AppError::BadRequest("The email address is not valid.".into()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::BadRequest(format!(
                "Password is too weak: use at least {MIN_PASSWORD_LEN} characters."
            )));
        }

        let _guard = self.users_lock.lock().await;
        let mut users = self.read_users()?;
        if users.contains_key(&email) {
            return Err(AppError::Conflict(
                "This email address is already registered.".into(),
            ));
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.clone(),
            password_hash: Some(hash_password(password)?),
            providers: Vec::new(),
            created_at: Utc::now(),
        };
        users.insert(email, user.clone());
        self.write_users(&users)?;

        log::info!("registered user {}", user.id);
        Ok(user)
    }

    /// Check an email and password and open a session
    ///
    /// # Errors
    /// * `AppError::InvalidCredentials` for an unknown email or wrong password
    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<(String, CurrentUser)> {
        let email = normalize_email(email);
        let user = {
            let _guard = self.users_lock.lock().await;
            self.read_users()?.remove(&email)
        };

        let user = user.ok_or(AppError::InvalidCredentials)?;
        let hash = user
            .password_hash
            .as_deref()
            .ok_or(AppError::InvalidCredentials)?;
        if !verify_password(password, hash)? {
            log::warn!("failed sign-in for {}", user.id);
            return Err(AppError::InvalidCredentials);
        }

        Ok(self.open_session(&user))
    }

    /// Sign in with a provider identity, creating or linking the account by email
    pub async fn sign_in_with_oauth(
        &self,
        identity: &OAuthIdentity,
    ) -> AppResult<(String, CurrentUser)> {
        let email = normalize_email(&identity.email);
        let link = LinkedAccount {
            provider: identity.provider.clone(),
            subject: identity.subject.clone(),
        };

        let user = {
            let _guard = self.users_lock.lock().await;
            let mut users = self.read_users()?;
            let user = users.entry(email.clone()).or_insert_with(|| {
                log::info!("creating account for {} sign-in", identity.provider);
                User {
                    id: Uuid::new_v4().to_string(),
                    email: email.clone(),
                    password_hash: None,
                    providers: Vec::new(),
                    created_at: Utc::now(),
                }
            });
            if !user.providers.contains(&link) {
                user.providers.push(link);
            }
            let user = user.clone();
            self.write_users(&users)?;
            user
        };

        Ok(self.open_session(&user))
    }

    fn open_session(&self, user: &User) -> (String, CurrentUser) {
        let session_id = Uuid::new_v4().to_string();
        let current = CurrentUser {
            id: user.id.clone(),
            email: user.email.clone(),
        };
        let session = Session {
            user: current.clone(),
            expires_at: SystemTime::now() + self.session_ttl,
        };

        {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            let now = SystemTime::now();
            sessions.retain(|_, s| s.expires_at > now);
            sessions.insert(session_id.clone(), session);
        }

        log::info!("user {} signed in", current.id);
        let _ = self.events.send(AuthEvent::SignedIn(current.clone()));
        (session_id, current)
    }

    /// End a session; unknown ids are ignored
    pub fn sign_out(&self, session_id: &str) {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);

        if let Some(session) = removed {
            log::info!("user {} signed out", session.user.id);
            let _ = self.events.send(AuthEvent::SignedOut(session.user));
        }
    }

    /// The user behind a session, if it exists and has not expired
    pub fn current_user(&self, session_id: &str) -> Option<CurrentUser> {
        let now = SystemTime::now();
        {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            match sessions.get(session_id) {
                Some(session) if session.expires_at > now => return Some(session.user.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        None
    }
}

fn session_cookie(session_id: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

// Web handlers

pub async fn serve_login_page() -> Html<&'static str> {
    Html(include_str!("./static/login.html"))
}

pub async fn serve_signup_page() -> Html<&'static str> {
    Html(include_str!("./static/signup.html"))
}

/// Handle the login form, setting the session cookie on success
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(credentials): Form<Credentials>,
) -> AppResult<(CookieJar, Redirect)> {
    let (session_id, _) = state
        .auth
        .sign_in(&credentials.email, &credentials.password)
        .await?;
    Ok((jar.add(session_cookie(session_id)), Redirect::to("/")))
}

/// Handle the signup form: register, then sign straight in
pub async fn handle_signup(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(credentials): Form<Credentials>,
) -> AppResult<(CookieJar, Redirect)> {
    state
        .auth
        .sign_up(&credentials.email, &credentials.password)
        .await?;
    let (session_id, _) = state
        .auth
        .sign_in(&credentials.email, &credentials.password)
        .await?;
    Ok((jar.add(session_cookie(session_id)), Redirect::to("/")))
}

pub async fn handle_logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.auth.sign_out(cookie.value());
    }
    let expired = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    (jar.remove(expired), Redirect::to("/login"))
}

/// Redirect to the provider's consent screen
pub async fn oauth_start(State(state): State<Arc<AppState>>) -> AppResult<Redirect> {
    let provider = state
        .oauth
        .as_ref()
        .ok_or_else(|| AppError::not_found("Google sign-in is not configured"))?;
    let csrf = state.oauth_states.issue();
    Ok(Redirect::to(&provider.authorize_url(&csrf)))
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Finish provider sign-in and set the session cookie
pub async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(callback): Query<OAuthCallback>,
) -> AppResult<(CookieJar, Redirect)> {
    let provider = state
        .oauth
        .as_ref()
        .ok_or_else(|| AppError::not_found("Google sign-in is not configured"))?;

    if let Some(error) = callback.error {
        return Err(AppError::BadRequest(format!("Sign-in was cancelled: {error}")));
    }
    state
        .oauth_states
        .consume(callback.state.as_deref().unwrap_or_default())?;
    let code = callback
        .code
        .ok_or_else(|| AppError::BadRequest("Missing authorization code".into()))?;

    let identity = provider.exchange_code(&code).await?;
    let (session_id, _) = state.auth.sign_in_with_oauth(&identity).await?;
    Ok((jar.add(session_cookie(session_id)), Redirect::to("/")))
}

/// Authentication middleware
///
/// Attaches the [`CurrentUser`] to the request, or answers 401.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let user = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| state.auth.current_user(cookie.value()));

    match user {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => AppError::Unauthorized.into_response(),
    }
}
