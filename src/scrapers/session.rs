//! Login session management.
//!
//! One [`SessionManager`] per site and run. It resolves credentials from a
//! [`SecretSource`], runs the configured login strategy at most
//! [`MAX_LOGIN_ATTEMPTS`] times, and hands out a [`SiteSession`] that every
//! later request of that site reuses. Missing credentials are a valid state:
//! the site is scraped anonymously.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::browser::RenderSession;
use super::config::{EmailPasswordLogin, LoginConfig, SiteConfig, TokenLogin};
use super::http_client::{resolve_user_agent, HttpClient};
use super::ScrapeError;

/// Login attempts allowed per site and run: the first try plus one retry.
pub const MAX_LOGIN_ATTEMPTS: u32 = 2;

/// Where secret values come from. Configuration only names them.
pub trait SecretSource: Send + Sync {
    /// The secret named `name`, or `None` when unset or empty.
    fn get(&self, name: &str) -> Option<String>;
}

/// Secrets from process environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl SecretSource for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

impl SecretSource for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).filter(|v| !v.is_empty()).cloned()
    }
}

/// Per-site login state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    /// No login configured for the site.
    NoLogin,
    Unauthenticated,
    Authenticating,
    Authenticated,
    /// Credentials missing or login exhausted; requests go out anonymously.
    AnonymousFallback,
}

impl LoginState {
    /// Whether the state is final for the run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::NoLogin | Self::Authenticated | Self::AnonymousFallback
        )
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoLogin => "no_login",
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::AnonymousFallback => "anonymous_fallback",
        };
        f.write_str(s)
    }
}

/// An authenticated or anonymous context for one site.
pub struct SiteSession {
    client: HttpClient,
    state: LoginState,
    user_agent: Option<String>,
}

impl SiteSession {
    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == LoginState::Authenticated
    }

    /// Headers and cookies to replay when rendering `url`.
    pub fn render_session(&self, url: &str) -> RenderSession {
        RenderSession {
            headers: self.client.session_headers(),
            cookies: self.client.cookies_for(url),
            user_agent: self.user_agent.clone(),
        }
    }
}

/// Owns the login state machine and session for one site.
pub struct SessionManager {
    site: Arc<SiteConfig>,
    secrets: Arc<dyn SecretSource>,
    timeout: Duration,
    /// Resolved once so HTTP and rendered requests look alike.
    user_agent: String,
    state: LoginState,
    attempts: u32,
    session: Option<Arc<SiteSession>>,
}

/// Secrets resolved for a login strategy.
enum Credentials {
    EmailPassword { email: String, password: String },
    Token(String),
}

impl SessionManager {
    pub fn new(site: Arc<SiteConfig>, secrets: Arc<dyn SecretSource>, timeout: Duration) -> Self {
        let state = if site.login.is_some() {
            LoginState::Unauthenticated
        } else {
            LoginState::NoLogin
        };
        let user_agent = resolve_user_agent(site.user_agent.as_deref());
        Self {
            site,
            secrets,
            timeout,
            user_agent,
            state,
            attempts: 0,
            session: None,
        }
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    /// Login attempts made so far this run.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Drop the current session after an authentication failure so the next
    /// `ensure_session` logs in again, if attempts remain.
    pub fn invalidate(&mut self) {
        if self.session.take().is_some() && self.state == LoginState::Authenticated {
            debug!(site = %self.site.name, "Session invalidated");
            self.state = LoginState::Unauthenticated;
        }
    }

    /// The session for this run, logging in on first use.
    pub async fn ensure_session(&mut self) -> Result<Arc<SiteSession>, ScrapeError> {
        if let Some(session) = &self.session {
            return Ok(Arc::clone(session));
        }

        let session = match self.site.login.clone() {
            None => self.build_session(self.new_client()?, LoginState::NoLogin),
            Some(login) => self.login(&login).await?,
        };
        let session = Arc::new(session);
        self.session = Some(Arc::clone(&session));
        Ok(session)
    }

    fn new_client(&self) -> Result<HttpClient, ScrapeError> {
        HttpClient::with_user_agent(&self.site.name, self.timeout, Some(&self.user_agent))
    }

    fn build_session(&mut self, client: HttpClient, state: LoginState) -> SiteSession {
        self.state = state;
        SiteSession {
            client,
            state,
            user_agent: self.site.user_agent.as_ref().map(|_| self.user_agent.clone()),
        }
    }

    fn resolve(&self, login: &LoginConfig) -> Option<Credentials> {
        match login {
            LoginConfig::EmailPassword(c) => Some(Credentials::EmailPassword {
                email: self.secrets.get(&c.email_env)?,
                password: self.secrets.get(&c.password_env)?,
            }),
            LoginConfig::Token(c) => self.secrets.get(&c.token_env).map(Credentials::Token),
        }
    }

    async fn login(&mut self, login: &LoginConfig) -> Result<SiteSession, ScrapeError> {
        let site = self.site.name.clone();
        self.state = LoginState::Authenticating;

        let Some(credentials) = self.resolve(login) else {
            warn!(
                site = %site,
                "Missing credentials (expected {}). Proceeding without authentication.",
                login.env_vars().join("/")
            );
            return Ok(self.build_session(self.new_client()?, LoginState::AnonymousFallback));
        };

        let mut last_error = None;
        while self.attempts < MAX_LOGIN_ATTEMPTS {
            self.attempts += 1;
            self.state = LoginState::Authenticating;
            let client = self.new_client()?;

            let result = match (login, &credentials) {
                (
                    LoginConfig::EmailPassword(config),
                    Credentials::EmailPassword { email, password },
                ) => login_with_form(&site, client, config, email, password).await,
                (LoginConfig::Token(config), Credentials::Token(token)) => {
                    login_with_token(&site, client, config, token)
                }
                _ => Err(ScrapeError::LoginFailed {
                    site: site.clone(),
                    reason: "credentials do not match login type".to_string(),
                }),
            };

            match result {
                Ok(client) => return Ok(self.build_session(client, LoginState::Authenticated)),
                Err(e) => {
                    warn!(site = %site, attempt = self.attempts, "Login failed: {}", e);
                    self.state = LoginState::Unauthenticated;
                    last_error = Some(e);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| ScrapeError::LoginFailed {
            site: site.clone(),
            reason: "login attempts exhausted".to_string(),
        });

        if self.site.allow_anonymous {
            warn!(site = %site, "Login unavailable, continuing anonymously");
            Ok(self.build_session(self.new_client()?, LoginState::AnonymousFallback))
        } else {
            Err(error)
        }
    }
}

/// Submit the login form; session cookies land in the client's jar.
async fn login_with_form(
    site: &str,
    client: HttpClient,
    config: &EmailPasswordLogin,
    email: &str,
    password: &str,
) -> Result<HttpClient, ScrapeError> {
    let mut form: HashMap<String, String> = config
        .extra_payload
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    form.insert(config.email_field.clone(), email.to_string());
    form.insert(config.password_field.clone(), password.to_string());

    let failed = |reason: String| ScrapeError::LoginFailed {
        site: site.to_string(),
        reason,
    };

    let response = client
        .post_form(&config.login_url, &form)
        .await
        .map_err(|e| failed(format!("login request to {} failed: {}", config.login_url, e)))?;
    if !response.is_success() {
        return Err(failed(format!(
            "login request to {} returned HTTP {}",
            config.login_url, response.status
        )));
    }

    info!(site, "Authenticated against {} using email/password flow", config.login_url);
    Ok(client)
}

/// Attach the token header to every request of the session.
fn login_with_token(
    site: &str,
    client: HttpClient,
    config: &TokenLogin,
    token: &str,
) -> Result<HttpClient, ScrapeError> {
    let value = format!("{}{}", config.header_prefix, token);
    let client = client.with_header(&config.header_name, &value)?;
    info!(site, "Configured {} header for token authentication", config.header_name);
    Ok(client)
}
