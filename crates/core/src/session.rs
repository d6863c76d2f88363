//! Session manager
//!
//! A [`Session`] owns the authentication state of one account on one host and
//! is the single dispatch point for every request. Clones are cheap handles
//! onto the same state, so navigators, nodes and users each carry one.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use url::Url;

use crate::config::Defaults;
use crate::csrf;
use crate::error::{Error, Result};
use crate::navigator::Navigator;
use crate::path::{RemotePath, normalize};
use crate::profile::{Credentials, Profile};
use crate::transfer::TransferEngine;
use crate::transport::{Request, Response, StreamingResponse, Transport};
use crate::wire;

const LOGIN_ENDPOINT: &str = "/login";
const LOGOUT_ENDPOINT: &str = "/logout";

/// Phrases in an error payload that mark a permission failure
const PERMISSION_HINTS: &[&str] = &[
    "access denied",
    "permission",
    "not allowed",
    "forbidden",
    "unauthorized",
];

/// Authenticated connection to a STACK account
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    base: Url,
    base_url: String,
    credentials: Credentials,
    defaults: Defaults,
    initial_dir: RemotePath,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    authenticated: bool,
    csrf_token: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.inner.base_url)
            .field("username", &self.inner.credentials.username)
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create an unauthenticated session for `profile` with default settings
    pub fn new(transport: Arc<dyn Transport>, profile: &Profile) -> Result<Self> {
        Self::with_defaults(transport, profile, Defaults::default())
    }

    /// Create an unauthenticated session with explicit client defaults
    pub fn with_defaults(
        transport: Arc<dyn Transport>,
        profile: &Profile,
        defaults: Defaults,
    ) -> Result<Self> {
        if profile.credentials.username.trim().is_empty() {
            return Err(Error::Validation(format!(
                "Profile '{}' has an empty username",
                profile.name
            )));
        }
        if defaults.page_size == 0 {
            return Err(Error::Validation("page size must be at least 1".into()));
        }

        let base_url = profile.base_url();
        let base = Url::parse(&base_url)?;
        let initial_dir = match profile.directory.as_deref() {
            Some(dir) if !dir.is_empty() => normalize(dir)?,
            _ => RemotePath::root(),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                base,
                base_url,
                credentials: profile.credentials.clone(),
                defaults,
                initial_dir,
                state: Mutex::new(State::default()),
            }),
        })
    }

    /// Whether the last login succeeded and no logout or expiry happened since
    pub fn is_authenticated(&self) -> bool {
        self.state().authenticated
    }

    /// Base URL of the service, without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Account username
    pub fn username(&self) -> &str {
        &self.inner.credentials.username
    }

    /// Client defaults this session was created with
    pub fn defaults(&self) -> &Defaults {
        &self.inner.defaults
    }

    /// A new navigator positioned at the profile's initial directory
    pub fn navigator(&self) -> Navigator {
        Navigator::at(self.clone(), self.inner.initial_dir.clone())
    }

    /// Transfer engine over this session
    pub fn transfers(&self) -> TransferEngine {
        TransferEngine::new(self.clone())
    }

    /// Log in with the profile credentials
    ///
    /// The service answers a successful login with a redirect; any other
    /// status, including `200`, means the credentials were rejected.
    pub async fn login(&self) -> Result<()> {
        let credentials = &self.inner.credentials;
        tracing::debug!(username = %credentials.username, host = %self.inner.base_url, "Logging in");

        let request = Request::post(LOGIN_ENDPOINT).form([
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ]);
        let response = self.inner.transport.send(request).await?;

        let mut state = self.state();
        state.csrf_token = None;
        state.authenticated = response.is_redirect();

        if state.authenticated {
            tracing::debug!("Logged in");
            Ok(())
        } else {
            Err(Error::Authentication(format!(
                "login for user '{}' was rejected (HTTP {})",
                credentials.username, response.status
            )))
        }
    }

    /// Log out
    ///
    /// A no-op while unauthenticated. Local state is cleared even when the
    /// request fails; the transport error is still reported.
    pub async fn logout(&self) -> Result<()> {
        if !self.is_authenticated() {
            return Ok(());
        }

        let result = self
            .inner
            .transport
            .send(Request::get(LOGOUT_ENDPOINT))
            .await;
        self.invalidate();
        tracing::debug!("Logged out");
        result.map(|_| ())
    }

    /// Run `f` inside a login/logout pair
    ///
    /// Logout happens on every exit path of `f`: success, error and panic.
    /// An error from `f` wins over a logout error; a panic is resumed after
    /// logout.
    pub async fn scoped<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.login().await?;

        let session = self.clone();
        let outcome = AssertUnwindSafe(async move { f(session).await })
            .catch_unwind()
            .await;
        let logout = self.logout().await;

        match outcome {
            Ok(Ok(value)) => logout.map(|()| value),
            Ok(Err(err)) => {
                if let Err(logout_err) = logout {
                    tracing::warn!(error = %logout_err, "Logout failed after scoped session error");
                }
                Err(err)
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Send an API request
    ///
    /// Fails with [`Error::NotLoggedIn`] without touching the transport while
    /// unauthenticated. When `requires_csrf` is set and no token is cached,
    /// one is fetched first. A cached token is attached to every call.
    pub async fn request(&self, mut request: Request, requires_csrf: bool) -> Result<Response> {
        self.ensure_authenticated()?;

        let token = if requires_csrf {
            Some(self.csrf_token().await?)
        } else {
            self.state().csrf_token.clone()
        };
        if let Some(token) = token {
            request = request.header(csrf::TOKEN_HEADER, token);
        }

        tracing::debug!(method = %request.method, endpoint = %request.endpoint, "Sending request");
        let response = self.inner.transport.send(request).await?;
        self.check_status(response)
    }

    /// Send a WebDAV request with basic authentication
    pub(crate) async fn dav(&self, mut request: Request, target: &RemotePath) -> Result<Response> {
        self.ensure_authenticated()?;
        request.basic_auth = Some(self.inner.credentials.clone());

        tracing::debug!(method = %request.method, path = %target, "Sending WebDAV request");
        let response = self.inner.transport.send(request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(dav_error(
                response.status,
                target,
                &wire::error_message(&response.body),
            ))
        }
    }

    /// Open a streaming WebDAV request with basic authentication
    pub(crate) async fn dav_stream(
        &self,
        mut request: Request,
        target: &RemotePath,
    ) -> Result<StreamingResponse> {
        self.ensure_authenticated()?;
        request.basic_auth = Some(self.inner.credentials.clone());

        tracing::debug!(method = %request.method, path = %target, "Opening WebDAV stream");
        let response = self.inner.transport.open(request).await?;
        if (200..300).contains(&response.status) {
            Ok(response)
        } else {
            Err(dav_error(response.status, target, ""))
        }
    }

    /// Public URL for a share token
    pub(crate) fn share_url(&self, token: &str) -> String {
        format!("{}/s/{}", self.inner.base_url, token)
    }

    pub(crate) fn base(&self) -> &Url {
        &self.inner.base
    }

    pub(crate) fn ensure_authenticated(&self) -> Result<()> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(Error::NotLoggedIn(format!(
                "log in as '{}' before using the session",
                self.inner.credentials.username
            )))
        }
    }

    async fn csrf_token(&self) -> Result<String> {
        let cached = self.state().csrf_token.clone();
        if let Some(token) = cached {
            return Ok(token);
        }

        tracing::debug!(page = csrf::TOKEN_PAGE, "Fetching CSRF token");
        let response = self
            .inner
            .transport
            .send(Request::get(csrf::TOKEN_PAGE))
            .await?;
        let response = self.check_status(response)?;

        let token = csrf::extract_token(&response.text()).ok_or_else(|| Error::Api {
            status: response.status,
            message: format!("no CSRF token found on {}", csrf::TOKEN_PAGE),
        })?;
        self.state().csrf_token = Some(token.clone());
        Ok(token)
    }

    fn check_status(&self, response: Response) -> Result<Response> {
        if response.is_success() {
            return Ok(response);
        }

        let status = response.status;
        if status == 401 || response.is_redirect() {
            self.invalidate();
            return Err(Error::NotLoggedIn(format!(
                "session expired (HTTP {status})"
            )));
        }

        let message = wire::error_message(&response.body);
        let permission_failure = {
            let lower = message.to_lowercase();
            PERMISSION_HINTS.iter().any(|hint| lower.contains(hint))
        };

        Err(match status {
            403 => Error::AccessDenied(non_empty(message, "permission denied")),
            _ if permission_failure => Error::AccessDenied(message),
            404 => Error::NotFound(non_empty(message, "resource does not exist")),
            409 => Error::Conflict(non_empty(message, "conflicting resource")),
            _ => Error::Api { status, message },
        })
    }

    fn invalidate(&self) {
        let mut state = self.state();
        state.authenticated = false;
        state.csrf_token = None;
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn non_empty(message: String, fallback: &str) -> String {
    if message.is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

fn dav_error(status: u16, target: &RemotePath, message: &str) -> Error {
    match status {
        401 | 403 => Error::AccessDenied(format!("{target} (HTTP {status})")),
        404 | 409 => Error::NotFound(target.to_string()),
        405 | 412 => Error::Conflict(format!("{target} already exists")),
        507 => Error::Transfer(format!("insufficient storage for {target}")),
        _ => Error::Api {
            status,
            message: if message.is_empty() {
                target.to_string()
            } else {
                format!("{target}: {message}")
            },
        },
    }
}
