//! User accounts and admin operations
//!
//! Listing, creating, updating and deleting accounts requires an
//! administrator session; the service reports anything else as a permission
//! failure, surfaced as [`Error::AccessDenied`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::session::Session;
use crate::transport::{Request, Response};
use crate::wire;

pub(crate) const USERS_ENDPOINT: &str = "/api/users";
pub(crate) const USERS_UPDATE_ENDPOINT: &str = "/api/users/update";

/// Quota value the service uses for "no limit"
pub const QUOTA_UNLIMITED: i64 = -1;

const USERS_PAGE_SIZE: u64 = 50;
const DEFAULT_LANGUAGE: &str = "nl_NL";
const MIN_PASSWORD_LEN: usize = 8;
const ADMIN_HINT: &str = "log in with an administrator account to manage users";

/// Raw account descriptor as sent by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserRecord {
    #[serde(deserialize_with = "wire::or_default")]
    pub username: String,
    #[serde(deserialize_with = "wire::or_default")]
    pub display_name: String,
    #[serde(deserialize_with = "wire::lenient_i64")]
    pub quota: i64,
    #[serde(deserialize_with = "wire::lenient_u64")]
    pub used: u64,
    #[serde(deserialize_with = "wire::lenient_bool")]
    pub is_admin: bool,
    #[serde(deserialize_with = "wire::lenient_bool")]
    pub is_premium: bool,
    #[serde(deserialize_with = "wire::or_default")]
    pub language: String,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

impl Default for UserRecord {
    fn default() -> Self {
        Self {
            username: String::new(),
            display_name: String::new(),
            quota: QUOTA_UNLIMITED,
            used: 0,
            is_admin: false,
            is_premium: false,
            language: String::new(),
            unknown: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsersPage {
    #[serde(default, deserialize_with = "wire::or_default")]
    users: Vec<UserRecord>,
    #[serde(default, deserialize_with = "wire::lenient_u64")]
    amount_users: u64,
}

/// Parameters for [`Session::create_user`]
#[derive(Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub display_name: String,
    /// Quota in bytes; unlimited when `None`
    pub disk_quota: Option<u64>,
}

impl NewUser {
    /// New account whose display name defaults to the username
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            display_name: username.clone(),
            username,
            password: password.into(),
            disk_quota: None,
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn disk_quota(mut self, bytes: u64) -> Self {
        self.disk_quota = Some(bytes);
        self
    }
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("display_name", &self.display_name)
            .field("disk_quota", &self.disk_quota)
            .finish()
    }
}

#[derive(Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum UserAction<'a> {
    Create { user: CreatePayload<'a> },
    Update { user: UpdatePayload<'a> },
    Delete { user: KeyPayload<'a> },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePayload<'a> {
    username: &'a str,
    new_user: bool,
    is_public: bool,
    password: &'a str,
    display_name: &'a str,
    quota: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePayload<'a> {
    username: &'a str,
    display_name: &'a str,
    quota: i64,
    language: &'a str,
}

#[derive(Serialize)]
struct KeyPayload<'a> {
    username: &'a str,
}

fn quota_value(bytes: Option<u64>) -> i64 {
    match bytes {
        Some(bytes) if bytes > 0 => i64::try_from(bytes).unwrap_or(i64::MAX),
        _ => QUOTA_UNLIMITED,
    }
}

impl Session {
    /// All accounts
    pub async fn users(&self) -> Result<Vec<User>> {
        let mut users = Vec::new();
        let mut offset = 0u64;
        loop {
            let page = self.users_page("", offset).await?;
            let received = page.users.len() as u64;
            users.extend(page.users.into_iter().map(|record| User::new(self.clone(), record)));

            offset += received;
            if received == 0 || offset >= page.amount_users {
                break;
            }
        }
        Ok(users)
    }

    /// Account with exactly this username
    pub async fn user(&self, username: &str) -> Result<User> {
        if username.trim().is_empty() {
            return Err(Error::Validation("username cannot be empty".into()));
        }

        let mut offset = 0u64;
        loop {
            let page = self.users_page(username, offset).await?;
            let received = page.users.len() as u64;
            if let Some(record) = page.users.into_iter().find(|u| u.username == username) {
                return Ok(User::new(self.clone(), record));
            }

            offset += received;
            if received == 0 || offset >= page.amount_users {
                return Err(Error::NotFound(format!("user '{username}'")));
            }
        }
    }

    /// Create an account and return it as stored by the service
    pub async fn create_user(&self, new_user: &NewUser) -> Result<User> {
        if new_user.username.trim().is_empty() {
            return Err(Error::Validation("username cannot be empty".into()));
        }
        if self.defaults().enforce_password_policy
            && new_user.password.chars().count() < MIN_PASSWORD_LEN
        {
            return Err(Error::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters long"
            )));
        }

        let action = UserAction::Create {
            user: CreatePayload {
                username: &new_user.username,
                new_user: true,
                is_public: false,
                password: &new_user.password,
                display_name: &new_user.display_name,
                quota: quota_value(new_user.disk_quota),
            },
        };
        let response = self.update_users(&action).await.map_err(|err| match err {
            Error::Conflict(_) => Error::Conflict(format!(
                "cannot create user '{}': it already exists or you lack permission",
                new_user.username
            )),
            other => other,
        })?;
        expect_ok(&response)?;

        tracing::debug!(username = %new_user.username, "Created user");
        self.user(&new_user.username).await
    }

    /// Fetch an account, creating it only when it does not exist
    ///
    /// An existing account is returned untouched; its password is never
    /// changed.
    pub async fn user_or_create_new(&self, new_user: &NewUser) -> Result<User> {
        match self.user(&new_user.username).await {
            Err(Error::NotFound(_)) => self.create_user(new_user).await,
            found => found,
        }
    }

    async fn users_page(&self, query: &str, offset: u64) -> Result<UsersPage> {
        let request = Request::get(USERS_ENDPOINT)
            .query("public", "false")
            .query("offset", offset)
            .query("limit", USERS_PAGE_SIZE)
            .query("query", query);
        let response = self
            .request(request, false)
            .await
            .map_err(with_admin_hint)?;
        response.json()
    }

    async fn update_users(&self, action: &UserAction<'_>) -> Result<Response> {
        let body = serde_json::to_value([action])?;
        self.request(Request::post(USERS_UPDATE_ENDPOINT).json(body), true)
            .await
            .map_err(with_admin_hint)
    }
}

fn with_admin_hint(err: Error) -> Error {
    match err {
        Error::AccessDenied(message) => Error::AccessDenied(format!("{message} ({ADMIN_HINT})")),
        other => other,
    }
}

fn expect_ok(response: &Response) -> Result<()> {
    let reply: Value = response.json()?;
    if reply.get("status").and_then(Value::as_str) == Some("ok") {
        Ok(())
    } else {
        Err(Error::Api {
            status: response.status,
            message: format!("expected status 'ok', got {reply}"),
        })
    }
}

/// A remote account
#[derive(Clone)]
pub struct User {
    session: Session,
    record: UserRecord,
    deleted: bool,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("username", &self.record.username)
            .field("display_name", &self.record.display_name)
            .field("deleted", &self.deleted)
            .finish_non_exhaustive()
    }
}

impl User {
    fn new(session: Session, record: UserRecord) -> Self {
        if !record.unknown.is_empty() {
            tracing::debug!(
                username = %record.username,
                fields = ?record.unknown.keys().collect::<Vec<_>>(),
                "User descriptor has unknown fields"
            );
        }
        Self {
            session,
            record,
            deleted: false,
        }
    }

    pub fn username(&self) -> &str {
        &self.record.username
    }

    pub fn display_name(&self) -> &str {
        &self.record.display_name
    }

    /// Quota in bytes, `None` when unlimited
    pub fn disk_quota(&self) -> Option<u64> {
        u64::try_from(self.record.quota).ok().filter(|q| *q > 0)
    }

    /// Bytes in use
    pub fn disk_used(&self) -> u64 {
        self.record.used
    }

    pub fn disk_used_human(&self) -> String {
        humansize::format_size(self.record.used, humansize::BINARY)
    }

    pub fn is_admin(&self) -> bool {
        self.record.is_admin
    }

    pub fn is_premium(&self) -> bool {
        self.record.is_premium
    }

    pub fn language(&self) -> &str {
        if self.record.language.is_empty() {
            DEFAULT_LANGUAGE
        } else {
            &self.record.language
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn unknown_fields(&self) -> &BTreeMap<String, Value> {
        &self.record.unknown
    }

    pub fn record(&self) -> &UserRecord {
        &self.record
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) {
        self.record.display_name = name.into();
    }

    /// Set the quota in bytes; `None` or `0` means unlimited
    pub fn set_disk_quota(&mut self, bytes: Option<u64>) {
        self.record.quota = quota_value(bytes);
    }

    pub fn set_language(&mut self, language: impl Into<String>) {
        self.record.language = language.into();
    }

    /// Push display name, quota and language to the service
    pub async fn save(&self) -> Result<()> {
        self.ensure_alive()?;

        let action = UserAction::Update {
            user: UpdatePayload {
                username: &self.record.username,
                display_name: &self.record.display_name,
                quota: self.record.quota,
                language: self.language(),
            },
        };
        let response = self.session.update_users(&action).await?;
        expect_ok(&response)?;
        tracing::debug!(username = %self.record.username, "Saved user");
        Ok(())
    }

    /// Re-read this account from the service
    pub async fn refresh(&mut self) -> Result<()> {
        self.ensure_alive()?;
        let fresh = self.session.user(&self.record.username).await?;
        self.record = fresh.record;
        Ok(())
    }

    /// Delete the account; further operations fail with [`Error::StaleNode`]
    pub async fn delete(&mut self) -> Result<()> {
        self.ensure_alive()?;

        let action = UserAction::Delete {
            user: KeyPayload {
                username: &self.record.username,
            },
        };
        let response = self.session.update_users(&action).await?;
        expect_ok(&response)?;

        self.deleted = true;
        tracing::debug!(username = %self.record.username, "Deleted user");
        Ok(())
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.deleted {
            Err(Error::StaleNode(format!(
                "user '{}' was deleted",
                self.record.username
            )))
        } else {
            Ok(())
        }
    }
}
