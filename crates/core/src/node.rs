//! Node model
//!
//! A [`Node`] is one remote file or directory. It is built from the JSON
//! descriptor the service returns for listings and path lookups, and its
//! mutation methods (share, favorite, delete, move) go back through the
//! owning [`Session`]. Local state only changes after the service confirmed
//! the mutation.

use std::collections::BTreeMap;
use std::fmt;

use jiff::Timestamp;
use jiff::civil::Date;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::path::{RemotePath, normalize};
use crate::session::Session;
use crate::transport::{Request, Response};
use crate::wire;

/// MIME type the service reports for directories
pub const DIRECTORY_MIME_TYPE: &str = "httpd/unix-directory";

pub(crate) const PATHINFO_ENDPOINT: &str = "/api/pathinfo";
pub(crate) const UPDATE_ENDPOINT: &str = "/api/files/update";

/// Raw node descriptor as sent by the service
///
/// Fields the service adds beyond the known set are kept in `unknown`
/// instead of being dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeRecord {
    #[serde(deserialize_with = "wire::lenient_u64")]
    pub file_id: u64,
    #[serde(deserialize_with = "wire::or_default")]
    pub path: String,
    #[serde(rename = "mimetype", deserialize_with = "wire::or_default")]
    pub mime_type: String,
    #[serde(deserialize_with = "wire::or_default")]
    pub etag: String,
    #[serde(deserialize_with = "wire::or_default")]
    pub share_token: String,
    #[serde(deserialize_with = "wire::or_default")]
    pub expiration_date: String,
    #[serde(deserialize_with = "wire::lenient_bool")]
    pub has_share_password: bool,
    #[serde(deserialize_with = "wire::lenient_i64")]
    pub share_time: i64,
    #[serde(deserialize_with = "wire::lenient_bool")]
    pub can_upload: bool,
    #[serde(deserialize_with = "wire::lenient_u64")]
    pub file_size: u64,
    #[serde(deserialize_with = "wire::lenient_bool")]
    pub is_favorited: bool,
    #[serde(deserialize_with = "wire::lenient_i64")]
    pub mtime: i64,
    #[serde(deserialize_with = "wire::lenient_bool")]
    pub is_previewable: bool,
    #[serde(deserialize_with = "wire::lenient_u64")]
    pub width: u64,
    #[serde(deserialize_with = "wire::lenient_u64")]
    pub height: u64,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

impl NodeRecord {
    /// Overlay the fields present in `patch` on a copy of this record
    ///
    /// Fields absent from `patch` keep their current value.
    pub fn merged(&self, patch: Value) -> Result<NodeRecord> {
        let patch = match patch {
            Value::Object(fields) => fields,
            other => {
                return Err(Error::Api {
                    status: 200,
                    message: format!("expected a node descriptor, got {other}"),
                });
            }
        };

        let mut value = serde_json::to_value(self)?;
        if let Value::Object(fields) = &mut value {
            fields.extend(patch);
        }
        Ok(serde_json::from_value(value)?)
    }

    fn kind(&self) -> NodeKind {
        if self.mime_type == DIRECTORY_MIME_TYPE {
            NodeKind::Directory
        } else {
            NodeKind::File
        }
    }
}

/// Whether a node is a file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Directory,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::File => f.write_str("file"),
            NodeKind::Directory => f.write_str("directory"),
        }
    }
}

/// Parameters for [`Node::share`]
#[derive(Clone, Default)]
pub struct ShareOptions {
    /// Password protecting the share
    pub password: Option<String>,
    /// Last day the share is valid
    pub expire_date: Option<Date>,
    /// Allow uploads into a shared directory
    pub allow_writes: bool,
}

impl ShareOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn expires(mut self, date: Date) -> Self {
        self.expire_date = Some(date);
        self
    }

    pub fn allow_writes(mut self, allow: bool) -> Self {
        self.allow_writes = allow;
        self
    }

    fn validate(&self, today: Date) -> Result<()> {
        if self.password.as_deref().is_some_and(str::is_empty) {
            return Err(Error::Share("share password cannot be empty".into()));
        }
        if let Some(date) = self.expire_date {
            if date < today {
                return Err(Error::Share(format!(
                    "expiry date {date} lies in the past"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ShareOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareOptions")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("expire_date", &self.expire_date)
            .field("allow_writes", &self.allow_writes)
            .finish()
    }
}

/// One entry of a `/api/files/update` batch
#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum FileAction<'a> {
    #[serde(rename_all = "camelCase")]
    Share {
        path: &'a str,
        active: bool,
        allow_writes: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        update_password: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        share_password: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        update_expire_date: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        expire_date: Option<String>,
    },
    Delete {
        path: &'a str,
        query: &'a str,
    },
    Favorite {
        path: &'a str,
        active: bool,
        query: &'a str,
    },
}

/// A remote file or directory
#[derive(Clone)]
pub struct Node {
    session: Session,
    record: NodeRecord,
    path: RemotePath,
    deleted: bool,
    query: String,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path)
            .field("kind", &self.kind())
            .field("size", &self.record.file_size)
            .field("deleted", &self.deleted)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Wrap a descriptor returned by the service
    pub fn from_record(session: Session, record: NodeRecord) -> Result<Self> {
        let path = normalize(&record.path)?;
        if !record.unknown.is_empty() {
            tracing::debug!(
                path = %path,
                fields = ?record.unknown.keys().collect::<Vec<_>>(),
                "Node descriptor has unknown fields"
            );
        }
        Ok(Self {
            session,
            record,
            path,
            deleted: false,
            query: String::new(),
        })
    }

    /// Look up a node by canonical path
    pub async fn fetch(session: &Session, path: &RemotePath) -> Result<Self> {
        let record = fetch_record(session, path).await?;
        Self::from_record(session.clone(), record)
    }

    /// Attach an opaque `query` value sent with delete and favorite updates
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn id(&self) -> u64 {
        self.record.file_id
    }

    pub fn path(&self) -> &RemotePath {
        &self.path
    }

    /// Base name; `/` for the root directory
    pub fn name(&self) -> &str {
        self.path.name().unwrap_or("/")
    }

    pub fn kind(&self) -> NodeKind {
        self.record.kind()
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == NodeKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind() == NodeKind::File
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.record.file_size
    }

    pub fn size_human(&self) -> String {
        humansize::format_size(self.record.file_size, humansize::BINARY)
    }

    /// Modification time, `None` when the service reports none
    pub fn modified(&self) -> Option<Timestamp> {
        if self.record.mtime <= 0 {
            return None;
        }
        Timestamp::from_second(self.record.mtime).ok()
    }

    pub fn mime_type(&self) -> &str {
        &self.record.mime_type
    }

    pub fn etag(&self) -> &str {
        &self.record.etag
    }

    pub fn is_favorite(&self) -> bool {
        self.record.is_favorited
    }

    pub fn is_shared(&self) -> bool {
        !self.record.share_token.is_empty()
    }

    /// Whether `delete` succeeded on this instance
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn share_token(&self) -> Option<&str> {
        self.is_shared().then_some(self.record.share_token.as_str())
    }

    /// Public URL of the share, `None` when not shared
    pub fn share_url(&self) -> Option<String> {
        self.share_token().map(|token| self.session.share_url(token))
    }

    pub fn has_share_password(&self) -> Option<bool> {
        self.is_shared().then_some(self.record.has_share_password)
    }

    pub fn allows_writes(&self) -> Option<bool> {
        self.is_shared().then_some(self.record.can_upload)
    }

    /// Last day the share is valid, if shared with an expiry date
    pub fn expiration_date(&self) -> Option<Date> {
        if !self.is_shared() {
            return None;
        }
        self.record
            .expiration_date
            .get(..10)
            .and_then(|day| day.parse().ok())
    }

    pub fn share_time(&self) -> Option<Timestamp> {
        if !self.is_shared() || self.record.share_time <= 0 {
            return None;
        }
        Timestamp::from_second(self.record.share_time).ok()
    }

    /// `(width, height)` of a previewable node
    pub fn preview_dimensions(&self) -> Option<(u64, u64)> {
        self.record
            .is_previewable
            .then_some((self.record.width, self.record.height))
    }

    pub fn unknown_fields(&self) -> &BTreeMap<String, Value> {
        &self.record.unknown
    }

    pub fn record(&self) -> &NodeRecord {
        &self.record
    }

    /// Share this node and return its public URL
    pub async fn share(&mut self, options: ShareOptions) -> Result<String> {
        self.ensure_alive()?;
        options.validate(jiff::Zoned::now().date())?;

        let action = FileAction::Share {
            path: self.path.as_str(),
            active: true,
            allow_writes: options.allow_writes,
            update_password: Some(true),
            share_password: Some(options.password.as_deref().unwrap_or("")),
            update_expire_date: Some(true),
            expire_date: Some(
                options
                    .expire_date
                    .map(|date| date.strftime("%Y-%m-%d").to_string())
                    .unwrap_or_default(),
            ),
        };
        let response = self.update(&action).await.map_err(|err| match err {
            Error::Api { status, message } => Error::Share(format!(
                "{}: share rejected (HTTP {status}): {message}",
                self.path
            )),
            other => other,
        })?;

        let patch = first_descriptor(&response)?.ok_or_else(|| {
            Error::Share(format!("{}: service returned no node descriptor", self.path))
        })?;
        let record = self.record.merged(patch)?;
        if record.share_token.is_empty() {
            return Err(Error::Share(format!(
                "{}: service returned no share token",
                self.path
            )));
        }

        self.apply(record)?;
        tracing::debug!(path = %self.path, "Shared node");
        Ok(self.session.share_url(&self.record.share_token))
    }

    /// Stop sharing this node
    pub async fn unshare(&mut self) -> Result<()> {
        self.ensure_alive()?;

        let action = FileAction::Share {
            path: self.path.as_str(),
            active: false,
            allow_writes: false,
            update_password: None,
            share_password: None,
            update_expire_date: None,
            expire_date: None,
        };
        let response = self.update(&action).await?;

        let mut record = match first_descriptor(&response)? {
            Some(patch) => self.record.merged(patch)?,
            None => self.record.clone(),
        };
        record.share_token.clear();
        record.expiration_date.clear();
        record.has_share_password = false;
        record.can_upload = false;
        record.share_time = 0;

        self.apply(record)
    }

    /// Mark this node as a favorite
    pub async fn favorite(&mut self) -> Result<()> {
        self.set_favorite(true).await
    }

    /// Remove the favorite mark
    pub async fn unfavorite(&mut self) -> Result<()> {
        self.set_favorite(false).await
    }

    /// Delete the remote entry
    ///
    /// The instance keeps its metadata for inspection, but every further
    /// operation fails with [`Error::StaleNode`].
    pub async fn delete(&mut self) -> Result<()> {
        self.ensure_alive()?;

        let action = FileAction::Delete {
            path: self.path.as_str(),
            query: &self.query,
        };
        self.update(&action).await?;

        self.deleted = true;
        tracing::debug!(path = %self.path, "Deleted node");
        Ok(())
    }

    /// Re-read this node's descriptor from the service
    pub async fn refresh(&mut self) -> Result<()> {
        self.ensure_alive()?;
        let record = fetch_record(&self.session, &self.path).await?;
        self.apply(record)
    }

    /// Move or rename this node
    ///
    /// A relative `destination` is resolved against the node's parent
    /// directory. The node is refreshed from its new location afterwards.
    pub async fn move_to(&mut self, destination: &str) -> Result<()> {
        self.ensure_alive()?;

        let parent = self.path.parent().unwrap_or_else(RemotePath::root);
        let target = parent.join(destination)?;
        if target.is_root() || target.starts_with(&self.path) {
            return Err(Error::InvalidPath(format!(
                "cannot move {} to {target}",
                self.path
            )));
        }

        self.session
            .transfers()
            .move_path(&self.path, &target)
            .await?;

        let record = fetch_record(&self.session, &target).await?;
        self.apply(record)
    }

    async fn set_favorite(&mut self, active: bool) -> Result<()> {
        self.ensure_alive()?;

        let action = FileAction::Favorite {
            path: self.path.as_str(),
            active,
            query: &self.query,
        };
        let response = self.update(&action).await?;

        let mut record = match first_descriptor(&response)? {
            Some(patch) => self.record.merged(patch)?,
            None => self.record.clone(),
        };
        record.is_favorited = active;
        self.apply(record)
    }

    async fn update(&self, action: &FileAction<'_>) -> Result<Response> {
        let body = serde_json::to_value([action])?;
        self.session
            .request(Request::post(UPDATE_ENDPOINT).json(body), true)
            .await
    }

    /// Replace local state with `record`
    fn apply(&mut self, record: NodeRecord) -> Result<()> {
        if !record.path.is_empty() {
            self.path = normalize(&record.path)?;
        }
        self.record = record;
        Ok(())
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.deleted {
            Err(Error::StaleNode(format!("{} was deleted", self.path)))
        } else {
            Ok(())
        }
    }
}

async fn fetch_record(session: &Session, path: &RemotePath) -> Result<NodeRecord> {
    let request = Request::get(PATHINFO_ENDPOINT).query("path", path);
    let response = session.request(request, false).await.map_err(|err| match err {
        Error::NotFound(_) => Error::NotFound(path.to_string()),
        other => other,
    })?;

    let record: NodeRecord = response.json()?;
    let missing = record.path.is_empty()
        || record.unknown.get("exists") == Some(&Value::Bool(false));
    if missing {
        return Err(Error::NotFound(path.to_string()));
    }
    Ok(record)
}

/// First node descriptor of an update response, if any
fn first_descriptor(response: &Response) -> Result<Option<Value>> {
    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(match response.json::<Value>()? {
        Value::Array(items) => items.into_iter().find(Value::is_object),
        object @ Value::Object(_) => Some(object),
        _ => None,
    })
}
