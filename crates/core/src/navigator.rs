//! Directory navigator
//!
//! A [`Navigator`] holds a current working directory and resolves every path
//! argument against it. Listings are fetched fresh on each call and paged
//! until the whole directory (or the caller's limit) has been read.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use tokio::io::AsyncWrite;

use crate::error::{Error, Result};
use crate::node::{Node, NodeRecord};
use crate::path::{RemotePath, resolve};
use crate::session::Session;
use crate::transfer::TreeUpload;
use crate::transport::Request;
use crate::wire;

pub(crate) const LIST_ENDPOINT: &str = "/api/files";

/// Sort direction of a listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub const fn as_str(self) -> &'static str {
        match self {
            Order::Asc => "asc",
            Order::Desc => "desc",
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Order {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Order::Asc),
            "desc" => Ok(Order::Desc),
            _ => Err(Error::Validation(format!(
                "invalid order '{s}', expected 'asc' or 'desc'"
            ))),
        }
    }
}

/// Options for [`Navigator::ls_with`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    /// Only return entries whose name matches this search string
    pub query: String,
    pub order: Order,
    /// Sort key understood by the service
    pub sort_by: String,
    /// Entries per request; the session default when `None`
    pub page_size: Option<u32>,
    /// Stop after this many entries
    pub limit: Option<usize>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            query: String::new(),
            order: Order::Asc,
            sort_by: "default".to_string(),
            page_size: None,
            limit: None,
        }
    }
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn sort_by(mut self, key: impl Into<String>) -> Self {
        self.sort_by = key.into();
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Deserialize)]
struct ListingPage {
    #[serde(default, deserialize_with = "wire::lenient_u64")]
    amount: u64,
    #[serde(default, deserialize_with = "wire::or_default")]
    nodes: Vec<NodeRecord>,
}

/// Stateful view of the remote file tree
///
/// Each navigator owns its working directory; clones and other navigators
/// over the same session move independently.
#[derive(Debug, Clone)]
pub struct Navigator {
    session: Session,
    cwd: RemotePath,
}

impl Navigator {
    /// Navigator positioned at the root directory
    pub fn new(session: Session) -> Self {
        Self::at(session, RemotePath::root())
    }

    /// Navigator positioned at `cwd`
    pub fn at(session: Session, cwd: RemotePath) -> Self {
        Self { session, cwd }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Current working directory
    pub fn cwd(&self) -> &RemotePath {
        &self.cwd
    }

    /// Resolve `path` against the working directory
    pub fn resolve(&self, path: &str) -> Result<RemotePath> {
        resolve(&self.cwd, path)
    }

    /// Change the working directory
    ///
    /// Existence is not checked; the next listing reports a missing
    /// directory.
    pub fn cd(&mut self, path: &str) -> Result<&mut Self> {
        self.cwd = self.resolve(path)?;
        tracing::debug!(cwd = %self.cwd, "Changed directory");
        Ok(self)
    }

    /// Files in the working directory
    pub async fn files(&self) -> Result<Vec<Node>> {
        let nodes = self.list(&self.cwd, &ListOptions::default()).await?;
        Ok(nodes.into_iter().filter(Node::is_file).collect())
    }

    /// Subdirectories of the working directory
    pub async fn directories(&self) -> Result<Vec<Node>> {
        let nodes = self.list(&self.cwd, &ListOptions::default()).await?;
        Ok(nodes.into_iter().filter(Node::is_dir).collect())
    }

    /// List a directory without changing the working directory
    pub async fn ls(&self, path: &str) -> Result<Vec<Node>> {
        self.ls_with(path, &ListOptions::default()).await
    }

    /// List a directory with search, ordering and paging options
    pub async fn ls_with(&self, path: &str, options: &ListOptions) -> Result<Vec<Node>> {
        let dir = self.resolve(path)?;
        self.list(&dir, options).await
    }

    /// All files beneath a directory, depth first
    pub async fn walk(&self, path: &str) -> Result<Vec<Node>> {
        let root = self.resolve(path)?;
        let options = ListOptions::default();

        let mut files = Vec::new();
        let mut pending = vec![root];
        while let Some(dir) = pending.pop() {
            let mut subdirs = Vec::new();
            for node in self.list(&dir, &options).await? {
                if node.is_file() {
                    files.push(node);
                } else if node.path() != &dir {
                    subdirs.push(node.path().clone());
                }
            }
            pending.extend(subdirs.into_iter().rev());
        }
        Ok(files)
    }

    /// Look up a file or directory
    pub async fn node(&self, path: &str) -> Result<Node> {
        Node::fetch(&self.session, &self.resolve(path)?).await
    }

    /// Look up a file; a directory at `path` is an error
    pub async fn file(&self, path: &str) -> Result<Node> {
        let node = self.node(path).await?;
        if node.is_dir() {
            return Err(Error::WrongKind(format!(
                "{} is a directory, expected a file",
                node.path()
            )));
        }
        Ok(node)
    }

    /// Look up a directory; a file at `path` is an error
    pub async fn directory(&self, path: &str) -> Result<Node> {
        let node = self.node(path).await?;
        if node.is_file() {
            return Err(Error::WrongKind(format!(
                "{} is a file, expected a directory",
                node.path()
            )));
        }
        Ok(node)
    }

    /// Create a directory
    pub async fn mkdir(&self, path: &str) -> Result<Node> {
        self.session.transfers().mkdir(&self.resolve(path)?).await
    }

    /// Upload a local file
    ///
    /// Without `remote`, the file keeps its base name inside the working
    /// directory.
    pub async fn upload(&self, source: &Path, remote: Option<&str>) -> Result<Node> {
        let destination = match remote {
            Some(remote) => self.resolve(remote)?,
            None => {
                let name = source
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or_else(|| {
                        Error::Validation(format!(
                            "cannot derive a remote name from {}",
                            source.display()
                        ))
                    })?;
                self.cwd.join(name)?
            }
        };
        self.session.transfers().upload(source, &destination).await
    }

    /// Upload an in-memory buffer
    pub async fn upload_bytes(&self, bytes: Vec<u8>, remote: &str) -> Result<Node> {
        let destination = self.resolve(remote)?;
        self.session
            .transfers()
            .upload_bytes(bytes, &destination)
            .await
    }

    /// Mirror a local directory beneath `remote` (the working directory by
    /// default), skipping files that already exist
    pub async fn upload_tree(
        &self,
        source: &Path,
        remote: Option<&str>,
        concurrency: usize,
    ) -> Result<TreeUpload> {
        let destination = match remote {
            Some(remote) => self.resolve(remote)?,
            None => self.cwd.clone(),
        };
        self.session
            .transfers()
            .upload_tree(source, &destination, concurrency)
            .await
    }

    /// Download a remote file to a local path
    pub async fn download(&self, remote: &str, destination: &Path) -> Result<u64> {
        let source = self.resolve(remote)?;
        self.session.transfers().download(&source, destination).await
    }

    /// Download a remote file into a writer
    pub async fn download_into<W>(&self, remote: &str, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let source = self.resolve(remote)?;
        self.session.transfers().download_into(&source, sink).await
    }

    /// Download a remote file into memory
    pub async fn download_bytes(&self, remote: &str) -> Result<Vec<u8>> {
        let source = self.resolve(remote)?;
        self.session.transfers().download_bytes(&source).await
    }

    async fn list(&self, dir: &RemotePath, options: &ListOptions) -> Result<Vec<Node>> {
        let page_size = u64::from(
            options
                .page_size
                .unwrap_or(self.session.defaults().page_size)
                .max(1),
        );

        let mut nodes = Vec::new();
        let mut offset = 0u64;
        loop {
            let mut limit = page_size;
            if let Some(max) = options.limit {
                let remaining = max.saturating_sub(nodes.len()) as u64;
                if remaining == 0 {
                    break;
                }
                limit = limit.min(remaining);
            }

            let request = Request::get(LIST_ENDPOINT)
                .query("dir", dir)
                .query("type", "files")
                .query("public", "false")
                .query("offset", offset)
                .query("limit", limit)
                .query("sortBy", &options.sort_by)
                .query("order", options.order)
                .query("query", &options.query);
            let response = self
                .session
                .request(request, false)
                .await
                .map_err(|err| match err {
                    Error::NotFound(_) => Error::NotFound(dir.to_string()),
                    other => other,
                })?;

            let page: ListingPage = response.json()?;
            let received = page.nodes.len() as u64;
            tracing::debug!(
                dir = %dir,
                offset,
                received,
                amount = page.amount,
                "Fetched listing page"
            );

            for record in page.nodes {
                nodes.push(Node::from_record(self.session.clone(), record)?);
            }

            offset += received;
            if received == 0 || offset >= page.amount {
                break;
            }
        }

        if let Some(max) = options.limit {
            nodes.truncate(max);
        }
        Ok(nodes)
    }
}
