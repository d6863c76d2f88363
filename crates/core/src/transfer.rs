//! Transfer engine
//!
//! File content moves over the service's WebDAV endpoint with HTTP basic
//! authentication; metadata of the result is read back through the JSON API.
//! Uploads stream from disk and downloads stream to disk, so payload size is
//! not bounded by memory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{StreamExt, stream};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::error::{Error, Result};
use crate::node::Node;
use crate::path::RemotePath;
use crate::session::Session;
use crate::transport::{Body, ByteStream, Method, Request};

/// Path segments of the WebDAV root beneath the base URL
const WEBDAV_ROOT: [&str; 2] = ["remote.php", "webdav"];

/// Uploads and downloads over one session
#[derive(Debug, Clone)]
pub struct TransferEngine {
    session: Session,
}

/// Outcome of [`TransferEngine::upload_tree`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeUpload {
    /// Remote directories that had to be created
    pub created_directories: Vec<RemotePath>,
    /// Files uploaded
    pub uploaded: Vec<RemotePath>,
    /// Files skipped because the remote path already existed
    pub skipped: Vec<RemotePath>,
}

impl TransferEngine {
    pub(crate) fn new(session: Session) -> Self {
        Self { session }
    }

    /// Upload a local file to `destination`
    ///
    /// The returned node is read back from the service. When the upload to a
    /// new path fails, or the stored size differs from the local size, the
    /// remote leftover is removed and an error is returned. A failed upload
    /// onto an existing file never deletes that file.
    pub async fn upload(&self, source: &Path, destination: &RemotePath) -> Result<Node> {
        self.session.ensure_authenticated()?;

        let metadata = tokio::fs::metadata(source).await?;
        if !metadata.is_file() {
            return Err(Error::Transfer(format!(
                "{} is not a regular file",
                source.display()
            )));
        }

        let len = metadata.len();
        let body = Body::File {
            path: source.to_path_buf(),
            len,
        };
        self.put(body, len, destination).await
    }

    /// Upload an in-memory buffer to `destination`
    pub async fn upload_bytes(&self, bytes: Vec<u8>, destination: &RemotePath) -> Result<Node> {
        self.session.ensure_authenticated()?;
        let len = bytes.len() as u64;
        self.put(Body::Bytes(bytes), len, destination).await
    }

    /// Download `source` into a local file, returning the bytes written
    ///
    /// Data lands in a temporary file next to `destination`, which replaces
    /// `destination` only once the transfer completed. A broken transfer
    /// leaves an existing `destination` untouched.
    pub async fn download(&self, source: &RemotePath, destination: &Path) -> Result<u64> {
        let body = self.open(source).await?;

        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let partial = tempfile::Builder::new()
            .prefix(".stack-download-")
            .tempfile_in(dir)?;

        let mut file = tokio::fs::File::from_std(partial.reopen()?);
        let written = copy_stream(body, &mut file, source).await?;
        file.sync_all().await?;
        drop(file);

        partial
            .persist(destination)
            .map_err(|err| Error::Io(err.error))?;
        Ok(written)
    }

    /// Download `source` into a caller-supplied writer
    pub async fn download_into<W>(&self, source: &RemotePath, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let body = self.open(source).await?;
        copy_stream(body, sink, source).await
    }

    /// Download `source` into memory
    pub async fn download_bytes(&self, source: &RemotePath) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.download_into(source, &mut buffer).await?;
        Ok(buffer)
    }

    /// Create a directory and return its node
    pub async fn mkdir(&self, path: &RemotePath) -> Result<Node> {
        if path.is_root() {
            return Err(Error::Conflict("the root directory always exists".into()));
        }

        let request = Request::new(Method::Mkcol, self.endpoint(path)?);
        self.session.dav(request, path).await?;
        tracing::debug!(path = %path, "Created directory");
        Node::fetch(&self.session, path).await
    }

    /// Move `from` to `to` without overwriting an existing entry
    pub async fn move_path(&self, from: &RemotePath, to: &RemotePath) -> Result<()> {
        let destination = self.webdav_url(to)?;
        let request = Request::new(Method::Move, self.endpoint(from)?)
            .header("Destination", destination.as_str())
            .header("Overwrite", "F");
        self.session.dav(request, from).await?;
        tracing::debug!(from = %from, to = %to, "Moved node");
        Ok(())
    }

    /// Mirror a local directory tree beneath `destination`
    ///
    /// Directories are created parents first, then files are uploaded with up
    /// to `concurrency` transfers in flight. Files that already exist remotely
    /// are skipped, never overwritten. After the first failed file no new
    /// upload starts; the first error is returned once running uploads end.
    pub async fn upload_tree(
        &self,
        source: &Path,
        destination: &RemotePath,
        concurrency: usize,
    ) -> Result<TreeUpload> {
        self.session.ensure_authenticated()?;
        let (directories, files) = scan_tree(source).await?;

        let mut summary = TreeUpload::default();
        let mut targets = vec![destination.clone()];
        for relative in &directories {
            targets.push(destination.join(relative)?);
        }
        for target in targets {
            if self.ensure_directory(&target).await? {
                summary.created_directories.push(target);
            }
        }

        let mut jobs = Vec::with_capacity(files.len());
        for relative in &files {
            jobs.push((source.join(relative), destination.join(relative)?));
        }

        // no new upload starts after the first failure; running ones finish
        let failed = AtomicBool::new(false);
        let outcomes: Vec<Result<Option<(RemotePath, bool)>>> = stream::iter(jobs)
            .map(|(local, remote)| {
                let failed = &failed;
                async move {
                    if failed.load(Ordering::Acquire) {
                        return Ok(None);
                    }
                    let outcome = self.mirror_file(&local, &remote).await;
                    if outcome.is_err() {
                        failed.store(true, Ordering::Release);
                    }
                    outcome.map(|uploaded| Some((remote, uploaded)))
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome? {
                Some((remote, true)) => summary.uploaded.push(remote),
                Some((remote, false)) => summary.skipped.push(remote),
                None => {}
            }
        }
        summary.uploaded.sort();
        summary.skipped.sort();
        Ok(summary)
    }

    /// Upload one file of a tree unless it exists; returns whether it was uploaded
    async fn mirror_file(&self, local: &Path, remote: &RemotePath) -> Result<bool> {
        match Node::fetch(&self.session, remote).await {
            Ok(_) => {
                tracing::debug!(path = %remote, "Skipping existing file");
                Ok(false)
            }
            Err(Error::NotFound(_)) => {
                self.upload(local, remote).await?;
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }

    /// Absolute WebDAV URL of `path`
    pub fn webdav_url(&self, path: &RemotePath) -> Result<Url> {
        let mut url = self.session.base().clone();
        url.path_segments_mut()
            .map_err(|()| {
                Error::InvalidPath(format!(
                    "{} cannot carry a path",
                    self.session.base_url()
                ))
            })?
            .pop_if_empty()
            .extend(WEBDAV_ROOT)
            .extend(path.segments());
        Ok(url)
    }

    /// WebDAV location of `path` relative to the base URL, percent-encoded
    fn endpoint(&self, path: &RemotePath) -> Result<String> {
        let url = self.webdav_url(path)?;
        let prefix = self.session.base().path().trim_end_matches('/');
        Ok(url.path()[prefix.len()..].to_string())
    }

    async fn open(&self, source: &RemotePath) -> Result<ByteStream> {
        let request = Request::get(self.endpoint(source)?);
        tracing::debug!(path = %source, "Downloading");
        Ok(self.session.dav_stream(request, source).await?.body)
    }

    async fn put(&self, body: Body, len: u64, destination: &RemotePath) -> Result<Node> {
        if destination.is_root() {
            return Err(Error::InvalidPath("cannot upload onto the root directory".into()));
        }

        let content_type = mime_guess::from_path(destination.as_str()).first_or_octet_stream();
        let request = Request::new(Method::Put, self.endpoint(destination)?)
            .header("Content-Type", content_type.essence_str())
            .body(body);

        let existed = match Node::fetch(&self.session, destination).await {
            Ok(_) => true,
            Err(Error::NotFound(_)) => false,
            Err(err) => return Err(err),
        };

        tracing::debug!(path = %destination, bytes = len, "Uploading");
        if let Err(err) = self.session.dav(request, destination).await {
            if !existed {
                self.discard_placeholder(destination).await;
            }
            return Err(err);
        }

        let mut node = Node::fetch(&self.session, destination).await?;
        if node.size() != len {
            let stored = node.size();
            if let Err(err) = node.delete().await {
                tracing::warn!(path = %destination, error = %err, "Failed to remove incomplete upload");
            }
            return Err(Error::Transfer(format!(
                "{destination}: service stored {stored} of {len} bytes"
            )));
        }
        Ok(node)
    }

    /// Remove a zero-byte file left behind by a failed upload to a new path
    async fn discard_placeholder(&self, path: &RemotePath) {
        let Ok(mut node) = Node::fetch(&self.session, path).await else {
            return;
        };
        if !node.is_file() || node.size() != 0 {
            return;
        }
        match node.delete().await {
            Ok(()) => tracing::debug!(path = %path, "Removed upload placeholder"),
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "Failed to remove upload placeholder")
            }
        }
    }

    /// Make sure `path` is a directory; returns whether it had to be created
    async fn ensure_directory(&self, path: &RemotePath) -> Result<bool> {
        match Node::fetch(&self.session, path).await {
            Ok(node) if node.is_dir() => Ok(false),
            Ok(_) => Err(Error::WrongKind(format!("{path} is a file, expected a directory"))),
            Err(Error::NotFound(_)) => {
                self.mkdir(path).await?;
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }
}

async fn copy_stream<W>(mut body: ByteStream, sink: &mut W, source: &RemotePath) -> Result<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk
            .map_err(|err| Error::Transfer(format!("{source}: download interrupted: {err}")))?;
        sink.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    sink.flush().await?;
    Ok(written)
}

/// Relative directory and file paths beneath `root`, `/`-separated and sorted
async fn scan_tree(root: &Path) -> Result<(Vec<String>, Vec<String>)> {
    let mut directories = Vec::new();
    let mut files = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let relative = relative_name(root, &path)?;
            if entry.file_type().await?.is_dir() {
                directories.push(relative);
                pending.push(path);
            } else {
                files.push(relative);
            }
        }
    }

    directories.sort();
    files.sort();
    Ok((directories, files))
}

fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut segments = Vec::new();
    for component in relative.components() {
        let segment = component.as_os_str().to_str().ok_or_else(|| {
            Error::Transfer(format!("{} is not valid UTF-8", path.display()))
        })?;
        segments.push(segment);
    }
    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::normalize;
    use crate::testing::{self, Entry, HOST};
    use crate::transport::{MockTransport, Response, StreamingResponse};
    use futures::StreamExt;
    use tempfile::TempDir;

    fn p(path: &str) -> RemotePath {
        normalize(path).unwrap()
    }

    async fn fake_session(entries: &[(&str, Option<&str>)]) -> (Session, testing::Tree) {
        let mut transport = MockTransport::new();
        testing::expect_login(&mut transport);
        let tree = testing::fake_stack(&mut transport, entries);
        (testing::login(transport).await, tree)
    }

    #[test]
    fn test_webdav_urls_are_percent_encoded() {
        let engine = testing::session(MockTransport::new()).transfers();
        let url = engine.webdav_url(&p("/my docs/a#1.txt")).unwrap();
        assert_eq!(
            url.as_str(),
            format!("https://{HOST}/remote.php/webdav/my%20docs/a%231.txt")
        );
        assert_eq!(
            engine.endpoint(&p("/my docs")).unwrap(),
            "/remote.php/webdav/my%20docs"
        );
        assert_eq!(
            engine.endpoint(&RemotePath::root()).unwrap(),
            "/remote.php/webdav"
        );
    }

    #[test]
    fn test_endpoint_is_relative_to_base_path() {
        let profile = crate::Profile::new("p", "http://127.0.0.1:8080/stack", "u", "p");
        let session =
            Session::new(std::sync::Arc::new(MockTransport::new()), &profile).unwrap();
        let engine = session.transfers();
        assert_eq!(
            engine.endpoint(&p("/a.txt")).unwrap(),
            "/remote.php/webdav/a.txt"
        );
        assert_eq!(
            engine.webdav_url(&p("/a.txt")).unwrap().as_str(),
            "http://127.0.0.1:8080/stack/remote.php/webdav/a.txt"
        );
    }

    #[tokio::test]
    async fn test_transfers_require_login() {
        let engine = testing::session(MockTransport::new()).transfers();
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("a.txt");
        std::fs::write(&local, "x").unwrap();

        assert!(matches!(
            engine.upload(&local, &p("/a.txt")).await,
            Err(Error::NotLoggedIn(_))
        ));
        assert!(matches!(
            engine.download(&p("/a.txt"), &dir.path().join("out")).await,
            Err(Error::NotLoggedIn(_))
        ));
        assert!(matches!(
            engine.download_bytes(&p("/a.txt")).await,
            Err(Error::NotLoggedIn(_))
        ));
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_upload_file_returns_node() {
        let (session, tree) = fake_session(&[("/docs", None)]).await;
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("local.txt");
        std::fs::write(&local, "hello world").unwrap();

        let node = session
            .transfers()
            .upload(&local, &p("/docs/local.txt"))
            .await
            .unwrap();

        assert_eq!(node.name(), "local.txt");
        assert_eq!(node.size(), 11);
        assert!(matches!(
            tree.lock().unwrap().get("/docs/local.txt"),
            Some(Entry::File(data)) if data == b"hello world"
        ));
    }

    #[tokio::test]
    async fn test_upload_sends_basic_auth_and_content_type() {
        let mut transport = MockTransport::new();
        testing::expect_login(&mut transport);
        transport
            .expect_send()
            .withf(|r| {
                r.method == Method::Put
                    && r.endpoint == "/remote.php/webdav/pic.png"
                    && r.header_value("content-type") == Some("image/png")
                    && r.basic_auth.as_ref().map(|c| c.username.as_str()) == Some("alice")
            })
            .times(1)
            .returning(|_| Ok(Response::new(201, "")));
        transport
            .expect_send()
            .withf(|r| r.endpoint == "/api/pathinfo")
            .returning(|_| {
                Ok(testing::json_response(
                    200,
                    testing::file_json("/pic.png", 4),
                ))
            });

        let session = testing::login(transport).await;
        let node = session
            .transfers()
            .upload_bytes(vec![1, 2, 3, 4], &p("/pic.png"))
            .await
            .unwrap();
        assert_eq!(node.size(), 4);
    }

    #[tokio::test]
    async fn test_failed_upload_removes_placeholder() {
        let (session, tree) = fake_session(&[("/uploads", None)]).await;

        let err = session
            .transfers()
            .upload_bytes(vec![0; 64], &p("/uploads/full-disk.bin"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
        assert!(!tree.lock().unwrap().contains_key("/uploads/full-disk.bin"));
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_existing_empty_file() {
        let (session, tree) = fake_session(&[("/uploads/full-disk.bin", Some(""))]).await;

        let err = session
            .transfers()
            .upload_bytes(b"new content".to_vec(), &p("/uploads/full-disk.bin"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
        assert_eq!(
            tree.lock().unwrap().get("/uploads/full-disk.bin"),
            Some(&Entry::File(Vec::new()))
        );
    }

    #[tokio::test]
    async fn test_failed_overwrite_of_empty_file_sends_no_delete() {
        let mut transport = MockTransport::new();
        testing::expect_login(&mut transport);
        transport
            .expect_send()
            .withf(|r| r.method == Method::Put)
            .times(1)
            .returning(|_| Ok(Response::new(503, "")));
        transport
            .expect_send()
            .withf(|r| r.endpoint == "/api/pathinfo")
            .returning(|_| {
                Ok(testing::json_response(
                    200,
                    testing::file_json("/existing-empty.txt", 0),
                ))
            });
        transport
            .expect_send()
            .withf(|r| r.endpoint == "/api/files/update")
            .times(0);

        let session = testing::login(transport).await;
        let err = session
            .transfers()
            .upload_bytes(b"replacement".to_vec(), &p("/existing-empty.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Api { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_existing_content() {
        let mut transport = MockTransport::new();
        testing::expect_login(&mut transport);
        transport
            .expect_send()
            .withf(|r| r.method == Method::Put)
            .returning(|_| Ok(Response::new(403, "")));
        transport
            .expect_send()
            .withf(|r| r.endpoint == "/api/pathinfo")
            .returning(|_| {
                Ok(testing::json_response(200, testing::file_json("/old.txt", 120)))
            });

        let session = testing::login(transport).await;
        let err = session
            .transfers()
            .upload_bytes(b"new".to_vec(), &p("/old.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AccessDenied(_)));
    }

    #[tokio::test]
    async fn test_size_mismatch_is_rejected_and_cleaned_up() {
        let mut transport = MockTransport::new();
        testing::expect_login(&mut transport);
        testing::expect_csrf(&mut transport);
        transport
            .expect_send()
            .withf(|r| r.method == Method::Put)
            .returning(|_| Ok(Response::new(201, "")));
        transport
            .expect_send()
            .withf(|r| r.endpoint == "/api/pathinfo")
            .returning(|_| {
                Ok(testing::json_response(200, testing::file_json("/a.bin", 3)))
            });
        transport
            .expect_send()
            .withf(|r| r.endpoint == "/api/files/update")
            .times(1)
            .returning(|_| Ok(Response::new(200, "[]")));

        let session = testing::login(transport).await;
        let err = session
            .transfers()
            .upload_bytes(vec![9; 10], &p("/a.bin"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("3 of 10 bytes"));
    }

    #[tokio::test]
    async fn test_download_streams_to_file() {
        let (session, _tree) = fake_session(&[("/docs/big.txt", Some("0123456789abcdef"))]).await;
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("big.txt");

        let written = session
            .transfers()
            .download(&p("/docs/big.txt"), &out)
            .await
            .unwrap();

        assert_eq!(written, 16);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "0123456789abcdef");
    }

    #[tokio::test]
    async fn test_download_missing_creates_no_file() {
        let (session, _tree) = fake_session(&[]).await;
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nope.txt");

        let err = session
            .transfers()
            .download(&p("/nope.txt"), &out)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_interrupted_download_removes_partial_file() {
        let mut transport = MockTransport::new();
        testing::expect_login(&mut transport);
        transport.expect_open().returning(|_| {
            let chunks = vec![
                Ok(b"partial".to_vec()),
                Err(Error::Connection("reset by peer".into())),
            ];
            Ok(StreamingResponse {
                status: 200,
                body: futures::stream::iter(chunks).boxed(),
            })
        });

        let session = testing::login(transport).await;
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("a.txt");

        let err = session
            .transfers()
            .download(&p("/a.txt"), &out)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_interrupted_download_keeps_previous_file() {
        let mut transport = MockTransport::new();
        testing::expect_login(&mut transport);
        transport.expect_open().returning(|_| {
            let chunks = vec![
                Ok(b"new".to_vec()),
                Err(Error::Connection("reset by peer".into())),
            ];
            Ok(StreamingResponse {
                status: 200,
                body: futures::stream::iter(chunks).boxed(),
            })
        });

        let session = testing::login(transport).await;
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("a.txt");
        std::fs::write(&out, "previous").unwrap();

        let err = session
            .transfers()
            .download(&p("/a.txt"), &out)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "previous");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_download_replaces_existing_file() {
        let (session, _tree) = fake_session(&[("/a.txt", Some("fresh"))]).await;
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("a.txt");
        std::fs::write(&out, "stale and longer").unwrap();

        session
            .transfers()
            .download(&p("/a.txt"), &out)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "fresh");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_download_into_writer() {
        let (session, _tree) = fake_session(&[("/a.txt", Some("buffered"))]).await;
        let mut sink = Vec::new();
        let written = session
            .transfers()
            .download_into(&p("/a.txt"), &mut sink)
            .await
            .unwrap();
        assert_eq!(written, 8);
        assert_eq!(sink, b"buffered");
    }

    #[tokio::test]
    async fn test_mkdir_and_conflict() {
        let (session, tree) = fake_session(&[("/docs", None)]).await;
        let engine = session.transfers();

        let node = engine.mkdir(&p("/docs/new")).await.unwrap();
        assert!(node.is_dir());
        assert!(matches!(
            tree.lock().unwrap().get("/docs/new"),
            Some(Entry::Dir)
        ));

        assert!(matches!(
            engine.mkdir(&p("/docs/new")).await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            engine.mkdir(&p("/missing/child")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_move_path_does_not_overwrite() {
        let (session, tree) = fake_session(&[("/a.txt", Some("a")), ("/b.txt", Some("b"))]).await;
        let engine = session.transfers();

        assert!(matches!(
            engine.move_path(&p("/a.txt"), &p("/b.txt")).await,
            Err(Error::Conflict(_))
        ));

        engine.move_path(&p("/a.txt"), &p("/c.txt")).await.unwrap();
        let tree = tree.lock().unwrap();
        assert!(!tree.contains_key("/a.txt"));
        assert!(tree.contains_key("/c.txt"));
    }

    #[tokio::test]
    async fn test_upload_tree_creates_dirs_and_skips_existing() {
        let (session, tree) =
            fake_session(&[("/backup", None), ("/backup/keep.txt", Some("remote"))]).await;

        let local = TempDir::new().unwrap();
        std::fs::create_dir_all(local.path().join("sub/deeper")).unwrap();
        std::fs::write(local.path().join("keep.txt"), "local").unwrap();
        std::fs::write(local.path().join("top.txt"), "top").unwrap();
        std::fs::write(local.path().join("sub/deeper/leaf.txt"), "leaf").unwrap();

        let summary = session
            .transfers()
            .upload_tree(local.path(), &p("/backup"), 4)
            .await
            .unwrap();

        assert_eq!(
            summary.created_directories,
            vec![p("/backup/sub"), p("/backup/sub/deeper")]
        );
        assert_eq!(
            summary.uploaded,
            vec![p("/backup/sub/deeper/leaf.txt"), p("/backup/top.txt")]
        );
        assert_eq!(summary.skipped, vec![p("/backup/keep.txt")]);

        let tree = tree.lock().unwrap();
        assert!(matches!(
            tree.get("/backup/keep.txt"),
            Some(Entry::File(data)) if data == b"remote"
        ));
        assert!(matches!(
            tree.get("/backup/sub/deeper/leaf.txt"),
            Some(Entry::File(data)) if data == b"leaf"
        ));
    }

    fn local_tree_with_failing_file() -> TempDir {
        let local = TempDir::new().unwrap();
        std::fs::write(local.path().join("a.txt"), "a").unwrap();
        std::fs::write(local.path().join("full-disk.bin"), "big").unwrap();
        std::fs::write(local.path().join("z.txt"), "z").unwrap();
        local
    }

    #[tokio::test]
    async fn test_upload_tree_failure_cleans_up_and_stops() {
        let (session, tree) = fake_session(&[("/backup", None)]).await;
        let local = local_tree_with_failing_file();

        let err = session
            .transfers()
            .upload_tree(local.path(), &p("/backup"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));

        let tree = tree.lock().unwrap();
        assert!(tree.contains_key("/backup/a.txt"));
        assert!(!tree.contains_key("/backup/full-disk.bin"));
        assert!(!tree.contains_key("/backup/z.txt"));
    }

    #[tokio::test]
    async fn test_upload_tree_failure_with_parallel_uploads_leaves_no_placeholder() {
        let (session, tree) = fake_session(&[("/backup", None)]).await;
        let local = local_tree_with_failing_file();

        let err = session
            .transfers()
            .upload_tree(local.path(), &p("/backup"), 3)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
        assert!(!tree.lock().unwrap().contains_key("/backup/full-disk.bin"));
    }
}
