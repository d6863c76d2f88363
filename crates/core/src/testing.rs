//! Shared fixtures for unit tests

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde_json::{Value, json};

use crate::path::{RemotePath, normalize};
use crate::profile::Profile;
use crate::session::Session;
use crate::transport::{Body, Method, MockTransport, Request, Response, StreamingResponse};

pub(crate) const HOST: &str = "stack.example.com";

pub(crate) fn profile() -> Profile {
    Profile::new("test", HOST, "alice", "hunter22")
}

/// Unauthenticated session over `transport`
pub(crate) fn session(transport: MockTransport) -> Session {
    Session::new(Arc::new(transport), &profile()).unwrap()
}

/// Logged-in session over `transport`, which must expect the login call
pub(crate) async fn login(transport: MockTransport) -> Session {
    let session = session(transport);
    session.login().await.unwrap();
    session
}

pub(crate) fn expect_login(transport: &mut MockTransport) {
    transport
        .expect_send()
        .withf(|r| r.endpoint == "/login")
        .times(1)
        .returning(|_| Ok(Response::new(302, "")));
}

pub(crate) fn expect_logout(transport: &mut MockTransport) {
    transport
        .expect_send()
        .withf(|r| r.endpoint == "/logout")
        .times(1)
        .returning(|_| Ok(Response::new(302, "")));
}

pub(crate) fn expect_csrf(transport: &mut MockTransport) {
    transport
        .expect_send()
        .withf(|r| r.endpoint == "/files")
        .times(1)
        .returning(|_| Ok(csrf_page("csrf-test-token")));
}

pub(crate) fn csrf_page(token: &str) -> Response {
    Response::new(
        200,
        format!(r#"<html><head><meta name="csrf-token" content="{token}"></head></html>"#),
    )
}

pub(crate) fn json_response(status: u16, value: Value) -> Response {
    Response::new(status, value.to_string())
}

/// Node descriptor for a plain file
pub(crate) fn file_json(path: &str, size: u64) -> Value {
    json!({
        "fileId": 7,
        "path": path,
        "mimetype": "text/plain",
        "etag": "e7a9",
        "shareToken": "",
        "expirationDate": "",
        "hasSharePassword": false,
        "shareTime": 0,
        "canUpload": false,
        "fileSize": size,
        "isFavorited": false,
        "mtime": 1_700_000_000,
        "isPreviewable": false,
        "width": 0,
        "height": 0,
    })
}

/// Node descriptor for a directory
pub(crate) fn dir_json(path: &str) -> Value {
    json!({
        "fileId": 3,
        "path": path,
        "mimetype": "httpd/unix-directory",
        "etag": "d1r",
        "shareToken": "",
        "fileSize": 0,
        "isFavorited": false,
        "mtime": 1_700_000_000,
    })
}

/// Node descriptor with `overrides` merged on top of a file descriptor
pub(crate) fn file_json_with(path: &str, overrides: Value) -> Value {
    let mut node = file_json(path, 11);
    if let (Value::Object(base), Value::Object(extra)) = (&mut node, overrides) {
        base.extend(extra);
    }
    node
}

/// Entry of the in-memory remote tree used by [`fake_stack`]
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Entry {
    Dir,
    File(Vec<u8>),
}

pub(crate) type Tree = Arc<Mutex<BTreeMap<String, Entry>>>;

const DAV_PREFIX: &str = "/remote.php/webdav";

/// File name whose PUT leaves an empty placeholder and answers 507
pub(crate) const FULL_DISK_NAME: &str = "full-disk.bin";

/// Answer pathinfo, listing, update and WebDAV calls from an in-memory tree
///
/// `entries` maps paths to file contents (`None` for directories); missing
/// ancestors are created. The CSRF page is served as often as requested.
pub(crate) fn fake_stack(transport: &mut MockTransport, entries: &[(&str, Option<&str>)]) -> Tree {
    let mut map = BTreeMap::new();
    map.insert("/".to_string(), Entry::Dir);
    for (path, content) in entries {
        let path = normalize(path).unwrap();
        let mut ancestor = path.parent();
        while let Some(dir) = ancestor {
            map.entry(dir.to_string()).or_insert(Entry::Dir);
            ancestor = dir.parent();
        }
        let entry = match content {
            Some(data) => Entry::File(data.as_bytes().to_vec()),
            None => Entry::Dir,
        };
        map.insert(path.to_string(), entry);
    }
    let tree: Tree = Arc::new(Mutex::new(map));

    transport
        .expect_send()
        .withf(|r| r.endpoint == "/files")
        .returning(|_| Ok(csrf_page("fake-token")));

    let state = Arc::clone(&tree);
    transport
        .expect_send()
        .withf(|r| r.endpoint == "/api/pathinfo")
        .returning(move |r| {
            let tree = state.lock().unwrap();
            let path = r.query_value("path").unwrap_or("/");
            Ok(match tree.get(path) {
                Some(entry) => json_response(200, descriptor(path, entry)),
                None => Response::new(404, ""),
            })
        });

    let state = Arc::clone(&tree);
    transport
        .expect_send()
        .withf(|r| r.endpoint == "/api/files")
        .returning(move |r| Ok(listing(&state.lock().unwrap(), &r)));

    let state = Arc::clone(&tree);
    transport
        .expect_send()
        .withf(|r| r.endpoint == "/api/files/update")
        .returning(move |r| {
            let mut tree = state.lock().unwrap();
            let Body::Json(Value::Array(actions)) = r.body else {
                return Ok(Response::new(400, ""));
            };
            for action in actions {
                if action["action"] == "delete" {
                    let path = action["path"].as_str().unwrap_or_default().to_string();
                    let nested = format!("{path}/");
                    tree.retain(|key, _| *key != path && !key.starts_with(&nested));
                }
            }
            Ok(Response::new(200, "[]"))
        });

    let state = Arc::clone(&tree);
    transport
        .expect_send()
        .withf(|r| r.endpoint.starts_with(DAV_PREFIX))
        .returning(move |r| Ok(webdav(&mut state.lock().unwrap(), r)));

    let state = Arc::clone(&tree);
    transport
        .expect_open()
        .withf(|r| r.endpoint.starts_with(DAV_PREFIX))
        .returning(move |r| {
            let tree = state.lock().unwrap();
            let (status, data) = match tree.get(&dav_path(&r.endpoint).to_string()) {
                Some(Entry::File(data)) => (200, data.clone()),
                Some(Entry::Dir) => (405, Vec::new()),
                None => (404, Vec::new()),
            };
            let chunks: Vec<_> = data.chunks(4).map(|c| Ok(c.to_vec())).collect();
            Ok(StreamingResponse {
                status,
                body: futures::stream::iter(chunks).boxed(),
            })
        });

    tree
}

fn descriptor(path: &str, entry: &Entry) -> Value {
    match entry {
        Entry::Dir => dir_json(path),
        Entry::File(data) => file_json(path, data.len() as u64),
    }
}

fn listing(tree: &BTreeMap<String, Entry>, request: &Request) -> Response {
    let dir = normalize(request.query_value("dir").unwrap_or("/")).unwrap();
    if tree.get(dir.as_str()) != Some(&Entry::Dir) {
        return Response::new(404, "");
    }

    let query = request.query_value("query").unwrap_or_default();
    let offset: usize = request.query_value("offset").unwrap().parse().unwrap();
    let limit: usize = request.query_value("limit").unwrap().parse().unwrap();

    let mut nodes: Vec<Value> = tree
        .iter()
        .filter(|(key, _)| {
            let path = normalize(key).unwrap();
            path.parent().as_ref() == Some(&dir)
                && path.name().is_some_and(|name| name.contains(query))
        })
        .map(|(key, entry)| descriptor(key, entry))
        .collect();
    if request.query_value("order") == Some("desc") {
        nodes.reverse();
    }

    let amount = nodes.len();
    let page: Vec<Value> = nodes.into_iter().skip(offset).take(limit).collect();
    json_response(200, json!({"amount": amount, "nodes": page}))
}

fn dav_path(endpoint: &str) -> RemotePath {
    let rest = endpoint
        .strip_prefix(DAV_PREFIX)
        .unwrap()
        .replace("%20", " ");
    normalize(if rest.is_empty() { "/" } else { &rest }).unwrap()
}

fn webdav(tree: &mut BTreeMap<String, Entry>, request: Request) -> Response {
    let path = dav_path(&request.endpoint);
    let parent_is_dir = path
        .parent()
        .is_some_and(|parent| tree.get(parent.as_str()) == Some(&Entry::Dir));

    match request.method {
        Method::Put => {
            if !parent_is_dir {
                return Response::new(409, "");
            }
            if path.name() == Some(FULL_DISK_NAME) {
                tree.entry(path.to_string())
                    .or_insert_with(|| Entry::File(Vec::new()));
                return Response::new(507, "");
            }
            let data = match request.body {
                Body::Bytes(bytes) => bytes,
                Body::File { path, .. } => std::fs::read(path).unwrap(),
                other => panic!("unexpected upload body {other:?}"),
            };
            tree.insert(path.to_string(), Entry::File(data));
            Response::new(201, "")
        }
        Method::Mkcol => {
            if tree.contains_key(path.as_str()) {
                return Response::new(405, "");
            }
            if !parent_is_dir {
                return Response::new(409, "");
            }
            tree.insert(path.to_string(), Entry::Dir);
            Response::new(201, "")
        }
        Method::Move => {
            let destination = request
                .header_value("Destination")
                .and_then(|d| d.strip_prefix(&format!("https://{HOST}")))
                .map(dav_path)
                .unwrap();
            if !tree.contains_key(path.as_str()) {
                return Response::new(404, "");
            }
            if tree.contains_key(destination.as_str()) {
                return Response::new(412, "");
            }
            let source = path.to_string();
            let nested = format!("{source}/");
            let moved: Vec<String> = tree
                .keys()
                .filter(|key| **key == source || key.starts_with(&nested))
                .cloned()
                .collect();
            for key in moved {
                if let Some(entry) = tree.remove(&key) {
                    let renamed = format!("{}{}", destination, &key[source.len()..]);
                    tree.insert(renamed, entry);
                }
            }
            Response::new(201, "")
        }
        method => Response::new(405, format!("unsupported {method}")),
    }
}
