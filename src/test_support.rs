//! In-process HTTP fixtures shared by the unit tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::Deserialize;
use serde_json::{Value, json};

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A request seen by [`FileServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub name: String,
    pub range: Option<String>,
}

#[derive(Clone)]
struct FileState {
    files: Arc<HashMap<String, Vec<u8>>>,
    ranges: bool,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// Serves fixed byte blobs under `/files/{name}`, optionally honouring ranges.
pub struct FileServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl FileServer {
    pub async fn start(files: Vec<(&str, Vec<u8>)>, ranges: bool) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = FileState {
            files: Arc::new(
                files
                    .into_iter()
                    .map(|(name, data)| (name.to_string(), data))
                    .collect(),
            ),
            ranges,
            requests: Arc::clone(&requests),
        };
        let app = Router::new()
            .route("/files/{name}", get(serve_file))
            .with_state(state);
        Self {
            addr: spawn(app).await,
            requests,
        }
    }

    pub fn url(&self, name: &str) -> String {
        format!("http://{}/files/{name}", self.addr)
    }

    pub fn base(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Range headers of the GET requests, in arrival order.
    pub fn get_ranges(&self) -> Vec<Option<String>> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "GET")
            .map(|r| r.range)
            .collect()
    }
}

fn parse_range(value: &str, total: u64) -> Option<(u64, u64)> {
    let bounds = value.strip_prefix("bytes=")?;
    let (start, end) = bounds.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end = if end.is_empty() {
        total.checked_sub(1)?
    } else {
        end.parse::<u64>().ok()?.min(total.checked_sub(1)?)
    };
    (start <= end).then_some((start, end))
}

async fn serve_file(
    State(state): State<FileState>,
    Path(name): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.to_string(),
        name: name.clone(),
        range: range.clone(),
    });

    let Some(data) = state.files.get(&name) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let total = data.len() as u64;

    if state.ranges
        && let Some((start, end)) = range.as_deref().and_then(|r| parse_range(r, total))
    {
        let slice = data[start as usize..=end as usize].to_vec();
        return Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{total}"))
            .body(Body::from(slice))
            .unwrap();
    }

    let mut builder = Response::builder().status(StatusCode::OK);
    if state.ranges {
        builder = builder.header(header::ACCEPT_RANGES, "bytes");
    }
    builder.body(Body::from(data.clone())).unwrap()
}

#[derive(Clone)]
struct ListingState {
    listings: Arc<HashMap<String, Value>>,
    auth: Arc<Mutex<Option<String>>>,
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    id: String,
}

/// Serves `folder/list` responses keyed by folder id plus an IP echo at `/get`.
pub struct ListingServer {
    addr: SocketAddr,
    auth: Arc<Mutex<Option<String>>>,
}

impl ListingServer {
    pub async fn start(listings: Vec<(String, Value)>) -> Self {
        let auth = Arc::new(Mutex::new(None));
        let state = ListingState {
            listings: Arc::new(listings.into_iter().collect()),
            auth: Arc::clone(&auth),
        };
        let app = Router::new()
            .route("/api/folder/list", get(list_folder))
            .route("/get", get(ip_echo))
            .with_state(state);
        Self {
            addr: spawn(app).await,
            auth,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn ip_url(&self) -> String {
        format!("http://{}/get", self.addr)
    }

    pub fn last_auth(&self) -> Option<String> {
        self.auth.lock().unwrap().clone()
    }
}

async fn list_folder(
    State(state): State<ListingState>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Json<Value> {
    *state.auth.lock().unwrap() = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    Json(
        state
            .listings
            .get(&query.id)
            .cloned()
            .unwrap_or_else(|| json!({"status": "error", "message": "folder not found"})),
    )
}

async fn ip_echo() -> Json<Value> {
    Json(json!({"origin": "203.0.113.7"}))
}

/// Builds a successful listing body; file links point at `file_base`.
pub fn listing_json_linked(
    id: &str,
    name: &str,
    entries: &[(&str, &str, &str, u64)],
    file_base: &str,
) -> Value {
    let content: Vec<Value> = entries
        .iter()
        .map(|(entry_id, kind, entry_name, size)| {
            if *kind == "folder" {
                json!({"id": entry_id, "type": "folder", "name": entry_name})
            } else {
                json!({
                    "id": entry_id,
                    "type": "file",
                    "name": entry_name,
                    "size": size,
                    "link": format!("{file_base}/files/{entry_name}"),
                    "created_at": 1_700_000_000
                })
            }
        })
        .collect();
    json!({"status": "success", "folder_id": id, "name": name, "content": content})
}

/// Builds a successful listing body with placeholder links.
pub fn listing_json(id: &str, name: &str, entries: &[(&str, &str, &str, u64)]) -> Value {
    listing_json_linked(id, name, entries, "http://127.0.0.1:9")
}
