//! HTTP file-transfer handler
// (c) 2026 Dolt Authors
//!
//! Request URLs have the form `/<dbPath>/<filename>`. GET streams a table
//! file back (honoring single byte-range requests — the client fetches
//! subranges of large files); POST/PUT accepts an upload whose integrity
//! metadata arrives as query parameters, validated up front. Errors at this
//! layer are HTTP status codes with a textual body, never RPC errors.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures_util::StreamExt as _;
use hyper::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HeaderValue, RANGE};
use hyper::service::service_fn;
use hyper::{Body, Method, Request, Response, StatusCode};
use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, trace};

use crate::mux::MuxStream;
use crate::store::TransferStore;

/// Serves one HTTP/1.1 exchange on an accepted substream.
pub(crate) async fn serve_http(stream: MuxStream, handler: FileHandler) -> Result<()> {
    let service = service_fn(move |request| {
        let handler = handler.clone();
        async move { Ok::<_, Infallible>(handler.handle(request).await) }
    });
    hyper::server::conn::Http::new()
        .http1_only(true)
        .http1_keep_alive(false)
        .serve_connection(stream, service)
        .await
        .map_err(Into::into)
}

/// Routes file-transfer requests to the chunk store.
#[derive(Clone)]
pub(crate) struct FileHandler {
    store: Arc<dyn TransferStore>,
}

impl FileHandler {
    pub(crate) fn new(store: Arc<dyn TransferStore>) -> Self {
        Self { store }
    }

    pub(crate) async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let method = request.method().clone();
        if method == Method::GET {
            self.handle_get(request).await
        } else if method == Method::POST || method == Method::PUT {
            self.handle_upload(request).await
        } else {
            text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
        }
    }

    async fn handle_get(&self, request: Request<Body>) -> Response<Body> {
        let Some(filename) = last_path_segment(request.uri().path()) else {
            return text_response(StatusCode::NOT_FOUND, "Not Found");
        };
        let (mut reader, size) = match self.store.open_table_file(&filename).await {
            Ok(opened) => opened,
            Err(error) => {
                trace!("GET {filename}: {error:#}");
                return text_response(StatusCode::NOT_FOUND, "Not Found");
            }
        };

        let range_header = request
            .headers()
            .get(RANGE)
            .and_then(|value| value.to_str().ok());
        let Some(range_header) = range_header else {
            // Full-file response.
            let mut response = Response::new(Body::wrap_stream(ReaderStream::new(reader)));
            set_header(
                &mut response,
                CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            set_header_value(&mut response, CONTENT_LENGTH, &size.to_string());
            return response;
        };

        let Some((start, end)) = parse_range(range_header, size) else {
            let mut response =
                text_response(StatusCode::RANGE_NOT_SATISFIABLE, "Range Not Satisfiable");
            set_header_value(&mut response, CONTENT_RANGE, &format!("bytes */{size}"));
            return response;
        };
        if let Err(error) = reader.seek(std::io::SeekFrom::Start(start)).await {
            debug!("GET {filename}: seek to {start}: {error}");
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
        }
        let length = end - start + 1;
        let mut response = Response::new(Body::wrap_stream(ReaderStream::new(reader.take(length))));
        *response.status_mut() = StatusCode::PARTIAL_CONTENT;
        set_header(
            &mut response,
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        set_header_value(&mut response, CONTENT_LENGTH, &length.to_string());
        set_header_value(&mut response, CONTENT_RANGE, &format!("bytes {start}-{end}/{size}"));
        response
    }

    async fn handle_upload(&self, request: Request<Body>) -> Response<Body> {
        // An upload path must carry at least one '/' separating the
        // repository path from the filename.
        let path = request.uri().path().trim_start_matches('/');
        let Some((_db_path, filename)) = path.rsplit_once('/') else {
            return text_response(StatusCode::BAD_REQUEST, "Bad Request");
        };
        let filename = filename.to_string();

        let query: Vec<(String, String)> = request
            .uri()
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();
        let param = |name: &str| {
            query
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };

        let Some(num_chunks) = param("num_chunks") else {
            return text_response(StatusCode::BAD_REQUEST, "Bad Request: num_chunks required");
        };
        let Ok(num_chunks) = num_chunks.parse::<u32>() else {
            return text_response(StatusCode::BAD_REQUEST, "Bad Request: invalid num_chunks");
        };

        let Some(content_length) = param("content_length") else {
            return text_response(
                StatusCode::BAD_REQUEST,
                "Bad Request: content_length required",
            );
        };
        let Ok(content_length) = content_length.parse::<u64>() else {
            return text_response(StatusCode::BAD_REQUEST, "Bad Request: invalid content_length");
        };

        let Some(content_hash) = param("content_hash") else {
            return text_response(
                StatusCode::BAD_REQUEST,
                "Bad Request: content_hash required",
            );
        };
        let Ok(content_hash) = URL_SAFE_NO_PAD.decode(content_hash) else {
            return text_response(StatusCode::BAD_REQUEST, "Bad Request: invalid content_hash");
        };

        let split_offset = match param("split_offset") {
            None => 0,
            Some(raw) => match raw.parse::<u64>() {
                Ok(value) => value,
                Err(_) => {
                    return text_response(
                        StatusCode::BAD_REQUEST,
                        "Bad Request: invalid split_offset",
                    );
                }
            },
        };

        let body = request.into_body();
        let mut reader = StreamReader::new(body.map(|chunk| chunk.map_err(std::io::Error::other)));
        match self
            .store
            .write_table_file(
                &filename,
                num_chunks,
                &content_hash,
                split_offset,
                content_length,
                &mut reader,
            )
            .await
        {
            Ok(()) => Response::new(Body::empty()),
            Err(error) => {
                debug!("failed to write table file {filename}: {error:#}");
                text_response(StatusCode::INTERNAL_SERVER_ERROR, &format!("{error:#}"))
            }
        }
    }
}

fn last_path_segment(path: &str) -> Option<String> {
    let trimmed = path.trim_start_matches('/');
    let segment = trimmed.rsplit('/').next().unwrap_or(trimmed);
    (!segment.is_empty()).then(|| segment.to_string())
}

/// Single-range parser for `bytes=a-b`, `bytes=a-` and `bytes=-n` forms.
/// Returns the inclusive (start, end) pair, or None if the header is
/// malformed or unsatisfiable for a file of `size` bytes.
fn parse_range(header: &str, size: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    if spec.contains(',') {
        // Multi-range requests are not used by the transport.
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    match (start.is_empty(), end.is_empty()) {
        // bytes=-n : the final n bytes
        (true, false) => {
            let n: u64 = end.parse().ok()?;
            if n == 0 || size == 0 {
                return None;
            }
            Some((size.saturating_sub(n), size - 1))
        }
        // bytes=a- : from a to the end
        (false, true) => {
            let start: u64 = start.parse().ok()?;
            (start < size).then(|| (start, size - 1))
        }
        // bytes=a-b
        (false, false) => {
            let start: u64 = start.parse().ok()?;
            let end: u64 = end.parse().ok()?;
            (start <= end && start < size).then(|| (start, end.min(size - 1)))
        }
        (true, true) => None,
    }
}

fn text_response(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(format!("{message}\n")));
    *response.status_mut() = status;
    set_header(
        &mut response,
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn set_header(response: &mut Response<Body>, name: hyper::header::HeaderName, value: HeaderValue) {
    let _ = response.headers_mut().insert(name, value);
}

fn set_header_value(response: &mut Response<Body>, name: hyper::header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        let _ = response.headers_mut().insert(name, value);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::{FileHandler, parse_range};
    use crate::store::{FsStore, TransferStore as _};
    use hyper::{Body, Request, StatusCode};
    use md5::{Digest as _, Md5};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::sync::Arc;

    async fn fixture_with(contents: &[u8]) -> (tempfile::TempDir, FileHandler) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::init(dir.path()).await.unwrap();
        store
            .write_table_file(
                "table1",
                1,
                &Md5::digest(contents).to_vec(),
                0,
                contents.len() as u64,
                &mut Cursor::new(contents.to_vec()),
            )
            .await
            .unwrap();
        store
            .add_table_files(&[crate::protocol::service::TableFileId {
                file_id: "table1".into(),
                num_chunks: 1,
            }])
            .await
            .unwrap();
        (dir, FileHandler::new(Arc::new(store)))
    }

    async fn body_bytes(response: hyper::Response<Body>) -> Vec<u8> {
        hyper::body::to_bytes(response.into_body()).await.unwrap().to_vec()
    }

    fn get(uri: &str, range: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(range) = range {
            builder = builder.header("Range", range);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: &[u8]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::from(body.to_vec()))
            .unwrap()
    }

    #[tokio::test]
    async fn get_whole_file() {
        let (_dir, handler) = fixture_with(b"0123456789").await;
        let response = handler.handle(get("/srv/repo/table1", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/octet-stream"
        );
        assert_eq!(body_bytes(response).await, b"0123456789");
    }

    #[tokio::test]
    async fn get_range_forms() {
        let (_dir, handler) = fixture_with(b"0123456789").await;

        let response = handler
            .handle(get("/srv/repo/table1", Some("bytes=2-5")))
            .await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get("Content-Range").unwrap(),
            "bytes 2-5/10"
        );
        assert_eq!(body_bytes(response).await, b"2345");

        let response = handler
            .handle(get("/srv/repo/table1", Some("bytes=7-")))
            .await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(body_bytes(response).await, b"789");

        let response = handler
            .handle(get("/srv/repo/table1", Some("bytes=-3")))
            .await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(body_bytes(response).await, b"789");
    }

    #[tokio::test]
    async fn get_bad_ranges() {
        let (_dir, handler) = fixture_with(b"0123456789").await;
        for bad in ["bytes=10-", "bytes=5-2", "bytes=-0", "bytes=", "potatoes=1-2"] {
            let response = handler.handle(get("/srv/repo/table1", Some(bad))).await;
            assert_eq!(
                response.status(),
                StatusCode::RANGE_NOT_SATISFIABLE,
                "range header {bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn get_missing_file_is_404() {
        let (_dir, handler) = fixture_with(b"x").await;
        let response = handler.handle(get("/srv/repo/nope", None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_validates_parameters() {
        let (_dir, handler) = fixture_with(b"x").await;
        let cases = [
            ("/srv/repo/f2", "Bad Request: num_chunks required"),
            ("/srv/repo/f2?num_chunks=zap", "Bad Request: invalid num_chunks"),
            ("/srv/repo/f2?num_chunks=1", "Bad Request: content_length required"),
            (
                "/srv/repo/f2?num_chunks=1&content_length=-4",
                "Bad Request: invalid content_length",
            ),
            (
                "/srv/repo/f2?num_chunks=1&content_length=4",
                "Bad Request: content_hash required",
            ),
            (
                "/srv/repo/f2?num_chunks=1&content_length=4&content_hash=@@@@",
                "Bad Request: invalid content_hash",
            ),
            (
                "/srv/repo/f2?num_chunks=1&content_length=4&content_hash=aaaa&split_offset=x",
                "Bad Request: invalid split_offset",
            ),
        ];
        for (uri, expected) in cases {
            let response = handler.handle(post(uri, b"data")).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            let body = body_bytes(response).await;
            assert_eq!(String::from_utf8_lossy(&body).trim(), expected, "{uri}");
        }
    }

    #[tokio::test]
    async fn upload_happy_path() {
        use base64::Engine as _;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let (_dir, handler) = fixture_with(b"x").await;
        let content = b"fresh table file";
        let hash = URL_SAFE_NO_PAD.encode(Md5::digest(content));
        let uri = format!(
            "/srv/repo/f2?num_chunks=3&content_length={}&content_hash={hash}",
            content.len()
        );
        let response = handler.handle(post(&uri, content)).await;
        assert_eq!(response.status(), StatusCode::OK);

        // And the bytes landed.
        let response = handler.handle(get("/srv/repo/f2", None)).await;
        assert_eq!(body_bytes(response).await, content);
    }

    #[tokio::test]
    async fn upload_backend_failure_is_500_with_cause() {
        use base64::Engine as _;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let (dir, handler) = fixture_with(b"x").await;
        std::fs::write(dir.path().join(".dolt").join("manifest.lock"), b"").unwrap();

        let content = b"data";
        let hash = URL_SAFE_NO_PAD.encode(Md5::digest(content));
        let uri = format!(
            "/srv/repo/f3?num_chunks=1&content_length=4&content_hash={hash}"
        );
        let response = handler.handle(post(&uri, content)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_bytes(response).await;
        assert!(
            String::from_utf8_lossy(&body).contains("database is read only"),
            "{body:?}"
        );
    }

    #[tokio::test]
    async fn upload_without_separator_is_400() {
        let (_dir, handler) = fixture_with(b"x").await;
        let response = handler.handle(post("/lonely", b"")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn other_methods_are_405() {
        let (_dir, handler) = fixture_with(b"x").await;
        let request = Request::builder()
            .method("DELETE")
            .uri("/srv/repo/table1")
            .body(Body::empty())
            .unwrap();
        let response = handler.handle(request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn range_parser_edge_cases() {
        assert_eq!(parse_range("bytes=0-0", 10), Some((0, 0)));
        assert_eq!(parse_range("bytes=0-99", 10), Some((0, 9)));
        assert_eq!(parse_range("bytes=-99", 10), Some((0, 9)));
        assert_eq!(parse_range("bytes=0-", 0), None);
        assert_eq!(parse_range("bytes=1-2,4-5", 10), None);
        assert_eq!(parse_range("bytes=a-b", 10), None);
    }
}
