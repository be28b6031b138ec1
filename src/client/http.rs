//! HTTP round-tripper over mux substreams
// (c) 2026 Dolt Authors
//!
//! Table-file URLs handed out by the RPC service name the virtual host
//! [`TRANSFER_HOST`]; requests against them must travel through the
//! multiplexed session, not the network. Each request gets a fresh
//! substream: scheme byte, HTTP/1.1 handshake, one exchange. The substream
//! closes when the response (body included) has been consumed.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use hyper::header::{HOST, RANGE};
use hyper::{Body, Method, Request, Response};
use tokio::io::AsyncWriteExt as _;
use tracing::trace;
use url::Url;

use crate::mux::MuxSession;
use crate::protocol::{StreamScheme, TRANSFER_HOST};

/// Sends HTTP requests over the session's substreams. Cheap to clone.
#[derive(Clone)]
pub struct MuxHttpTransport {
    session: Arc<MuxSession>,
}

impl MuxHttpTransport {
    #[must_use]
    pub fn new(session: Arc<MuxSession>) -> Self {
        Self { session }
    }

    /// GET `url`, optionally restricted to `length` bytes from `offset`.
    pub async fn get(&self, url: &str, range: Option<(u64, u64)>) -> Result<Response<Body>> {
        let target = origin_form(url)?;
        let mut builder = Request::builder()
            .method(Method::GET)
            .uri(target.as_str())
            .header(HOST, TRANSFER_HOST);
        if let Some((offset, length)) = range {
            anyhow::ensure!(length > 0, "empty byte range for {url}");
            builder = builder.header(RANGE, format!("bytes={}-{}", offset, offset + length - 1));
        }
        let request = builder.body(Body::empty())?;
        self.round_trip(request).await
    }

    /// POST `content` to `url` (the query string carries the upload
    /// parameters the server sealed into it).
    pub async fn post(&self, url: &str, content: Vec<u8>) -> Result<Response<Body>> {
        let target = origin_form(url)?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(target.as_str())
            .header(HOST, TRANSFER_HOST)
            .body(Body::from(content))?;
        self.round_trip(request).await
    }

    /// One request on one fresh substream.
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>> {
        let mut stream = self
            .session
            .open_stream()
            .await
            .context("opening http substream")?;
        stream.write_u8(StreamScheme::Http as u8).await?;

        let (mut sender, connection) = hyper::client::conn::Builder::new()
            .handshake(stream)
            .await
            .context("http handshake over substream")?;
        // The connection future owns the substream; it resolves (dropping
        // and thereby closing the stream) once the exchange is over.
        drop(tokio::spawn(async move {
            if let Err(error) = connection.await {
                trace!("http substream ended: {error}");
            }
        }));

        sender
            .send_request(request)
            .await
            .context("http request over substream")
    }
}

/// Validates the virtual host and reduces the URL to its origin form.
fn origin_form(url: &str) -> Result<String> {
    let parsed = Url::parse(url).with_context(|| format!("invalid transfer url {url}"))?;
    anyhow::ensure!(
        parsed.host_str() == Some(TRANSFER_HOST),
        "refusing {url}: not hosted at {TRANSFER_HOST}"
    );
    let mut target = parsed.path().to_string();
    if let Some(query) = parsed.query() {
        target.push('?');
        target.push_str(query);
    }
    Ok(target)
}
