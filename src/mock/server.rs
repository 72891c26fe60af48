// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! HTTP front-end of the mock router, over [`axum`].

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{FromRequest as _, Multipart, Request, State},
    response::Response,
};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tracing::{info, warn};

use super::{MockHandler, MockRequest, MockResponse};
use crate::{
    error::{Error, Result},
    value::{Map, Value},
};

/// Inbound bodies larger than this are rejected at the front door.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// A running mock server.
pub struct MockServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Binds `127.0.0.1:port` (0 for ephemeral) and starts serving.
    ///
    /// # Errors
    ///
    /// If the port cannot be bound.
    pub async fn start(handler: MockHandler, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(Error::Io)?;
        let addr = listener.local_addr().map_err(Error::Io)?;

        let app = Router::new()
            .fallback(route)
            .with_state(Arc::new(handler));
        let (shutdown, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(
                async move {
                    drop(rx.await);
                },
            );
            if let Err(e) = serve.await {
                warn!("mock server stopped with error: {e}");
            }
        });
        info!("mock server listening on {addr}");
        Ok(Self { addr, shutdown: Some(shutdown), task })
    }

    /// Bound address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL of the server.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Shuts the server down and waits for the accept loop to end.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            drop(tx.send(()));
        }
        drop((&mut self.task).await);
    }
}

async fn route(
    State(handler): State<Arc<MockHandler>>,
    request: Request,
) -> Response {
    let mock_request = match decode(request).await {
        Ok(r) => r,
        Err(message) => {
            return encode(MockResponse::json_error(400, &message));
        }
    };
    encode(handler.handle(mock_request).await)
}

/// Decodes an axum request: query and form parameters, multipart parts,
/// raw body.
async fn decode(request: Request) -> std::result::Result<MockRequest, String> {
    let (parts, body) = request.into_parts();
    let method = parts.method.as_str().to_owned();
    let path = parts.uri.path().to_owned();
    let path_raw = parts
        .uri
        .path_and_query()
        .map_or_else(|| path.clone(), |pq| pq.as_str().to_owned());
    let host = parts
        .headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let url_base = format!("http://{host}");

    let headers: Vec<(String, String)> = parts
        .headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_owned(),
                String::from_utf8_lossy(v.as_bytes()).into_owned(),
            )
        })
        .collect();
    let content_type = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.clone())
        .unwrap_or_default();

    let mut params: Vec<(String, Vec<String>)> = Vec::new();
    let mut push_param = |k: String, v: String| {
        if let Some((_, values)) =
            params.iter_mut().find(|(name, _)| *name == k)
        {
            values.push(v);
        } else {
            params.push((k, vec![v]));
        }
    };
    if let Some(query) = parts.uri.query() {
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_str(query).unwrap_or_default();
        for (k, v) in pairs {
            push_param(k, v);
        }
    }

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| format!("unreadable body: {e}"))?;

    if content_type.contains("application/x-www-form-urlencoded") {
        let text = String::from_utf8_lossy(&bytes);
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_str(&text).unwrap_or_default();
        for (k, v) in pairs {
            push_param(k, v);
        }
    }

    let mut mock_parts = Map::new();
    if content_type.contains("multipart/form-data") {
        let rebuilt =
            Request::from_parts(parts, Body::from(bytes.clone()));
        let mut multipart = Multipart::from_request(rebuilt, &())
            .await
            .map_err(|e| format!("bad multipart body: {e}"))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| format!("bad multipart field: {e}"))?
        {
            let name = field.name().unwrap_or_default().to_owned();
            let mut entry = Map::new();
            if let Some(f) = field.file_name() {
                entry.insert(
                    "filename".into(),
                    Value::String(f.to_owned()),
                );
            }
            if let Some(ct) = field.content_type() {
                entry.insert(
                    "contentType".into(),
                    Value::String(ct.to_owned()),
                );
            }
            let data = field
                .bytes()
                .await
                .map_err(|e| format!("bad multipart field: {e}"))?;
            let value = std::str::from_utf8(&data).map_or_else(
                |_| Value::Bytes(data.to_vec()),
                |s| Value::String(s.to_owned()),
            );
            entry.insert("value".into(), value);
            mock_parts.insert(name, Value::Map(entry));
        }
    }

    Ok(MockRequest {
        method,
        path,
        path_raw,
        url_base,
        headers,
        params,
        parts: mock_parts,
        body: bytes,
    })
}

fn encode(response: MockResponse) -> Response {
    let mut builder = Response::builder().status(response.status);
    for (k, v) in &response.headers {
        builder = builder.header(k.as_str(), v.as_str());
    }
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
