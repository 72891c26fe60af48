// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! HTTP request builder and response surface over [`reqwest`].
//!
//! The builder accumulates state across `url`/`path`/`param`/… steps; a
//! `method` step invokes it. `copy`/`restore_from` exist for the
//! `retry until` loop, which must replay the exact same request.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::{config::Config, error::StepError, value::Value, xml};

/// One part of a multipart request.
#[derive(Clone, Debug, Default)]
pub struct MultiPart {
    /// Part name.
    pub name: String,

    /// Part content: string, bytes, or a structured value sent as JSON.
    pub value: Value,

    /// Optional file name.
    pub filename: Option<String>,

    /// Optional content type.
    pub content_type: Option<String>,

    /// Optional charset, folded into the content type.
    pub charset: Option<String>,

    /// Optional transfer encoding, sent as a part header.
    pub transfer_encoding: Option<String>,
}

/// Accumulating request state of one scenario.
#[derive(Clone, Debug, Default)]
pub struct HttpRequestBuilder {
    /// Base URL.
    pub url: Option<String>,

    /// Path segments appended to the base URL.
    pub paths: Vec<String>,

    /// Query parameters, repeats allowed.
    pub params: Vec<(String, String)>,

    /// Headers, repeats allowed.
    pub headers: Vec<(String, String)>,

    /// Cookies, sent via a `Cookie` header.
    pub cookies: Vec<(String, String)>,

    /// Form fields: a urlencoded body unless multiparts exist.
    pub form_fields: Vec<(String, String)>,

    /// Multipart parts.
    pub multiparts: Vec<MultiPart>,

    /// Explicit request body.
    pub body: Option<Value>,

    /// Pending `retry until` condition, consumed by the next invocation.
    pub retry_until: Option<String>,
}

/// The request a builder resolved to, kept for reporting.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// Uppercased method.
    pub method: String,

    /// Full URL including query string.
    pub url: String,

    /// Headers as sent.
    pub headers: Vec<(String, String)>,

    /// Body bytes, if any.
    pub body: Option<Vec<u8>>,
}

/// A received response.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,

    /// Headers in wire order.
    pub headers: Vec<(String, String)>,

    /// Raw body.
    pub body: Bytes,

    /// Round-trip time in milliseconds.
    pub response_time_ms: u64,

    /// Wall-clock start of the invocation, milliseconds since the epoch.
    pub start_time_ms: u64,

    /// The request that produced this response.
    pub request: Option<HttpRequest>,
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn wall_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl HttpRequestBuilder {
    /// Resets per-request state after an invocation. Only the base URL
    /// survives; headers come back through the configured-headers hook.
    pub fn reset_for_next(&mut self) {
        self.paths.clear();
        self.params.clear();
        self.headers.clear();
        self.cookies.clear();
        self.form_fields.clear();
        self.multiparts.clear();
        self.body = None;
        self.retry_until = None;
    }

    /// Snapshot for `retry until` replay.
    #[must_use]
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Restores a snapshot taken with [`Self::copy`].
    pub fn restore_from(&mut self, snapshot: Self) {
        *self = snapshot;
    }

    /// Joins the base URL and path segments.
    ///
    /// # Errors
    ///
    /// If no `url` was configured.
    pub fn build_url(&self) -> Result<String, StepError> {
        let base = self.url.clone().ok_or_else(|| {
            StepError::Parse("no url set before method invocation".into())
        })?;
        let mut out = base.trim_end_matches('/').to_owned();
        for segment in &self.paths {
            let s = segment.trim_matches('/');
            if !s.is_empty() {
                out.push('/');
                out.push_str(s);
            }
        }
        Ok(out)
    }

    /// Serializes the configured body, returning it with its implied
    /// content type.
    fn body_payload(&self) -> Option<(Vec<u8>, &'static str)> {
        let body = self.body.as_ref()?;
        Some(match body {
            Value::Map(_) | Value::List(_) => {
                (body.to_json_string().into_bytes(), "application/json")
            }
            Value::Xml(node) => {
                (node.serialize().into_bytes(), "application/xml")
            }
            Value::Bytes(b) => (b.clone(), "application/octet-stream"),
            other => {
                (other.display_string().into_bytes(), "text/plain")
            }
        })
    }

    /// Performs the HTTP call.
    ///
    /// # Errors
    ///
    /// [`StepError::Http`] on transport failure, [`StepError::Parse`] on an
    /// unbuildable request.
    pub async fn invoke(
        &self,
        client: &reqwest::Client,
        method: &str,
        config: &Config,
    ) -> Result<HttpResponse, StepError> {
        let method = reqwest::Method::from_bytes(
            method.trim().to_ascii_uppercase().as_bytes(),
        )
        .map_err(|_| StepError::Parse(format!("invalid http method: {method}")))?;
        let url = self.build_url()?;
        let parsed = url::Url::parse(&url)
            .map_err(|e| StepError::Parse(format!("invalid url {url}: {e}")))?;

        let mut req = client.request(method.clone(), parsed);
        if !self.params.is_empty() {
            req = req.query(&self.params);
        }

        let mut sent_headers: Vec<(String, String)> = self.headers.clone();
        if !self.cookies.is_empty() {
            let cookie = self
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            sent_headers.push(("Cookie".into(), cookie));
        }

        let mut body_bytes: Option<Vec<u8>> = None;
        if !self.multiparts.is_empty() {
            let mut form = reqwest::multipart::Form::new();
            for part in &self.multiparts {
                form = form.part(part.name.clone(), build_part(part)?);
            }
            for (k, v) in &self.form_fields {
                form = form.text(k.clone(), v.clone());
            }
            req = req.multipart(form);
        } else if !self.form_fields.is_empty() {
            let encoded = serde_urlencoded::to_string(&self.form_fields)
                .map_err(|e| StepError::Parse(e.to_string()))?;
            sent_headers.push((
                "Content-Type".into(),
                "application/x-www-form-urlencoded".into(),
            ));
            body_bytes = Some(encoded.into_bytes());
        } else if let Some((bytes, content_type)) = self.body_payload() {
            let has_content_type = sent_headers
                .iter()
                .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
            if !has_content_type {
                sent_headers.push(("Content-Type".into(), content_type.into()));
            }
            body_bytes = Some(bytes);
        }

        if let Some(timeout) = config.timeout() {
            req = req.timeout(timeout);
        }
        for (k, v) in &sent_headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(bytes) = &body_bytes {
            req = req.body(bytes.clone());
        }

        let start_wall = wall_now_ms();
        let started = Instant::now();
        let response = req
            .send()
            .await
            .map_err(|e| StepError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_owned(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| StepError::Http(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
            response_time_ms: started.elapsed().as_millis() as u64,
            start_time_ms: start_wall,
            request: Some(HttpRequest {
                method: method.as_str().to_owned(),
                url,
                headers: sent_headers,
                body: body_bytes,
            }),
        })
    }
}

fn build_part(part: &MultiPart) -> Result<reqwest::multipart::Part, StepError> {
    let mut out = match &part.value {
        Value::Bytes(b) => reqwest::multipart::Part::bytes(b.clone()),
        Value::Map(_) | Value::List(_) => {
            reqwest::multipart::Part::text(part.value.to_json_string())
        }
        other => reqwest::multipart::Part::text(other.display_string()),
    };
    if let Some(f) = &part.filename {
        out = out.file_name(f.clone());
    }
    let mime = match (&part.content_type, &part.charset) {
        (Some(ct), Some(cs)) => Some(format!("{ct}; charset={cs}")),
        (Some(ct), None) => Some(ct.clone()),
        (None, Some(cs)) => Some(format!("text/plain; charset={cs}")),
        (None, None) => None,
    };
    if let Some(m) = mime {
        out = out
            .mime_str(&m)
            .map_err(|e| StepError::Parse(e.to_string()))?;
    }
    Ok(out)
}

impl HttpResponse {
    /// First header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as lossy UTF-8.
    #[must_use]
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Response shape: `binary`, `json`, `xml` or `string`.
    #[must_use]
    pub fn response_type(&self) -> &'static str {
        let Ok(text) = std::str::from_utf8(&self.body) else {
            return "binary";
        };
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if Value::parse_json(trimmed).is_ok() {
                return "json";
            }
        } else if trimmed.starts_with('<') && xml::parse(trimmed).is_ok() {
            return "xml";
        }
        "string"
    }

    /// Body converted by its detected shape.
    #[must_use]
    pub fn body_converted(&self) -> Value {
        match self.response_type() {
            "json" => Value::parse_json(self.body_string().trim_start())
                .map_or(Value::String(self.body_string()), |v| v),
            "xml" => xml::parse(self.body_string().trim_start())
                .map_or(Value::String(self.body_string()), Value::Xml),
            "binary" => Value::Bytes(self.body.to_vec()),
            _ => Value::String(self.body_string()),
        }
    }

    /// Cookies from `Set-Cookie` headers, name → value.
    #[must_use]
    pub fn cookies(&self) -> crate::value::Map {
        let mut out = crate::value::Map::new();
        for (k, v) in &self.headers {
            if !k.eq_ignore_ascii_case("set-cookie") {
                continue;
            }
            if let Some(pair) = v.split(';').next() {
                if let Some((name, value)) = pair.split_once('=') {
                    out.insert(
                        name.trim().to_owned(),
                        Value::String(value.trim().to_owned()),
                    );
                }
            }
        }
        out
    }

    /// Response headers as a map of name → list of values.
    #[must_use]
    pub fn headers_value(&self) -> Value {
        let mut out = crate::value::Map::new();
        for (k, v) in &self.headers {
            match out.get_mut(k) {
                Some(Value::List(items)) => {
                    items.push(Value::String(v.clone()));
                }
                _ => {
                    out.insert(
                        k.clone(),
                        Value::List(vec![Value::String(v.clone())]),
                    );
                }
            }
        }
        Value::Map(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with_body(body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: vec![],
            body: Bytes::copy_from_slice(body.as_bytes()),
            response_time_ms: 0,
            start_time_ms: 0,
            request: None,
        }
    }

    #[test]
    fn url_joining_normalizes_slashes() {
        let mut b = HttpRequestBuilder::default();
        b.url = Some("http://host:8080/api/".into());
        b.paths = vec!["/cats/".into(), "42".into()];
        assert_eq!(b.build_url().unwrap(), "http://host:8080/api/cats/42");
    }

    #[test]
    fn response_type_detection() {
        assert_eq!(response_with_body(r#"{"a":1}"#).response_type(), "json");
        assert_eq!(response_with_body("<a/>").response_type(), "xml");
        assert_eq!(response_with_body("hello").response_type(), "string");
        let binary = HttpResponse {
            body: Bytes::from_static(&[0xff, 0xfe, 0x00]),
            ..response_with_body("")
        };
        assert_eq!(binary.response_type(), "binary");
    }

    #[test]
    fn cookies_parse_from_set_cookie() {
        let r = HttpResponse {
            headers: vec![
                ("Set-Cookie".into(), "sid=abc; Path=/".into()),
                ("set-cookie".into(), "theme=dark".into()),
            ],
            ..response_with_body("")
        };
        let cookies = r.cookies();
        assert_eq!(cookies.get("sid"), Some(&Value::String("abc".into())));
        assert_eq!(cookies.get("theme"), Some(&Value::String("dark".into())));
    }
}
