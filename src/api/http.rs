//! Minimal HTTP/1.1 wire handling: one request per connection.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};

pub(crate) const MAX_HEAD_BYTES: usize = 8192;
pub(crate) const MAX_JSON_BODY_BYTES: u64 = 64 * 1024;

#[derive(Debug)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    headers: HashMap<String, String>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn content_length(&self) -> Result<Option<u64>> {
        match self.header("content-length") {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| anyhow!("invalid content-length '{}'", raw)),
            None => Ok(None),
        }
    }

    /// Path segments after the leading slash, percent-decoded.
    pub fn segments(&self) -> Vec<String> {
        self.path
            .trim_start_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .map(percent_decode)
            .collect()
    }
}

/// Reads the request head. Returns the request and any body bytes that
/// arrived in the same reads.
pub(crate) fn read_head(stream: &mut dyn Read) -> Result<(HttpRequest, Vec<u8>)> {
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let head_end = loop {
        if let Some(pos) = find_head_end(&data) {
            break pos;
        }
        if data.len() > MAX_HEAD_BYTES {
            return Err(anyhow!("request head too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request head"));
        }
        data.extend_from_slice(&buf[..n]);
    };
    let leftover = data.split_off(head_end + 4);
    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok((
        HttpRequest {
            method: method.to_ascii_uppercase(),
            path,
            headers,
        },
        leftover,
    ))
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Reads a whole body of at most `limit` bytes.
pub(crate) fn read_small_body(body: &mut dyn Read, limit: u64) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    body.take(limit + 1).read_to_end(&mut out)?;
    if out.len() as u64 > limit {
        return Err(anyhow!("request body exceeds {} bytes", limit));
    }
    Ok(out)
}

fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub(crate) struct Response {
    pub status: u16,
    content_type: &'static str,
    body: Vec<u8>,
    attachment: Option<String>,
}

impl Response {
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
                attachment: None,
            },
            Err(err) => Self::error(500, &format!("response encoding failed: {}", err)),
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        let body = serde_json::json!({ "success": false, "error": message });
        Self {
            status,
            content_type: "application/json",
            body: body.to_string().into_bytes(),
            attachment: None,
        }
    }

    pub fn csv(body: String, filename: String) -> Self {
        Self {
            status: 200,
            content_type: "text/csv; charset=utf-8",
            body: body.into_bytes(),
            attachment: Some(filename),
        }
    }
}

pub(crate) fn write_response(stream: &mut dyn Write, response: &Response) -> Result<()> {
    let status_line = match response.status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        413 => "HTTP/1.1 413 Payload Too Large",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let mut header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n",
        status_line = status_line,
        content_type = response.content_type,
        len = response.body.len()
    );
    if let Some(filename) = &response.attachment {
        header.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{}\"\r\n",
            filename
        ));
    }
    header.push_str("\r\n");
    stream.write_all(header.as_bytes())?;
    stream.write_all(&response.body)?;
    stream.flush()?;
    Ok(())
}
