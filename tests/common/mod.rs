#![allow(dead_code)]

//! Minimal HTTP/1.1 server standing in for the Cloud Storage JSON API.
//! Every connection serves one request and is closed.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub type Handler = Arc<dyn Fn(&str) -> (u16, Vec<u8>) + Send + Sync>;

pub struct FakeGcs {
    pub addr: SocketAddr,
    /// Raw requests (request line, headers and body), in arrival order.
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl FakeGcs {
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Request targets (path and query) seen so far.
    pub fn targets(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|head| head.lines().next())
            .filter_map(|line| line.split_whitespace().nth(1))
            .map(str::to_string)
            .collect()
    }

    pub fn media_downloads(&self) -> Vec<String> {
        self.targets()
            .into_iter()
            .filter(|t| t.contains("alt=media"))
            .collect()
    }
}

/// Start a server answering every request with `handler(target)`.
pub async fn start<F>(handler: F) -> FakeGcs
where
    F: Fn(&str) -> (u16, Vec<u8>) + Send + Sync + 'static,
{
    let handler: Handler = Arc::new(handler);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));

    let seen = requests.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let handler = handler.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                let head_end = loop {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let body_len = content_length(&buf[..head_end]);
                while buf.len() < head_end + body_len {
                    let n = socket.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                let head = String::from_utf8_lossy(&buf).to_string();
                let target = head
                    .lines()
                    .next()
                    .and_then(|line| line.split_whitespace().nth(1))
                    .unwrap_or("")
                    .to_string();
                seen.lock().unwrap().push(head);

                let (status, body) = handler(&target);
                let reason = if status < 400 { "OK" } else { "Error" };
                let response_head = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(response_head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    FakeGcs { addr, requests }
}

fn content_length(head: &[u8]) -> usize {
    String::from_utf8_lossy(head)
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// RSA key of a throwaway service account.
pub const SERVICE_ACCOUNT_KEY: &str = include_str!("../fixtures/service_account.pem");

/// Listing response body for `(name, updated)` pairs.
pub fn listing(items: &[(&str, &str)], next_page_token: Option<&str>) -> Vec<u8> {
    let items: Vec<_> = items
        .iter()
        .map(|(name, updated)| {
            serde_json::json!({"kind": "storage#object", "name": name, "updated": updated, "size": "3"})
        })
        .collect();
    let mut body = serde_json::json!({"kind": "storage#objects", "items": items});
    if let Some(token) = next_page_token {
        body["nextPageToken"] = serde_json::Value::String(token.to_string());
    }
    serde_json::to_vec(&body).unwrap()
}
