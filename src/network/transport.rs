//! Network primitives shared by every brand adapter: a timeout-bounded HTTP
//! helper that never errors, and a persistent WebSocket link that feeds
//! inbound frames to a handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use crate::error::{ControlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

/// Outcome of one HTTP exchange. `ok` is false on transport errors, timeouts
/// and non-2xx statuses; `status` is set whenever the device answered at all.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub ok: bool,
    pub status: Option<u16>,
    pub body: Option<String>,
}

impl HttpResponse {
    /// The device produced some HTTP response, regardless of status
    pub fn responded(&self) -> bool {
        self.status.is_some()
    }

    /// Map the outcome onto the error taxonomy: no answer is unreachable,
    /// a non-2xx answer is a rejection
    pub fn check(&self, what: &str) -> Result<()> {
        match (self.ok, self.status) {
            (true, _) => Ok(()),
            (false, Some(status)) => Err(ControlError::Rejected(format!(
                "{} returned status {}",
                what, status
            ))),
            (false, None) => Err(ControlError::Unreachable(what.to_string())),
        }
    }

    pub fn json(&self) -> Option<Value> {
        self.body
            .as_deref()
            .and_then(|body| serde_json::from_str(body).ok())
    }
}

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn url(host: &str, port: u16, path: &str) -> String {
        if path.starts_with('/') {
            format!("http://{}:{}{}", host, port, path)
        } else {
            format!("http://{}:{}/{}", host, port, path)
        }
    }

    pub async fn request_text(
        &self,
        host: &str,
        port: u16,
        method: Method,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> HttpResponse {
        let url = Self::url(host, port, path);

        let mut request = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
        };
        if let Some(body) = body {
            request = request.json(body);
        } else if method != Method::Get {
            request = request.header(reqwest::header::CONTENT_LENGTH, "0");
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await.ok();
            Ok::<_, reqwest::Error>((status, text))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok((status, text))) => {
                trace!(%url, status = status.as_u16(), "http exchange");
                HttpResponse {
                    ok: status.is_success(),
                    status: Some(status.as_u16()),
                    body: text,
                }
            }
            Ok(Err(e)) => {
                debug!(%url, error = %e, "http request failed");
                HttpResponse::default()
            }
            Err(_) => {
                debug!(%url, "http request timed out");
                HttpResponse::default()
            }
        }
    }

    pub async fn get(&self, host: &str, port: u16, path: &str, timeout: Duration) -> HttpResponse {
        self.request_text(host, port, Method::Get, path, None, timeout)
            .await
    }

    pub async fn post(
        &self,
        host: &str,
        port: u16,
        path: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> HttpResponse {
        self.request_text(host, port, Method::Post, path, body, timeout)
            .await
    }
}

/// Receives inbound frames of a `SocketLink`. Called from the reader task.
pub trait SocketHandler: Send + Sync + 'static {
    fn on_message(&self, text: &str);

    fn on_close(&self) {}
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// A live WebSocket connection to one device
pub struct SocketLink {
    url: String,
    sink: Mutex<WsSink>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl SocketLink {
    pub async fn open(url: &str, timeout: Duration, handler: Arc<dyn SocketHandler>) -> Result<Self> {
        let (stream, _response) = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| ControlError::Timeout(url.to_string()))?
            .map_err(|e| ControlError::Unreachable(format!("{}: {}", url, e)))?;

        let (sink, mut source) = stream.split();
        let alive = Arc::new(AtomicBool::new(true));

        let reader_alive = alive.clone();
        let reader_url = url.to_string();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => handler.on_message(&text),
                    Ok(Message::Binary(bytes)) => {
                        if let Ok(text) = std::str::from_utf8(&bytes) {
                            handler.on_message(text);
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(url = %reader_url, error = %e, "socket read failed");
                        break;
                    }
                }
            }
            reader_alive.store(false, Ordering::SeqCst);
            handler.on_close();
            debug!(url = %reader_url, "socket closed");
        });

        debug!(%url, "socket opened");
        Ok(Self {
            url: url.to_string(),
            sink: Mutex::new(sink),
            alive,
            reader,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub async fn send_text(&self, text: String) -> Result<()> {
        if !self.is_alive() {
            return Err(ControlError::SessionLost(self.url.clone()));
        }
        trace!(url = %self.url, %text, "socket send");
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text)).await.map_err(|e| {
            self.alive.store(false, Ordering::SeqCst);
            ControlError::SessionLost(format!("{}: {}", self.url, e))
        })
    }

    pub async fn send_json(&self, value: &Value) -> Result<()> {
        self.send_text(value.to_string()).await
    }

    pub async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
        self.reader.abort();
    }
}

impl Drop for SocketLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
