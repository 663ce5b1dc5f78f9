use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tungstenite::Message;

type Responder = dyn Fn(&str) -> Vec<String> + Send + Sync;

/// In-process WebSocket server standing in for a TV. Records every text frame
/// it receives with its arrival time and answers through a responder closure.
pub struct MockSocketServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    messages: Arc<Mutex<Vec<(Instant, String)>>>,
    accept_loop: JoinHandle<()>,
}

impl MockSocketServer {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        Self::start_with_greeting(None, responder).await
    }

    /// Like `start`, but every new connection first receives `greeting`
    pub async fn start_with_greeting<F>(greeting: Option<String>, responder: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let messages = Arc::new(Mutex::new(Vec::new()));
        let responder: Arc<Responder> = Arc::new(responder);

        let accept_connections = connections.clone();
        let accept_messages = messages.clone();
        let accept_loop = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                accept_connections.fetch_add(1, Ordering::SeqCst);

                let messages = accept_messages.clone();
                let responder = responder.clone();
                let greeting = greeting.clone();
                tokio::spawn(async move {
                    let (mut sink, mut source) = ws.split();
                    if let Some(greeting) = greeting {
                        let _ = sink.send(Message::Text(greeting)).await;
                    }
                    while let Some(Ok(frame)) = source.next().await {
                        let Message::Text(text) = frame else {
                            continue;
                        };
                        messages.lock().unwrap().push((Instant::now(), text.clone()));
                        for reply in responder(&text) {
                            if sink.send(Message::Text(reply)).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            connections,
            messages,
            accept_loop,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn timed_messages(&self) -> Vec<(Instant, String)> {
        self.messages.lock().unwrap().clone()
    }

    /// Wait until at least `count` frames arrived; false on timeout
    pub async fn wait_for_messages(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.messages.lock().unwrap().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.messages.lock().unwrap().len() >= count
    }
}

impl Drop for MockSocketServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

/// Split a mockito server address into host and port
pub fn host_port(server: &mockito::Server) -> (String, u16) {
    let host_with_port = server.host_with_port();
    let (host, port) = host_with_port
        .rsplit_once(':')
        .expect("mockito address has a port");
    (host.to_string(), port.parse().expect("numeric port"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_socket_server_records_and_replies() {
        let server = MockSocketServer::start_with_greeting(Some("hi".to_string()), |text| {
            vec![text.to_uppercase()]
        })
        .await;

        let (mut ws, _) = tokio_tungstenite::connect_async(server.url("/")).await.unwrap();
        let greeting = ws.next().await.unwrap().unwrap();
        assert_eq!(greeting, Message::Text("hi".to_string()));

        ws.send(Message::Text("ping".to_string())).await.unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        assert_eq!(reply, Message::Text("PING".to_string()));

        assert!(server.wait_for_messages(1, Duration::from_secs(1)).await);
        assert_eq!(server.messages(), ["ping"]);
        assert_eq!(server.connection_count(), 1);
    }
}
