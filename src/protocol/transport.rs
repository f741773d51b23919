//! Bidirectional links to the remote model
//!
//! A [`Transport`] opens [`TransportLink`]s: a bounded outbound sender plus
//! an inbound receiver. Dropping the link closes the connection.

use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::SessionError;

/// One message on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// An open connection
///
/// `outbound` is bounded; callers that must not block use `try_send`.
/// `inbound` yields `None` once the remote side has gone away.
pub struct TransportLink {
    pub outbound: mpsc::Sender<WireFrame>,
    pub inbound: mpsc::Receiver<WireFrame>,
    on_close: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl TransportLink {
    pub fn new(outbound: mpsc::Sender<WireFrame>, inbound: mpsc::Receiver<WireFrame>) -> Self {
        Self {
            outbound,
            inbound,
            on_close: None,
        }
    }

    /// Run `f` when the link is dropped
    pub fn on_close(mut self, f: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        if let Some(f) = self.on_close.take() {
            f();
        }
    }
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self) -> Result<TransportLink, SessionError>;

    /// Transport name for logging
    fn name(&self) -> &str;
}

/// WebSocket transport (TLS via rustls)
pub struct WebSocketTransport {
    url: String,
    api_key: Option<String>,
    queue_depth: usize,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, api_key: Option<String>, queue_depth: usize) -> Self {
        Self {
            url: url.into(),
            api_key,
            queue_depth: queue_depth.max(1),
        }
    }

    fn connect_url(&self) -> String {
        match &self.api_key {
            Some(key) if !key.is_empty() => {
                let separator = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}key={}", self.url, separator, key)
            }
            _ => self.url.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self) -> Result<TransportLink, SessionError> {
        info!("Connecting to {}", self.url);

        let (ws, _response) = connect_async(self.connect_url())
            .await
            .map_err(|e| SessionError::TransportUnavailable(e.to_string()))?;

        info!("WebSocket connected: {}", self.url);

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<WireFrame>(self.queue_depth);
        let (in_tx, in_rx) = mpsc::channel::<WireFrame>(256);

        // Writer: ends with a close frame once every sender is gone
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let message = match frame {
                    WireFrame::Text(text) => Message::Text(text),
                    WireFrame::Binary(bytes) => Message::Binary(bytes),
                };
                if let Err(e) = sink.send(message).await {
                    warn!("WebSocket send failed: {}", e);
                    return;
                }
            }
            let _ = tokio::time::timeout(Duration::from_secs(2), sink.close()).await;
            debug!("WebSocket writer finished");
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let frame = match message {
                    Ok(Message::Text(text)) => WireFrame::Text(text),
                    Ok(Message::Binary(bytes)) => WireFrame::Binary(bytes),
                    Ok(Message::Close(frame)) => {
                        info!("WebSocket closed by remote: {:?}", frame);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("WebSocket receive failed: {}", e);
                        break;
                    }
                };
                if in_tx.send(frame).await.is_err() {
                    break;
                }
            }
        });

        Ok(TransportLink::new(out_tx, in_rx).on_close(move || reader.abort()))
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

/// Server side of a [`ChannelTransport`] link
pub struct RemoteEnd {
    /// Frames the client sent
    pub from_client: mpsc::Receiver<WireFrame>,
    /// Frames to deliver to the client
    pub to_client: mpsc::Sender<WireFrame>,
}

impl RemoteEnd {
    /// Deliver a JSON text frame. Returns false if the client is gone.
    pub async fn send_json(&self, value: serde_json::Value) -> bool {
        self.to_client.send(WireFrame::Text(value.to_string())).await.is_ok()
    }

    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(WireFrame::Text(text.into())).await.is_ok()
    }

    /// Next client frame parsed as JSON; `None` once the client hung up
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        loop {
            let frame = self.from_client.recv().await?;
            let parsed = match frame {
                WireFrame::Text(text) => serde_json::from_str(&text),
                WireFrame::Binary(bytes) => serde_json::from_slice(&bytes),
            };
            if let Ok(value) = parsed {
                return Some(value);
            }
        }
    }
}

/// In-process transport
///
/// Each `open` hands the matching [`RemoteEnd`] to whoever holds the
/// acceptor returned by [`ChannelTransport::new`]. Used by tests and by
/// headless demos that script the remote side.
pub struct ChannelTransport {
    acceptor: mpsc::UnboundedSender<RemoteEnd>,
    queue_depth: usize,
    open_links: Arc<AtomicUsize>,
    opened: AtomicUsize,
    refuse: AtomicBool,
}

impl ChannelTransport {
    pub fn new(queue_depth: usize) -> (Self, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (acceptor, accepted) = mpsc::unbounded_channel();
        let transport = Self {
            acceptor,
            queue_depth: queue_depth.max(1),
            open_links: Arc::new(AtomicUsize::new(0)),
            opened: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        };
        (transport, accepted)
    }

    /// Links currently held open by clients
    pub fn open_links(&self) -> usize {
        self.open_links.load(Ordering::SeqCst)
    }

    /// Links opened over the transport's lifetime
    pub fn total_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Make subsequent `open` calls fail with `TransportUnavailable`
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn open(&self) -> Result<TransportLink, SessionError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SessionError::TransportUnavailable("connection refused".to_string()));
        }

        let (out_tx, out_rx) = mpsc::channel(self.queue_depth);
        let (in_tx, in_rx) = mpsc::channel(256);

        self.acceptor
            .send(RemoteEnd {
                from_client: out_rx,
                to_client: in_tx,
            })
            .map_err(|_| SessionError::TransportUnavailable("no remote is listening".to_string()))?;

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.open_links.fetch_add(1, Ordering::SeqCst);
        let open_links = Arc::clone(&self.open_links);

        Ok(TransportLink::new(out_tx, in_rx).on_close(move || {
            open_links.fetch_sub(1, Ordering::SeqCst);
        }))
    }

    fn name(&self) -> &str {
        "channel"
    }
}
