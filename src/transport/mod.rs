//! Streaming transport (C3): maintains a subscribed Polymarket market-data
//! WebSocket with reconnection, keepalive, and dynamic subscription.

pub mod messages;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use messages::{event_type_of, is_dispatched, DynamicSubscribeFrame, SubscribeFrame};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Open,
    Closed,
    Stopping,
    Stopped,
}

/// Maintains a subscribed market-data stream, reconnecting on socket close
/// and supporting dynamic subscribe/unsubscribe while running.
pub struct StreamTransport {
    url: String,
    subscribed: Arc<Mutex<HashSet<String>>>,
    outgoing: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
    state: Arc<Mutex<TransportState>>,
    cancel: CancellationToken,
}

impl StreamTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subscribed: Arc::new(Mutex::new(HashSet::new())),
            outgoing: Arc::new(Mutex::new(None)),
            state: Arc::new(Mutex::new(TransportState::Connecting)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> TransportState {
        *self.state.lock()
    }

    /// Runs the connect/subscribe/read-loop/reconnect cycle until [`stop`]
    /// is called. `on_message` is invoked synchronously, once per dispatched
    /// event, from this task.
    pub async fn run<F>(&self, initial_ids: Vec<String>, mut on_message: F)
    where
        F: FnMut(serde_json::Value) + Send,
    {
        {
            let mut subs = self.subscribed.lock();
            subs.extend(initial_ids);
        }

        loop {
            if self.cancel.is_cancelled() {
                *self.state.lock() = TransportState::Stopped;
                return;
            }

            *self.state.lock() = TransportState::Connecting;
            match self.connect_and_serve(&mut on_message).await {
                Ok(()) => {}
                Err(e) => warn!(error = %e, "transport connection ended with error"),
            }

            *self.outgoing.lock() = None;

            if self.cancel.is_cancelled() {
                *self.state.lock() = TransportState::Stopped;
                return;
            }

            *self.state.lock() = TransportState::Closed;
            info!(delay_secs = RECONNECT_DELAY.as_secs(), "reconnecting after delay");
            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                _ = self.cancel.cancelled() => {
                    *self.state.lock() = TransportState::Stopped;
                    return;
                }
            }
        }
    }

    async fn connect_and_serve<F>(&self, on_message: &mut F) -> Result<()>
    where
        F: FnMut(serde_json::Value) + Send,
    {
        info!(url = %self.url, "connecting to market data stream");
        let (ws, _response) = connect_async(&self.url).await?;
        let (mut sink, mut stream) = ws.split();

        let current_ids: Vec<String> = self.subscribed.lock().iter().cloned().collect();
        let initial = serde_json::to_string(&SubscribeFrame::initial(current_ids))?;
        sink.send(Message::Text(initial)).await?;
        *self.state.lock() = TransportState::Open;

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.outgoing.lock() = Some(tx.clone());

        let cancel = self.cancel.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let keepalive_tx = tx.clone();
        let keepalive_cancel = self.cancel.clone();
        let keepalive_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(KEEPALIVE_INTERVAL) => {
                        if keepalive_tx.send(Message::Text("PING".into())).is_err() {
                            break;
                        }
                    }
                    _ = keepalive_cancel.cancelled() => break,
                }
            }
        });

        let result = self.read_loop(&mut stream, on_message, &cancel).await;

        drop(tx);
        keepalive_task.abort();
        let _ = writer_task.await;
        result
    }

    async fn read_loop<F>(
        &self,
        stream: &mut futures_util::stream::SplitStream<WsStream>,
        on_message: &mut F,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        F: FnMut(serde_json::Value) + Send,
    {
        loop {
            let next = tokio::select! {
                msg = stream.next() => msg,
                _ = cancel.cancelled() => return Ok(()),
            };

            let Some(msg) = next else {
                info!("market data stream ended");
                return Ok(());
            };

            match msg {
                Ok(Message::Text(text)) => self.dispatch_text(&text, on_message),
                Ok(Message::Close(frame)) => {
                    info!(frame = ?frame, "market data stream closed by server");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "transport read error");
                    return Err(e.into());
                }
            }
        }
    }

    fn dispatch_text<F>(&self, text: &str, on_message: &mut F)
    where
        F: FnMut(serde_json::Value),
    {
        if text.trim() == "PONG" {
            debug!("pong received");
            return;
        }

        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, raw = %text, "failed to parse inbound frame");
                return;
            }
        };

        let items: Vec<serde_json::Value> = match value {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        };

        for item in items {
            match event_type_of(&item) {
                Some(t) if is_dispatched(t) => on_message(item),
                Some(t) => debug!(event_type = %t, "ignored event"),
                None => debug!("dropped frame with no event type"),
            }
        }
    }

    /// Append `ids` to the tracked subscription set and, if connected, send
    /// a dynamic subscribe frame immediately.
    pub fn subscribe(&self, ids: Vec<String>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.subscribed.lock().extend(ids.iter().cloned());
        if let Some(tx) = self.outgoing.lock().as_ref() {
            let frame = serde_json::to_string(&DynamicSubscribeFrame::subscribe(ids))?;
            let _ = tx.send(Message::Text(frame));
        }
        Ok(())
    }

    /// Remove `ids` from the tracked subscription set and, if connected,
    /// send a dynamic unsubscribe frame immediately.
    pub fn unsubscribe(&self, ids: Vec<String>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        {
            let mut subs = self.subscribed.lock();
            for id in &ids {
                subs.remove(id);
            }
        }
        if let Some(tx) = self.outgoing.lock().as_ref() {
            let frame = serde_json::to_string(&DynamicSubscribeFrame::unsubscribe(ids))?;
            let _ = tx.send(Message::Text(frame));
        }
        Ok(())
    }

    /// Idempotent: signals the keepalive/reconnect loop to exit and closes
    /// the socket. No further reconnect attempts occur after this.
    pub fn stop(&self) {
        *self.state.lock() = TransportState::Stopping;
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_before_connect_is_recorded_locally() {
        let transport = StreamTransport::new("wss://example.invalid/ws/market");
        transport.subscribe(vec!["a1".into(), "a2".into()]).unwrap();
        assert_eq!(transport.subscribed.lock().len(), 2);
    }

    #[test]
    fn unsubscribe_removes_from_local_set() {
        let transport = StreamTransport::new("wss://example.invalid/ws/market");
        transport.subscribe(vec!["a1".into(), "a2".into()]).unwrap();
        transport.unsubscribe(vec!["a1".into()]).unwrap();
        let subs = transport.subscribed.lock();
        assert!(!subs.contains("a1"));
        assert!(subs.contains("a2"));
    }

    #[test]
    fn stop_is_idempotent() {
        let transport = StreamTransport::new("wss://example.invalid/ws/market");
        transport.stop();
        transport.stop();
        assert_eq!(transport.state(), TransportState::Stopping);
        assert!(transport.cancel_token().is_cancelled());
    }
}
