//! Realtime event session.
//!
//! A single logical streaming connection delivers JSON frames shaped as
//! `{"type": <name>, "data": {...}}`. Frames decode into typed [`Event`]s
//! and dispatch, strictly in wire order, to at most one registered handler
//! per event kind. The session survives transient failures by reconnecting
//! after a fixed delay until [`EventSession`] is stopped explicitly.
//!
//! The wire connection lives behind the [`GatewayConnector`]/[`FrameStream`]
//! ports; the production implementation uses `tokio-tungstenite` and is
//! gated by the `gateway` cargo feature.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::models::{Channel, Member, Message};

/// Fixed delay between a session failure and the next connection attempt.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// A typed domain event delivered over the streaming connection.
#[derive(Clone, Debug)]
pub enum Event {
    /// Fired exactly once per successful connection, before any frame.
    Ready,
    Message(Message),
    MemberJoined(Member),
    ChannelCreated(Channel),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Ready => EventKind::Ready,
            Event::Message(_) => EventKind::Message,
            Event::MemberJoined(_) => EventKind::MemberJoined,
            Event::ChannelCreated(_) => EventKind::ChannelCreated,
        }
    }
}

/// Closed set of event kinds a handler can be registered for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    Message,
    MemberJoined,
    ChannelCreated,
}

impl EventKind {
    /// Map a wire `type` discriminator to a kind. Unrecognized names are
    /// ignored by the session, not errors.
    fn from_wire(name: &str) -> Option<Self> {
        match name {
            "message" => Some(EventKind::Message),
            "member_join" => Some(EventKind::MemberJoined),
            "channel_create" => Some(EventKind::ChannelCreated),
            _ => None,
        }
    }
}

type EventCallback = Box<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// Proof of a registration; pass it back to deregister the handler.
/// Dropping the handle leaves the handler in place.
#[derive(Debug)]
pub struct HandlerHandle {
    kind: EventKind,
}

/// Zero-or-one handler per event kind. Registering a second handler for a
/// kind replaces the first.
#[derive(Default)]
pub(crate) struct EventRegistry {
    handlers: Mutex<HashMap<EventKind, EventCallback>>,
}

impl EventRegistry {
    pub fn register<F, Fut>(&self, kind: EventKind, handler: F) -> HandlerHandle
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cb: EventCallback = Box::new(move |event| Box::pin(handler(event)));
        self.handlers
            .lock()
            .expect("handler registry poisoned")
            .insert(kind, cb);
        HandlerHandle { kind }
    }

    pub fn deregister(&self, handle: HandlerHandle) {
        self.handlers
            .lock()
            .expect("handler registry poisoned")
            .remove(&handle.kind);
    }

    pub fn is_empty(&self) -> bool {
        self.handlers
            .lock()
            .expect("handler registry poisoned")
            .is_empty()
    }

    /// Run the handler for this event's kind, if one is registered.
    /// Handlers are awaited to completion before the next frame is read, so
    /// dispatch order is wire order.
    pub async fn dispatch(&self, event: Event) {
        let fut = {
            let handlers = self.handlers.lock().expect("handler registry poisoned");
            handlers.get(&event.kind()).map(|cb| cb(event))
        };
        if let Some(fut) = fut {
            fut.await;
        }
    }
}

/// One established streaming connection.
#[async_trait]
pub(crate) trait FrameStream: Send {
    /// Next text frame. `None` means the peer closed cleanly.
    async fn next_frame(&mut self) -> Option<Result<String>>;

    /// Best-effort close of the underlying connection.
    async fn close(&mut self);
}

/// Establishes streaming connections. Split from [`FrameStream`] so the
/// session's reconnect loop can be driven against scripted fakes.
#[async_trait]
pub(crate) trait GatewayConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameStream>>;
}

/// Session lifecycle, observable for logging and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Backoff,
    Stopped,
}

#[derive(Deserialize)]
struct FrameEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

pub(crate) struct EventSession {
    registry: Arc<EventRegistry>,
    connector: Arc<dyn GatewayConnector>,
    url: String,
    auto_reconnect: bool,
    stop: CancellationToken,
    state: watch::Sender<SessionState>,
}

impl EventSession {
    pub fn new(
        registry: Arc<EventRegistry>,
        connector: Arc<dyn GatewayConnector>,
        url: String,
        auto_reconnect: bool,
        stop: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            registry,
            connector,
            url,
            auto_reconnect,
            stop,
            state,
        }
    }

    #[cfg(test)]
    pub fn state_rx(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    /// Drive the session until stopped. Returns immediately when no handler
    /// is registered.
    ///
    /// The stop flag is observed at loop boundaries only — per frame and
    /// per reconnect attempt — never pre-empting an in-progress dispatch.
    pub async fn run(&self) -> Result<()> {
        if self.registry.is_empty() {
            tracing::debug!("no event handlers registered, session not started");
            return Ok(());
        }

        loop {
            if self.stop.is_cancelled() {
                break;
            }
            self.set_state(SessionState::Connecting);

            let connected = tokio::select! {
                _ = self.stop.cancelled() => break,
                res = self.connector.connect(&self.url) => res,
            };

            match connected {
                Ok(mut stream) => {
                    tracing::info!(url = %self.url, "event stream connected");
                    self.set_state(SessionState::Streaming);
                    self.registry.dispatch(Event::Ready).await;

                    if !self.stream_frames(stream.as_mut()).await {
                        // Stopped mid-stream; connection already closed.
                        self.set_state(SessionState::Stopped);
                        return Ok(());
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "event stream connect failed");
                }
            }

            if !self.auto_reconnect || self.stop.is_cancelled() {
                break;
            }

            self.set_state(SessionState::Backoff);
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = sleep(RECONNECT_DELAY) => {}
            }
        }

        self.set_state(SessionState::Stopped);
        Ok(())
    }

    /// Read frames until the connection fails or the session is stopped.
    /// Returns `false` when the stop flag ended the stream.
    async fn stream_frames(&self, stream: &mut dyn FrameStream) -> bool {
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    stream.close().await;
                    return false;
                }
                frame = stream.next_frame() => match frame {
                    Some(Ok(text)) => {
                        if let Err(err) = self.handle_frame(&text).await {
                            tracing::warn!(error = %err, "frame decode failed");
                            return true;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "event stream error");
                        return true;
                    }
                    None => {
                        tracing::info!("event stream closed by peer");
                        return true;
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) -> Result<()> {
        let envelope: FrameEnvelope = serde_json::from_str(text)?;
        let Some(kind) = EventKind::from_wire(&envelope.kind) else {
            tracing::debug!(kind = %envelope.kind, "ignoring unrecognized event type");
            return Ok(());
        };

        let event = match kind {
            EventKind::Message => Event::Message(serde_json::from_value(envelope.data)?),
            EventKind::MemberJoined => Event::MemberJoined(serde_json::from_value(envelope.data)?),
            EventKind::ChannelCreated => {
                Event::ChannelCreated(serde_json::from_value(envelope.data)?)
            }
            // Ready has no wire representation; it is synthesized on connect.
            EventKind::Ready => return Ok(()),
        };

        self.registry.dispatch(event).await;
        Ok(())
    }
}

#[cfg(feature = "gateway")]
pub(crate) use ws::WsConnector;

#[cfg(feature = "gateway")]
mod ws {
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use super::{FrameStream, GatewayConnector};
    use crate::errors::{Error, Result};

    /// Production connector over `tokio-tungstenite`.
    pub(crate) struct WsConnector;

    struct WsFrameStream {
        inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
    }

    #[async_trait]
    impl GatewayConnector for WsConnector {
        async fn connect(&self, url: &str) -> Result<Box<dyn FrameStream>> {
            let (inner, _) = connect_async(url)
                .await
                .map_err(|e| Error::Connection(e.to_string()))?;
            Ok(Box::new(WsFrameStream { inner }))
        }
    }

    #[async_trait]
    impl FrameStream for WsFrameStream {
        async fn next_frame(&mut self) -> Option<Result<String>> {
            loop {
                match self.inner.next().await {
                    Some(Ok(WsMessage::Text(text))) => return Some(Ok(text.to_string())),
                    Some(Ok(WsMessage::Close(_))) | None => return None,
                    // Ping/pong are handled by tungstenite; binary frames
                    // are not part of the protocol.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Some(Err(Error::Connection(e.to_string()))),
                }
            }
        }

        async fn close(&mut self) {
            let _ = self.inner.close(None).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    enum ScriptItem {
        Frame(String),
        /// Keep the stream open without delivering anything.
        Pending,
    }

    struct FakeStream {
        items: VecDeque<ScriptItem>,
    }

    #[async_trait]
    impl FrameStream for FakeStream {
        async fn next_frame(&mut self) -> Option<Result<String>> {
            match self.items.pop_front() {
                Some(ScriptItem::Frame(text)) => Some(Ok(text)),
                Some(ScriptItem::Pending) => {
                    futures_util::future::pending::<()>().await;
                    unreachable!()
                }
                None => None,
            }
        }

        async fn close(&mut self) {}
    }

    /// Pops one scripted stream per connect; further connects fail.
    struct FakeConnector {
        scripts: Mutex<VecDeque<Vec<ScriptItem>>>,
        connects: Mutex<Vec<Instant>>,
    }

    impl FakeConnector {
        fn new(scripts: Vec<Vec<ScriptItem>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                connects: Mutex::new(Vec::new()),
            })
        }

        fn connect_times(&self) -> Vec<Instant> {
            self.connects.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GatewayConnector for FakeConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn FrameStream>> {
            self.connects.lock().unwrap().push(Instant::now());
            match self.scripts.lock().unwrap().pop_front() {
                Some(items) => Ok(Box::new(FakeStream {
                    items: items.into(),
                })),
                None => Err(Error::Connection("no stream available".into())),
            }
        }
    }

    fn message_frame(id: u64, content: &str) -> String {
        json!({
            "type": "message",
            "data": {
                "id": id,
                "channel_id": 1,
                "author": "u1",
                "content": content,
                "timestamp": "2024-01-01T00:00:00Z"
            }
        })
        .to_string()
    }

    fn session(
        connector: Arc<FakeConnector>,
        registry: Arc<EventRegistry>,
        auto_reconnect: bool,
    ) -> Arc<EventSession> {
        Arc::new(EventSession::new(
            registry,
            connector,
            "ws://test/ws/servers/1?token=t".into(),
            auto_reconnect,
            CancellationToken::new(),
        ))
    }

    fn collect_messages(registry: &EventRegistry) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(EventKind::Message, move |event| {
            let tx = tx.clone();
            async move {
                if let Event::Message(m) = event {
                    let _ = tx.send(m.content);
                }
            }
        });
        rx
    }

    #[tokio::test]
    async fn without_handlers_the_session_is_a_noop() {
        let connector = FakeConnector::new(vec![vec![]]);
        let sess = session(connector.clone(), Arc::new(EventRegistry::default()), true);

        sess.run().await.unwrap();
        assert!(connector.connect_times().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_the_fixed_delay_and_resumes_dispatch() {
        let registry = Arc::new(EventRegistry::default());
        let mut rx = collect_messages(&registry);
        let ready_count = Arc::new(Mutex::new(0u32));
        {
            let ready_count = ready_count.clone();
            registry.register(EventKind::Ready, move |_| {
                let ready_count = ready_count.clone();
                async move {
                    *ready_count.lock().unwrap() += 1;
                }
            });
        }

        // First connection delivers one frame then closes; the second stays
        // open after its frame.
        let connector = FakeConnector::new(vec![
            vec![ScriptItem::Frame(message_frame(1, "first"))],
            vec![
                ScriptItem::Frame(message_frame(2, "second")),
                ScriptItem::Pending,
            ],
        ]);
        let sess = session(connector.clone(), registry, true);

        let runner = sess.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        assert_eq!(rx.recv().await.unwrap(), "first");
        assert_eq!(rx.recv().await.unwrap(), "second");

        let times = connector.connect_times();
        assert_eq!(times.len(), 2);
        assert!(times[1] - times[0] >= RECONNECT_DELAY);
        assert_eq!(*ready_count.lock().unwrap(), 2);

        sess.stop.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(*sess.state_rx().borrow(), SessionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_backoff_reaches_stopped_without_reconnecting() {
        let registry = Arc::new(EventRegistry::default());
        let _rx = collect_messages(&registry);

        // Single connection that closes immediately.
        let connector = FakeConnector::new(vec![vec![]]);
        let sess = session(connector.clone(), registry, true);
        let mut state = sess.state_rx();

        let runner = sess.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        state
            .wait_for(|s| *s == SessionState::Backoff)
            .await
            .unwrap();
        sess.stop.cancel();

        handle.await.unwrap().unwrap();
        assert_eq!(connector.connect_times().len(), 1);
        assert_eq!(*sess.state_rx().borrow(), SessionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_dispatch_in_wire_order() {
        let registry = Arc::new(EventRegistry::default());
        let mut rx = collect_messages(&registry);

        let connector = FakeConnector::new(vec![vec![
            ScriptItem::Frame(message_frame(1, "a")),
            ScriptItem::Frame(message_frame(2, "b")),
            ScriptItem::Frame(message_frame(3, "c")),
            ScriptItem::Pending,
        ]]);
        let sess = session(connector, registry, true);

        let runner = sess.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!(seen, vec!["a", "b", "c"]);

        sess.stop.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unrecognized_event_types_are_ignored() {
        let registry = Arc::new(EventRegistry::default());
        let mut rx = collect_messages(&registry);

        let connector = FakeConnector::new(vec![vec![
            ScriptItem::Frame(json!({"type": "presence_sync", "data": {}}).to_string()),
            ScriptItem::Frame(message_frame(1, "after")),
            ScriptItem::Pending,
        ]]);
        let sess = session(connector.clone(), registry, true);

        let runner = sess.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        assert_eq!(rx.recv().await.unwrap(), "after");
        // The unknown frame did not tear the connection down.
        assert_eq!(connector.connect_times().len(), 1);

        sess.stop.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_trigger_a_reconnect() {
        let registry = Arc::new(EventRegistry::default());
        let mut rx = collect_messages(&registry);

        let connector = FakeConnector::new(vec![
            vec![ScriptItem::Frame("not json".into()), ScriptItem::Pending],
            vec![
                ScriptItem::Frame(message_frame(1, "recovered")),
                ScriptItem::Pending,
            ],
        ]);
        let sess = session(connector.clone(), registry, true);

        let runner = sess.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        assert_eq!(rx.recv().await.unwrap(), "recovered");
        assert_eq!(connector.connect_times().len(), 2);

        sess.stop.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn registering_twice_replaces_the_handler_and_handles_deregister() {
        let registry = EventRegistry::default();
        let (tx1, mut rx1) = mpsc::unbounded_channel::<()>();
        let (tx2, mut rx2) = mpsc::unbounded_channel::<()>();

        let _first = registry.register(EventKind::Ready, move |_| {
            let tx1 = tx1.clone();
            async move {
                let _ = tx1.send(());
            }
        });
        let second = registry.register(EventKind::Ready, move |_| {
            let tx2 = tx2.clone();
            async move {
                let _ = tx2.send(());
            }
        });

        registry.dispatch(Event::Ready).await;
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());

        registry.deregister(second);
        assert!(registry.is_empty());
        registry.dispatch(Event::Ready).await;
        assert!(rx2.try_recv().is_err());
    }
}
