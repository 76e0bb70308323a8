//! Subscription Multiplexer
//!
//! One upstream connection shared by every downstream consumer.
//!
//! # Design
//!
//! - Consumers call [`Multiplexer::subscribe`] from any task. The registry
//!   records the sink and, for a never-seen symbol, a command is queued for
//!   the run loop.
//! - The run loop is the only owner of the socket, so all sends are
//!   serialized. It connects, replays every registered symbol in registry
//!   order, then alternates between queued commands and inbound frames.
//! - Each decoded record is fanned out to the live sinks of its symbol.
//!   Offers never block; a full sink loses the record.
//!
//! Each session tracks which symbols it has already sent, so a symbol gets
//! exactly one subscribe per stream per session no matter how its command
//! and the replay interleave.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::{DecodedRecord, FeedEvent, InstrumentKind, Symbol};
use crate::domain::subscription::{
    Delivery, RecordSink, SinkId, SubscriptionRegistry, SubscriptionStats,
};
use crate::infrastructure::broadcast::ChannelSink;
use crate::infrastructure::kis::codec::{self, InboundFrame, encode_request, quote_tr_id};
use crate::infrastructure::kis::connection::{
    ConnectionState, FeedState, UpstreamConnection, UpstreamError,
};
use crate::infrastructure::kis::messages::{SubscriptionAction, TR_TRADE};
use crate::infrastructure::kis::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::infrastructure::metrics;

/// Notice sent to waiting sinks when the feed cannot be authorized.
pub const APPROVAL_FAILURE_NOTICE: &str = "Failed to issue approval key";

// =============================================================================
// Configuration
// =============================================================================

/// Multiplexer settings.
#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    /// Queue capacity of sinks created by [`Multiplexer::subscribe_stream`].
    pub sink_capacity: usize,
    /// Delay schedule between upstream sessions.
    pub reconnect: ReconnectConfig,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            sink_capacity: 256,
            reconnect: ReconnectConfig::default(),
        }
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Per-record delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Sinks that accepted the record.
    pub delivered: usize,
    /// Sinks that were full.
    pub dropped: usize,
    /// Sinks whose consumer had gone; they are released.
    pub closed: usize,
}

/// Offer a record to every live sink of its symbol.
fn fan_out(registry: &SubscriptionRegistry, record: Arc<DecodedRecord>) -> DispatchSummary {
    let symbol = record.symbol();
    let mut summary = DispatchSummary::default();
    let mut closed = Vec::new();

    let visit = registry.visit_sinks(symbol, |sink| {
        match sink.offer(FeedEvent::Record(Arc::clone(&record))) {
            Delivery::Delivered => summary.delivered += 1,
            Delivery::Dropped => summary.dropped += 1,
            Delivery::Closed => {
                summary.closed += 1;
                closed.push(sink.id());
            }
        }
    });

    for sink_id in closed {
        registry.release_sink(symbol, sink_id);
    }
    if visit.stale > 0 {
        registry.prune_stale(symbol);
    }

    metrics::record_deliveries(
        record.stream(),
        summary.delivered as u64,
        summary.dropped as u64,
        summary.closed as u64,
    );

    summary
}

// =============================================================================
// Multiplexer
// =============================================================================

#[derive(Debug)]
enum Command {
    Subscribe(Symbol),
}

enum RunnerSlot {
    Idle(Box<RunLoop>),
    Running(JoinHandle<()>),
    Finished,
}

/// Shared upstream subscription manager.
///
/// Construct one at startup and share it as `Arc<Multiplexer>`.
pub struct Multiplexer {
    registry: Arc<SubscriptionRegistry>,
    commands: mpsc::UnboundedSender<Command>,
    runner: parking_lot::Mutex<RunnerSlot>,
    feed: Arc<FeedState>,
    sink_capacity: usize,
    cancel: CancellationToken,
}

impl Multiplexer {
    /// Create a multiplexer around an (unconnected) upstream connection.
    ///
    /// The run loop starts on the first subscribe, or on [`Self::start`].
    #[must_use]
    pub fn new(
        connection: UpstreamConnection,
        config: MultiplexerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let feed = connection.feed();

        let run_loop = RunLoop {
            connection,
            commands: command_rx,
            registry: Arc::clone(&registry),
            policy: ReconnectPolicy::new(config.reconnect),
            feed: Arc::clone(&feed),
            cancel: cancel.clone(),
            first_logged: HashSet::new(),
            session: HashSet::new(),
            notified: HashSet::new(),
            ever_connected: false,
        };

        Self {
            registry,
            commands,
            runner: parking_lot::Mutex::new(RunnerSlot::Idle(Box::new(run_loop))),
            feed,
            sink_capacity: config.sink_capacity,
            cancel,
        }
    }

    /// Attach `sink` to `symbol`.
    ///
    /// Returns `true` if this is the first time the symbol was requested,
    /// in which case the run loop subscribes it upstream. The registry only
    /// keeps a weak reference; the caller owns the sink.
    pub fn subscribe(&self, symbol: &str, sink: &Arc<dyn RecordSink>) -> bool {
        let is_new = self.registry.add_sink(symbol, sink);

        if is_new {
            let kind = InstrumentKind::classify(symbol);
            tracing::info!(symbol, kind = kind.as_str(), "New upstream subscription");
            if self.commands.send(Command::Subscribe(symbol.to_string())).is_err() {
                tracing::warn!(symbol, "Run loop has exited, subscription not sent");
            }
            metrics::set_subscribed_symbols(self.registry.stats().symbol_count);
        } else {
            tracing::debug!(symbol, sink_id = sink.id(), "Joined existing subscription");
        }

        self.start();
        is_new
    }

    /// Unsubscribe request. Upstream stays subscribed for other viewers.
    ///
    /// Returns the number of sinks still attached to the symbol.
    pub fn unsubscribe(&self, symbol: &str, sink_id: SinkId) -> usize {
        self.registry.remove_sink(symbol, sink_id)
    }

    /// Subscribe a fresh bounded channel and return it as a stream.
    ///
    /// Dropping the returned [`Subscription`] releases its sink.
    #[must_use]
    pub fn subscribe_stream(&self, symbol: &str) -> Subscription {
        let (sink, rx) = ChannelSink::channel(self.sink_capacity);
        let sink = Arc::new(sink);
        let as_dyn: Arc<dyn RecordSink> = Arc::clone(&sink) as Arc<dyn RecordSink>;

        let is_new = self.subscribe(symbol, &as_dyn);

        Subscription {
            symbol: symbol.to_string(),
            is_new,
            sink,
            inner: ReceiverStream::new(rx),
            registry: Arc::clone(&self.registry),
        }
    }

    /// Fan a record out to its symbol's sinks.
    pub fn dispatch(&self, record: DecodedRecord) -> DispatchSummary {
        fan_out(&self.registry, Arc::new(record))
    }

    /// Spawn the run loop if it has not been started.
    ///
    /// Does nothing outside a Tokio runtime; the next call from inside one
    /// starts it.
    pub fn start(&self) {
        let mut slot = self.runner.lock();
        if !matches!(*slot, RunnerSlot::Idle(_)) {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No Tokio runtime, run loop start deferred");
            return;
        };

        if let RunnerSlot::Idle(run_loop) = std::mem::replace(&mut *slot, RunnerSlot::Finished) {
            *slot = RunnerSlot::Running(runtime.spawn(run_loop.run()));
        }
    }

    /// Whether the run loop task has been spawned.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.runner.lock(), RunnerSlot::Running(_))
    }

    /// Cancel the run loop and wait for it to deregister and close.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let handle = match std::mem::replace(&mut *self.runner.lock(), RunnerSlot::Finished) {
            RunnerSlot::Running(handle) => Some(handle),
            RunnerSlot::Idle(_) | RunnerSlot::Finished => None,
        };

        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Run loop task failed");
        }
    }

    /// Subscription registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Shared upstream feed state.
    #[must_use]
    pub fn feed_state(&self) -> Arc<FeedState> {
        Arc::clone(&self.feed)
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.registry.stats()
    }
}

// =============================================================================
// Subscription Stream
// =============================================================================

/// A downstream consumer's view of one symbol.
pub struct Subscription {
    symbol: Symbol,
    is_new: bool,
    sink: Arc<ChannelSink>,
    inner: ReceiverStream<FeedEvent>,
    registry: Arc<SubscriptionRegistry>,
}

impl Subscription {
    /// Symbol this subscription follows.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Identifier of the underlying sink.
    #[must_use]
    pub fn sink_id(&self) -> SinkId {
        self.sink.id()
    }

    /// Whether this subscription triggered the upstream subscribe.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.is_new
    }
}

impl Stream for Subscription {
    type Item = FeedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.release_sink(&self.symbol, self.sink.id());
        tracing::debug!(symbol = %self.symbol, "Subscriber released");
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("symbol", &self.symbol)
            .field("sink_id", &self.sink.id())
            .field("is_new", &self.is_new)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Run Loop
// =============================================================================

enum SessionEnd {
    Cancelled,
    Lost(String),
}

struct RunLoop {
    connection: UpstreamConnection,
    commands: mpsc::UnboundedReceiver<Command>,
    registry: Arc<SubscriptionRegistry>,
    policy: ReconnectPolicy,
    feed: Arc<FeedState>,
    cancel: CancellationToken,
    /// Symbols whose first record has been logged.
    first_logged: HashSet<Symbol>,
    /// Symbols sent upstream in the current session.
    session: HashSet<Symbol>,
    /// Sinks that already received the credential failure notice.
    notified: HashSet<SinkId>,
    ever_connected: bool,
}

impl RunLoop {
    async fn run(mut self: Box<Self>) {
        tracing::info!("Multiplexer run loop started");

        loop {
            let connected = tokio::select! {
                () = self.cancel.cancelled() => break,
                result = self.connection.connect() => result,
            };

            match connected {
                Ok(()) => {
                    self.ever_connected = true;
                    self.policy.reset();
                    self.session.clear();

                    match self.run_session().await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Lost(reason) => {
                            tracing::warn!(reason = %reason, "Upstream session ended");
                        }
                    }
                }
                Err(UpstreamError::Credential) => {
                    tracing::warn!("Failed to issue approval key");
                    if !self.ever_connected {
                        self.notify_credential_failure();
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream connect failed");
                }
            }

            let delay = self.policy.next_delay();
            self.feed.increment_reconnect_attempts();
            metrics::record_reconnect();
            tracing::info!(
                attempt = self.policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting to KIS feed"
            );

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.close_session().await;
        tracing::info!("Multiplexer run loop stopped");
    }

    async fn run_session(&mut self) -> SessionEnd {
        if let Err(e) = self.resubscribe_all().await {
            return SessionEnd::Lost(e.to_string());
        }

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return SessionEnd::Cancelled,
                Some(command) = self.commands.recv() => {
                    let Command::Subscribe(symbol) = command;
                    if let Err(e) = self.send_subscription(&symbol).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                frame = self.connection.next_frame() => match frame {
                    Ok(Some(text)) => self.handle_frame(&text),
                    Ok(None) => return SessionEnd::Lost("closed by server".to_string()),
                    Err(e) => return SessionEnd::Lost(e.to_string()),
                },
            }
        }
    }

    async fn resubscribe_all(&mut self) -> Result<(), UpstreamError> {
        let symbols = self.registry.all_symbols();
        if !symbols.is_empty() {
            tracing::info!(count = symbols.len(), "Resubscribing registered symbols");
        }
        for symbol in &symbols {
            self.send_subscription(symbol).await?;
        }
        Ok(())
    }

    /// Send the quote and trade subscriptions for `symbol`, once per session.
    async fn send_subscription(&mut self, symbol: &str) -> Result<(), UpstreamError> {
        if self.session.contains(symbol) {
            return Ok(());
        }
        let Some(credential) = self.connection.credential().cloned() else {
            return Err(UpstreamError::NotConnected);
        };

        let kind = InstrumentKind::classify(symbol);
        for tr_id in [quote_tr_id(kind), TR_TRADE] {
            let packet = encode_request(&credential, SubscriptionAction::Register, tr_id, symbol);
            tracing::debug!(symbol, tr_id, "Sending subscribe request");
            self.connection.send(&packet).await?;
        }

        self.session.insert(symbol.to_string());
        self.feed.set_subscription_count(self.session.len());
        tracing::info!(symbol, kind = kind.as_str(), "Subscribed upstream");
        Ok(())
    }

    fn handle_frame(&mut self, text: &str) {
        let started = Instant::now();
        metrics::record_frame_received();

        match codec::decode(text) {
            Ok(InboundFrame::Record { tr_id, record }) => {
                metrics::record_record_decoded(record.stream());

                if self.first_logged.insert(record.symbol().to_string()) {
                    match serde_json::to_string(&record) {
                        Ok(body) => tracing::info!(
                            symbol = record.symbol(),
                            tr_id = %tr_id,
                            body = %body,
                            "First record"
                        ),
                        Err(e) => tracing::warn!(error = %e, "First record not serializable"),
                    }
                }

                let summary = fan_out(&self.registry, Arc::new(record));
                tracing::trace!(
                    tr_id = %tr_id,
                    delivered = summary.delivered,
                    dropped = summary.dropped,
                    "Dispatched record"
                );
            }
            Ok(InboundFrame::KeepAlive) => tracing::trace!("Keep-alive"),
            Ok(InboundFrame::Control(control)) => {
                if control.is_rejection() {
                    tracing::warn!(
                        tr_id = %control.header.tr_id,
                        tr_key = ?control.header.tr_key,
                        msg = ?control.message(),
                        "Subscribe request rejected"
                    );
                } else {
                    tracing::debug!(
                        tr_id = %control.header.tr_id,
                        tr_key = ?control.header.tr_key,
                        msg = ?control.message(),
                        "Control message"
                    );
                }
            }
            Ok(InboundFrame::Unhandled { tr_id }) => {
                tracing::debug!(tr_id = %tr_id, "Frame for unhandled stream");
            }
            Err(e) => {
                metrics::record_parse_failure(e.kind());
                let head: String = text.chars().take(64).collect();
                tracing::warn!(error = %e, frame = %head, "Dropping undecodable frame");
            }
        }

        metrics::record_dispatch_duration(started.elapsed());
    }

    fn notify_credential_failure(&mut self) {
        let notified = &mut self.notified;
        let count = self.registry.visit_all_sinks(|_, sink| {
            if notified.insert(sink.id()) {
                let _ = sink.offer(FeedEvent::Error(APPROVAL_FAILURE_NOTICE.to_string()));
            }
        });
        tracing::debug!(sinks = count, "Credential failure notice sent");
    }

    /// Best-effort deregistration of the session's symbols, then close.
    async fn close_session(&mut self) {
        if self.connection.state() == ConnectionState::Connected
            && let Some(credential) = self.connection.credential().cloned()
        {
            let symbols: Vec<Symbol> = self.session.drain().collect();
            'symbols: for symbol in &symbols {
                let kind = InstrumentKind::classify(symbol);
                for tr_id in [quote_tr_id(kind), TR_TRADE] {
                    let packet =
                        encode_request(&credential, SubscriptionAction::Deregister, tr_id, symbol);
                    if let Err(e) = self.connection.send(&packet).await {
                        tracing::debug!(error = %e, "Deregistration stopped");
                        break 'symbols;
                    }
                }
            }
            tracing::info!(count = symbols.len(), "Deregistered upstream streams");
        }

        self.connection.disconnect().await;
    }
}

// =============================================================================
// Tests
// =============================================================================
