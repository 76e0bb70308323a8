//! Subscription Registry
//!
//! Fan-out table from symbol to the downstream sinks interested in it.
//!
//! # Design
//!
//! The registry tracks:
//! - Every symbol ever subscribed, in insertion order (the resubscribe order)
//! - Non-owning references to each symbol's sinks
//!
//! Entries are never removed. Upstream subscriptions stay active for the
//! life of the process because other viewers may still be watching, so a
//! symbol that was once registered never needs a second upstream subscribe.
//! A disconnected consumer only detaches its own sink reference.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::streaming::{FeedEvent, Symbol};

// =============================================================================
// Sinks
// =============================================================================

/// Stable identifier for a downstream sink.
pub type SinkId = u64;

/// Allocate a fresh sink identifier.
#[must_use]
pub fn new_sink_id() -> SinkId {
    uuid::Uuid::new_v4().as_u64_pair().0
}

/// Outcome of offering an event to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The sink accepted the event.
    Delivered,
    /// The sink was full and the event was discarded.
    Dropped,
    /// The sink's consumer has gone away.
    Closed,
}

/// Downstream consumer of feed events.
///
/// `offer` must never block: dispatch runs on the upstream read path and a
/// slow consumer may not stall the others.
pub trait RecordSink: Send + Sync {
    /// Stable identifier of this sink.
    fn id(&self) -> SinkId;

    /// Offer an event without waiting.
    fn offer(&self, event: FeedEvent) -> Delivery;
}

struct SinkRef {
    id: SinkId,
    sink: Weak<dyn RecordSink>,
}

impl SinkRef {
    fn is_live(&self) -> bool {
        self.sink.strong_count() > 0
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Result of visiting a symbol's sinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Visit {
    /// Live sinks the callback ran for.
    pub live: usize,
    /// References whose sink has been dropped.
    pub stale: usize,
}

#[derive(Default)]
struct RegistryState {
    order: Vec<Symbol>,
    entries: HashMap<Symbol, Vec<SinkRef>>,
}

/// Thread-safe symbol → sinks table.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use kis_stream_proxy::domain::streaming::FeedEvent;
/// use kis_stream_proxy::domain::subscription::{Delivery, RecordSink, SinkId, SubscriptionRegistry};
///
/// struct Null(SinkId);
/// impl RecordSink for Null {
///     fn id(&self) -> SinkId { self.0 }
///     fn offer(&self, _: FeedEvent) -> Delivery { Delivery::Delivered }
/// }
///
/// let registry = SubscriptionRegistry::new();
/// let first: Arc<dyn RecordSink> = Arc::new(Null(1));
/// let second: Arc<dyn RecordSink> = Arc::new(Null(2));
///
/// // First sink on a symbol needs an upstream subscribe
/// assert!(registry.add_sink("005930", &first));
/// // Second one shares it
/// assert!(!registry.add_sink("005930", &second));
///
/// // Unsubscribe never tears the symbol down
/// assert_eq!(registry.remove_sink("005930", 1), 2);
/// assert_eq!(registry.all_symbols(), vec!["005930".to_string()]);
/// ```
#[derive(Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a sink to a symbol.
    ///
    /// Returns `true` iff the symbol had never been registered, meaning an
    /// upstream subscribe is needed. Adding the same sink twice is a no-op.
    pub fn add_sink(&self, symbol: &str, sink: &Arc<dyn RecordSink>) -> bool {
        let id = sink.id();
        let mut state = self.state.write();

        if let Some(refs) = state.entries.get_mut(symbol) {
            match refs.iter_mut().find(|r| r.id == id) {
                Some(existing) if existing.is_live() => {}
                Some(existing) => existing.sink = Arc::downgrade(sink),
                None => refs.push(SinkRef {
                    id,
                    sink: Arc::downgrade(sink),
                }),
            }
            return false;
        }

        state.order.push(symbol.to_string());
        state.entries.insert(
            symbol.to_string(),
            vec![SinkRef {
                id,
                sink: Arc::downgrade(sink),
            }],
        );
        true
    }

    /// Snapshot of the live sinks for a symbol.
    #[must_use]
    pub fn sinks_for(&self, symbol: &str) -> Vec<Arc<dyn RecordSink>> {
        self.state
            .read()
            .entries
            .get(symbol)
            .map(|refs| refs.iter().filter_map(|r| r.sink.upgrade()).collect())
            .unwrap_or_default()
    }

    /// Run `f` for every live sink of `symbol` under the read lock.
    ///
    /// `f` must not call back into the registry.
    pub fn visit_sinks<F>(&self, symbol: &str, mut f: F) -> Visit
    where
        F: FnMut(&Arc<dyn RecordSink>),
    {
        let state = self.state.read();
        let mut visit = Visit::default();

        if let Some(refs) = state.entries.get(symbol) {
            for sink_ref in refs {
                match sink_ref.sink.upgrade() {
                    Some(sink) => {
                        visit.live += 1;
                        f(&sink);
                    }
                    None => visit.stale += 1,
                }
            }
        }

        visit
    }

    /// Run `f` for every live sink of every symbol, in registry order.
    pub fn visit_all_sinks<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&str, &Arc<dyn RecordSink>),
    {
        let state = self.state.read();
        let mut visited = 0;

        for symbol in &state.order {
            let Some(refs) = state.entries.get(symbol) else {
                continue;
            };
            for sink in refs.iter().filter_map(|r| r.sink.upgrade()) {
                visited += 1;
                f(symbol, &sink);
            }
        }

        visited
    }

    /// Every registered symbol, in the order it was first added.
    #[must_use]
    pub fn all_symbols(&self) -> Vec<Symbol> {
        self.state.read().order.clone()
    }

    /// Whether a symbol has ever been registered.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.state.read().entries.contains_key(symbol)
    }

    /// Number of live sinks attached to a symbol.
    #[must_use]
    pub fn live_sink_count(&self, symbol: &str) -> usize {
        self.state
            .read()
            .entries
            .get(symbol)
            .map_or(0, |refs| refs.iter().filter(|r| r.is_live()).count())
    }

    /// Unsubscribe request from a consumer.
    ///
    /// Changes nothing; the upstream subscription stays for other viewers.
    /// Returns the live sink count.
    #[must_use]
    pub fn remove_sink(&self, symbol: &str, sink_id: SinkId) -> usize {
        let live = self.live_sink_count(symbol);
        tracing::debug!(symbol, sink_id, live, "Unsubscribe ignored, upstream stays subscribed");
        live
    }

    /// Detach a disconnected consumer's sink. The symbol entry stays.
    pub fn release_sink(&self, symbol: &str, sink_id: SinkId) {
        if let Some(refs) = self.state.write().entries.get_mut(symbol) {
            refs.retain(|r| r.id != sink_id);
        }
    }

    /// Drop references whose sink no longer exists. Returns how many went.
    pub fn prune_stale(&self, symbol: &str) -> usize {
        let mut state = self.state.write();
        let Some(refs) = state.entries.get_mut(symbol) else {
            return 0;
        };
        let before = refs.len();
        refs.retain(SinkRef::is_live);
        before - refs.len()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        SubscriptionStats {
            symbol_count: state.order.len(),
            sink_count: state
                .entries
                .values()
                .map(|refs| refs.iter().filter(|r| r.is_live()).count())
                .sum(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of symbols subscribed upstream.
    pub symbol_count: usize,
    /// Number of live sink references.
    pub sink_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        id: SinkId,
        events: Mutex<Vec<FeedEvent>>,
    }

    impl RecordingSink {
        fn new(id: SinkId) -> Arc<Self> {
            Arc::new(Self {
                id,
                events: Mutex::default(),
            })
        }
    }

    impl RecordSink for RecordingSink {
        fn id(&self) -> SinkId {
            self.id
        }

        fn offer(&self, event: FeedEvent) -> Delivery {
            self.events.lock().push(event);
            Delivery::Delivered
        }
    }

    fn as_dyn(sink: &Arc<RecordingSink>) -> Arc<dyn RecordSink> {
        Arc::clone(sink) as Arc<dyn RecordSink>
    }

    #[test]
    fn first_sink_on_symbol_is_new() {
        let registry = SubscriptionRegistry::new();
        let a = as_dyn(&RecordingSink::new(1));
        let b = as_dyn(&RecordingSink::new(2));

        assert!(registry.add_sink("005930", &a));
        assert!(!registry.add_sink("005930", &b));
        assert!(registry.add_sink("000660", &a));

        let stats = registry.stats();
        assert_eq!(stats.symbol_count, 2);
        assert_eq!(stats.sink_count, 3);
    }

    #[test]
    fn adding_same_sink_twice_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let a = as_dyn(&RecordingSink::new(1));

        registry.add_sink("005930", &a);
        registry.add_sink("005930", &a);

        assert_eq!(registry.live_sink_count("005930"), 1);
    }

    #[test]
    fn symbols_keep_insertion_order() {
        let registry = SubscriptionRegistry::new();
        let a = as_dyn(&RecordingSink::new(1));

        for symbol in ["035720", "005930", "000660", "005930"] {
            registry.add_sink(symbol, &a);
        }

        assert_eq!(registry.all_symbols(), vec!["035720", "005930", "000660"]);
    }

    #[test]
    fn remove_sink_keeps_everything() {
        let registry = SubscriptionRegistry::new();
        let a = as_dyn(&RecordingSink::new(1));
        let b = as_dyn(&RecordingSink::new(2));
        registry.add_sink("005930", &a);
        registry.add_sink("005930", &b);

        assert_eq!(registry.remove_sink("005930", 1), 2);
        assert_eq!(registry.remove_sink("unknown", 1), 0);
        assert_eq!(registry.sinks_for("005930").len(), 2);
    }

    #[test]
    fn release_detaches_one_sink_but_keeps_entry() {
        let registry = SubscriptionRegistry::new();
        let a = as_dyn(&RecordingSink::new(1));
        registry.add_sink("005930", &a);

        registry.release_sink("005930", 1);

        assert!(registry.contains("005930"));
        assert_eq!(registry.live_sink_count("005930"), 0);
        // Re-adding does not need a new upstream subscribe
        assert!(!registry.add_sink("005930", &a));
    }

    #[test]
    fn dropped_sinks_are_stale_not_visited() {
        let registry = SubscriptionRegistry::new();
        let keep = RecordingSink::new(1);
        let gone = RecordingSink::new(2);
        registry.add_sink("005930", &as_dyn(&keep));
        registry.add_sink("005930", &as_dyn(&gone));
        drop(gone);

        let visit = registry.visit_sinks("005930", |sink| {
            sink.offer(FeedEvent::Error("x".to_string()));
        });

        assert_eq!(visit, Visit { live: 1, stale: 1 });
        assert_eq!(keep.events.lock().len(), 1);
        assert_eq!(registry.prune_stale("005930"), 1);
        assert_eq!(registry.stats().sink_count, 1);
    }

    #[test]
    fn visit_all_walks_registry_order() {
        let registry = SubscriptionRegistry::new();
        let a = as_dyn(&RecordingSink::new(1));
        let b = as_dyn(&RecordingSink::new(2));
        registry.add_sink("B", &a);
        registry.add_sink("A", &b);

        let mut seen = Vec::new();
        let count = registry.visit_all_sinks(|symbol, sink| seen.push((symbol.to_string(), sink.id())));

        assert_eq!(count, 2);
        assert_eq!(seen, vec![("B".to_string(), 1), ("A".to_string(), 2)]);
    }

    #[test]
    fn concurrent_adds_register_symbol_once() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let sinks: Vec<_> = (0..8).map(RecordingSink::new).collect();

        let new_count: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = sinks
                .iter()
                .map(|sink| {
                    let registry = Arc::clone(&registry);
                    let sink = as_dyn(sink);
                    scope.spawn(move || usize::from(registry.add_sink("005930", &sink)))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(new_count, 1);
        assert_eq!(registry.live_sink_count("005930"), 8);
    }

    #[test]
    fn sink_ids_are_distinct() {
        assert_ne!(new_sink_id(), new_sink_id());
    }
}
