use crate::holder::{InsightListener, InsightStateHolder};
use insight_core::{ConversionError, InsightError, InsightUpdate, NodeKind, QueryNode};
use insight_filters::filters_to_query;
use insight_flags::{FlagChange, FlagListener, FlagStore, InsightConfig};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ReactorEvent {
    QuerySet(QueryNode),
    ClassificationChanged(bool),
}

struct ReactorState {
    query: QueryNode,
    cached: Option<bool>,
    reported: bool,
}

/// Keeps the derived query and the alternate backend classification in step
/// with insight mutations and flag writes.
///
/// A mutation carrying a query always wins. Filters only replace the derived
/// query when the intent asks to override it. Anything else leaves the cached
/// query alone and emits nothing.
pub struct DerivedQueryReactor {
    flags: Arc<FlagStore>,
    flag_name: String,
    state: Mutex<ReactorState>,
    subscribers: Mutex<Vec<Sender<ReactorEvent>>>,
}

impl DerivedQueryReactor {
    /// Subscribes a new reactor to `holder` and `flags`. The derived query is
    /// seeded from the holder's current query, or the default insight query.
    pub fn new(
        holder: &InsightStateHolder,
        flags: Arc<FlagStore>,
        config: &InsightConfig,
    ) -> Arc<Self> {
        let query = holder
            .insight()
            .query
            .unwrap_or_else(QueryNode::default_insight);
        let enabled = flags.get(&config.alternate_backend_flag);
        let classification = enabled && query.targets_alternate_backend();
        let reactor = Arc::new(Self {
            flags: Arc::clone(&flags),
            flag_name: config.alternate_backend_flag.clone(),
            state: Mutex::new(ReactorState {
                query,
                cached: Some(classification),
                reported: classification,
            }),
            subscribers: Mutex::new(Vec::new()),
        });
        holder.subscribe(Arc::downgrade(&reactor) as Weak<dyn InsightListener>);
        flags.subscribe(Arc::downgrade(&reactor) as Weak<dyn FlagListener>);
        reactor
    }

    pub fn subscribe(&self) -> Receiver<ReactorEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn query(&self) -> QueryNode {
        self.state().query.clone()
    }

    /// Replaces the derived query and emits `QuerySet`, followed by
    /// `ClassificationChanged` when the classification flips.
    pub fn set_query(&self, query: QueryNode) {
        let mut state = self.state();
        debug!(
            event = "query_set",
            kind = query.kind().map(NodeKind::as_str).unwrap_or("unknown")
        );
        state.query = query.clone();
        state.cached = None;
        self.emit(ReactorEvent::QuerySet(query));
        self.refresh_classification(&mut state);
    }

    /// True when the alternate backend flag is on and the derived query is an
    /// insight that backend serves.
    pub fn is_alternate_backend_insight(&self) -> bool {
        let mut state = self.state();
        self.classify(&mut state)
    }

    fn derive(&self, update: &InsightUpdate) -> Result<Option<QueryNode>, ConversionError> {
        if let Some(query) = &update.patch.query {
            return Ok(Some(query.clone()));
        }
        if !update.intent.overrides_filter() {
            return Ok(None);
        }
        match update.patch.usable_filters() {
            Some(filters) => filters_to_query(filters).map(Some),
            None => Ok(None),
        }
    }

    fn classify(&self, state: &mut ReactorState) -> bool {
        if let Some(value) = state.cached {
            return value;
        }
        let value = self.flags.get(&self.flag_name) && state.query.targets_alternate_backend();
        state.cached = Some(value);
        value
    }

    fn refresh_classification(&self, state: &mut ReactorState) {
        let value = self.classify(state);
        if value != state.reported {
            state.reported = value;
            debug!(event = "classification_changed", value);
            self.emit(ReactorEvent::ClassificationChanged(value));
        }
    }

    fn emit(&self, event: ReactorEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn state(&self) -> MutexGuard<'_, ReactorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InsightListener for DerivedQueryReactor {
    fn insight_changed(&self, update: &InsightUpdate) -> Result<(), InsightError> {
        match self.derive(update) {
            Ok(Some(query)) => {
                self.set_query(query);
                Ok(())
            }
            Ok(None) => {
                debug!(event = "insight_ignored");
                Ok(())
            }
            Err(err) => {
                warn!(event = "conversion_failed", error = %err);
                Err(err.into())
            }
        }
    }
}

impl FlagListener for DerivedQueryReactor {
    fn flags_changed(&self, change: &FlagChange) {
        if !change.touches(&self.flag_name) {
            return;
        }
        let mut state = self.state();
        state.cached = None;
        self.refresh_classification(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insight_core::{Insight, InsightPatch, UpdateIntent};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn flag_values(enabled: bool) -> BTreeMap<String, bool> {
        BTreeMap::from([(insight_flags::HOGQL_INSIGHTS.to_string(), enabled)])
    }

    #[test]
    fn seeds_from_stored_query() {
        let stored = QueryNode::new(json!({
            "kind": "DataTableNode",
            "source": {"kind": "EventsQuery"}
        }));
        let holder = InsightStateHolder::new(Insight {
            query: Some(stored.clone()),
            filters: None,
        });
        let reactor = DerivedQueryReactor::new(
            &holder,
            Arc::new(FlagStore::new()),
            &InsightConfig::default(),
        );
        assert_eq!(reactor.query(), stored);
    }

    #[test]
    fn classification_cache_follows_flag_writes() {
        let flags = Arc::new(FlagStore::new());
        let holder = InsightStateHolder::default();
        let reactor =
            DerivedQueryReactor::new(&holder, Arc::clone(&flags), &InsightConfig::default());
        let events = reactor.subscribe();
        assert!(!reactor.is_alternate_backend_insight());

        flags.set_flags(&[insight_flags::HOGQL_INSIGHTS], &flag_values(true));
        assert!(reactor.is_alternate_backend_insight());

        flags.set_flags(&[insight_flags::HOGQL_INSIGHTS], &flag_values(false));
        assert!(!reactor.is_alternate_backend_insight());

        let seen: Vec<_> = events.try_iter().collect();
        assert_eq!(
            seen,
            vec![
                ReactorEvent::ClassificationChanged(true),
                ReactorEvent::ClassificationChanged(false),
            ]
        );
    }

    #[test]
    fn concurrent_readers_see_flag_writes() {
        let flags = Arc::new(FlagStore::new());
        let holder = InsightStateHolder::default();
        let reactor =
            DerivedQueryReactor::new(&holder, Arc::clone(&flags), &InsightConfig::default());
        let events = reactor.subscribe();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let reactor = Arc::clone(&reactor);
                scope.spawn(move || {
                    for _ in 0..200 {
                        reactor.is_alternate_backend_insight();
                    }
                });
            }
            scope.spawn(|| {
                for round in 0..100 {
                    flags.set_flags(&[insight_flags::HOGQL_INSIGHTS], &flag_values(round % 2 == 0));
                }
            });
        });

        // Every write flips the flag, so every write flips the classification.
        let seen: Vec<_> = events.try_iter().collect();
        assert_eq!(seen.len(), 100);
        for (round, event) in seen.iter().enumerate() {
            assert_eq!(event, &ReactorEvent::ClassificationChanged(round % 2 == 0));
        }
        assert!(!reactor.is_alternate_backend_insight());
        flags.set_flags(&[insight_flags::HOGQL_INSIGHTS], &flag_values(true));
        assert!(reactor.is_alternate_backend_insight());
        assert_eq!(reactor.query(), QueryNode::default_insight());
    }

    #[test]
    fn unrelated_flag_writes_are_ignored() {
        let flags = Arc::new(FlagStore::new());
        let holder = InsightStateHolder::default();
        let reactor =
            DerivedQueryReactor::new(&holder, Arc::clone(&flags), &InsightConfig::default());
        let events = reactor.subscribe();

        flags.set_flags(
            &["other-flag"],
            &BTreeMap::from([("other-flag".to_string(), true)]),
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn reads_configured_flag_name() {
        let config = InsightConfig {
            alternate_backend_flag: "hogql-beta".to_string(),
            ..InsightConfig::default()
        };
        let flags = Arc::new(FlagStore::new());
        let holder = InsightStateHolder::default();
        let reactor = DerivedQueryReactor::new(&holder, Arc::clone(&flags), &config);

        flags.set_flags(&[insight_flags::HOGQL_INSIGHTS], &flag_values(true));
        assert!(!reactor.is_alternate_backend_insight());

        flags.set_flags(
            &["hogql-beta"],
            &BTreeMap::from([("hogql-beta".to_string(), true)]),
        );
        assert!(reactor.is_alternate_backend_insight());
    }

    #[test]
    fn closed_subscribers_are_dropped() {
        let holder = InsightStateHolder::default();
        let reactor = DerivedQueryReactor::new(
            &holder,
            Arc::new(FlagStore::new()),
            &InsightConfig::default(),
        );
        drop(reactor.subscribe());
        let live = reactor.subscribe();

        holder
            .set_insight(
                InsightPatch::query(QueryNode::default_insight()),
                UpdateIntent::default(),
            )
            .expect("set insight");

        assert_eq!(reactor.subscribers.lock().expect("subscribers").len(), 1);
        assert_eq!(
            live.try_recv().ok(),
            Some(ReactorEvent::QuerySet(QueryNode::default_insight()))
        );
    }
}
