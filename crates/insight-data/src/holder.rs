use insight_core::{Insight, InsightError, InsightPatch, InsightUpdate, UpdateIntent};
use std::sync::{Mutex, PoisonError, RwLock, Weak};
use tracing::debug;

pub trait InsightListener: Send + Sync {
    fn insight_changed(&self, update: &InsightUpdate) -> Result<(), InsightError>;
}

/// Owns the canonical insight and broadcasts every mutation to its listeners.
///
/// Mutations are serialized: a second `set_insight` waits until every
/// listener has seen the first one. Listeners may read `insight()` but must
/// not call `set_insight` from inside `insight_changed`.
pub struct InsightStateHolder {
    insight: RwLock<Insight>,
    listeners: Mutex<Vec<Weak<dyn InsightListener>>>,
    dispatch: Mutex<()>,
}

impl Default for InsightStateHolder {
    fn default() -> Self {
        Self::new(Insight::default())
    }
}

impl InsightStateHolder {
    pub fn new(initial: Insight) -> Self {
        Self {
            insight: RwLock::new(initial),
            listeners: Mutex::new(Vec::new()),
            dispatch: Mutex::new(()),
        }
    }

    pub fn insight(&self) -> Insight {
        self.insight
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe(&self, listener: Weak<dyn InsightListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Merges `patch` into the stored insight and notifies every listener
    /// before returning. Every listener runs even if an earlier one fails;
    /// the first failure is returned.
    pub fn set_insight(
        &self,
        patch: InsightPatch,
        intent: UpdateIntent,
    ) -> Result<(), InsightError> {
        let _dispatch = self.dispatch.lock().unwrap_or_else(PoisonError::into_inner);
        let merged = {
            let mut insight = self.insight.write().unwrap_or_else(PoisonError::into_inner);
            *insight = insight.merged(&patch);
            insight.clone()
        };
        debug!(
            event = "insight_set",
            has_query = patch.query.is_some(),
            has_filters = patch.filters.is_some(),
            override_filter = intent.overrides_filter()
        );

        let update = InsightUpdate {
            patch,
            insight: merged,
            intent,
        };
        let live: Vec<_> = {
            let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.retain(|listener| listener.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };

        let mut first_error = None;
        for listener in live {
            if let Err(err) = listener.insight_changed(&update) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insight_core::{ConversionError, QueryNode};
    use std::sync::Arc;

    struct Scripted {
        result: Result<(), InsightError>,
        seen: Mutex<Vec<InsightUpdate>>,
    }

    impl Scripted {
        fn new(result: Result<(), InsightError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl InsightListener for Scripted {
        fn insight_changed(&self, update: &InsightUpdate) -> Result<(), InsightError> {
            self.seen.lock().expect("seen lock").push(update.clone());
            self.result.clone()
        }
    }

    #[test]
    fn broadcasts_merged_insight_and_intent() {
        let holder = InsightStateHolder::default();
        let listener = Scripted::new(Ok(()));
        holder.subscribe(Arc::downgrade(&listener) as Weak<dyn InsightListener>);

        holder
            .set_insight(
                InsightPatch::query(QueryNode::default_insight()),
                UpdateIntent::override_filter(),
            )
            .expect("set insight");

        let seen = listener.seen.lock().expect("seen lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].insight.query, Some(QueryNode::default_insight()));
        assert!(seen[0].intent.overrides_filter());
        assert_eq!(holder.insight().query, Some(QueryNode::default_insight()));
    }

    #[test]
    fn keeps_merged_insight_and_notifies_all_on_failure() {
        let holder = InsightStateHolder::default();
        let failing = Scripted::new(Err(ConversionError::MissingInsight.into()));
        let healthy = Scripted::new(Ok(()));
        holder.subscribe(Arc::downgrade(&failing) as Weak<dyn InsightListener>);
        holder.subscribe(Arc::downgrade(&healthy) as Weak<dyn InsightListener>);

        let result = holder.set_insight(
            InsightPatch::query(QueryNode::default_insight()),
            UpdateIntent::default(),
        );

        assert_eq!(
            result,
            Err(InsightError::Conversion(ConversionError::MissingInsight))
        );
        assert_eq!(healthy.seen.lock().expect("seen lock").len(), 1);
        assert!(holder.insight().query.is_some());
    }

    #[test]
    fn dropped_listener_is_skipped() {
        let holder = InsightStateHolder::default();
        let listener = Scripted::new(Err(ConversionError::MissingInsight.into()));
        holder.subscribe(Arc::downgrade(&listener) as Weak<dyn InsightListener>);
        drop(listener);

        assert!(holder
            .set_insight(InsightPatch::default(), UpdateIntent::default())
            .is_ok());
    }
}
