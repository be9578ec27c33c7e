use insight_core::{Insight, InsightError, InsightPatch, QueryNode, UpdateIntent};
use insight_data::{DerivedQueryReactor, InsightStateHolder, ReactorEvent};
use insight_flags::{FlagStore, InsightConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// One scripted action applied against the holder, the reactor or the flag
/// store.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    SetInsight {
        #[serde(default)]
        patch: InsightPatch,
        #[serde(default)]
        intent: UpdateIntent,
    },
    SetQuery {
        query: QueryNode,
    },
    SetFlags {
        flags: BTreeMap<String, bool>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutputLine {
    SetQuery { step: usize, query: Value },
    Classification { step: usize, alternate_backend: bool },
    Error { step: usize, message: String },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub lines: Vec<OutputLine>,
    pub query: Value,
    pub alternate_backend: bool,
}

/// Drives `steps` in order. Conversion failures are reported per step and do
/// not stop the run.
pub fn run_steps(config: &InsightConfig, insight: Insight, steps: Vec<Step>) -> RunSummary {
    let flags = Arc::new(FlagStore::from_config(config));
    let holder = InsightStateHolder::new(insight);
    let reactor = DerivedQueryReactor::new(&holder, Arc::clone(&flags), config);
    let events = reactor.subscribe();

    let mut lines = Vec::new();
    for (index, step) in steps.into_iter().enumerate() {
        let step_no = index + 1;
        let result: Result<(), InsightError> = match step {
            Step::SetInsight { patch, intent } => holder.set_insight(patch, intent),
            Step::SetQuery { query } => {
                reactor.set_query(query);
                Ok(())
            }
            Step::SetFlags { flags: values } => {
                let names: Vec<&str> = values.keys().map(String::as_str).collect();
                flags.set_flags(names.as_slice(), &values);
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(event = "step_failed", step = step_no, error = %err);
            lines.push(OutputLine::Error {
                step: step_no,
                message: err.to_string(),
            });
        }
        for event in events.try_iter() {
            lines.push(match event {
                ReactorEvent::QuerySet(query) => OutputLine::SetQuery {
                    step: step_no,
                    query: query.into_value(),
                },
                ReactorEvent::ClassificationChanged(value) => OutputLine::Classification {
                    step: step_no,
                    alternate_backend: value,
                },
            });
        }
    }

    let summary = RunSummary {
        lines,
        query: reactor.query().into_value(),
        alternate_backend: reactor.is_alternate_backend_insight(),
    };
    info!(
        event = "run_complete",
        lines = summary.lines.len(),
        alternate_backend = summary.alternate_backend
    );
    summary
}
