//! Conversion of legacy insight filters into structured queries.
//!
//! The result is always an `InsightVizNode` wrapping the report query selected
//! by the filters' `insight` field. Insight-specific keys are copied verbatim
//! into the matching `<insight>Filter` object.

use insight_core::{ConversionError, LegacyFilters, NodeKind, QueryNode};
use serde_json::{json, Map, Value};

const ENTITY_OPTIONAL_FIELDS: &[&str] = &[
    "custom_name",
    "math",
    "math_property",
    "math_hogql",
    "math_group_type_index",
];

const BREAKDOWN_FIELDS: &[&str] = &[
    "breakdown",
    "breakdown_type",
    "breakdown_normalize_url",
    "breakdown_histogram_bin_count",
    "breakdown_group_type_index",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsightType {
    Trends,
    Funnels,
    Retention,
    Paths,
    Stickiness,
    Lifecycle,
}

impl InsightType {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TRENDS" => Some(Self::Trends),
            "FUNNELS" => Some(Self::Funnels),
            "RETENTION" => Some(Self::Retention),
            "PATHS" => Some(Self::Paths),
            "STICKINESS" => Some(Self::Stickiness),
            "LIFECYCLE" => Some(Self::Lifecycle),
            _ => None,
        }
    }

    fn node_kind(self) -> NodeKind {
        match self {
            Self::Trends => NodeKind::TrendsQuery,
            Self::Funnels => NodeKind::FunnelsQuery,
            Self::Retention => NodeKind::RetentionQuery,
            Self::Paths => NodeKind::PathsQuery,
            Self::Stickiness => NodeKind::StickinessQuery,
            Self::Lifecycle => NodeKind::LifecycleQuery,
        }
    }

    fn filter_key(self) -> &'static str {
        match self {
            Self::Trends => "trendsFilter",
            Self::Funnels => "funnelsFilter",
            Self::Retention => "retentionFilter",
            Self::Paths => "pathsFilter",
            Self::Stickiness => "stickinessFilter",
            Self::Lifecycle => "lifecycleFilter",
        }
    }

    fn filter_fields(self) -> &'static [&'static str] {
        match self {
            Self::Trends => &[
                "display",
                "compare",
                "formula",
                "smoothing_intervals",
                "show_legend",
                "show_values_on_series",
                "show_percent_stack_view",
                "aggregation_axis_format",
                "aggregation_axis_prefix",
                "aggregation_axis_postfix",
                "decimal_places",
            ],
            Self::Funnels => &[
                "funnel_viz_type",
                "funnel_order_type",
                "funnel_window_interval",
                "funnel_window_interval_unit",
                "funnel_step_reference",
                "funnel_from_step",
                "funnel_to_step",
                "breakdown_attribution_type",
                "breakdown_attribution_value",
                "bin_count",
                "exclusions",
                "layout",
            ],
            Self::Retention => &[
                "retention_type",
                "retention_reference",
                "total_intervals",
                "returning_entity",
                "target_entity",
                "period",
                "show_mean",
            ],
            Self::Paths => &[
                "include_event_types",
                "start_point",
                "end_point",
                "path_groupings",
                "exclude_events",
                "step_limit",
                "path_replacements",
                "local_path_cleaning_filters",
                "edge_limit",
                "min_edge_weight",
                "max_edge_weight",
                "funnel_paths",
                "funnel_filter",
            ],
            Self::Stickiness => &["display", "compare", "show_legend", "show_values_on_series"],
            Self::Lifecycle => &["toggledLifecycles", "show_legend", "show_values_on_series"],
        }
    }

    fn has_series(self) -> bool {
        !matches!(self, Self::Retention | Self::Paths)
    }

    fn has_interval(self) -> bool {
        self.has_series()
    }

    fn has_breakdown(self) -> bool {
        matches!(self, Self::Trends | Self::Funnels)
    }
}

/// Converts legacy filters into an `InsightVizNode` query.
pub fn filters_to_query(filters: &LegacyFilters) -> Result<QueryNode, ConversionError> {
    let insight = match filters.get("insight") {
        None | Some(Value::Null) => return Err(ConversionError::MissingInsight),
        Some(Value::String(raw)) => InsightType::parse(raw)
            .ok_or_else(|| ConversionError::UnsupportedInsight(raw.clone()))?,
        Some(other) => return Err(ConversionError::UnsupportedInsight(other.to_string())),
    };

    let mut source = Map::new();
    source.insert("kind".to_string(), json!(insight.node_kind().as_str()));

    if insight.has_series() {
        source.insert("series".to_string(), Value::Array(series(filters)?));
    }
    if insight.has_interval() {
        copy_field(filters, "interval", &mut source, "interval");
    }

    let date_range = pick(filters, &["date_from", "date_to"]);
    if !date_range.is_empty() {
        source.insert("dateRange".to_string(), Value::Object(date_range));
    }
    if let Some(properties) = filters.get("properties").filter(|v| !is_blank(v)) {
        source.insert("properties".to_string(), properties.clone());
    }
    copy_field(
        filters,
        "filter_test_accounts",
        &mut source,
        "filterTestAccounts",
    );
    copy_field(filters, "sampling_factor", &mut source, "samplingFactor");
    copy_field(
        filters,
        "aggregation_group_type_index",
        &mut source,
        "aggregation_group_type_index",
    );

    if insight.has_breakdown() {
        let breakdown = pick(filters, BREAKDOWN_FIELDS);
        if !breakdown.is_empty() {
            source.insert("breakdownFilter".to_string(), Value::Object(breakdown));
        }
    }

    let insight_filter = pick(filters, insight.filter_fields());
    if !insight_filter.is_empty() {
        source.insert(
            insight.filter_key().to_string(),
            Value::Object(insight_filter),
        );
    }

    Ok(QueryNode::new(json!({
        "kind": NodeKind::InsightVizNode.as_str(),
        "source": Value::Object(source),
    })))
}

fn series(filters: &LegacyFilters) -> Result<Vec<Value>, ConversionError> {
    let mut entities: Vec<(i64, usize, Value)> = Vec::new();
    for (field, kind) in [
        ("events", NodeKind::EventsNode),
        ("actions", NodeKind::ActionsNode),
    ] {
        let items = match filters.get(field) {
            None | Some(Value::Null) => continue,
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(ConversionError::invalid_field(field, "expected an array"));
            }
        };
        for item in items {
            let Value::Object(entity) = item else {
                return Err(ConversionError::invalid_field(
                    field,
                    "entity must be an object",
                ));
            };
            let order = entity
                .get("order")
                .and_then(Value::as_i64)
                .unwrap_or(i64::MAX);
            let node = entity_node(field, kind, entity)?;
            entities.push((order, entities.len(), node));
        }
    }
    entities.sort_by_key(|(order, seq, _)| (*order, *seq));
    Ok(entities.into_iter().map(|(_, _, node)| node).collect())
}

fn entity_node(
    field: &str,
    kind: NodeKind,
    entity: &Map<String, Value>,
) -> Result<Value, ConversionError> {
    let mut node = Map::new();
    node.insert("kind".to_string(), json!(kind.as_str()));
    let id = entity.get("id").cloned().unwrap_or(Value::Null);
    match kind {
        NodeKind::ActionsNode => {
            if id.is_null() {
                return Err(ConversionError::invalid_field(
                    field,
                    "action entity is missing 'id'",
                ));
            }
            node.insert("id".to_string(), id);
        }
        _ => {
            node.insert("event".to_string(), id);
        }
    }
    copy_field(entity, "name", &mut node, "name");
    for key in ENTITY_OPTIONAL_FIELDS {
        copy_field(entity, key, &mut node, key);
    }
    if let Some(properties) = entity.get("properties").filter(|v| !is_blank(v)) {
        node.insert("properties".to_string(), properties.clone());
    }
    Ok(Value::Object(node))
}

fn copy_field(from: &Map<String, Value>, key: &str, into: &mut Map<String, Value>, as_key: &str) {
    if let Some(value) = from.get(key).filter(|v| !v.is_null()) {
        into.insert(as_key.to_string(), value.clone());
    }
}

fn pick(from: &Map<String, Value>, keys: &[&str]) -> Map<String, Value> {
    let mut out = Map::new();
    for key in keys {
        copy_field(from, key, &mut out, key);
    }
    out
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => {
            map.is_empty()
                || map
                    .get("values")
                    .and_then(Value::as_array)
                    .is_some_and(|values| values.is_empty())
        }
        _ => false,
    }
}
