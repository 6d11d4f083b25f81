//! Built-in data transforms run by the default worker.
//!
//! Every transform works on a slice of JSON records. Fields are addressed
//! with dotted paths (`"owner.name"`, `"tags.0"`).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::models::TaskKind;

/// Why a transform rejected its input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

// ── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    #[default]
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    /// Field present and not null. A `value` of `false` inverts the test.
    Exists,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub field: String,
    #[serde(default)]
    pub op: FilterOp,
    #[serde(default)]
    pub value: JsonValue,
}

impl FilterOptions {
    pub fn new(field: impl Into<String>, op: FilterOp, value: JsonValue) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortOptions {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortOptions {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    #[default]
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    /// Numeric field to aggregate. Not needed for `count`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default)]
    pub op: AggregateOp,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformOptions {
    /// Keep only these paths. Applied first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Vec<String>>,
    /// Old key → new key. Applied after `select`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rename: BTreeMap<String, String>,
    /// Values for keys that are missing or null. Applied last.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub defaults: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeOptions {
    pub field: String,
}

impl AnalyzeOptions {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

/// Summary statistics produced by `analyze`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    /// Numeric values seen
    pub count: usize,
    /// Records where the field is missing or null
    pub nulls: usize,
    pub sum: f64,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub median: Option<f64>,
    /// Population standard deviation
    pub stddev: Option<f64>,
}

// ── Dispatch ────────────────────────────────────────────────────────────────

/// Run the transform named by `kind`.
pub fn run(
    kind: TaskKind,
    data: &[JsonValue],
    options: &JsonValue,
) -> Result<JsonValue, TransformError> {
    match kind {
        TaskKind::Filter => Ok(JsonValue::Array(filter(data, &parse_options(options)?))),
        TaskKind::Sort => Ok(JsonValue::Array(sort(data, &parse_options(options)?))),
        TaskKind::Aggregate => aggregate(data, &parse_options(options)?),
        TaskKind::Transform => Ok(JsonValue::Array(transform(data, &parse_options(options)?)?)),
        TaskKind::Analyze => {
            let analysis = analyze(data, &parse_options(options)?);
            serde_json::to_value(analysis).map_err(|e| TransformError::InvalidData(e.to_string()))
        },
    }
}

fn parse_options<T: DeserializeOwned>(options: &JsonValue) -> Result<T, TransformError> {
    let options = if options.is_null() {
        json!({})
    } else {
        options.clone()
    };
    serde_json::from_value(options).map_err(|e| TransformError::InvalidOptions(e.to_string()))
}

// ── Field access and comparison ─────────────────────────────────────────────

/// Resolve a dotted path inside a record.
pub fn lookup<'a>(record: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    if path.is_empty() {
        return Some(record);
    }
    path.split('.').try_fold(record, |current, segment| match current {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn present(value: Option<&JsonValue>) -> Option<&JsonValue> {
    value.filter(|v| !v.is_null())
}

fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn type_rank(value: &JsonValue) -> u8 {
    match value {
        JsonValue::Number(_) => 0,
        JsonValue::String(_) => 1,
        JsonValue::Bool(_) => 2,
        JsonValue::Array(_) => 3,
        JsonValue::Object(_) => 4,
        JsonValue::Null => 5,
    }
}

/// Ordering for comparable scalars: numbers numerically, strings
/// lexically, booleans false < true.
fn compare_scalars(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

// ── filter ──────────────────────────────────────────────────────────────────

pub fn filter(data: &[JsonValue], options: &FilterOptions) -> Vec<JsonValue> {
    data.iter()
        .filter(|record| matches_filter(record, options))
        .cloned()
        .collect()
}

fn matches_filter(record: &JsonValue, options: &FilterOptions) -> bool {
    let field = lookup(record, &options.field);
    let target = &options.value;
    match options.op {
        FilterOp::Eq => values_equal(field.unwrap_or(&JsonValue::Null), target),
        FilterOp::Ne => !values_equal(field.unwrap_or(&JsonValue::Null), target),
        FilterOp::Gt => ordering_is(field, target, |o| o == Ordering::Greater),
        FilterOp::Gte => ordering_is(field, target, |o| o != Ordering::Less),
        FilterOp::Lt => ordering_is(field, target, |o| o == Ordering::Less),
        FilterOp::Lte => ordering_is(field, target, |o| o != Ordering::Greater),
        FilterOp::Contains => match field {
            Some(JsonValue::String(s)) => target.as_str().is_some_and(|needle| s.contains(needle)),
            Some(JsonValue::Array(items)) => items.iter().any(|item| values_equal(item, target)),
            _ => false,
        },
        FilterOp::Exists => present(field).is_some() == target.as_bool().unwrap_or(true),
    }
}

fn ordering_is(
    field: Option<&JsonValue>,
    target: &JsonValue,
    accept: impl Fn(Ordering) -> bool,
) -> bool {
    field
        .and_then(|value| compare_scalars(value, target))
        .is_some_and(accept)
}

// ── sort ────────────────────────────────────────────────────────────────────

/// Stable sort. Missing and null values always go last.
pub fn sort(data: &[JsonValue], options: &SortOptions) -> Vec<JsonValue> {
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| {
        let left = present(lookup(a, &options.field));
        let right = present(lookup(b, &options.field));
        match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => {
                let ordering = compare_scalars(x, y)
                    .unwrap_or_else(|| type_rank(x).cmp(&type_rank(y)));
                match options.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            },
        }
    });
    sorted
}

// ── aggregate ───────────────────────────────────────────────────────────────

pub fn aggregate(data: &[JsonValue], options: &AggregateOptions) -> Result<JsonValue, TransformError> {
    if options.op != AggregateOp::Count && options.field.is_none() {
        return Err(TransformError::InvalidOptions(format!(
            "aggregate op '{}' requires a field",
            serde_json::to_value(options.op)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default()
        )));
    }

    let Some(group_by) = options.group_by.as_deref() else {
        let records: Vec<&JsonValue> = data.iter().collect();
        return Ok(json!({
            "value": reduce(&records, options),
            "count": records.len(),
        }));
    };

    // Groups keep first-seen order.
    let mut groups: Vec<(JsonValue, Vec<&JsonValue>)> = Vec::new();
    for record in data {
        let key = lookup(record, group_by).cloned().unwrap_or(JsonValue::Null);
        match groups.iter_mut().find(|(k, _)| values_equal(k, &key)) {
            Some((_, members)) => members.push(record),
            None => groups.push((key, vec![record])),
        }
    }

    Ok(JsonValue::Array(
        groups
            .into_iter()
            .map(|(key, members)| {
                json!({
                    "key": key,
                    "value": reduce(&members, options),
                    "count": members.len(),
                })
            })
            .collect(),
    ))
}

fn reduce(records: &[&JsonValue], options: &AggregateOptions) -> JsonValue {
    if options.op == AggregateOp::Count {
        return json!(records.len());
    }
    let field = options.field.as_deref().unwrap_or_default();
    let numbers: Vec<f64> = records
        .iter()
        .filter_map(|record| lookup(record, field).and_then(JsonValue::as_f64))
        .collect();

    let result = match options.op {
        AggregateOp::Count => Some(records.len() as f64),
        AggregateOp::Sum => Some(numbers.iter().sum()),
        AggregateOp::Avg => {
            (!numbers.is_empty()).then(|| numbers.iter().sum::<f64>() / numbers.len() as f64)
        },
        AggregateOp::Min => numbers.iter().copied().reduce(f64::min),
        AggregateOp::Max => numbers.iter().copied().reduce(f64::max),
    };
    result.map_or(JsonValue::Null, |n| json!(n))
}

// ── transform ───────────────────────────────────────────────────────────────

pub fn transform(
    data: &[JsonValue],
    options: &TransformOptions,
) -> Result<Vec<JsonValue>, TransformError> {
    data.iter()
        .enumerate()
        .map(|(index, record)| {
            let JsonValue::Object(source) = record else {
                return Err(TransformError::InvalidData(format!(
                    "record {} is not an object",
                    index
                )));
            };

            let mut out = match &options.select {
                Some(paths) => {
                    let mut selected = Map::new();
                    for path in paths {
                        if let Some(value) = lookup(record, path) {
                            selected.insert(path.clone(), value.clone());
                        }
                    }
                    selected
                },
                None => source.clone(),
            };

            for (from, to) in &options.rename {
                if let Some(value) = out.remove(from) {
                    out.insert(to.clone(), value);
                }
            }

            for (key, default) in &options.defaults {
                if out.get(key).map_or(true, JsonValue::is_null) {
                    out.insert(key.clone(), default.clone());
                }
            }

            Ok(JsonValue::Object(out))
        })
        .collect()
}

// ── analyze ─────────────────────────────────────────────────────────────────

pub fn analyze(data: &[JsonValue], options: &AnalyzeOptions) -> Analysis {
    let mut nulls = 0;
    let mut numbers = Vec::with_capacity(data.len());
    for record in data {
        match present(lookup(record, &options.field)) {
            None => nulls += 1,
            Some(value) => {
                if let Some(n) = value.as_f64() {
                    numbers.push(n);
                }
            },
        }
    }

    let count = numbers.len();
    let sum: f64 = numbers.iter().sum();
    if count == 0 {
        return Analysis {
            nulls,
            ..Analysis::default()
        };
    }

    let mean = sum / count as f64;
    let variance = numbers.iter().map(|n| (n - mean).powi(2)).sum::<f64>() / count as f64;
    numbers.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let median = if count % 2 == 0 {
        (numbers[count / 2 - 1] + numbers[count / 2]) / 2.0
    } else {
        numbers[count / 2]
    };

    Analysis {
        count,
        nulls,
        sum,
        mean: Some(mean),
        min: numbers.first().copied(),
        max: numbers.last().copied(),
        median: Some(median),
        stddev: Some(variance.sqrt()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Vec<JsonValue> {
        vec![
            json!({"name": "ada", "team": "core", "age": 36, "tags": ["math"]}),
            json!({"name": "bob", "team": "ops", "age": 41}),
            json!({"name": "cy", "team": "core", "age": null}),
            json!({"name": "dee", "team": "ops", "age": 29, "tags": ["math", "ops"]}),
        ]
    }

    fn names(records: &[JsonValue]) -> Vec<&str> {
        records.iter().filter_map(|r| r["name"].as_str()).collect()
    }

    // ── filter ──────────────────────────────────────────────────────────

    #[test]
    fn test_filter_comparisons() {
        let data = people();
        let older = filter(&data, &FilterOptions::new("age", FilterOp::Gt, json!(30)));
        assert_eq!(names(&older), vec!["ada", "bob"]);

        let core = filter(&data, &FilterOptions::new("team", FilterOp::Eq, json!("core")));
        assert_eq!(names(&core), vec!["ada", "cy"]);

        let not_core = filter(&data, &FilterOptions::new("team", FilterOp::Ne, json!("core")));
        assert_eq!(names(&not_core), vec!["bob", "dee"]);
    }

    #[test]
    fn test_filter_contains_and_exists() {
        let data = people();
        let math = filter(&data, &FilterOptions::new("tags", FilterOp::Contains, json!("ops")));
        assert_eq!(names(&math), vec!["dee"]);

        let with_age = filter(&data, &FilterOptions::new("age", FilterOp::Exists, JsonValue::Null));
        assert_eq!(names(&with_age), vec!["ada", "bob", "dee"]);

        let without_age = filter(&data, &FilterOptions::new("age", FilterOp::Exists, json!(false)));
        assert_eq!(names(&without_age), vec!["cy"]);
    }

    #[test]
    fn test_integer_and_float_compare_equal() {
        let data = vec![json!({"v": 1}), json!({"v": 1.0}), json!({"v": "1"})];
        assert_eq!(filter(&data, &FilterOptions::new("v", FilterOp::Eq, json!(1))).len(), 2);
    }

    // ── sort ────────────────────────────────────────────────────────────

    #[test]
    fn test_sort_puts_nulls_last_both_ways() {
        let data = people();
        assert_eq!(names(&sort(&data, &SortOptions::ascending("age"))), vec![
            "dee", "ada", "bob", "cy"
        ]);
        assert_eq!(names(&sort(&data, &SortOptions::descending("age"))), vec![
            "bob", "ada", "dee", "cy"
        ]);
    }

    #[test]
    fn test_sort_is_stable() {
        let data = people();
        assert_eq!(names(&sort(&data, &SortOptions::ascending("team"))), vec![
            "ada", "cy", "bob", "dee"
        ]);
    }

    // ── aggregate ───────────────────────────────────────────────────────

    #[test]
    fn test_grouped_aggregate_keeps_first_seen_order() {
        let result = aggregate(&people(), &AggregateOptions {
            group_by: Some("team".into()),
            field: Some("age".into()),
            op: AggregateOp::Sum,
        })
        .unwrap();
        assert_eq!(
            result,
            json!([
                {"key": "core", "value": 36.0, "count": 2},
                {"key": "ops", "value": 70.0, "count": 2},
            ])
        );
    }

    #[test]
    fn test_ungrouped_aggregates() {
        let data = people();
        let count = aggregate(&data, &AggregateOptions::default()).unwrap();
        assert_eq!(count, json!({"value": 4, "count": 4}));

        let avg = aggregate(&data, &AggregateOptions {
            field: Some("age".into()),
            op: AggregateOp::Avg,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(avg["value"], json!(106.0 / 3.0));

        let max = aggregate(&data, &AggregateOptions {
            field: Some("age".into()),
            op: AggregateOp::Max,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(max["value"], json!(41.0));
    }

    #[test]
    fn test_aggregate_requires_field_for_numeric_ops() {
        let err = aggregate(&people(), &AggregateOptions {
            op: AggregateOp::Sum,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, TransformError::InvalidOptions(_)));
    }

    // ── transform ───────────────────────────────────────────────────────

    #[test]
    fn test_transform_select_rename_defaults() {
        let options = TransformOptions {
            select: Some(vec!["name".into(), "age".into()]),
            rename: BTreeMap::from([("name".to_string(), "label".to_string())]),
            defaults: Map::from_iter([("age".to_string(), json!(0))]),
        };
        let out = transform(&people()[1..3], &options).unwrap();
        assert_eq!(out, vec![
            json!({"label": "bob", "age": 41}),
            json!({"label": "cy", "age": 0}),
        ]);
    }

    #[test]
    fn test_transform_rejects_non_objects() {
        let err = transform(&[json!(1)], &TransformOptions::default()).unwrap_err();
        assert!(matches!(err, TransformError::InvalidData(_)));
    }

    // ── analyze ─────────────────────────────────────────────────────────

    #[test]
    fn test_analyze_statistics() {
        let data = vec![
            json!({"score": 2}),
            json!({"score": 4}),
            json!({"score": 4}),
            json!({"score": 4}),
            json!({"score": 5}),
            json!({"score": 5}),
            json!({"score": 7}),
            json!({"score": 9}),
            json!({"other": 1}),
        ];
        let analysis = analyze(&data, &AnalyzeOptions::new("score"));
        assert_eq!(analysis.count, 8);
        assert_eq!(analysis.nulls, 1);
        assert_eq!(analysis.sum, 40.0);
        assert_eq!(analysis.mean, Some(5.0));
        assert_eq!(analysis.median, Some(4.5));
        assert_eq!(analysis.min, Some(2.0));
        assert_eq!(analysis.max, Some(9.0));
        assert_eq!(analysis.stddev, Some(2.0));
    }

    #[test]
    fn test_analyze_empty_field() {
        let analysis = analyze(&[json!({}), json!({"x": null})], &AnalyzeOptions::new("x"));
        assert_eq!(analysis.count, 0);
        assert_eq!(analysis.nulls, 2);
        assert!(analysis.mean.is_none());
    }

    // ── dispatch ────────────────────────────────────────────────────────

    #[test]
    fn test_run_parses_options_and_dispatches() {
        let result = run(
            TaskKind::Filter,
            &people(),
            &json!({"field": "team", "op": "eq", "value": "ops"}),
        )
        .unwrap();
        assert_eq!(result.as_array().map(Vec::len), Some(2));

        let err = run(TaskKind::Sort, &people(), &json!({"direction": "sideways"})).unwrap_err();
        assert!(matches!(err, TransformError::InvalidOptions(_)));

        // Null options are treated as an empty object.
        assert_eq!(
            run(TaskKind::Aggregate, &people(), &JsonValue::Null).unwrap(),
            json!({"value": 4, "count": 4})
        );
    }

    #[test]
    fn test_dotted_lookup() {
        let record = json!({"owner": {"name": "ada", "langs": ["rust", "ml"]}});
        assert_eq!(lookup(&record, "owner.name"), Some(&json!("ada")));
        assert_eq!(lookup(&record, "owner.langs.1"), Some(&json!("ml")));
        assert_eq!(lookup(&record, "owner.missing"), None);
    }
}
