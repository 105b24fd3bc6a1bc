//! Response-merge arithmetic
//!
//! Combines per-backend responses into the single response a client would
//! have seen from one ideal store. Rows are united by `(series, tag set)`;
//! points are keyed by timestamp. When two responses disagree on a
//! timestamp, the response appearing later in the input wins, so callers
//! order inputs from coarsest data to finest.

use ordered_float::OrderedFloat;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::error::{GateError, GateResult};
use crate::response::{Response, Row, StatementResult};

/// Timestamp key used to align and order points. Numeric timestamps
/// compare numerically regardless of integer/float representation.
#[derive(Debug, Clone)]
enum TimeKey {
    Int(i128),
    Float(OrderedFloat<f64>),
    Text(String),
}

impl TimeKey {
    fn from_value(v: &Value) -> TimeKey {
        match v {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    TimeKey::Int(i as i128)
                } else if let Some(u) = n.as_u64() {
                    TimeKey::Int(u as i128)
                } else {
                    TimeKey::Float(OrderedFloat(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            Value::String(s) => TimeKey::Text(s.clone()),
            other => TimeKey::Text(other.to_string()),
        }
    }
}

impl Ord for TimeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        use TimeKey::*;
        match (self, other) {
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.cmp(b),
            (Int(a), Float(b)) => OrderedFloat(*a as f64).cmp(b),
            (Float(a), Int(b)) => a.cmp(&OrderedFloat(*b as f64)),
            (Text(a), Text(b)) => a.cmp(b),
            (Text(_), _) => Ordering::Greater,
            (_, Text(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for TimeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimeKey {}

/// Accumulates one output row: identity, columns, and points by timestamp.
struct RowAcc {
    name: String,
    tags: BTreeMap<String, String>,
    columns: Vec<String>,
    points: BTreeMap<TimeKey, Vec<Value>>,
}

impl RowAcc {
    fn new(row: &Row) -> RowAcc {
        RowAcc {
            name: row.name.clone(),
            tags: row.tags.clone(),
            columns: row.columns.clone(),
            points: BTreeMap::new(),
        }
    }

    fn into_row(self) -> Row {
        Row {
            name: self.name,
            tags: self.tags,
            columns: self.columns,
            values: self.points.into_values().collect(),
        }
    }
}

/// Union accumulator keyed by `(series, tags)` preserving first-seen order.
struct RowUnion {
    accs: Vec<RowAcc>,
    index: HashMap<(String, BTreeMap<String, String>), usize>,
}

impl RowUnion {
    fn new() -> RowUnion {
        RowUnion {
            accs: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn slot(&mut self, row: &Row) -> GateResult<&mut RowAcc> {
        let key = row.key();
        let idx = match self.index.get(&key).copied() {
            Some(i) => {
                if self.accs[i].columns != row.columns {
                    return Err(GateError::Merge(format!(
                        "series '{}' has mismatched columns across responses",
                        row.name
                    )));
                }
                i
            }
            None => {
                self.accs.push(RowAcc::new(row));
                self.index.insert(key, self.accs.len() - 1);
                self.accs.len() - 1
            }
        };
        Ok(&mut self.accs[idx])
    }

    /// Insert points, replacing any existing point at the same timestamp.
    fn overwrite(&mut self, row: &Row) -> GateResult<()> {
        let acc = self.slot(row)?;
        for tuple in &row.values {
            let time = tuple.first().ok_or_else(|| {
                GateError::Merge(format!("series '{}' has a point without a time", row.name))
            })?;
            acc.points.insert(TimeKey::from_value(time), tuple.clone());
        }
        Ok(())
    }

    /// Insert points, adding value columns element-wise at shared
    /// timestamps (an absent contribution is the identity).
    fn accumulate(&mut self, row: &Row) -> GateResult<()> {
        let acc = self.slot(row)?;
        for tuple in &row.values {
            let time = tuple.first().ok_or_else(|| {
                GateError::Merge(format!("series '{}' has a point without a time", row.name))
            })?;
            let key = TimeKey::from_value(time);
            match acc.points.get_mut(&key) {
                Some(existing) => {
                    for (i, v) in tuple.iter().enumerate().skip(1) {
                        if i < existing.len() {
                            existing[i] = add_values(&existing[i], v);
                        }
                    }
                }
                None => {
                    acc.points.insert(key, tuple.clone());
                }
            }
        }
        Ok(())
    }

    fn into_rows(self) -> Vec<Row> {
        self.accs.into_iter().map(RowAcc::into_row).collect()
    }
}

/// Merge responses into one. Statement slots are merged positionally; rows
/// are united by `(series, tags)` with later inputs winning on duplicate
/// timestamps. Merging zero responses yields the empty response.
pub fn merge(responses: &[Response]) -> GateResult<Response> {
    let slots = responses.iter().map(|r| r.results.len()).max().unwrap_or(0);
    let mut results = Vec::with_capacity(slots);
    for slot in 0..slots {
        let mut union = RowUnion::new();
        for response in responses {
            if let Some(result) = response.results.get(slot) {
                for row in &result.series {
                    union.overwrite(row)?;
                }
            }
        }
        results.push(StatementResult {
            series: union.into_rows(),
            error: None,
        });
    }
    Ok(Response {
        results,
        error: None,
    })
}

/// Merge where `primary`'s points override `secondary`'s on any shared
/// `(series, tags, timestamp)`.
pub fn merge_preferred(primary: &Response, secondary: &Response) -> GateResult<Response> {
    merge(&[secondary.clone(), primary.clone()])
}

/// Flatten a response into its rows. A response-level error fails the
/// extraction.
pub fn extract_rows(response: &Response) -> GateResult<Vec<Row>> {
    if let Some(err) = response.error_message() {
        return Err(GateError::ResponseError(err.to_string()));
    }
    Ok(response
        .results
        .iter()
        .flat_map(|r| r.series.iter().cloned())
        .collect())
}

/// Sum row groups together: rows aligned by `(series, tags)`, values summed
/// element-wise at matching timestamps. A group without a point at some
/// timestamp simply contributes nothing there.
pub fn sum_rows(groups: &[Vec<Row>]) -> GateResult<Vec<Row>> {
    let mut union = RowUnion::new();
    for group in groups {
        for row in group {
            union.accumulate(row)?;
        }
    }
    Ok(union.into_rows())
}

/// Divide numerator rows by denominator rows aligned on
/// `(series, tags, timestamp)`, producing rows with the supplied columns.
/// Points missing from either side are dropped, as are points whose
/// denominator is zero.
pub fn divide_rows(
    numerators: &[Row],
    denominators: &[Row],
    out_columns: &[&str],
) -> GateResult<Vec<Row>> {
    let mut den_index: HashMap<(String, BTreeMap<String, String>), BTreeMap<TimeKey, f64>> =
        HashMap::new();
    for row in denominators {
        let points = den_index.entry(row.key()).or_default();
        for tuple in &row.values {
            if let (Some(time), Some(value)) = (tuple.first(), tuple.get(1)) {
                if let Some(f) = value_as_f64(value) {
                    points.insert(TimeKey::from_value(time), f);
                }
            }
        }
    }

    let mut out = Vec::new();
    for row in numerators {
        let Some(den_points) = den_index.get(&row.key()) else {
            continue;
        };
        let mut values = Vec::new();
        for tuple in &row.values {
            let (Some(time), Some(value)) = (tuple.first(), tuple.get(1)) else {
                continue;
            };
            let Some(num) = value_as_f64(value) else {
                continue;
            };
            let Some(&den) = den_points.get(&TimeKey::from_value(time)) else {
                continue;
            };
            if den == 0.0 {
                continue;
            }
            values.push(vec![time.clone(), number_value(num / den)]);
        }
        if !values.is_empty() {
            out.push(Row {
                name: row.name.clone(),
                tags: row.tags.clone(),
                columns: out_columns.iter().map(|c| c.to_string()).collect(),
                values,
            });
        }
    }
    Ok(out)
}

fn value_as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

/// Render a number as an integer when it is one, keeping JSON output tidy.
fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9e15 {
        Value::from(f as i64)
    } else {
        Value::from(f)
    }
}

fn add_values(a: &Value, b: &Value) -> Value {
    match (value_as_f64(a), value_as_f64(b)) {
        (Some(x), Some(y)) => number_value(x + y),
        (Some(_), None) => a.clone(),
        (None, Some(_)) => b.clone(),
        (None, None) => a.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(values: &[(i64, i64)]) -> Row {
        Row {
            name: "alpha".to_string(),
            tags: BTreeMap::new(),
            columns: vec!["time".to_string(), "value".to_string()],
            values: values
                .iter()
                .map(|&(t, v)| vec![json!(t), json!(v)])
                .collect(),
        }
    }

    fn response(values: &[(i64, i64)]) -> Response {
        Response {
            results: vec![StatementResult {
                series: vec![row(values)],
                error: None,
            }],
            error: None,
        }
    }

    #[test]
    fn test_merge_later_wins_on_duplicate_timestamps() {
        let merged = merge(&[
            response(&[(1000, 10), (1200, 11)]),
            response(&[(1200, 12), (1400, 13)]),
            response(&[(1400, 14), (1600, 15)]),
        ])
        .unwrap();
        assert_eq!(
            merged,
            response(&[(1000, 10), (1200, 12), (1400, 14), (1600, 15)])
        );
    }

    #[test]
    fn test_merge_sorts_points_by_time() {
        let merged = merge(&[response(&[(2000, 2)]), response(&[(1000, 1)])]).unwrap();
        assert_eq!(merged, response(&[(1000, 1), (2000, 2)]));
    }

    #[test]
    fn test_merge_of_nothing_is_empty() {
        assert_eq!(merge(&[]).unwrap(), Response::empty());
    }

    #[test]
    fn test_merge_keeps_distinct_series_apart() {
        let mut tagged = row(&[(1000, 1)]);
        tagged.tags.insert("host".to_string(), "a".to_string());
        let a = Response {
            results: vec![StatementResult {
                series: vec![tagged],
                error: None,
            }],
            error: None,
        };
        let b = response(&[(1000, 2)]);
        let merged = merge(&[a, b]).unwrap();
        assert_eq!(merged.results[0].series.len(), 2);
    }

    #[test]
    fn test_merge_rejects_mismatched_columns() {
        let mut odd = response(&[(1000, 1)]);
        odd.results[0].series[0].columns = vec!["time".to_string(), "other".to_string()];
        assert!(merge(&[response(&[(1000, 2)]), odd]).is_err());
    }

    #[test]
    fn test_merge_preferred_primary_overrides() {
        let primary = response(&[(1200, 99)]);
        let secondary = response(&[(1000, 1), (1200, 2)]);
        let merged = merge_preferred(&primary, &secondary).unwrap();
        assert_eq!(merged, response(&[(1000, 1), (1200, 99)]));
    }

    #[test]
    fn test_extract_rows_fails_on_response_error() {
        let mut resp = response(&[(1000, 1)]);
        resp.error = Some("boom".to_string());
        assert!(extract_rows(&resp).is_err());

        let resp = response(&[(1000, 1)]);
        assert_eq!(extract_rows(&resp).unwrap().len(), 1);
    }

    #[test]
    fn test_sum_rows_adds_matching_timestamps() {
        let summed = sum_rows(&[
            vec![row(&[(1000, 1), (1200, 2)])],
            vec![row(&[(1000, 10), (1400, 3)])],
        ])
        .unwrap();
        assert_eq!(summed, vec![row(&[(1000, 11), (1200, 2), (1400, 3)])]);
    }

    #[test]
    fn test_divide_rows_aligned() {
        let sums = vec![row(&[(1000, 24), (1200, 30)])];
        let counts = vec![row(&[(1000, 3), (1200, 5)])];
        let means = divide_rows(&sums, &counts, &["time", "mean"]).unwrap();
        assert_eq!(means.len(), 1);
        assert_eq!(means[0].columns, vec!["time", "mean"]);
        assert_eq!(
            means[0].values,
            vec![vec![json!(1000), json!(8)], vec![json!(1200), json!(6)]]
        );
    }

    #[test]
    fn test_divide_rows_drops_zero_denominator_and_misaligned() {
        let sums = vec![row(&[(1000, 24), (1200, 30), (1400, 7)])];
        let counts = vec![row(&[(1000, 0), (1200, 5)])];
        let means = divide_rows(&sums, &counts, &["time", "mean"]).unwrap();
        // 1000 dropped (zero count), 1400 dropped (no count at all).
        assert_eq!(means[0].values, vec![vec![json!(1200), json!(6)]]);
    }

    #[test]
    fn test_divide_rows_non_integer_mean() {
        let sums = vec![row(&[(1000, 5)])];
        let counts = vec![row(&[(1000, 2)])];
        let means = divide_rows(&sums, &counts, &["time", "mean"]).unwrap();
        assert_eq!(means[0].values, vec![vec![json!(1000), json!(2.5)]]);
    }
}
