use std::cell::Cell;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value as JsonValue;

use crate::types::Record;

/// Suffix asking [`GroupByResult::probe`] for a percentage
pub const PERCENT_SUFFIX: &str = "_percent";

/// One named entry of an aggregation node
#[derive(Debug, Clone, PartialEq)]
pub enum Subtotal {
    Value(f64),
    Group(GroupByResult),
}

impl Subtotal {
    /// Numeric value, or the nested node's total
    pub fn amount(&self) -> f64 {
        match self {
            Subtotal::Value(v) => *v,
            Subtotal::Group(g) => g.total(),
        }
    }
}

/// Tree of named subtotals built from GROUP BY style rows.
///
/// Leaf counts are memoised and only recomputed on `refresh`; a node
/// mutated after a count was read keeps reporting the stale count.
#[derive(Debug, Clone, Default)]
pub struct GroupByResult {
    entries: Vec<(String, Subtotal)>,
    rollup_name: Option<String>,
    leaf_count: Cell<Option<usize>>,
    row_count: Cell<Option<usize>>,
}

impl PartialEq for GroupByResult {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries && self.rollup_name == other.rollup_name
    }
}

impl GroupByResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node whose total is the child stored under `rollup_name`
    pub fn with_rollup(rollup_name: impl Into<String>) -> Self {
        Self {
            rollup_name: Some(rollup_name.into()),
            ..Self::default()
        }
    }

    pub fn rollup_name(&self) -> Option<&str> {
        self.rollup_name.as_deref()
    }

    /// Set `name`, replacing an existing entry in place
    pub fn insert(&mut self, name: impl Into<String>, subtotal: Subtotal) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = subtotal,
            None => self.entries.push((name, subtotal)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Subtotal> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn group(&self, name: &str) -> Option<&GroupByResult> {
        match self.get(name) {
            Some(Subtotal::Group(g)) => Some(g),
            _ => None,
        }
    }

    pub fn entries(&self) -> &[(String, Subtotal)] {
        &self.entries
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> f64 {
        match &self.rollup_name {
            Some(rollup) => self.value_at(rollup).unwrap_or(0.0),
            None => self.entries.iter().map(|(_, s)| s.amount()).sum(),
        }
    }

    pub fn value_at(&self, key: &str) -> Option<f64> {
        self.get(key).map(Subtotal::amount)
    }

    /// Share of `key` in the total, `0.0` for a zero total or a missing key
    pub fn percentage(&self, key: &str) -> f64 {
        let total = self.total();
        if total == 0.0 {
            return 0.0;
        }
        match self.value_at(key) {
            Some(value) => 100.0 * value / total,
            None => 0.0,
        }
    }

    /// Lookup for report templates: `name` or `name_percent`, 0 when absent
    pub fn probe(&self, name: &str) -> f64 {
        if let Some(value) = self.value_at(name) {
            return value;
        }
        match name.strip_suffix(PERCENT_SUFFIX) {
            Some(key) => self.percentage(key),
            None => 0.0,
        }
    }

    /// Count terminal values below this node.
    ///
    /// With `value_in_row` each immediate child counts once, otherwise every
    /// leaf is counted recursively. Cached per mode until `refresh`.
    pub fn leaf_values_count(&self, value_in_row: bool, refresh: bool) -> usize {
        let cache = if value_in_row {
            &self.row_count
        } else {
            &self.leaf_count
        };
        if !refresh {
            if let Some(count) = cache.get() {
                return count;
            }
        }
        let count = if value_in_row {
            self.entries.len()
        } else {
            self.entries
                .iter()
                .map(|(_, s)| match s {
                    Subtotal::Value(_) => 1,
                    Subtotal::Group(g) => g.leaf_values_count(false, refresh),
                })
                .sum()
        };
        cache.set(Some(count));
        count
    }

    /// Build a tree from `(path, value)` pairs. Repeated paths accumulate.
    pub fn from_tuples<I, S>(tuples: I, rollup_name: Option<&str>) -> Self
    where
        I: IntoIterator<Item = (Vec<S>, f64)>,
        S: Into<String>,
    {
        let mut root = match rollup_name {
            Some(name) => Self::with_rollup(name),
            None => Self::new(),
        };
        for (path, value) in tuples {
            let path: Vec<String> = path.into_iter().map(Into::into).collect();
            root.accumulate(&path, value);
        }
        root
    }

    fn accumulate(&mut self, path: &[String], value: f64) {
        let Some((head, rest)) = path.split_first() else {
            return;
        };
        let index = match self.entries.iter().position(|(n, _)| n == head) {
            Some(index) => index,
            None => {
                let fresh = if rest.is_empty() {
                    Subtotal::Value(0.0)
                } else {
                    Subtotal::Group(GroupByResult::new())
                };
                self.entries.push((head.clone(), fresh));
                self.entries.len() - 1
            }
        };

        let slot = &mut self.entries[index].1;
        match (slot, rest.is_empty()) {
            (Subtotal::Value(v), true) => *v += value,
            (Subtotal::Group(g), false) => g.accumulate(rest, value),
            (slot, _) => {
                log::warn!("subtotal '{}' changes shape; replacing the earlier entry", head);
                *slot = if rest.is_empty() {
                    Subtotal::Value(value)
                } else {
                    let mut group = GroupByResult::new();
                    group.accumulate(rest, value);
                    Subtotal::Group(group)
                };
            }
        }
    }
}

/// Group records by `key_fields` (outermost first) summing `value_field`
pub fn aggregate(
    rows: &[Record],
    key_fields: &[&str],
    value_field: &str,
    rollup_name: Option<&str>,
) -> GroupByResult {
    GroupByResult::from_tuples(
        rows.iter().map(|row| {
            let path: Vec<String> = key_fields
                .iter()
                .map(|k| key_name(row.get(*k).unwrap_or(&JsonValue::Null)))
                .collect();
            let value = row.get(value_field).and_then(JsonValue::as_f64).unwrap_or(0.0);
            (path, value)
        }),
        rollup_name,
    )
}

fn key_name(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Serialize for GroupByResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, subtotal) in &self.entries {
            map.serialize_entry(name, subtotal)?;
        }
        map.end()
    }
}

impl Serialize for Subtotal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Subtotal::Value(v) => serializer.serialize_f64(*v),
            Subtotal::Group(g) => g.serialize(serializer),
        }
    }
}
