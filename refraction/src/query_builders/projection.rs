use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::types::Record;

pub const IDENTITY: &str = "identity";

/// One mapped field: internal path, external name, conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProjection {
    pub path: String,
    pub output: String,
    #[serde(default = "identity_name")]
    pub conversion: String,
}

fn identity_name() -> String {
    IDENTITY.to_string()
}

/// Ordered table of internal field path -> (external name, conversion)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectionMapping {
    entries: Vec<FieldProjection>,
}

impl ProjectionMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `path` to `output` unchanged
    pub fn field(self, path: impl Into<String>, output: impl Into<String>) -> Self {
        self.convert(path, output, IDENTITY)
    }

    pub fn convert(
        mut self,
        path: impl Into<String>,
        output: impl Into<String>,
        conversion: impl Into<String>,
    ) -> Self {
        self.entries.push(FieldProjection {
            path: path.into(),
            output: output.into(),
            conversion: conversion.into(),
        });
        self
    }

    pub fn entries(&self) -> &[FieldProjection] {
        &self.entries
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.entries.iter().any(|e| e.path == path)
    }

    /// Distinct internal paths in mapping order
    pub fn paths(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !out.contains(&entry.path.as_str()) {
                out.push(&entry.path);
            }
        }
        out
    }
}

/// A many-to-many path fetched in one batch and attached as a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationField {
    pub path: String,
    pub output: String,
}

impl RelationField {
    pub fn new(path: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            output: output.into(),
        }
    }
}

/// Post-processing applied to each record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraField {
    /// Copy an already projected field under a second name
    Alias { source: String, alias: String },
}

impl ExtraField {
    pub fn alias(source: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::Alias {
            source: source.into(),
            alias: alias.into(),
        }
    }

    pub fn apply(&self, record: &mut Record) {
        match self {
            ExtraField::Alias { source, alias } => {
                if let Some(value) = record.get(source).cloned() {
                    record.insert(alias.clone(), value);
                }
            }
        }
    }
}

/// Everything needed to shape one kind of output record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub mapping: ProjectionMapping,
    #[serde(default)]
    pub relations: Vec<RelationField>,
    #[serde(default)]
    pub extras: Vec<ExtraField>,
}

impl Projection {
    pub fn new(mapping: ProjectionMapping) -> Self {
        Self {
            mapping,
            relations: Vec::new(),
            extras: Vec::new(),
        }
    }

    pub fn relation(mut self, path: impl Into<String>, output: impl Into<String>) -> Self {
        self.relations.push(RelationField::new(path, output));
        self
    }

    pub fn alias(mut self, source: impl Into<String>, alias: impl Into<String>) -> Self {
        self.extras.push(ExtraField::alias(source, alias));
        self
    }
}

pub type ConversionFn = Arc<dyn Fn(&JsonValue) -> JsonValue + Send + Sync>;

/// Value conversion applied to a projected field
#[derive(Clone)]
pub enum Conversion {
    Identity,
    /// Scalars to their string form; null stays null
    String,
    /// Temporal values reformatted with the given `chrono` format
    DateTime(String),
    /// Seconds rendered as `[N day(s), ]H:MM:SS[.ffffff]`
    Duration,
    Custom(ConversionFn),
}

impl fmt::Debug for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conversion::Identity => write!(f, "Identity"),
            Conversion::String => write!(f, "String"),
            Conversion::DateTime(format) => write!(f, "DateTime({:?})", format),
            Conversion::Duration => write!(f, "Duration"),
            Conversion::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl Conversion {
    pub fn apply(&self, value: JsonValue) -> JsonValue {
        match self {
            Conversion::Identity => value,
            Conversion::String => match value {
                JsonValue::Null | JsonValue::String(_) => value,
                JsonValue::Bool(b) => JsonValue::String(b.to_string()),
                JsonValue::Number(n) => JsonValue::String(n.to_string()),
                other => JsonValue::String(other.to_string()),
            },
            Conversion::DateTime(format) => match value.as_str().and_then(parse_temporal) {
                Some(dt) => JsonValue::String(dt.format(format).to_string()),
                None => value,
            },
            Conversion::Duration => match value.as_f64() {
                Some(seconds) => JsonValue::String(format_duration(seconds)),
                None => value,
            },
            Conversion::Custom(f) => (**f)(&value),
        }
    }
}

pub(crate) fn parse_temporal(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn format_duration(seconds: f64) -> String {
    let negative = seconds < 0.0;
    let total_micros = (seconds.abs() * 1_000_000.0).round() as u64;
    let micros = total_micros % 1_000_000;
    let whole = total_micros / 1_000_000;
    let days = whole / 86_400;
    let hours = (whole % 86_400) / 3_600;
    let minutes = (whole % 3_600) / 60;
    let secs = whole % 60;

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if days > 0 {
        out.push_str(&format!("{} day{}, ", days, if days == 1 { "" } else { "s" }));
    }
    out.push_str(&format!("{}:{:02}:{:02}", hours, minutes, secs));
    if micros > 0 {
        out.push_str(&format!(".{:06}", micros));
    }
    out
}

/// Named conversions available to projection mappings
#[derive(Debug, Clone)]
pub struct ConversionRegistry {
    conversions: HashMap<String, Conversion>,
}

impl ConversionRegistry {
    /// Built-in conversions: `identity`, `string`, `datetime`, `duration`
    pub fn new(datetime_format: &str) -> Self {
        let mut conversions = HashMap::new();
        conversions.insert(IDENTITY.to_string(), Conversion::Identity);
        conversions.insert("string".to_string(), Conversion::String);
        conversions.insert(
            "datetime".to_string(),
            Conversion::DateTime(datetime_format.to_string()),
        );
        conversions.insert("duration".to_string(), Conversion::Duration);
        Self { conversions }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&JsonValue) -> JsonValue + Send + Sync + 'static,
    {
        self.conversions
            .insert(name.into(), Conversion::Custom(Arc::new(f)));
    }

    pub fn get(&self, name: &str) -> Option<&Conversion> {
        self.conversions.get(name)
    }
}

impl Default for ConversionRegistry {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_DATETIME_FORMAT)
    }
}
