//! Mapping of provider payloads into movement-shaped values.
//!
//! The provider is not consistent about field names: a movement date may arrive as
//! `step_date`, `date` or `data`, its text as `content`, `description` or `descricao`.
//! Each field is described once by a [`FieldChain`], an ordered list of keys where the
//! first non-empty string wins.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

const MAX_NESTING: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldChain(pub Vec<String>);

impl FieldChain {
    pub fn new(keys: &[&str]) -> Self {
        Self(keys.iter().map(|k| k.to_string()).collect())
    }

    /// First key holding a non-blank string.
    pub fn extract_str<'a>(&self, value: &'a JsonValue) -> Option<&'a str> {
        self.0.iter().find_map(|key| {
            value
                .get(key)
                .and_then(JsonValue::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        })
    }

    /// First key holding an array (possibly empty).
    pub fn extract_array<'a>(&self, value: &'a JsonValue) -> Option<&'a Vec<JsonValue>> {
        self.0
            .iter()
            .find_map(|key| value.get(key).and_then(JsonValue::as_array))
    }
}

/// Extractor chains for every field the ingestor reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMap {
    #[serde(default = "default_date_chain")]
    pub movement_date: FieldChain,
    #[serde(default = "default_description_chain")]
    pub description: FieldChain,
    #[serde(default = "default_steps_chain")]
    pub steps: FieldChain,
    #[serde(default = "default_wrapper_chain")]
    pub wrapper: FieldChain,
}

fn default_date_chain() -> FieldChain {
    FieldChain::new(&["step_date", "date", "data"])
}

fn default_description_chain() -> FieldChain {
    FieldChain::new(&["content", "description", "descricao"])
}

fn default_steps_chain() -> FieldChain {
    FieldChain::new(&["steps", "movements", "andamentos"])
}

fn default_wrapper_chain() -> FieldChain {
    FieldChain::new(&["response_data"])
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            movement_date: default_date_chain(),
            description: default_description_chain(),
            steps: default_steps_chain(),
            wrapper: default_wrapper_chain(),
        }
    }
}

/// A provider step with its date and description resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedStep {
    pub movement_date: DateTime<Utc>,
    pub description: String,
    pub raw: JsonValue,
}

impl FieldMap {
    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(text).context("parsing field map yaml")
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    /// Flattens a provider value into movement-like objects.
    ///
    /// Accepts a single step, a lawsuit object carrying a steps array, a wrapper with
    /// `response_data`, or an array of any of these.
    pub fn collect_steps(&self, value: &JsonValue) -> Vec<JsonValue> {
        let mut out = Vec::new();
        self.collect_into(value, &mut out, 0);
        out
    }

    fn collect_into(&self, value: &JsonValue, out: &mut Vec<JsonValue>, depth: usize) {
        if depth > MAX_NESTING {
            return;
        }
        match value {
            JsonValue::Array(items) => {
                for item in items {
                    self.collect_into(item, out, depth + 1);
                }
            }
            JsonValue::Object(_) => {
                if let Some(inner) = self.wrapper.0.iter().find_map(|k| value.get(k)) {
                    self.collect_into(inner, out, depth + 1);
                } else if let Some(steps) = self.steps.extract_array(value) {
                    out.extend(steps.iter().filter(|s| s.is_object()).cloned());
                } else {
                    out.push(value.clone());
                }
            }
            _ => {}
        }
    }

    /// Resolves date and description; `None` when either is missing or the date is unparseable.
    pub fn map_step(&self, step: &JsonValue) -> Option<MappedStep> {
        let movement_date = self
            .movement_date
            .extract_str(step)
            .and_then(parse_provider_date)?;
        let description = self.description.extract_str(step)?.to_string();
        Some(MappedStep {
            movement_date,
            description,
            raw: step.clone(),
        })
    }
}

/// Parses the date layouts the provider has been seen to emit. Naive values are read as UTC.
pub fn parse_provider_date(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, layout) {
            return Some(naive.and_utc());
        }
    }
    for layout in ["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(input, layout) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}
