use serde::Deserialize;

use crate::model::Message;
use crate::query::WILDCARD;

pub const DEFAULT_FIELDS: &[&str] = &[
    "timestamp",
    "gl2_message_id",
    "source",
    "env",
    "level",
    "message",
    "logger_name",
    "thread_name",
    "PODNAME",
];

/// 字段投影：`All` 表示不做投影。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "FieldsInput")]
pub enum FieldSelection {
    All,
    Fields(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FieldsInput {
    Text(String),
    List(Vec<String>),
}

impl From<FieldsInput> for FieldSelection {
    fn from(input: FieldsInput) -> Self {
        match input {
            FieldsInput::Text(s) if s.trim() == WILDCARD => FieldSelection::All,
            FieldsInput::Text(s) => FieldSelection::from_names(s.split(',')),
            FieldsInput::List(list) if list.iter().any(|f| f.trim() == WILDCARD) => FieldSelection::All,
            FieldsInput::List(list) => FieldSelection::from_names(list.iter().map(String::as_str)),
        }
    }
}

impl Default for FieldSelection {
    fn default() -> Self {
        FieldSelection::from_names(DEFAULT_FIELDS.iter().copied())
    }
}

impl FieldSelection {
    /// Trims names, drops blanks and repeats, keeps first-seen order.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut out: Vec<String> = Vec::new();
        for name in names {
            let name = name.trim();
            if !name.is_empty() && !out.iter().any(|f| f == name) {
                out.push(name.to_string());
            }
        }
        FieldSelection::Fields(out)
    }

    pub fn is_all(&self) -> bool {
        matches!(self, FieldSelection::All)
    }

    /// Keeps requested keys in requested order; missing keys are skipped.
    pub fn project(&self, record: &Message) -> Message {
        match self {
            FieldSelection::All => record.clone(),
            FieldSelection::Fields(names) => names
                .iter()
                .filter_map(|name| record.get(name).map(|v| (name.clone(), v.clone())))
                .collect(),
        }
    }
}

#[derive(Clone, Default)]
pub struct FieldSelector;

impl FieldSelector {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, requested: Option<&str>, defaults: &FieldSelection) -> FieldSelection {
        match requested.map(str::trim) {
            Some(WILDCARD) => FieldSelection::All,
            Some(list) if list.split(',').any(|f| !f.trim().is_empty()) => {
                FieldSelection::from_names(list.split(','))
            }
            _ => defaults.clone(),
        }
    }
}
