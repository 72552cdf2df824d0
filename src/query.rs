use serde_json::{json, Value};

use crate::model::FieldFilters;

pub const WILDCARD: &str = "*";

/// Characters that mark a query as raw query-language syntax.
const SPECIAL_CHARS: &[char] = &['*', '?', ':', '(', ')'];

/// 查询编译器：自由文本 + 字段过滤 → 后端查询字符串。
#[derive(Clone, Default)]
pub struct QueryCompiler;

impl QueryCompiler {
    pub fn new() -> Self {
        Self
    }

    /// Never fails and never returns an empty string.
    pub fn compile(&self, free_text: Option<&str>, filters: &FieldFilters, exact_match: bool) -> String {
        let mut qs = self.base_clause(free_text, exact_match);
        for (field, value) in filters {
            match value {
                Value::Null => continue,
                Value::Number(n) => qs.push_str(&format!(" AND {field}:{n}")),
                Value::String(s) => qs.push_str(&format!(" AND {field}:\"{s}\"")),
                other => qs.push_str(&format!(" AND {field}:\"{other}\"")),
            }
        }
        qs
    }

    fn base_clause(&self, free_text: Option<&str>, exact_match: bool) -> String {
        let text = match free_text.map(str::trim) {
            None | Some("") | Some(WILDCARD) => return WILDCARD.to_string(),
            Some(t) => t,
        };
        if exact_match && !text.starts_with('"') && !text.contains(SPECIAL_CHARS) {
            format!("\"{text}\"")
        } else {
            text.to_string()
        }
    }
}

/// Top-level inclusion filter for one or more streams; `None` when unscoped.
pub fn stream_filter(stream_ids: &[String]) -> Option<Value> {
    if stream_ids.is_empty() {
        return None;
    }
    let filters: Vec<Value> = stream_ids
        .iter()
        .map(|id| json!({ "type": "stream", "id": id }))
        .collect();
    Some(json!({ "type": "or", "filters": filters }))
}
