//! The line-rule engine.
//!
//! Text is read line by line; the first rule whose pattern matches a line
//! assigns its named captures to the pending row and applies its action.
//! Rows come out in source line order.

use super::template::{RecordKind, RuleAction, Template};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Key shared by every facts row: a device has one set of facts.
pub const FACTS_KEY: &str = "facts";

/// One structured row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRow {
    /// Stable identity of the row within its command type.
    pub key: String,
    /// Every template field; fields the text never set are empty.
    pub fields: BTreeMap<String, String>,
}

impl ParsedRow {
    /// A field value, `None` when missing or empty.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

#[derive(Default)]
struct Pending {
    values: BTreeMap<String, String>,
    /// Set once a non-filldown field has been captured.
    captured: bool,
}

/// Run a template over text.
pub fn apply(template: &Template, text: &str) -> Vec<ParsedRow> {
    let mut rows = Vec::new();
    let mut seen_keys = BTreeSet::new();
    let mut pending = Pending::default();

    for line in text.lines() {
        let Some((rule, caps)) = template
            .rules()
            .iter()
            .find_map(|r| r.regex.captures(line).map(|c| (r, c)))
        else {
            continue;
        };

        if rule.action == RuleAction::Start {
            flush(template, &mut pending, &mut rows, &mut seen_keys);
        }
        for name in rule.regex.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                pending
                    .values
                    .insert(name.to_string(), m.as_str().trim().to_string());
                if !template.is_filldown(name) {
                    pending.captured = true;
                }
            }
        }
        if rule.action == RuleAction::Record {
            flush(template, &mut pending, &mut rows, &mut seen_keys);
        }
    }
    flush(template, &mut pending, &mut rows, &mut seen_keys);

    rows
}

/// Emit the pending row if it is complete, keeping only filldown values.
fn flush(
    template: &Template,
    pending: &mut Pending,
    rows: &mut Vec<ParsedRow>,
    seen_keys: &mut BTreeSet<String>,
) {
    let complete = template
        .required()
        .iter()
        .all(|f| pending.values.get(f).is_some_and(|v| !v.is_empty()));

    if pending.captured && complete {
        let fields: BTreeMap<String, String> = template
            .fields()
            .iter()
            .map(|f| (f.clone(), pending.values.get(f).cloned().unwrap_or_default()))
            .collect();

        let base = row_key(template, &fields);
        let mut key = base.clone();
        let mut n = 2;
        while !seen_keys.insert(key.clone()) {
            key = format!("{}#{}", base, n);
            n += 1;
        }
        rows.push(ParsedRow { key, fields });
    }

    pending.values.retain(|k, _| template.is_filldown(k));
    pending.captured = false;
}

fn row_key(template: &Template, fields: &BTreeMap<String, String>) -> String {
    let parts: Vec<&str> = template
        .key_fields()
        .iter()
        .map(|f| fields.get(f).map(String::as_str).unwrap_or(""))
        .collect();
    if parts.iter().any(|p| !p.is_empty()) {
        return parts.join("|");
    }
    if template.kind() == RecordKind::Facts {
        return FACTS_KEY.to_string();
    }
    content_key(fields)
}

/// Key derived from the row's content, for templates without key fields.
pub fn content_key(fields: &BTreeMap<String, String>) -> String {
    let mut bytes = Vec::new();
    for (name, value) in fields {
        bytes.extend_from_slice(name.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
    }
    let hash = blake3::hash(&bytes).to_hex();
    format!("h:{}", &hash.as_str()[..16])
}
