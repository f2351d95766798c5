//! Group key extraction.

use serde_json::Value;
use suppression_common::{GroupKey, GroupTerm, MatchedDocument};

/// Derives every group key a document belongs to.
///
/// One term per `group_by` field, in configured order. Array values fan out
/// into one key per distinct element and several array fields yield their
/// cross product; the result order follows the array order of the earlier
/// fields first. Absent fields, nulls, empty arrays and objects all resolve
/// to a `null` term.
pub fn extract_keys(document: &MatchedDocument, group_by: &[String]) -> Vec<GroupKey> {
    let mut keys: Vec<Vec<GroupTerm>> = vec![Vec::with_capacity(group_by.len())];

    for field in group_by {
        let values = field_values(document.field(field));
        let mut next = Vec::with_capacity(keys.len() * values.len());
        for prefix in &keys {
            for value in &values {
                let mut terms = prefix.clone();
                terms.push(GroupTerm::new(field.clone(), value.clone()));
                next.push(terms);
            }
        }
        keys = next;
    }

    keys.into_iter().map(GroupKey::new).collect()
}

fn field_values(value: Option<&Value>) -> Vec<Option<String>> {
    match value {
        Some(Value::Array(items)) => {
            let mut values: Vec<Option<String>> = Vec::with_capacity(items.len());
            for item in items {
                let rendered = scalar_text(item);
                if !values.contains(&rendered) {
                    values.push(rendered);
                }
            }
            if values.is_empty() {
                values.push(None);
            }
            values
        }
        Some(other) => vec![scalar_text(other)],
        None => vec![None],
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Object(_) | Value::Array(_) => None,
    }
}
