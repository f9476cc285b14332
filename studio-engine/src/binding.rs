//! Input binding (spec §4.2): resolves
//! `{{nodes.<id>.output.<jsonpath>}}` templates against upstream node
//! outputs at the moment a node becomes *ready*.
//!
//! Grammar (SPEC_FULL.md REDESIGN FLAGS): a dotted path plus `[n]` array
//! indices -- no full JSONPath filter expressions. Sufficient for the
//! binding use case; a narrower grammar than a general JSONPath crate
//! would need.

use std::collections::HashMap;

use serde_json::Value;
use studio_core::{NodeId, StudioError, StudioResult};

const TEMPLATE_OPEN: &str = "{{";
const TEMPLATE_CLOSE: &str = "}}";

#[derive(Debug, Clone)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Parses `nodes.<id>.output.<jsonpath>` into the node id and the segment
/// list to walk under `output`.
fn parse_template(expr: &str) -> Option<(NodeId, Vec<Segment>)> {
    let expr = expr.trim();
    let rest = expr.strip_prefix("nodes.")?;
    let (node_id, after_node) = rest.split_once('.')?;
    let after_output = after_node.strip_prefix("output")?;
    let path = after_output.strip_prefix('.').unwrap_or(after_output);

    let mut segments = Vec::new();
    for raw in path.split('.') {
        if raw.is_empty() {
            continue;
        }
        let mut key_part = raw;
        while let Some(bracket_start) = key_part.find('[') {
            let before = &key_part[..bracket_start];
            if !before.is_empty() {
                segments.push(Segment::Key(before.to_string()));
            }
            let close = key_part[bracket_start..].find(']')? + bracket_start;
            let index: usize = key_part[bracket_start + 1..close].parse().ok()?;
            segments.push(Segment::Index(index));
            key_part = &key_part[close + 1..];
        }
        if !key_part.is_empty() {
            segments.push(Segment::Key(key_part.to_string()));
        }
    }
    Some((NodeId::from(node_id), segments))
}

fn walk(value: &Value, segments: &[Segment]) -> Option<Value> {
    let mut current = value.clone();
    for segment in segments {
        current = match segment {
            Segment::Key(key) => current.get(key)?.clone(),
            Segment::Index(idx) => current.get(idx)?.clone(),
        };
    }
    Some(current)
}

/// Resolves one `{{...}}` expression (without the braces) against
/// upstream outputs. `None` means the field wasn't populated (upstream
/// output missing the addressed path); callers treat that as an unbound
/// required field.
fn resolve_expr(expr: &str, node_outputs: &HashMap<NodeId, Value>) -> StudioResult<Option<Value>> {
    let (node_id, segments) = parse_template(expr)
        .ok_or_else(|| StudioError::BadInput(format!("malformed binding expression '{{{{{expr}}}}}'")))?;
    let Some(output) = node_outputs.get(&node_id) else {
        return Ok(None);
    };
    Ok(walk(output, &segments))
}

fn value_to_interpolated_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Binds one JSON value (a node's raw `params`) against upstream node
/// outputs, replacing `{{...}}` templates. A string that is *exactly* one
/// template resolves to the template's native JSON type (so a number or
/// object stays typed); a string containing a template alongside other
/// text is rendered via string interpolation.
pub fn bind_value(raw: &Value, node_outputs: &HashMap<NodeId, Value>) -> StudioResult<Value> {
    match raw {
        Value::String(s) => bind_string(s, node_outputs),
        Value::Array(items) => {
            let bound: StudioResult<Vec<Value>> = items.iter().map(|v| bind_value(v, node_outputs)).collect();
            Ok(Value::Array(bound?))
        }
        Value::Object(map) => {
            let mut bound = serde_json::Map::new();
            for (k, v) in map {
                bound.insert(k.clone(), bind_value(v, node_outputs)?);
            }
            Ok(Value::Object(bound))
        }
        other => Ok(other.clone()),
    }
}

fn bind_string(s: &str, node_outputs: &HashMap<NodeId, Value>) -> StudioResult<Value> {
    let trimmed = s.trim();
    if trimmed.starts_with(TEMPLATE_OPEN) && trimmed.ends_with(TEMPLATE_CLOSE) && trimmed.matches(TEMPLATE_OPEN).count() == 1 {
        let inner = &trimmed[TEMPLATE_OPEN.len()..trimmed.len() - TEMPLATE_CLOSE.len()];
        return match resolve_expr(inner, node_outputs)? {
            Some(value) => Ok(value),
            None => Err(StudioError::BadInput(format!("unresolved binding '{s}'"))),
        };
    }

    let mut result = String::new();
    let mut remaining = s;
    while let Some(start) = remaining.find(TEMPLATE_OPEN) {
        result.push_str(&remaining[..start]);
        let after_open = &remaining[start + TEMPLATE_OPEN.len()..];
        let Some(end) = after_open.find(TEMPLATE_CLOSE) else {
            result.push_str(&remaining[start..]);
            remaining = "";
            break;
        };
        let expr = &after_open[..end];
        match resolve_expr(expr, node_outputs)? {
            Some(value) => result.push_str(&value_to_interpolated_string(&value)),
            None => return Err(StudioError::BadInput(format!("unresolved binding '{{{{{expr}}}}}'"))),
        }
        remaining = &after_open[end + TEMPLATE_CLOSE.len()..];
    }
    result.push_str(remaining);
    Ok(Value::String(result))
}

/// Enforces a JSON-Schema `required` list against bound params (spec
/// §4.2: "unresolved required fields fail the node with `bad_input`").
pub fn validate_required(schema: &Value, bound_params: &Value) -> StudioResult<()> {
    let Some(required) = schema.get("required").and_then(Value::as_array) else {
        return Ok(());
    };
    let missing: Vec<String> = required
        .iter()
        .filter_map(Value::as_str)
        .filter(|field| bound_params.get(field).map(Value::is_null).unwrap_or(true))
        .map(str::to_string)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StudioError::BadInput(format!("missing required field(s): {}", missing.join(", "))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs() -> HashMap<NodeId, Value> {
        let mut map = HashMap::new();
        map.insert(
            NodeId::from("trigger1"),
            serde_json::json!({"items": [{"name": "alice"}, {"name": "bob"}], "count": 2}),
        );
        map
    }

    #[test]
    fn exact_template_resolves_to_typed_value() {
        let bound = bind_value(&serde_json::json!("{{nodes.trigger1.output.count}}"), &outputs()).unwrap();
        assert_eq!(bound, serde_json::json!(2));
    }

    #[test]
    fn array_index_and_nested_key_resolve() {
        let bound = bind_value(&serde_json::json!("{{nodes.trigger1.output.items[1].name}}"), &outputs()).unwrap();
        assert_eq!(bound, serde_json::json!("bob"));
    }

    #[test]
    fn mixed_text_interpolates_as_string() {
        let bound = bind_value(&serde_json::json!("Hello {{nodes.trigger1.output.items[0].name}}!"), &outputs()).unwrap();
        assert_eq!(bound, serde_json::json!("Hello alice!"));
    }

    #[test]
    fn object_and_array_params_bind_recursively() {
        let raw = serde_json::json!({"name": "{{nodes.trigger1.output.items[0].name}}", "tags": ["static", "{{nodes.trigger1.output.count}}"]});
        let bound = bind_value(&raw, &outputs()).unwrap();
        assert_eq!(bound["name"], serde_json::json!("alice"));
        assert_eq!(bound["tags"][1], serde_json::json!("2"));
    }

    #[test]
    fn unresolved_binding_is_bad_input() {
        let err = bind_value(&serde_json::json!("{{nodes.missing.output.x}}"), &outputs()).unwrap_err();
        assert!(matches!(err, StudioError::BadInput(_)));
    }

    #[test]
    fn literal_values_pass_through_untouched() {
        let bound = bind_value(&serde_json::json!({"n": 5, "flag": true}), &outputs()).unwrap();
        assert_eq!(bound, serde_json::json!({"n": 5, "flag": true}));
    }

    #[test]
    fn validate_required_reports_missing_fields() {
        let schema = serde_json::json!({"required": ["a", "b"]});
        let err = validate_required(&schema, &serde_json::json!({"a": 1})).unwrap_err();
        assert!(matches!(err, StudioError::BadInput(_)));
    }

    #[test]
    fn validate_required_passes_when_all_present() {
        let schema = serde_json::json!({"required": ["a"]});
        assert!(validate_required(&schema, &serde_json::json!({"a": 1})).is_ok());
    }
}
