//! Conversion of remote collection payloads into id-carrying records

use serde_json::{Map, Value};

use crate::models::{CollectionSpec, Record, Shape, SINGLETON_ID};

/// Normalize the raw remote value of a collection into records.
///
/// Absent, `null` and non-object payloads yield no records; malformed nodes
/// inside an object are skipped rather than failing the whole snapshot.
pub fn normalize(spec: &CollectionSpec, raw: Option<Value>) -> Vec<Record> {
    let Some(Value::Object(root)) = raw else {
        return Vec::new();
    };

    match spec.shape {
        Shape::Flat => normalize_flat(&spec.name, root),
        Shape::Hierarchical { depth } => {
            let mut records = Vec::new();
            walk_groups(&spec.name, root, depth, &mut records);
            records
        }
        Shape::Singleton => vec![Record::new(SINGLETON_ID, root)],
    }
}

fn normalize_flat(collection: &str, root: Map<String, Value>) -> Vec<Record> {
    root.into_iter()
        .filter_map(|(key, value)| match value {
            Value::Object(fields) => Some(Record::new(key, fields)),
            _ => {
                tracing::debug!("Skipping non-object entry '{key}' in '{collection}'");
                None
            }
        })
        .collect()
}

/// A node is a record when it carries a string `createdAt`; that check wins
/// over any nested structure below it.
fn is_record(node: &Map<String, Value>) -> bool {
    matches!(node.get("createdAt"), Some(Value::String(_)))
}

fn walk_groups(
    collection: &str,
    node: Map<String, Value>,
    levels_left: usize,
    out: &mut Vec<Record>,
) {
    for (segment, child) in node {
        let Value::Object(child) = child else {
            tracing::debug!("Skipping non-object node '{segment}' in '{collection}'");
            continue;
        };

        if is_record(&child) {
            let id = match child.get("id") {
                Some(Value::String(id)) => id.clone(),
                _ => segment,
            };
            out.push(Record::new(id, child));
        } else if levels_left > 0 {
            walk_groups(collection, child, levels_left - 1, out);
        } else {
            tracing::debug!(
                "Skipping node '{segment}' in '{collection}': no createdAt and no grouping levels left"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn orders() -> CollectionSpec {
        CollectionSpec::new("orders", Shape::Hierarchical { depth: 3 })
    }

    #[test]
    fn absent_or_null_payload_is_empty() {
        let spec = CollectionSpec::new("users", Shape::Flat);
        assert!(normalize(&spec, None).is_empty());
        assert!(normalize(&spec, Some(Value::Null)).is_empty());
        assert!(normalize(&orders(), Some(json!("oops"))).is_empty());
    }

    #[test]
    fn flat_uses_key_as_id() {
        let spec = CollectionSpec::new("users", Shape::Flat);
        let records = normalize(
            &spec,
            Some(json!({
                "u1": {"name": "Ada", "id": "stale"},
                "u2": {"name": "Grace"},
                "broken": 17
            })),
        );

        assert_eq!(
            records
                .into_iter()
                .map(Record::into_value)
                .collect::<Vec<_>>(),
            vec![
                json!({"id": "u1", "name": "Ada"}),
                json!({"id": "u2", "name": "Grace"}),
            ]
        );
    }

    #[test]
    fn hierarchical_descends_year_month_day() {
        let records = normalize(
            &orders(),
            Some(json!({
                "2024": {"01": {"15": {"order1": {
                    "createdAt": "2024-01-15T00:00:00Z",
                    "total": 42,
                    "customer": "c9"
                }}}}
            })),
        );

        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].clone().into_value(),
            json!({
                "id": "order1",
                "createdAt": "2024-01-15T00:00:00Z",
                "total": 42,
                "customer": "c9"
            })
        );
    }

    #[test]
    fn hierarchical_prefers_explicit_id() {
        let records = normalize(
            &orders(),
            Some(json!({"2024": {"06": {
                "push-key": {"id": "o7", "createdAt": "2024-06-01T00:00:00Z"}
            }}})),
        );
        assert_eq!(records[0].id, "o7");
    }

    #[test]
    fn hierarchical_accepts_flat_records_at_top_level() {
        let records = normalize(
            &orders(),
            Some(json!({"o1": {"id": "o1", "createdAt": "2024-06-01T00:00:00Z", "total": 100}})),
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "o1");
        assert_eq!(records[0].get("total"), Some(&json!(100)));
    }

    #[test]
    fn created_at_short_circuits_recursion() {
        let records = normalize(
            &orders(),
            Some(json!({"o1": {
                "createdAt": "2024-06-01T00:00:00Z",
                "items": {"line1": {"createdAt": "2024-06-01T00:00:00Z", "sku": "A"}}
            }})),
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "o1");
        assert!(records[0].get("items").is_some());
    }

    #[test]
    fn non_string_created_at_is_a_grouping_node() {
        let records = normalize(
            &orders(),
            Some(json!({"2024": {
                "createdAt": 5,
                "o1": {"createdAt": "2024-02-01T00:00:00Z"}
            }})),
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "o1");
    }

    #[test]
    fn hierarchical_stops_at_declared_depth() {
        let spec = CollectionSpec::new("orders", Shape::Hierarchical { depth: 1 });
        let records = normalize(
            &spec,
            Some(json!({
                "2024": {
                    "o1": {"createdAt": "2024-01-01T00:00:00Z"},
                    "02": {"o2": {"createdAt": "2024-02-01T00:00:00Z"}}
                }
            })),
        );
        assert_eq!(
            records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["o1"]
        );
    }

    #[test]
    fn singleton_becomes_main_record() {
        let spec = CollectionSpec::new("appSettings", Shape::Singleton);
        let records = normalize(&spec, Some(json!({"currency": "EUR", "id": "x"})));
        assert_eq!(
            records
                .into_iter()
                .map(Record::into_value)
                .collect::<Vec<_>>(),
            vec![json!({"id": "main", "currency": "EUR"})]
        );
    }
}
