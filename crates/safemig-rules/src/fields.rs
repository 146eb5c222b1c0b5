//! Attribute helpers shared by field-level rules

use serde_json::{Map, Value};

use safemig_core::Operation;

pub(crate) const AUTO_FIELDS: [&str; 3] = ["AutoField", "BigAutoField", "SmallAutoField"];
pub(crate) const RELATION_FIELDS: [&str; 2] = ["ForeignKey", "OneToOneField"];

pub(crate) fn field_type(op: &Operation) -> &str {
    op.attr_str("field_type").unwrap_or("")
}

pub(crate) fn is_nullable(op: &Operation) -> bool {
    op.attr_bool("nullable").unwrap_or(false)
}

/// `default_kind` is `value`, `callable` or `database`
pub(crate) fn has_default(op: &Operation) -> bool {
    matches!(op.attr_str("default_kind"), Some(kind) if kind != "none")
}

pub(crate) fn is_relation(op: &Operation) -> bool {
    RELATION_FIELDS.contains(&field_type(op))
}

/// Relation declared with `db_constraint=false` (no FK in the database)
pub(crate) fn without_db_constraint(op: &Operation) -> bool {
    op.attr_bool("db_constraint") == Some(false)
}

pub(crate) fn field_name(op: &Operation) -> &str {
    op.target.field.as_deref().unwrap_or("unknown")
}

/// Attribute of the field's prior definition (AlterField `previous`)
pub(crate) fn previous<'a>(op: &'a Operation, key: &str) -> Option<&'a Value> {
    op.attr_object("previous").and_then(|prev| prev.get(key))
}

/// Field definitions of a CreateModel operation
pub(crate) fn model_fields(op: &Operation) -> Vec<&Map<String, Value>> {
    op.attr("fields")
        .and_then(Value::as_array)
        .map(|fields| fields.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default()
}

pub(crate) fn str_of<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_and_nullability() {
        let op = Operation::new("AddField", "user", Some("email"))
            .with_attr("default_kind", "none");
        assert!(!has_default(&op));
        assert!(!is_nullable(&op));

        let op = op.with_attr("default_kind", "database").with_attr("nullable", true);
        assert!(has_default(&op));
        assert!(is_nullable(&op));
    }

    #[test]
    fn previous_and_model_fields() {
        let op = Operation::new("AlterField", "user", Some("name"))
            .with_attr("previous", json!({"nullable": true}))
            .with_attr("fields", json!([{"name": "id"}, "junk"]));

        assert_eq!(previous(&op, "nullable"), Some(&json!(true)));
        assert_eq!(previous(&op, "unique"), None);
        assert_eq!(model_fields(&op).len(), 1);
    }
}
