//! View Query Transformer
//!
//! Collection reads and subscription pre-fetches run against the view's
//! projection of its table. This module sanitises the caller-supplied view
//! params down to the fields the view declares (missing ones become null) and
//! composes the view's transform closure onto a base [`TableQuery`]. Views
//! without a transform project the whole table.

use crate::db::store::TableQuery;
use crate::models::Schema;
use crate::services::error::CrudError;
use serde_json::{Map, Value};

/// Project `view_params` onto the view's declared `param_fields`.
///
/// Undeclared params are dropped; declared but missing params come back as
/// null, so transforms always see every field they were declared with.
pub fn sanitize_view_params(
    param_fields: &[String],
    view_params: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    param_fields
        .iter()
        .map(|field| {
            let value = view_params
                .and_then(|params| params.get(field))
                .cloned()
                .unwrap_or(Value::Null);
            (field.clone(), value)
        })
        .collect()
}

/// Build the database query for one view invocation.
pub fn build_view_query(
    schema: &Schema,
    model: &str,
    view_name: &str,
    view_params: Option<&Map<String, Value>>,
    base: TableQuery,
) -> Result<TableQuery, CrudError> {
    let view = schema.view(model, view_name).ok_or_else(|| {
        CrudError::invalid_params(format!(
            "view {} is not declared for model {}",
            view_name, model
        ))
    })?;

    let params = sanitize_view_params(&view.param_fields, view_params);
    match &view.transform {
        Some(transform) => Ok(transform.apply(base, &params)),
        None => Ok(base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::SortOrder;
    use crate::models::{ModelSchema, Resource, SchemaBuilder, ViewSchema};
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn schema_with_transform() -> Schema {
        SchemaBuilder::new()
            .model(
                "Item",
                ModelSchema::new().with_view(
                    "byOwner",
                    ViewSchema::new()
                        .with_param_fields(["owner"])
                        .with_transform(|query: TableQuery, params: &Map<String, Value>| {
                            let owner = params.get("owner").cloned().unwrap_or(Value::Null);
                            query
                                .filter(move |resource: &Resource| {
                                    resource.get("owner") == Some(&owner)
                                })
                                .order_by("id", SortOrder::Ascending)
                        }),
                ),
            )
            .build()
    }

    #[test]
    fn test_sanitize_drops_undeclared_and_fills_missing() {
        let fields = vec!["owner".to_string(), "label".to_string()];
        let sanitized = sanitize_view_params(
            &fields,
            Some(&params(json!({"owner": "u1", "ghost": true}))),
        );

        assert_eq!(sanitized.get("owner"), Some(&json!("u1")));
        assert_eq!(sanitized.get("label"), Some(&Value::Null));
        assert!(!sanitized.contains_key("ghost"));

        let from_nothing = sanitize_view_params(&fields, None);
        assert_eq!(from_nothing.get("owner"), Some(&Value::Null));
    }

    #[test]
    fn test_transform_composes_onto_the_base_query() {
        let schema = schema_with_transform();
        let query = build_view_query(
            &schema,
            "Item",
            "byOwner",
            Some(&params(json!({"owner": "u1"}))),
            TableQuery::new(),
        )
        .unwrap();

        let mine = Resource::from_value(json!({"id": "a", "owner": "u1"})).unwrap();
        let other = Resource::from_value(json!({"id": "b", "owner": "u2"})).unwrap();
        assert!(query.matches(&mine));
        assert!(!query.matches(&other));
        assert_eq!(query.ordering(), Some(("id", SortOrder::Ascending)));
    }

    #[test]
    fn test_view_without_transform_is_a_no_op() {
        let schema = SchemaBuilder::new()
            .model(
                "Item",
                ModelSchema::new().with_view("all", ViewSchema::new()),
            )
            .build();

        let query =
            build_view_query(&schema, "Item", "all", None, TableQuery::new()).unwrap();
        let anything = Resource::from_value(json!({"id": "x"})).unwrap();
        assert!(query.matches(&anything));
    }

    #[test]
    fn test_unknown_view_is_rejected() {
        let schema = schema_with_transform();
        assert!(build_view_query(&schema, "Item", "missing", None, TableQuery::new()).is_err());
    }
}
