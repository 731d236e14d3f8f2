//! Query Validation
//!
//! Two layers guard the engine's entry points: [`parse_query`] turns the raw
//! JSON arriving over the socket into a [`CrudQuery`], rejecting malformed
//! shapes with precise errors, and [`validate_query`] checks an already-typed
//! query against the schema. Engine operations run `validate_query` on every
//! call; the access filter runs `parse_query` on every inbound invocation.

use crate::models::{CrudAction, CrudQuery, Schema};
use crate::services::error::CrudError;
use serde_json::Value;

/// Validate a typed query against the schema.
pub fn validate_query(query: &CrudQuery, schema: &Schema) -> Result<(), CrudError> {
    if query.model.is_empty() {
        return Err(CrudError::invalid_model_type("query type is missing"));
    }
    let model = schema.model(&query.model).ok_or_else(|| {
        CrudError::invalid_model_type(format!("unknown model type: {}", query.model))
    })?;

    if query.field.is_some() && query.id.is_none() {
        return Err(CrudError::invalid_params(
            "a field query requires a document id",
        ));
    }

    if let Some(view_name) = &query.view {
        let view = model.view(view_name).ok_or_else(|| {
            CrudError::invalid_params(format!(
                "view {} is not declared for model {}",
                view_name, query.model
            ))
        })?;

        if !view.param_fields.is_empty() || view.primary_fields.is_some() {
            let params = query.view_params.as_ref().ok_or_else(|| {
                CrudError::invalid_params(format!("view {} requires viewParams", view_name))
            })?;
            for field in view.primary_fields.as_deref().unwrap_or(&[]) {
                match params.get(field) {
                    None | Some(Value::Null) => {
                        return Err(CrudError::invalid_params(format!(
                            "viewParams is missing the primary field {}",
                            field
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
    }

    Ok(())
}

/// Parse and validate a raw inbound query object.
pub fn parse_query(data: &Value, schema: &Schema) -> Result<CrudQuery, CrudError> {
    let object = match data {
        Value::Object(object) => object,
        Value::Null => {
            return Err(CrudError::invalid_params("query must not be null"));
        }
        _ => {
            return Err(CrudError::invalid_params("query must be an object"));
        }
    };

    match object.get("type") {
        Some(Value::String(_)) => {}
        Some(_) => {
            return Err(CrudError::invalid_model_type("query type must be a string"));
        }
        None => {
            return Err(CrudError::invalid_model_type("query type is missing"));
        }
    }

    if let Some(action) = object.get("action") {
        let name = action
            .as_str()
            .ok_or_else(|| CrudError::invalid_operation("action must be a string"))?;
        if CrudAction::parse(name).is_none() {
            return Err(CrudError::invalid_operation(format!(
                "unknown action: {}",
                name
            )));
        }
    }

    if let Some(id) = object.get("id") {
        if !id.is_string() {
            return Err(CrudError::invalid_params("id must be a string"));
        }
    }
    if let Some(field) = object.get("field") {
        if !field.is_string() {
            return Err(CrudError::invalid_params("field must be a string"));
        }
    }
    for numeric in ["offset", "pageSize", "sliceTo"] {
        if let Some(value) = object.get(numeric) {
            if !value.is_u64() {
                return Err(CrudError::invalid_params(format!(
                    "{} must be a non-negative number",
                    numeric
                )));
            }
        }
    }
    if let Some(get_count) = object.get("getCount") {
        if !get_count.is_boolean() {
            return Err(CrudError::invalid_params("getCount must be a boolean"));
        }
    }
    if let Some(view_params) = object.get("viewParams") {
        if !view_params.is_object() {
            return Err(CrudError::invalid_params("viewParams must be an object"));
        }
    }

    let query: CrudQuery = serde_json::from_value(data.clone())
        .map_err(|e| CrudError::invalid_params(format!("malformed query: {}", e)))?;
    validate_query(&query, schema)?;
    Ok(query)
}
