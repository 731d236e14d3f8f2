//! View-Affect Engine
//!
//! Given a written resource and the set of fields the write touched, this
//! module enumerates every view whose membership or routing may have changed:
//! the views declared on the written model itself, plus the foreign views of
//! other models reached through the schema's compiled back-reference index.
//!
//! Param and affecting values are read through relation functions where one
//! is registered for the candidate's target model, falling back to the raw
//! resource field. Relation outputs are opaque functions of the whole
//! document, so a relation-backed field always counts as potentially
//! modified.

use crate::models::schema::Schema;
use crate::models::Resource;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Before/after values of one modified field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// One view affected by a write.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewData {
    /// View name
    pub view: String,
    /// Model the view is routed under (the channel type)
    pub model: String,
    /// Values routing the resource to a view channel
    pub params: Map<String, Value>,
    /// Values deciding the resource's membership in the view
    pub affecting_data: Map<String, Value>,
    /// Routing subset of the param fields, when the view declares one
    pub primary_fields: Option<Vec<String>>,
    /// Whether realtime publications are suppressed for this view
    pub disable_realtime: bool,
}

/// Diff two resource states into the set of changed fields.
///
/// The union of both key sets is considered; values compare strictly, and
/// presence on only one side counts as a change.
pub fn modified_resource_fields(
    old: Option<&Resource>,
    new: Option<&Resource>,
) -> BTreeMap<String, FieldChange> {
    let mut fields: BTreeSet<&String> = BTreeSet::new();
    if let Some(old) = old {
        fields.extend(old.field_names());
    }
    if let Some(new) = new {
        fields.extend(new.field_names());
    }

    let mut changes = BTreeMap::new();
    for field in fields {
        let before = old.and_then(|r| r.get(field));
        let after = new.and_then(|r| r.get(field));
        if before != after {
            changes.insert(
                field.clone(),
                FieldChange {
                    before: before.cloned(),
                    after: after.cloned(),
                },
            );
        }
    }
    changes
}

/// Enumerates the views affected by writes, over a compiled schema.
#[derive(Clone)]
pub struct ViewAffectEngine {
    schema: Arc<Schema>,
}

impl ViewAffectEngine {
    /// Create an engine over the given schema
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    /// Enumerate the views affected by a write to `resource` of `model`.
    ///
    /// With `fields` supplied, a candidate is kept only when a modified field
    /// appears in `{id} ∪ param_fields ∪ affecting_fields`, or when one of
    /// its fields is relation-backed; without `fields`, every candidate is
    /// kept. Own views come first, then foreign views in index order.
    pub fn affected_views(
        &self,
        model: &str,
        resource: &Resource,
        fields: Option<&BTreeSet<String>>,
    ) -> Vec<ViewData> {
        let mut affected = Vec::new();
        let Some(model_schema) = self.schema.model(model) else {
            return affected;
        };

        for (view_name, view) in &model_schema.views {
            if view.is_foreign() {
                continue;
            }
            if !self.accepts(
                model,
                model,
                &view.param_fields,
                &view.affecting_fields,
                fields,
            ) {
                continue;
            }
            affected.push(ViewData {
                view: view_name.clone(),
                model: model.to_string(),
                params: self.read_fields(model, model, &view.param_fields, resource),
                affecting_data: self.read_fields(model, model, &view.affecting_fields, resource),
                primary_fields: view.primary_fields.clone(),
                disable_realtime: view.disable_realtime,
            });
        }

        for foreign in self.schema.foreign_views_of(model) {
            if !self.accepts(
                model,
                &foreign.target_model,
                &foreign.param_fields,
                &foreign.affecting_fields,
                fields,
            ) {
                continue;
            }
            affected.push(ViewData {
                view: foreign.view.clone(),
                model: foreign.target_model.clone(),
                params: self.read_fields(model, &foreign.target_model, &foreign.param_fields, resource),
                affecting_data: self.read_fields(
                    model,
                    &foreign.target_model,
                    &foreign.affecting_fields,
                    resource,
                ),
                primary_fields: foreign.primary_fields.clone(),
                disable_realtime: foreign.disable_realtime,
            });
        }

        affected
    }

    fn accepts(
        &self,
        source_model: &str,
        target_model: &str,
        param_fields: &[String],
        affecting_fields: &[String],
        fields: Option<&BTreeSet<String>>,
    ) -> bool {
        let Some(modified) = fields else {
            return true;
        };
        if modified.contains("id") {
            return true;
        }
        param_fields.iter().chain(affecting_fields).any(|field| {
            modified.contains(field)
                || self
                    .schema
                    .relation(source_model, target_model, field)
                    .is_some()
        })
    }

    fn read_fields(
        &self,
        source_model: &str,
        target_model: &str,
        fields: &[String],
        resource: &Resource,
    ) -> Map<String, Value> {
        fields
            .iter()
            .map(|field| {
                let value = match self.schema.relation(source_model, target_model, field) {
                    Some(relation) => relation(resource),
                    None => resource.get(field).cloned().unwrap_or(Value::Null),
                };
                (field.clone(), value)
            })
            .collect()
    }
}
