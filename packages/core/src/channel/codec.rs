//! Channel-Name Codec
//!
//! All realtime traffic flows over channels in the `crud>` namespace, in one
//! of three shapes:
//!
//! | Shape          | Format                    |
//! |----------------|---------------------------|
//! | Resource       | `crud>TYPE/ID`            |
//! | Resource field | `crud>TYPE/ID/FIELD`      |
//! | View           | `crud>VIEW(JSON):TYPE`    |
//!
//! The view JSON is the stable, key-sorted serialization of the view's
//! primary params, so both sides of the publish/subscribe boundary hash to
//! the same channel. Unless `typed` params are requested, scalar param values
//! are coerced to strings to keep names invariant across JSON number/string
//! inputs.

use crate::channel::stable_json::stable_stringify;
use crate::models::{CrudAction, CrudQuery};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Namespace prefix of every CRUD channel.
pub const CHANNEL_PREFIX: &str = "crud>";

fn envelope_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^crud>(.*)$").expect("valid regex"))
}

fn view_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^(]*)\((.*)\):([^:]*)$").expect("valid regex"))
}

/// Channel name of a single resource.
pub fn resource_channel(model: &str, id: &str) -> String {
    format!("{}{}/{}", CHANNEL_PREFIX, model, id)
}

/// Channel name of one field of a resource.
pub fn field_channel(model: &str, id: &str, field: &str) -> String {
    format!("{}{}/{}/{}", CHANNEL_PREFIX, model, id, field)
}

/// Channel name of a view for one set of primary params.
///
/// `params` must already be the primary-params projection (see
/// [`primary_params`]).
pub fn view_channel(view: &str, model: &str, params: &Map<String, Value>) -> String {
    format!(
        "{}{}({}):{}",
        CHANNEL_PREFIX,
        view,
        stable_stringify(&Value::Object(params.clone())),
        model
    )
}

/// Project view params onto the channel's routing params.
///
/// When the view declares `primary_fields`, only those fields survive, with
/// missing ones coerced to null; otherwise the whole params object is used.
/// Unless `typed`, scalar values are coerced to their string representation.
pub fn primary_params(
    primary_fields: Option<&[String]>,
    params: &Map<String, Value>,
    typed: bool,
) -> Map<String, Value> {
    let projected: Map<String, Value> = match primary_fields {
        Some(primary_fields) => primary_fields
            .iter()
            .map(|field| {
                (
                    field.clone(),
                    params.get(field).cloned().unwrap_or(Value::Null),
                )
            })
            .collect(),
        None => params.clone(),
    };

    if typed {
        return projected;
    }
    projected
        .into_iter()
        .map(|(field, value)| (field, coerce_to_string(value)))
        .collect()
}

fn coerce_to_string(value: Value) -> Value {
    match value {
        Value::String(_) | Value::Null => value,
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        composite => composite,
    }
}

/// A channel name decoded back into query form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelResourceQuery {
    pub model: String,
    pub id: Option<String>,
    pub field: Option<String>,
    pub view: Option<String>,
    /// Decoded view params; `None` when the embedded JSON does not parse
    pub view_params: Option<Map<String, Value>>,
}

impl ChannelResourceQuery {
    /// Convert into a [`CrudQuery`] with the given action
    pub fn into_query(self, action: CrudAction) -> CrudQuery {
        CrudQuery {
            action: Some(action),
            model: self.model,
            id: self.id,
            field: self.field,
            view: self.view,
            view_params: self.view_params,
            ..Default::default()
        }
    }
}

/// Decode a channel name into its resource query.
///
/// Returns `None` for channels outside the `crud>` namespace or with an
/// unrecognised shape. A view channel whose embedded JSON fails to parse
/// still decodes; only its `view_params` come back as `None`.
pub fn parse_channel_resource_query(name: &str) -> Option<ChannelResourceQuery> {
    let captures = envelope_regex().captures(name)?;
    let inner = captures.get(1)?.as_str();

    if let Some(view_captures) = view_regex().captures(inner) {
        let view = view_captures.get(1)?.as_str();
        let json = view_captures.get(2)?.as_str();
        let model = view_captures.get(3)?.as_str();
        if view.is_empty() || model.is_empty() {
            return None;
        }

        let view_params = serde_json::from_str::<Value>(json)
            .ok()
            .and_then(|value| match value {
                Value::Object(map) => Some(map),
                _ => None,
            });

        return Some(ChannelResourceQuery {
            model: model.to_string(),
            view: Some(view.to_string()),
            view_params,
            ..Default::default()
        });
    }

    let parts: Vec<&str> = inner.split('/').collect();
    match parts.as_slice() {
        [model, id] if !model.is_empty() && !id.is_empty() => Some(ChannelResourceQuery {
            model: model.to_string(),
            id: Some(id.to_string()),
            ..Default::default()
        }),
        [model, id, field] if !model.is_empty() && !id.is_empty() && !field.is_empty() => {
            Some(ChannelResourceQuery {
                model: model.to_string(),
                id: Some(id.to_string()),
                field: Some(field.to_string()),
                ..Default::default()
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_resource_and_field_channels() {
        assert_eq!(resource_channel("Item", "i1"), "crud>Item/i1");
        assert_eq!(field_channel("Item", "i1", "owner"), "crud>Item/i1/owner");
    }

    #[test]
    fn test_view_channel_name() {
        let name = view_channel("byOwner", "Item", &params(json!({"owner": "u1"})));
        assert_eq!(name, r#"crud>byOwner({"owner":"u1"}):Item"#);
    }

    #[test]
    fn test_parse_resource_channels() {
        let parsed = parse_channel_resource_query("crud>Item/i1").unwrap();
        assert_eq!(parsed.model, "Item");
        assert_eq!(parsed.id.as_deref(), Some("i1"));
        assert_eq!(parsed.field, None);

        let parsed = parse_channel_resource_query("crud>Item/i1/owner").unwrap();
        assert_eq!(parsed.field.as_deref(), Some("owner"));

        assert_eq!(parse_channel_resource_query("other>Item/i1"), None);
        assert_eq!(parse_channel_resource_query("crud>Item"), None);
    }

    #[test]
    fn test_view_round_trip_recovers_primary_params() {
        let primary = vec!["owner".to_string()];

        let input = params(json!({"owner": "u1", "label": "x"}));
        let projected = primary_params(Some(primary.as_slice()), &input, false);
        let name = view_channel("pinned", "Item", &projected);

        let parsed = parse_channel_resource_query(&name).unwrap();
        assert_eq!(parsed.view.as_deref(), Some("pinned"));
        assert_eq!(parsed.model, "Item");
        assert_eq!(parsed.view_params, Some(params(json!({"owner": "u1"}))));
    }

    #[test]
    fn test_unparsable_view_json_degrades_to_none() {
        let parsed = parse_channel_resource_query("crud>byOwner(not-json):Item").unwrap();
        assert_eq!(parsed.view.as_deref(), Some("byOwner"));
        assert_eq!(parsed.model, "Item");
        assert_eq!(parsed.view_params, None);
    }

    #[test]
    fn test_primary_params_coerces_missing_to_null() {
        let primary = vec!["owner".to_string(), "label".to_string()];

        let projected =
            primary_params(Some(primary.as_slice()), &params(json!({"owner": "u1"})), false);
        assert_eq!(projected.get("label"), Some(&Value::Null));
    }

    #[test]
    fn test_string_coercion_unifies_numbers_and_strings() {
        let as_number = primary_params(None, &params(json!({"rank": 5})), false);
        let as_string = primary_params(None, &params(json!({"rank": "5"})), false);
        assert_eq!(
            view_channel("byRank", "Item", &as_number),
            view_channel("byRank", "Item", &as_string)
        );

        // Typed mode keeps the original JSON types apart
        let typed = primary_params(None, &params(json!({"rank": 5})), true);
        assert_eq!(typed.get("rank"), Some(&json!(5)));
    }

    #[test]
    fn test_key_permutation_hashes_to_the_same_channel() {
        let forward: Map<String, Value> =
            serde_json::from_str(r#"{"a":"1","b":"2"}"#).unwrap();
        let backward: Map<String, Value> =
            serde_json::from_str(r#"{"b":"2","a":"1"}"#).unwrap();
        assert_eq!(
            view_channel("v", "Item", &forward),
            view_channel("v", "Item", &backward)
        );
    }
}
