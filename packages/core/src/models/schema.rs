//! Schema-as-Data Model
//!
//! The schema maps model names to field constraints, secondary indexes,
//! parameterised views, cross-model relations, and access hooks. It is built
//! once through [`SchemaBuilder`] and read-only afterwards; the builder also
//! compiles the two flat back-reference indices the realtime engine needs:
//!
//! - **foreign views**: for each written model, every view living on another
//!   model whose membership depends on this model's documents
//! - **relations**: `source model → target model → field → mapping function`
//!
//! The declarations themselves form a tree; the model↔model cycle only exists
//! inside these precomputed indices.
//!
//! # Foreign views
//!
//! A view declared under model `P` with `foreign_affecting_fields` keyed by
//! model `T` is a view *of* `T` that writes to `P` documents affect: its
//! channel type is `T`, and its params are evaluated through the `P → T`
//! relation functions. Such a view is foreign-only; it is never routed as a
//! view of `P` itself.

use crate::db::store::{IndexSpec, TableQuery};
use crate::models::query::{CrudAction, CrudQuery};
use crate::models::resource::Resource;
use crate::services::error::CrudError;
use crate::socket::SocketInfo;
use crate::validation::TypeConstraint;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Maps a resource of the declaring model into a field value of another
/// model's namespace.
pub type RelationFn = Arc<dyn Fn(&Resource) -> Value + Send + Sync>;

/// Transforms a base collection query into the view's filtered, ordered
/// projection. Receives the sanitized view params.
pub trait ViewTransform: Send + Sync {
    fn apply(&self, query: TableQuery, params: &Map<String, Value>) -> TableQuery;
}

impl<F> ViewTransform for F
where
    F: Fn(TableQuery, &Map<String, Value>) -> TableQuery + Send + Sync,
{
    fn apply(&self, query: TableQuery, params: &Map<String, Value>) -> TableQuery {
        self(query, params)
    }
}

/// Context handed to access hooks on every invocation and subscription.
#[derive(Debug, Clone)]
pub struct AccessRequest {
    /// The invoking socket; `None` for server-origin calls
    pub socket: Option<SocketInfo>,
    /// Operation being checked
    pub action: CrudAction,
    /// Opaque auth token of the socket, when present
    pub auth_token: Option<Value>,
    /// The query under check
    pub query: CrudQuery,
    /// Pre-fetched subject for post hooks (document or id page)
    pub resource: Option<Value>,
}

/// A pre- or post-access hook declared on a model.
///
/// `Ok(true)` allows, `Ok(false)` denies (lifted to the canonical blocked
/// error by the caller), `Err` blocks with the returned error.
#[async_trait]
pub trait AccessHook: Send + Sync {
    async fn check(&self, request: &AccessRequest) -> Result<bool, CrudError>;
}

struct FnAccessHook<F>(F);

#[async_trait]
impl<F> AccessHook for FnAccessHook<F>
where
    F: Fn(&AccessRequest) -> Result<bool, CrudError> + Send + Sync,
{
    async fn check(&self, request: &AccessRequest) -> Result<bool, CrudError> {
        (self.0)(request)
    }
}

/// The access hooks of one model.
#[derive(Clone, Default)]
pub struct AccessHooks {
    /// Runs before any operation touches data
    pub pre: Option<Arc<dyn AccessHook>>,
    /// Runs after data is loaded, with the subject attached
    pub post: Option<Arc<dyn AccessHook>>,
}

impl AccessHooks {
    /// No hooks
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a pre hook
    pub fn with_pre(mut self, hook: Arc<dyn AccessHook>) -> Self {
        self.pre = Some(hook);
        self
    }

    /// Install a post hook
    pub fn with_post(mut self, hook: Arc<dyn AccessHook>) -> Self {
        self.post = Some(hook);
        self
    }

    /// Install a synchronous pre hook from a closure
    pub fn with_pre_fn(
        self,
        hook: impl Fn(&AccessRequest) -> Result<bool, CrudError> + Send + Sync + 'static,
    ) -> Self {
        self.with_pre(Arc::new(FnAccessHook(hook)))
    }

    /// Install a synchronous post hook from a closure
    pub fn with_post_fn(
        self,
        hook: impl Fn(&AccessRequest) -> Result<bool, CrudError> + Send + Sync + 'static,
    ) -> Self {
        self.with_post(Arc::new(FnAccessHook(hook)))
    }
}

/// Declaration of one view on a model.
#[derive(Clone, Default)]
pub struct ViewSchema {
    /// Fields whose values select the view channel; also what the transform
    /// receives
    pub param_fields: Vec<String>,
    /// Routing subset of `param_fields` used for the channel name
    pub primary_fields: Option<Vec<String>>,
    /// Fields that alter membership without changing the channel identity
    pub affecting_fields: Vec<String>,
    /// Foreign declarations: target model name → affecting fields of the
    /// declaring model
    pub foreign_affecting_fields: BTreeMap<String, Vec<String>>,
    /// Optional query transform producing the view's projection
    pub transform: Option<Arc<dyn ViewTransform>>,
    /// Suppress all realtime publications for this view
    pub disable_realtime: bool,
}

impl ViewSchema {
    /// An empty view declaration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the param fields
    pub fn with_param_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.param_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Set the primary (routing) fields
    pub fn with_primary_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Set the affecting fields
    pub fn with_affecting_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affecting_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Declare the view as foreign to `target_model`, affected by the listed
    /// fields of the declaring model
    pub fn with_foreign_affecting_fields<I, S>(
        mut self,
        target_model: impl Into<String>,
        fields: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.foreign_affecting_fields.insert(
            target_model.into(),
            fields.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Install the query transform
    pub fn with_transform(mut self, transform: impl ViewTransform + 'static) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Turn off realtime publications for this view
    pub fn without_realtime(mut self) -> Self {
        self.disable_realtime = true;
        self
    }

    /// Whether this view is foreign-only (routed under another model)
    pub fn is_foreign(&self) -> bool {
        !self.foreign_affecting_fields.is_empty()
    }
}

/// Declaration of one model (typed collection).
#[derive(Clone, Default)]
pub struct ModelSchema {
    /// Field name → type constraint
    pub fields: BTreeMap<String, TypeConstraint>,
    /// Secondary indexes created at bootstrap
    pub indexes: Vec<IndexSpec>,
    /// View name → declaration
    pub views: BTreeMap<String, ViewSchema>,
    /// Target model → field → relation function
    pub relations: BTreeMap<String, BTreeMap<String, RelationFn>>,
    /// Access hooks
    pub access: AccessHooks,
    /// Upper bound for client-supplied page sizes
    pub max_page_size: Option<u64>,
}

impl ModelSchema {
    /// An empty model declaration
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field
    pub fn with_field(mut self, name: impl Into<String>, constraint: TypeConstraint) -> Self {
        self.fields.insert(name.into(), constraint);
        self
    }

    /// Declare a secondary index
    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Declare a view
    pub fn with_view(mut self, name: impl Into<String>, view: ViewSchema) -> Self {
        self.views.insert(name.into(), view);
        self
    }

    /// Declare a relation mapping this model's documents into a field of
    /// `target_model`'s namespace
    pub fn with_relation(
        mut self,
        target_model: impl Into<String>,
        field: impl Into<String>,
        relation: impl Fn(&Resource) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.relations
            .entry(target_model.into())
            .or_default()
            .insert(field.into(), Arc::new(relation));
        self
    }

    /// Install access hooks
    pub fn with_access(mut self, access: AccessHooks) -> Self {
        self.access = access;
        self
    }

    /// Cap client-supplied page sizes
    pub fn with_max_page_size(mut self, max_page_size: u64) -> Self {
        self.max_page_size = Some(max_page_size);
        self
    }

    /// Look up one field constraint
    pub fn field(&self, name: &str) -> Option<&TypeConstraint> {
        self.fields.get(name)
    }

    /// Look up one view declaration
    pub fn view(&self, name: &str) -> Option<&ViewSchema> {
        self.views.get(name)
    }
}

/// A view of another model affected by writes to the keyed model.
#[derive(Clone)]
pub struct ForeignViewRef {
    /// Model the view is routed under (its channel type)
    pub target_model: String,
    /// View name
    pub view: String,
    /// Param fields, in the target model's namespace
    pub param_fields: Vec<String>,
    /// Routing subset of the param fields, when declared
    pub primary_fields: Option<Vec<String>>,
    /// Affecting fields of the written model
    pub affecting_fields: Vec<String>,
    /// Whether the view suppresses realtime publications
    pub disable_realtime: bool,
}

/// The process-wide schema: immutable after construction.
#[derive(Clone, Default)]
pub struct Schema {
    models: BTreeMap<String, ModelSchema>,
    foreign_views: BTreeMap<String, Vec<ForeignViewRef>>,
}

impl Schema {
    fn compile(models: BTreeMap<String, ModelSchema>) -> Self {
        let mut foreign_views: BTreeMap<String, Vec<ForeignViewRef>> = BTreeMap::new();
        for (model_name, model) in &models {
            for (view_name, view) in &model.views {
                for (target_model, affecting_fields) in &view.foreign_affecting_fields {
                    foreign_views
                        .entry(model_name.clone())
                        .or_default()
                        .push(ForeignViewRef {
                            target_model: target_model.clone(),
                            view: view_name.clone(),
                            param_fields: view.param_fields.clone(),
                            primary_fields: view.primary_fields.clone(),
                            affecting_fields: affecting_fields.clone(),
                            disable_realtime: view.disable_realtime,
                        });
                }
            }
        }
        for refs in foreign_views.values_mut() {
            refs.sort_by(|a, b| {
                (a.target_model.as_str(), a.view.as_str())
                    .cmp(&(b.target_model.as_str(), b.view.as_str()))
            });
        }
        Self {
            models,
            foreign_views,
        }
    }

    /// Look up a model declaration
    pub fn model(&self, name: &str) -> Option<&ModelSchema> {
        self.models.get(name)
    }

    /// Whether the model is declared
    pub fn has_model(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Look up a view declaration under a model
    pub fn view(&self, model: &str, view: &str) -> Option<&ViewSchema> {
        self.models.get(model).and_then(|m| m.view(view))
    }

    /// Every foreign view affected by writes to `model`
    pub fn foreign_views_of(&self, model: &str) -> &[ForeignViewRef] {
        self.foreign_views
            .get(model)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Relation function mapping `source` documents into `field` of
    /// `target`'s namespace
    pub fn relation(&self, source: &str, target: &str, field: &str) -> Option<&RelationFn> {
        self.models
            .get(source)
            .and_then(|m| m.relations.get(target))
            .and_then(|fields| fields.get(field))
    }

    /// Whether a field of a model carries comma-separated multi semantics
    pub fn is_multi_field(&self, model: &str, field: &str) -> bool {
        self.models
            .get(model)
            .and_then(|m| m.field(field))
            .map(TypeConstraint::is_multi)
            .unwrap_or(false)
    }

    /// Iterate over declared model names
    pub fn model_names(&self) -> impl Iterator<Item = &String> {
        self.models.keys()
    }

    /// Iterate over declared models
    pub fn models(&self) -> impl Iterator<Item = (&String, &ModelSchema)> {
        self.models.iter()
    }
}

/// Builder assembling a [`Schema`] and compiling its flat indices.
///
/// # Examples
///
/// ```rust
/// use crudcast_core::models::{ModelSchema, SchemaBuilder, ViewSchema};
/// use crudcast_core::validation::TypeConstraint;
///
/// let schema = SchemaBuilder::new()
///     .model(
///         "Item",
///         ModelSchema::new()
///             .with_field("id", TypeConstraint::string())
///             .with_field("owner", TypeConstraint::string().required())
///             .with_view("byOwner", ViewSchema::new().with_param_fields(["owner"])),
///     )
///     .build();
///
/// assert!(schema.has_model("Item"));
/// assert!(schema.view("Item", "byOwner").is_some());
/// ```
#[derive(Default)]
pub struct SchemaBuilder {
    models: BTreeMap<String, ModelSchema>,
}

impl SchemaBuilder {
    /// Start an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a model
    pub fn model(mut self, name: impl Into<String>, model: ModelSchema) -> Self {
        self.models.insert(name.into(), model);
        self
    }

    /// Compile the schema
    pub fn build(self) -> Schema {
        Schema::compile(self.models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cross_model_schema() -> Schema {
        SchemaBuilder::new()
            .model(
                "User",
                ModelSchema::new().with_field("id", TypeConstraint::string()),
            )
            .model(
                "Item",
                ModelSchema::new()
                    .with_field("id", TypeConstraint::string())
                    .with_field("ownerId", TypeConstraint::string())
                    .with_view(
                        "byUser",
                        ViewSchema::new()
                            .with_param_fields(["id"])
                            .with_foreign_affecting_fields("User", Vec::<String>::new()),
                    )
                    .with_relation("User", "id", |item| {
                        item.get("ownerId").cloned().unwrap_or(Value::Null)
                    }),
            )
            .build()
    }

    #[test]
    fn test_foreign_view_index_is_keyed_by_written_model() {
        let schema = cross_model_schema();

        let refs = schema.foreign_views_of("Item");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].target_model, "User");
        assert_eq!(refs[0].view, "byUser");
        assert_eq!(refs[0].param_fields, vec!["id"]);

        assert!(schema.foreign_views_of("User").is_empty());
    }

    #[test]
    fn test_relation_lookup_and_evaluation() {
        let schema = cross_model_schema();
        let relation = schema.relation("Item", "User", "id").unwrap();

        let item = Resource::from_value(json!({"id": "i1", "ownerId": "u7"})).unwrap();
        assert_eq!(relation(&item), json!("u7"));

        assert!(schema.relation("User", "Item", "id").is_none());
    }

    #[test]
    fn test_foreign_views_are_marked_foreign() {
        let schema = cross_model_schema();
        assert!(schema.view("Item", "byUser").unwrap().is_foreign());

        let own_only = SchemaBuilder::new()
            .model(
                "Item",
                ModelSchema::new()
                    .with_view("byOwner", ViewSchema::new().with_param_fields(["owner"])),
            )
            .build();
        assert!(!own_only.view("Item", "byOwner").unwrap().is_foreign());
    }

    #[test]
    fn test_multi_field_detection() {
        let schema = SchemaBuilder::new()
            .model(
                "Item",
                ModelSchema::new()
                    .with_field("tags", TypeConstraint::string().multi())
                    .with_field("owner", TypeConstraint::string()),
            )
            .build();

        assert!(schema.is_multi_field("Item", "tags"));
        assert!(!schema.is_multi_field("Item", "owner"));
        assert!(!schema.is_multi_field("Item", "missing"));
    }
}
