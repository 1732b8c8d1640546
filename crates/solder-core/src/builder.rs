//! Declarative blueprints and the recursive builder.
//!
//! A [`Blueprint`] is the explicit, declaration-time description of how a
//! plugin type is constructed: its ordered parameter list, its declared
//! default attributes, and a constructor function that turns resolved
//! arguments into an instance. Attribute defaults are tagged once, at
//! declaration time, as [`Declared`] values: plain scalars, nested plugin
//! blueprints, or schema compositions. Nothing is re-inspected at build time.
//!
//! Building resolves each parameter in a fixed order: explicit override,
//! then declared attribute (recursing into nested blueprints and schemas),
//! then the constructor's own default for non-required parameters. A missing
//! required parameter is a [`BuildError::MissingParameter`] in strict mode
//! and a caller-supplied sentinel in permissive mode, which lets
//! introspection tooling walk incomplete declarations without failing.
//!
//! Building is deterministic and side-effect free apart from the constructed
//! instance; a blueprint is never mutated by building it.

use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{BuildError, BuildResult};
use crate::plugin::{BoxedPlugin, Plugin, PluginHandle};

// ─── Declared attributes ──────────────────────────────────────────────────────

/// A declarative attribute value, tagged once at declaration time.
#[derive(Clone)]
pub enum Declared {
    /// A scalar default, used as-is.
    Value(Value),
    /// A nested plugin type, built recursively.
    Plugin(Arc<Blueprint>),
    /// A schema composition, resolved field by field.
    Schema(Arc<SchemaBlueprint>),
}

impl fmt::Debug for Declared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Declared::Value(v) => write!(f, "Value({v})"),
            Declared::Plugin(bp) => write!(f, "Plugin({})", bp.path()),
            Declared::Schema(s) => write!(f, "Schema({})", s.path()),
        }
    }
}

// ─── Resolved arguments ───────────────────────────────────────────────────────

/// A fully resolved argument handed to a blueprint constructor.
#[derive(Clone, Debug)]
pub enum Resolved {
    /// A scalar value.
    Value(Value),
    /// A built nested plugin instance.
    Plugin(PluginHandle),
    /// A resolved schema composition.
    Schema(SchemaValue),
    /// Permissive-mode stand-in for a missing required parameter.
    Sentinel,
}

impl Resolved {
    /// The scalar value, if this is a [`Resolved::Value`].
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Resolved::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The built plugin handle, if this is a [`Resolved::Plugin`].
    pub fn as_plugin(&self) -> Option<&PluginHandle> {
        match self {
            Resolved::Plugin(p) => Some(p),
            _ => None,
        }
    }

    /// The schema value, if this is a [`Resolved::Schema`].
    pub fn as_schema(&self) -> Option<&SchemaValue> {
        match self {
            Resolved::Schema(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` for the permissive-mode sentinel.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Resolved::Sentinel)
    }

    /// Deserializes a scalar value into `T`. Returns `None` for non-scalar
    /// variants and for scalars of the wrong shape.
    pub fn to<T: DeserializeOwned>(&self) -> Option<T> {
        match self {
            Resolved::Value(v) => serde_json::from_value(v.clone()).ok(),
            _ => None,
        }
    }
}

/// Resolved arguments handed to a blueprint constructor.
#[derive(Debug, Default)]
pub struct Args {
    /// Values for declared parameters, keyed by parameter name. Parameters
    /// that are optional and undeclared are simply absent; the constructor
    /// supplies its own defaults.
    pub values: BTreeMap<String, Resolved>,
    /// Variadic keyword capture: declared attributes that matched no
    /// parameter, when the blueprint accepts them.
    pub extra: BTreeMap<String, Resolved>,
}

impl Args {
    /// Looks up a resolved parameter by name.
    pub fn get(&self, name: &str) -> Option<&Resolved> {
        self.values.get(name)
    }

    /// Deserializes a scalar parameter, falling back to `default` when the
    /// parameter is absent, non-scalar, or the permissive sentinel.
    pub fn scalar_or<T: DeserializeOwned>(&self, name: &str, default: T) -> T {
        self.get(name).and_then(Resolved::to).unwrap_or(default)
    }
}

// ─── Overrides ────────────────────────────────────────────────────────────────

/// Explicit per-build parameter overrides, possibly nested.
///
/// An override either replaces a parameter's value outright or carries an
/// override subtree applied to a nested plugin or schema attribute of the
/// same name.
#[derive(Clone, Default)]
pub struct Overrides {
    entries: BTreeMap<String, Override>,
}

#[derive(Clone)]
enum Override {
    Resolved(Resolved),
    Nested(Overrides),
}

impl Overrides {
    /// Creates an empty override set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides a parameter with a scalar value.
    pub fn set(mut self, name: impl Into<String>, value: Value) -> Self {
        self.entries
            .insert(name.into(), Override::Resolved(Resolved::Value(value)));
        self
    }

    /// Overrides a parameter with a pre-built plugin instance.
    pub fn set_plugin(mut self, name: impl Into<String>, handle: PluginHandle) -> Self {
        self.entries
            .insert(name.into(), Override::Resolved(Resolved::Plugin(handle)));
        self
    }

    /// Attaches an override subtree for a nested plugin or schema attribute.
    pub fn nest(mut self, name: impl Into<String>, nested: Overrides) -> Self {
        self.entries.insert(name.into(), Override::Nested(nested));
        self
    }

    /// Returns `true` if no overrides are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn direct(&self, name: &str) -> Option<&Resolved> {
        match self.entries.get(name) {
            Some(Override::Resolved(r)) => Some(r),
            _ => None,
        }
    }

    fn nested(&self, name: &str) -> Option<&Overrides> {
        match self.entries.get(name) {
            Some(Override::Nested(o)) => Some(o),
            _ => None,
        }
    }
}

// ─── Blueprint ────────────────────────────────────────────────────────────────

/// An ordered constructor parameter.
#[derive(Clone, Debug)]
struct Param {
    name: String,
    required: bool,
}

type Constructor = Arc<dyn Fn(Args) -> BuildResult<BoxedPlugin> + Send + Sync>;

/// The declarative description of a plugin type: parameters, declared
/// attribute defaults, and a constructor.
///
/// # Example
///
/// ```rust,ignore
/// let blueprint = Blueprint::new("myapp.Throttle", |args: Args| {
///     Ok(Throttle { per_second: args.scalar_or("per_second", 10) })
/// })
/// .required("per_second")
/// .attr("per_second", serde_json::json!(50))
/// .arc();
///
/// let handle = blueprint.build_default()?;
/// ```
pub struct Blueprint {
    path: &'static str,
    type_id: TypeId,
    params: Vec<Param>,
    attrs: BTreeMap<String, Declared>,
    variadic_keywords: bool,
    constructor: Constructor,
}

impl Blueprint {
    /// Creates a blueprint for plugin type `P` with the given reference path
    /// and constructor.
    pub fn new<P, F>(path: &'static str, constructor: F) -> Self
    where
        P: Plugin,
        F: Fn(Args) -> BuildResult<P> + Send + Sync + 'static,
    {
        Self {
            path,
            type_id: TypeId::of::<P>(),
            params: Vec::new(),
            attrs: BTreeMap::new(),
            variadic_keywords: false,
            constructor: Arc::new(move |args| {
                constructor(args).map(|p| Arc::new(p) as BoxedPlugin)
            }),
        }
    }

    /// Declares a required constructor parameter.
    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            required: true,
        });
        self
    }

    /// Declares an optional constructor parameter. When unresolved, the
    /// constructor supplies its own default.
    pub fn optional(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            required: false,
        });
        self
    }

    /// Declares a scalar attribute default.
    pub fn attr(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attrs.insert(name.into(), Declared::Value(value));
        self
    }

    /// Declares a nested plugin attribute, built recursively.
    pub fn nested(mut self, name: impl Into<String>, blueprint: Arc<Blueprint>) -> Self {
        self.attrs.insert(name.into(), Declared::Plugin(blueprint));
        self
    }

    /// Declares a schema attribute, resolved field by field.
    pub fn schema(mut self, name: impl Into<String>, schema: Arc<SchemaBlueprint>) -> Self {
        self.attrs.insert(name.into(), Declared::Schema(schema));
        self
    }

    /// Marks the constructor as accepting arbitrary keyword capture. Declared
    /// attributes matching no parameter are then passed in [`Args::extra`]
    /// instead of being attached to the handle after construction.
    pub fn variadic_keywords(mut self, accept: bool) -> Self {
        self.variadic_keywords = accept;
        self
    }

    /// The blueprint's reference path.
    pub fn path(&self) -> &'static str {
        self.path
    }

    /// `TypeId` of the plugin type this blueprint produces.
    pub fn plugin_type(&self) -> TypeId {
        self.type_id
    }

    /// Wraps the blueprint in an `Arc` for sharing.
    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Builds an instance with the given overrides, failing on missing
    /// required parameters.
    pub fn build(&self, overrides: &Overrides) -> BuildResult<PluginHandle> {
        self.build_inner(overrides, None)
    }

    /// Builds an instance with no overrides.
    pub fn build_default(&self) -> BuildResult<PluginHandle> {
        self.build(&Overrides::default())
    }

    /// Builds an instance, substituting `sentinel` for any missing required
    /// parameter instead of failing. Meant for introspection and
    /// documentation tooling that must not hard-fail on incomplete
    /// declarations.
    pub fn build_permissive(
        &self,
        overrides: &Overrides,
        sentinel: Resolved,
    ) -> BuildResult<PluginHandle> {
        self.build_inner(overrides, Some(&sentinel))
    }

    fn build_inner(
        &self,
        overrides: &Overrides,
        sentinel: Option<&Resolved>,
    ) -> BuildResult<PluginHandle> {
        let mut values = BTreeMap::new();

        for param in &self.params {
            let resolved = if let Some(direct) = overrides.direct(&param.name) {
                Some(direct.clone())
            } else if let Some(declared) = self.attrs.get(&param.name) {
                Some(resolve_declared(
                    declared,
                    overrides.nested(&param.name),
                    sentinel,
                )?)
            } else if !param.required {
                None
            } else if let Some(s) = sentinel {
                Some(s.clone())
            } else {
                return Err(BuildError::MissingParameter {
                    plugin: self.path.to_string(),
                    param: param.name.clone(),
                });
            };
            if let Some(r) = resolved {
                values.insert(param.name.clone(), r);
            }
        }

        // Extras pass: declared attributes that match no parameter.
        let mut extra = BTreeMap::new();
        let mut unconsumed = BTreeMap::new();
        for (name, declared) in &self.attrs {
            if self.params.iter().any(|p| p.name == *name) {
                continue;
            }
            let resolved = resolve_declared(declared, overrides.nested(name), sentinel)?;
            if self.variadic_keywords {
                extra.insert(name.clone(), resolved);
            } else {
                unconsumed.insert(name.clone(), resolved);
            }
        }

        let instance = (self.constructor)(Args { values, extra })?;
        let mut handle = PluginHandle::from_boxed(instance);
        if !unconsumed.is_empty() {
            handle = handle.with_extras(unconsumed);
        }
        Ok(handle)
    }
}

impl fmt::Debug for Blueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blueprint")
            .field("path", &self.path)
            .field("params", &self.params)
            .field("attrs", &self.attrs)
            .field("variadic_keywords", &self.variadic_keywords)
            .finish_non_exhaustive()
    }
}

fn resolve_declared(
    declared: &Declared,
    nested: Option<&Overrides>,
    sentinel: Option<&Resolved>,
) -> BuildResult<Resolved> {
    match declared {
        Declared::Value(v) => Ok(Resolved::Value(v.clone())),
        Declared::Plugin(bp) => {
            let empty = Overrides::default();
            let handle = bp.build_inner(nested.unwrap_or(&empty), sentinel)?;
            Ok(Resolved::Plugin(handle))
        }
        Declared::Schema(schema) => Ok(Resolved::Schema(schema.resolve(nested, sentinel)?)),
    }
}

// ─── Schema composition ───────────────────────────────────────────────────────

/// The declarative description of a schema attribute: a named set of fields,
/// each itself a [`Declared`] value.
pub struct SchemaBlueprint {
    path: &'static str,
    fields: BTreeMap<String, Declared>,
}

impl SchemaBlueprint {
    /// Creates an empty schema blueprint with the given reference path.
    pub fn new(path: &'static str) -> Self {
        Self {
            path,
            fields: BTreeMap::new(),
        }
    }

    /// Declares a scalar field.
    pub fn value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), Declared::Value(value));
        self
    }

    /// Declares a nested plugin field.
    pub fn nested(mut self, name: impl Into<String>, blueprint: Arc<Blueprint>) -> Self {
        self.fields.insert(name.into(), Declared::Plugin(blueprint));
        self
    }

    /// Declares a nested schema field.
    pub fn schema(mut self, name: impl Into<String>, schema: Arc<SchemaBlueprint>) -> Self {
        self.fields.insert(name.into(), Declared::Schema(schema));
        self
    }

    /// The schema's reference path.
    pub fn path(&self) -> &'static str {
        self.path
    }

    /// Wraps the schema in an `Arc` for sharing.
    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn resolve(
        &self,
        overrides: Option<&Overrides>,
        sentinel: Option<&Resolved>,
    ) -> BuildResult<SchemaValue> {
        let mut fields = BTreeMap::new();
        for (name, declared) in &self.fields {
            let direct = overrides.and_then(|o| o.direct(name));
            let resolved = if let Some(d) = direct {
                d.clone()
            } else {
                resolve_declared(declared, overrides.and_then(|o| o.nested(name)), sentinel)?
            };
            fields.insert(name.clone(), resolved);
        }
        Ok(SchemaValue {
            path: self.path,
            fields,
        })
    }
}

impl fmt::Debug for SchemaBlueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaBlueprint")
            .field("path", &self.path)
            .field("fields", &self.fields)
            .finish()
    }
}

/// A resolved schema composition. The field map is the instance: every
/// declarative field stays inspectable, whether or not a typed consumer
/// reads it.
#[derive(Clone, Debug)]
pub struct SchemaValue {
    path: &'static str,
    fields: BTreeMap<String, Resolved>,
}

impl SchemaValue {
    /// The schema's reference path.
    pub fn path(&self) -> &'static str {
        self.path
    }

    /// Looks up a resolved field by name.
    pub fn get(&self, name: &str) -> Option<&Resolved> {
        self.fields.get(name)
    }

    /// All resolved fields.
    pub fn fields(&self) -> &BTreeMap<String, Resolved> {
        &self.fields
    }

    /// Deserializes a scalar field, falling back to `default` when the field
    /// is absent or non-scalar.
    pub fn scalar_or<T: DeserializeOwned>(&self, name: &str, default: T) -> T {
        self.get(name).and_then(Resolved::to).unwrap_or(default)
    }
}
