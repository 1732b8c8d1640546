//! Target classes, the class registry, and per-instance plugin sets.
//!
//! A [`TargetClass`] is the explicit stand-in for "a class that carries
//! plugins": it has a path, an optional parent, fixed (type-constrained)
//! slots, and a merged plugin set computed once at definition time. Classes
//! are defined through [`TargetDef`] against a process-wide [`Registry`],
//! which owns the path namespace and assigns each class its [`ClassKey`].
//!
//! The merge invariant: a class's plugin set is its parent's set (ancestor
//! entries first, positions preserved) updated with the class's own slots.
//! Redeclaring a plugin type replaces the entry in place, so descendants see
//! the nearest declaration without reordering.
//!
//! Registries and class plugin sets are built during single-threaded setup;
//! [`TargetClass::add_plugins`] and [`TargetClass::remove_plugins`] are
//! setup-time APIs, not steady-state ones. Per-instance state lives in
//! [`PluginHost`], which snapshots the class set at construction and applies
//! instance-supplied overrides without touching the class.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::builder::{Blueprint, Overrides};
use crate::error::{BuildError, BuildResult};
use crate::plugin::{Plugin, PluginHandle, PluginMeta};

// ─── Keys and entries ─────────────────────────────────────────────────────────

/// Opaque identifier for a defined target class, assigned by its [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassKey(u64);

/// A fixed, type-constrained plugin slot declared in a class body.
#[derive(Debug, Clone)]
struct FixedSlot {
    type_id: TypeId,
    type_path: &'static str,
}

/// One entry of a plugin set: either a built instance or a blueprint that is
/// built anew for every target instance.
#[derive(Clone)]
pub enum PluginEntry {
    /// A built, shareable instance.
    Built(PluginHandle),
    /// A blueprint materialized per target instance.
    Deferred(Arc<Blueprint>),
}

impl PluginEntry {
    /// The plugin type this entry is keyed by.
    pub fn plugin_type(&self) -> TypeId {
        match self {
            PluginEntry::Built(handle) => handle.plugin_type(),
            PluginEntry::Deferred(bp) => bp.plugin_type(),
        }
    }

    /// The built handle, if this entry is materialized.
    pub fn handle(&self) -> Option<&PluginHandle> {
        match self {
            PluginEntry::Built(handle) => Some(handle),
            PluginEntry::Deferred(_) => None,
        }
    }
}

impl fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginEntry::Built(h) => write!(f, "Built({})", h.ref_path()),
            PluginEntry::Deferred(bp) => write!(f, "Deferred({})", bp.path()),
        }
    }
}

// ─── PluginSet ────────────────────────────────────────────────────────────────

/// An insertion-ordered plugin-type to entry map.
///
/// Inserting an already-present type replaces the entry in place, preserving
/// the position the type first appeared at. This is what keeps the
/// ancestor-merge deterministic: a subclass overriding an ancestor's plugin
/// type does not move it in the dispatch order.
#[derive(Clone, Default)]
pub struct PluginSet {
    entries: Vec<PluginEntry>,
}

impl PluginSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for its plugin type.
    pub fn insert(&mut self, entry: PluginEntry) {
        let ty = entry.plugin_type();
        if let Some(slot) = self.entries.iter_mut().find(|e| e.plugin_type() == ty) {
            *slot = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// Removes the entry for a plugin type, if present.
    pub fn remove(&mut self, ty: TypeId) -> Option<PluginEntry> {
        let pos = self.entries.iter().position(|e| e.plugin_type() == ty)?;
        Some(self.entries.remove(pos))
    }

    /// Looks up the entry for a plugin type.
    pub fn get(&self, ty: TypeId) -> Option<&PluginEntry> {
        self.entries.iter().find(|e| e.plugin_type() == ty)
    }

    /// Returns `true` if an entry exists for the plugin type.
    pub fn contains(&self, ty: TypeId) -> bool {
        self.get(ty).is_some()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &PluginEntry> {
        self.entries.iter()
    }

    /// Builds every deferred entry, yielding a fully materialized copy.
    /// Each call produces fresh instances for deferred blueprints.
    pub(crate) fn materialize(&self) -> BuildResult<PluginSet> {
        let mut entries = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            entries.push(match entry {
                PluginEntry::Built(handle) => PluginEntry::Built(handle.clone()),
                PluginEntry::Deferred(bp) => {
                    PluginEntry::Built(bp.build(&Overrides::default())?)
                }
            });
        }
        Ok(PluginSet { entries })
    }
}

impl fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

// ─── TargetClass ──────────────────────────────────────────────────────────────

/// A defined target class: path, parent pointer, fixed slots, and the merged
/// plugin set.
///
/// Instances of this type are always handled as `Arc<TargetClass>`; the
/// parent pointer forms the explicit hierarchy chain that extension points
/// walk at resolution time.
pub struct TargetClass {
    key: ClassKey,
    path: String,
    parent: Option<Arc<TargetClass>>,
    fixed: BTreeMap<String, FixedSlot>,
    /// Merged plugin set. Mutable only through the setup-time APIs.
    plugins: RwLock<PluginSet>,
}

impl TargetClass {
    /// The registry-assigned key.
    pub fn key(&self) -> ClassKey {
        self.key
    }

    /// The class path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The parent class, if any.
    pub fn parent(&self) -> Option<&Arc<TargetClass>> {
        self.parent.as_ref()
    }

    /// A snapshot of the class's merged plugin set.
    pub fn plugins(&self) -> PluginSet {
        self.plugins.read().clone()
    }

    /// Adds plugin entries to the class set (setup-time API). Entries
    /// replace existing ones of the same plugin type in place.
    pub fn add_plugins(&self, entries: impl IntoIterator<Item = PluginEntry>) {
        let mut set = self.plugins.write();
        for entry in entries {
            set.insert(entry);
        }
    }

    /// Removes plugin types from the class set (setup-time API).
    pub fn remove_plugins(&self, types: impl IntoIterator<Item = TypeId>) {
        let mut set = self.plugins.write();
        for ty in types {
            set.remove(ty);
        }
    }

    /// The chain of classes from the root ancestor down to `self`.
    pub(crate) fn lineage(self: &Arc<Self>) -> Vec<Arc<TargetClass>> {
        let mut chain = match &self.parent {
            Some(parent) => parent.lineage(),
            None => Vec::new(),
        };
        chain.push(Arc::clone(self));
        chain
    }

    /// The fixed-slot constraint for `slot`, searching this class and then
    /// its ancestors.
    fn effective_fixed(&self, slot: &str) -> Option<&FixedSlot> {
        if let Some(fs) = self.fixed.get(slot) {
            return Some(fs);
        }
        self.parent.as_deref().and_then(|p| p.effective_fixed(slot))
    }
}

impl fmt::Debug for TargetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetClass")
            .field("path", &self.path)
            .field("parent", &self.parent.as_ref().map(|p| p.path()))
            .field("plugins", &*self.plugins.read())
            .finish_non_exhaustive()
    }
}

// ─── TargetDef ────────────────────────────────────────────────────────────────

enum SlotValue {
    Blueprint(Arc<Blueprint>),
    Instance(PluginHandle),
}

/// Builder describing a target class body, consumed by [`Registry::define`].
///
/// This is the explicit equivalent of subclass definition: fixed-slot
/// declarations, plugin slots (blueprints built at definition time, or
/// pre-built instances), and the parent link.
///
/// # Example
///
/// ```rust,ignore
/// let api = TargetDef::new("myapp.Api")
///     .fixed_slot::<RetryPolicy>("retry")
///     .slot("retry", RetryPolicy::blueprint())
///     .define(&registry)?;
///
/// let admin = TargetDef::new("myapp.AdminApi")
///     .parent(&api)
///     .slot_instance("auth", auth_handle)
///     .define(&registry)?;
/// ```
pub struct TargetDef {
    path: String,
    parent: Option<Arc<TargetClass>>,
    fixed: Vec<(String, TypeId, &'static str)>,
    slots: Vec<(String, SlotValue)>,
}

impl TargetDef {
    /// Starts a definition for the given class path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            parent: None,
            fixed: Vec::new(),
            slots: Vec::new(),
        }
    }

    /// Sets the parent class. The parent's merged plugin set is inherited.
    pub fn parent(mut self, parent: &Arc<TargetClass>) -> Self {
        self.parent = Some(Arc::clone(parent));
        self
    }

    /// Declares a fixed slot: any value assigned under `name` must be an
    /// instance of exactly `P`.
    pub fn fixed_slot<P: Plugin + PluginMeta>(mut self, name: impl Into<String>) -> Self {
        self.fixed.push((name.into(), TypeId::of::<P>(), P::PATH));
        self
    }

    /// Declares a plugin slot from a blueprint, built (with no overrides)
    /// when the class is defined.
    pub fn slot(mut self, name: impl Into<String>, blueprint: Arc<Blueprint>) -> Self {
        self.slots.push((name.into(), SlotValue::Blueprint(blueprint)));
        self
    }

    /// Declares a plugin slot holding a pre-built instance.
    pub fn slot_instance(mut self, name: impl Into<String>, handle: PluginHandle) -> Self {
        self.slots.push((name.into(), SlotValue::Instance(handle)));
        self
    }

    /// Defines the class in `registry`. Sugar for [`Registry::define`].
    pub fn define(self, registry: &Registry) -> BuildResult<Arc<TargetClass>> {
        registry.define(self)
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────

/// The explicit process-wide registry of target classes.
///
/// Created once, populated during application setup, and read-only under
/// steady-state dispatch. Defining a class resolves its slots, binds mount
/// paths, enforces fixed-slot constraints, and computes the merged plugin
/// set.
pub struct Registry {
    classes: RwLock<HashMap<String, Arc<TargetClass>>>,
    next_key: AtomicU64,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            classes: RwLock::new(HashMap::new()),
            next_key: AtomicU64::new(0),
        }
    }

    /// Defines a target class from its body description.
    ///
    /// # Errors
    ///
    /// [`BuildError::DuplicateClass`] when the path is already defined,
    /// [`BuildError::FixedSlotMismatch`] when a slot value violates a fixed
    /// constraint (own or inherited), and any error raised while building a
    /// blueprint slot.
    pub fn define(&self, def: TargetDef) -> BuildResult<Arc<TargetClass>> {
        if self.classes.read().contains_key(&def.path) {
            return Err(BuildError::DuplicateClass { path: def.path });
        }

        let fixed: BTreeMap<String, FixedSlot> = def
            .fixed
            .into_iter()
            .map(|(name, type_id, type_path)| (name, FixedSlot { type_id, type_path }))
            .collect();

        let mut plugins = def
            .parent
            .as_ref()
            .map(|p| p.plugins())
            .unwrap_or_default();

        let key = ClassKey(self.next_key.fetch_add(1, Ordering::Relaxed));

        for (slot_name, value) in def.slots {
            let handle = match value {
                SlotValue::Blueprint(bp) => bp.build_default()?,
                SlotValue::Instance(handle) => handle,
            };
            handle.bind(&format!("{}.{}", def.path, slot_name));

            let constraint = fixed.get(&slot_name).or_else(|| {
                def.parent
                    .as_deref()
                    .and_then(|p| p.effective_fixed(&slot_name))
            });
            if let Some(fs) = constraint
                && handle.plugin_type() != fs.type_id
            {
                return Err(BuildError::FixedSlotMismatch {
                    class: def.path,
                    slot: slot_name,
                    expected: fs.type_path.to_string(),
                    got: handle.type_path().to_string(),
                });
            }

            plugins.insert(PluginEntry::Built(handle));
        }

        let class = Arc::new(TargetClass {
            key,
            path: def.path.clone(),
            parent: def.parent,
            fixed,
            plugins: RwLock::new(plugins),
        });
        self.classes.write().insert(def.path, Arc::clone(&class));
        Ok(class)
    }

    /// Looks up a defined class by path.
    pub fn get(&self, path: &str) -> Option<Arc<TargetClass>> {
        self.classes.read().get(path).cloned()
    }

    /// Number of defined classes.
    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    /// Returns `true` if no classes are defined.
    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── PluginTarget and PluginHost ──────────────────────────────────────────────

/// A target instance: something plugins are attached to and extension points
/// dispatch against.
///
/// Consumers implement this on their own types, usually by embedding a
/// [`PluginHost`] and delegating. `as_any` gives handlers access to the
/// concrete type, the same downcast seam the engine uses everywhere else.
pub trait PluginTarget: Any + Send + Sync {
    /// The class this instance belongs to.
    fn target_class(&self) -> Arc<TargetClass>;

    /// The instance's effective plugin set.
    fn plugins(&self) -> PluginSet;

    /// Returns a reference to self as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// A type-erased, shareable target instance.
pub type BoxedTarget = Arc<dyn PluginTarget>;

/// The per-instance plugin carrier.
///
/// Construction snapshots the class's plugin set, building deferred entries
/// anew for this instance. Instance-supplied overrides replace class entries
/// of the same plugin type for this instance only; the class set is never
/// mutated.
pub struct PluginHost {
    class: Arc<TargetClass>,
    plugins: PluginSet,
}

impl PluginHost {
    /// Creates a host carrying the class's plugin set.
    pub fn new(class: &Arc<TargetClass>) -> BuildResult<Self> {
        Ok(Self {
            class: Arc::clone(class),
            plugins: class.plugins().materialize()?,
        })
    }

    /// Creates a host with an instance-supplied override list applied on top
    /// of the class set. Deferred entries in the list are built bound to
    /// this instance.
    pub fn with_overrides(
        class: &Arc<TargetClass>,
        overrides: impl IntoIterator<Item = PluginEntry>,
    ) -> BuildResult<Self> {
        let mut plugins = class.plugins().materialize()?;
        for entry in overrides {
            let entry = match entry {
                PluginEntry::Deferred(bp) => {
                    PluginEntry::Built(bp.build(&Overrides::default())?)
                }
                built => built,
            };
            plugins.insert(entry);
        }
        Ok(Self {
            class: Arc::clone(class),
            plugins,
        })
    }

    /// The class this host belongs to.
    pub fn class(&self) -> &Arc<TargetClass> {
        &self.class
    }

    /// Looks up and downcasts this instance's plugin of type `P`.
    pub fn plugin<P: Plugin>(&self) -> Option<Arc<P>> {
        self.plugins
            .get(TypeId::of::<P>())
            .and_then(PluginEntry::handle)
            .and_then(PluginHandle::downcast)
    }
}

impl PluginTarget for PluginHost {
    fn target_class(&self) -> Arc<TargetClass> {
        Arc::clone(&self.class)
    }

    fn plugins(&self) -> PluginSet {
        self.plugins.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHost")
            .field("class", &self.class.path())
            .field("plugins", &self.plugins)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Args;

    struct PluginX {
        tag: i64,
    }
    struct PluginY;
    struct PluginZ;

    crate::impl_plugin!(PluginX, "tests.target.PluginX");
    crate::impl_plugin!(PluginY, "tests.target.PluginY");
    crate::impl_plugin!(PluginZ, "tests.target.PluginZ");

    fn bp_x(tag: i64) -> Arc<Blueprint> {
        Blueprint::new("tests.target.PluginX", move |args: Args| {
            Ok(PluginX {
                tag: args.scalar_or("tag", tag),
            })
        })
        .optional("tag")
        .arc()
    }

    fn bp_y() -> Arc<Blueprint> {
        Blueprint::new("tests.target.PluginY", |_args: Args| Ok(PluginY)).arc()
    }

    fn bp_z() -> Arc<Blueprint> {
        Blueprint::new("tests.target.PluginZ", |_args: Args| Ok(PluginZ)).arc()
    }

    #[test]
    fn ancestor_merge_accumulates_and_overrides() {
        let registry = Registry::new();
        let a = TargetDef::new("tests.A")
            .slot("x", bp_x(1))
            .define(&registry)
            .unwrap();
        let b = TargetDef::new("tests.B")
            .parent(&a)
            .slot("y", bp_y())
            .slot("x", bp_x(2)) // redeclares A's plugin type
            .define(&registry)
            .unwrap();
        let c = TargetDef::new("tests.C")
            .parent(&b)
            .slot("z", bp_z())
            .define(&registry)
            .unwrap();

        let set = c.plugins();
        assert_eq!(set.len(), 3);
        assert!(set.contains(TypeId::of::<PluginX>()));
        assert!(set.contains(TypeId::of::<PluginY>()));
        assert!(set.contains(TypeId::of::<PluginZ>()));

        // B's redeclaration wins over A's, and X keeps its original position.
        let order: Vec<TypeId> = set.iter().map(PluginEntry::plugin_type).collect();
        assert_eq!(order[0], TypeId::of::<PluginX>());
        let x = set
            .get(TypeId::of::<PluginX>())
            .and_then(PluginEntry::handle)
            .and_then(|h| h.downcast::<PluginX>())
            .unwrap();
        assert_eq!(x.tag, 2);
    }

    #[test]
    fn slots_bind_mount_paths() {
        let registry = Registry::new();
        let a = TargetDef::new("tests.Mounts")
            .slot("x", bp_x(0))
            .define(&registry)
            .unwrap();
        let handle = a
            .plugins()
            .get(TypeId::of::<PluginX>())
            .and_then(|e| e.handle().cloned())
            .unwrap();
        assert_eq!(handle.ref_path(), "tests.Mounts.x");
    }

    #[test]
    fn fixed_slot_accepts_exact_type_and_rejects_others() {
        let registry = Registry::new();
        TargetDef::new("tests.FixedOk")
            .fixed_slot::<PluginX>("x")
            .slot("x", bp_x(0))
            .define(&registry)
            .unwrap();

        let err = TargetDef::new("tests.FixedBad")
            .fixed_slot::<PluginX>("x")
            .slot("x", bp_y())
            .define(&registry)
            .unwrap_err();
        match err {
            BuildError::FixedSlotMismatch {
                class,
                slot,
                expected,
                got,
            } => {
                assert_eq!(class, "tests.FixedBad");
                assert_eq!(slot, "x");
                assert_eq!(expected, "tests.target.PluginX");
                assert_eq!(got, "tests.target.PluginY");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn inherited_fixed_slots_constrain_descendants() {
        let registry = Registry::new();
        let base = TargetDef::new("tests.FixedBase")
            .fixed_slot::<PluginX>("x")
            .slot("x", bp_x(0))
            .define(&registry)
            .unwrap();

        let err = TargetDef::new("tests.FixedChild")
            .parent(&base)
            .slot("x", bp_y())
            .define(&registry)
            .unwrap_err();
        assert!(matches!(err, BuildError::FixedSlotMismatch { .. }));
    }

    #[test]
    fn duplicate_class_path_is_rejected() {
        let registry = Registry::new();
        TargetDef::new("tests.Dup").define(&registry).unwrap();
        let err = TargetDef::new("tests.Dup").define(&registry).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateClass { .. }));
    }

    #[test]
    fn instance_overrides_do_not_touch_the_class_set() {
        let registry = Registry::new();
        let class = TargetDef::new("tests.Inst")
            .slot("x", bp_x(1))
            .define(&registry)
            .unwrap();

        let replacement = bp_x(9).build_default().unwrap();
        let host =
            PluginHost::with_overrides(&class, [PluginEntry::Built(replacement)]).unwrap();
        assert_eq!(host.plugin::<PluginX>().unwrap().tag, 9);

        // Class-level entry is untouched.
        let class_tag = class
            .plugins()
            .get(TypeId::of::<PluginX>())
            .and_then(|e| e.handle().cloned())
            .and_then(|h| h.downcast::<PluginX>())
            .unwrap()
            .tag;
        assert_eq!(class_tag, 1);
    }

    #[test]
    fn add_and_remove_plugins_are_setup_time_mutations() {
        let registry = Registry::new();
        let class = TargetDef::new("tests.Mut").define(&registry).unwrap();

        class.add_plugins([PluginEntry::Deferred(bp_y())]);
        assert!(class.plugins().contains(TypeId::of::<PluginY>()));

        class.remove_plugins([TypeId::of::<PluginY>()]);
        assert!(!class.plugins().contains(TypeId::of::<PluginY>()));
    }

    #[test]
    fn deferred_entries_materialize_per_instance() {
        let registry = Registry::new();
        let class = TargetDef::new("tests.Deferred").define(&registry).unwrap();
        class.add_plugins([PluginEntry::Deferred(bp_x(5))]);

        let host_a = PluginHost::new(&class).unwrap();
        let host_b = PluginHost::new(&class).unwrap();
        let a = host_a.plugins().get(TypeId::of::<PluginX>()).unwrap().handle().cloned().unwrap();
        let b = host_b.plugins().get(TypeId::of::<PluginX>()).unwrap().handle().cloned().unwrap();
        assert!(!a.is_same_instance(&b));
        assert_eq!(a.downcast::<PluginX>().unwrap().tag, 5);
    }

    #[test]
    fn registry_lookup_by_path() {
        let registry = Registry::new();
        let class = TargetDef::new("tests.Lookup").define(&registry).unwrap();
        assert!(Arc::ptr_eq(&registry.get("tests.Lookup").unwrap(), &class));
        assert!(registry.get("tests.Missing").is_none());
    }

    #[test]
    fn sharing_one_instance_across_two_classes_keeps_the_first_path() {
        let registry = Registry::new();
        let shared = bp_x(3).build_default().unwrap();

        TargetDef::new("tests.First")
            .slot_instance("x", shared.clone())
            .define(&registry)
            .unwrap();
        // Second mount warns (identity drift) and keeps the first path.
        TargetDef::new("tests.Second")
            .slot_instance("x", shared.clone())
            .define(&registry)
            .unwrap();

        assert_eq!(shared.ref_path(), "tests.First.x");
    }
}
