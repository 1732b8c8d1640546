//! Plugin trait and instance identity.
//!
//! A [`Plugin`] is a configurable unit of cross-cutting behavior (a retry
//! policy, an authentication check, an error translator) that attaches to
//! target classes without modifying them. Plugins are type-erased as
//! `Arc<dyn Plugin>` and downcast through [`Plugin::as_any_arc`] when a
//! handler needs the concrete type.
//!
//! A [`PluginHandle`] pairs a built instance with its identity state: the
//! concrete [`TypeId`] used as the registry key, the stable reference path of
//! the declaring type, and the *mount cell* recording where the instance was
//! first attached. Cloning a handle shares the mount cell, so "the same
//! instance attached in two places" is observable; building a blueprint twice
//! yields independent cells.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::builder::Resolved;

// ─── Plugin trait ─────────────────────────────────────────────────────────────

/// A configurable, attachable unit of cross-cutting behavior.
///
/// Implementors are plain structs holding their configuration. The trait only
/// provides identity and downcasting; behavior is expressed through handlers
/// bound to extension points (see [`crate::point`]).
///
/// Use [`impl_plugin!`](crate::impl_plugin) to implement this trait together
/// with [`PluginMeta`] in one line.
pub trait Plugin: Any + Send + Sync {
    /// Stable reference path of the declaring type,
    /// e.g. `"solder.retry.RetryPolicy"`.
    fn type_path(&self) -> &'static str;

    /// Returns a reference to self as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns self as an `Arc<dyn Any>` for `Arc`-based downcasting.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Associates a stable reference path with a plugin type.
///
/// Separate from [`Plugin`] so that `dyn Plugin` stays object-safe while
/// registration APIs (`add_hook::<P>`, `bind_method::<P>`) can still name the
/// type statically in diagnostics.
pub trait PluginMeta {
    /// The reference path of this plugin type.
    const PATH: &'static str;
}

/// A type-erased, shareable plugin instance.
pub type BoxedPlugin = Arc<dyn Plugin>;

/// Implements [`Plugin`] and [`PluginMeta`] for a concrete type.
///
/// ```rust,ignore
/// struct Throttle { per_second: u32 }
/// solder_core::impl_plugin!(Throttle, "myapp.plugins.Throttle");
/// ```
#[macro_export]
macro_rules! impl_plugin {
    ($ty:ty, $path:expr) => {
        impl $crate::plugin::PluginMeta for $ty {
            const PATH: &'static str = $path;
        }

        impl $crate::plugin::Plugin for $ty {
            fn type_path(&self) -> &'static str {
                <$ty as $crate::plugin::PluginMeta>::PATH
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_arc(
                self: ::std::sync::Arc<Self>,
            ) -> ::std::sync::Arc<dyn ::std::any::Any + Send + Sync> {
                self
            }
        }
    };
}

// ─── PluginHandle ─────────────────────────────────────────────────────────────

/// A built plugin instance together with its identity state.
///
/// Handles are cheap to clone; clones share the underlying instance and its
/// mount cell. Registries key handles by [`plugin_type`](Self::plugin_type).
#[derive(Clone)]
pub struct PluginHandle {
    instance: BoxedPlugin,
    type_id: TypeId,
    type_path: &'static str,
    /// First mount path the instance was bound to, if any.
    mount: Arc<RwLock<Option<String>>>,
    /// Declared-but-unconsumed attributes attached after construction.
    extras: Arc<BTreeMap<String, Resolved>>,
}

impl PluginHandle {
    /// Wraps a concrete plugin instance.
    pub fn new<P: Plugin>(instance: Arc<P>) -> Self {
        let type_path = instance.type_path();
        Self {
            instance,
            type_id: TypeId::of::<P>(),
            type_path,
            mount: Arc::new(RwLock::new(None)),
            extras: Arc::new(BTreeMap::new()),
        }
    }

    /// Wraps an already type-erased instance.
    pub fn from_boxed(instance: BoxedPlugin) -> Self {
        let type_id = instance.as_any().type_id();
        let type_path = instance.type_path();
        Self {
            instance,
            type_id,
            type_path,
            mount: Arc::new(RwLock::new(None)),
            extras: Arc::new(BTreeMap::new()),
        }
    }

    pub(crate) fn with_extras(mut self, extras: BTreeMap<String, Resolved>) -> Self {
        self.extras = Arc::new(extras);
        self
    }

    /// The underlying type-erased instance.
    pub fn instance(&self) -> &BoxedPlugin {
        &self.instance
    }

    /// `TypeId` of the concrete plugin type; the registry key.
    pub fn plugin_type(&self) -> TypeId {
        self.type_id
    }

    /// Reference path of the declaring plugin type.
    pub fn type_path(&self) -> &'static str {
        self.type_path
    }

    /// Attempts to downcast the instance to a concrete plugin type.
    pub fn downcast<P: Plugin>(&self) -> Option<Arc<P>> {
        self.instance.clone().as_any_arc().downcast::<P>().ok()
    }

    /// Returns `true` if both handles share one underlying instance.
    pub fn is_same_instance(&self, other: &PluginHandle) -> bool {
        Arc::ptr_eq(&self.instance, &other.instance)
    }

    /// Declared attributes that matched no constructor parameter. They are
    /// kept on the handle so declared-but-unconsumed fields stay inspectable.
    pub fn extras(&self) -> &BTreeMap<String, Resolved> {
        &self.extras
    }

    /// Binds the instance to a mount path (`<class path>.<slot>`).
    ///
    /// The first bind wins. Binding the same instance to a *different* path
    /// is an identity drift: a warning is emitted and the first path is kept,
    /// so dispatch proceeds using the first-bound path.
    pub fn bind(&self, path: &str) {
        let mut mount = self.mount.write();
        match mount.as_deref() {
            Some(existing) if existing != path => {
                warn!(
                    plugin = self.type_path,
                    bound = existing,
                    requested = path,
                    "plugin instance already mounted at a different path; keeping the first"
                );
            }
            Some(_) => {}
            None => *mount = Some(path.to_string()),
        }
    }

    /// The mount path, if the instance has been attached to a slot.
    pub fn mount_path(&self) -> Option<String> {
        self.mount.read().clone()
    }

    /// The instance's reference path: its mount path once attached,
    /// otherwise the declaring type's path.
    pub fn ref_path(&self) -> String {
        self.mount
            .read()
            .clone()
            .unwrap_or_else(|| self.type_path.to_string())
    }
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle")
            .field("type_path", &self.type_path)
            .field("mount", &*self.mount.read())
            .field("extras", &self.extras.keys().collect::<Vec<_>>())
            .finish()
    }
}
