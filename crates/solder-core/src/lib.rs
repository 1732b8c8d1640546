//! # Solder Core
//!
//! The dispatch engine of the Solder plugin framework.
//!
//! Solder lets independently authored plugins (retry policies, auth checks,
//! error translators) attach to target classes without modifying them, and
//! dispatches named extension points through priority-ordered handler
//! chains.
//!
//! ## Architecture
//!
//! The engine is built from four pieces:
//!
//! - **Plugins** ([`Plugin`], [`PluginHandle`]) — configurable units of
//!   behavior with stable identity and mount-path binding.
//! - **Blueprints** ([`Blueprint`], [`SchemaBlueprint`]) — declarative
//!   descriptions of how plugin instances are built, with recursive
//!   nested-plugin and schema composition.
//! - **Target classes** ([`TargetClass`], [`Registry`], [`PluginHost`]) —
//!   explicit class objects carrying merged plugin sets, inherited down a
//!   parent chain and overridable per instance.
//! - **Extension points** ([`ExtensionPoint`], [`StreamingPoint`]) — named
//!   hook points resolving the ordered handler chain for a target instance
//!   and invoking it strictly sequentially, async or blocking.
//!
//! ## Data flow
//!
//! ```text
//! ┌────────────┐  define   ┌─────────────┐  invoke   ┌──────────────────┐
//! │ Blueprints │──────────▶│ TargetClass │──────────▶│ ExtensionPoint   │──▶ handler
//! │ (declared  │  (slots   │  registry   │ (per-     │ resolves chain:  │──▶ handler
//! │  defaults) │   built)  │  + merge    │  instance │ hooks, then      │──▶ handler
//! └────────────┘           └─────────────┘   host)   │ plugin methods   │
//!                                                    └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use solder_core::prelude::*;
//!
//! struct Audit { verbose: bool }
//! solder_core::impl_plugin!(Audit, "myapp.Audit");
//!
//! let registry = Registry::new();
//! let api = TargetDef::new("myapp.Api")
//!     .slot("audit", audit_blueprint())
//!     .define(&registry)?;
//!
//! let on_request = ExtensionPoint::<Request>::new("on_request");
//! on_request.add_hook::<Audit>(&api, audit_handler(), 10, false)?;
//!
//! let target: BoxedTarget = Arc::new(PluginHost::new(&api)?);
//! on_request.invoke(&target, request).await?;
//! ```

pub mod builder;
pub mod error;
pub mod plugin;
pub mod point;
pub mod target;

pub use builder::{Args, Blueprint, Declared, Overrides, Resolved, SchemaBlueprint, SchemaValue};
pub use error::{
    BoxError, BuildError, BuildResult, DispatchError, DispatchResult, HookError, HookResult,
    PluginCastError,
};
pub use plugin::{BoxedPlugin, Plugin, PluginHandle, PluginMeta};
pub use point::{
    ExtensionPoint, HookHandler, HookTable, ModeRestriction, StreamingPoint, handler_fn,
    plugin_method,
};
pub use target::{
    BoxedTarget, ClassKey, PluginEntry, PluginHost, PluginSet, PluginTarget, Registry,
    TargetClass, TargetDef,
};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::builder::{Args, Blueprint, Overrides, Resolved, SchemaBlueprint};
    pub use crate::error::{BoxError, BuildError, DispatchError, HookError};
    pub use crate::plugin::{BoxedPlugin, Plugin, PluginHandle, PluginMeta};
    pub use crate::point::{
        ExtensionPoint, HookHandler, ModeRestriction, StreamingPoint, handler_fn, plugin_method,
    };
    pub use crate::target::{
        BoxedTarget, PluginEntry, PluginHost, PluginTarget, Registry, TargetDef,
    };
}
