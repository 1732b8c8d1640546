//! # Solder
//!
//! A declarative plugin and hook dispatch engine for Rust.
//!
//! ## Overview
//!
//! Solder lets independently authored plugins (cross-cutting behaviors such
//! as retry policies, authentication, or error handling) attach to methods
//! of target classes without modifying those classes. Target classes declare
//! plugin slots through blueprints, inherit and merge them down an explicit
//! parent chain, and named extension points dispatch priority-ordered
//! handler chains against target instances.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  built at   ┌──────────────┐  resolved at  ┌───────────────┐
//! │ Blueprints  │────────────▶│ TargetClass  │──────────────▶│ Extension     │
//! │ (declared   │  definition │ registry     │  invocation   │ points        │
//! │  defaults)  │             │ (merged sets)│               │ (hook chains) │
//! └─────────────┘             └──────────────┘               └───────────────┘
//! ```
//!
//! - **solder-core**: the engine — plugins, blueprints, target classes,
//!   extension points.
//! - **solder-framework**: built-in plugins — retry policy, dispatch
//!   tracing.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use solder::prelude::*;
//!
//! let registry = Registry::new();
//! let api = TargetDef::new("myapp.Api")
//!     .fixed_slot::<RetryPolicy>("retry")
//!     .slot("retry", RetryPolicy::blueprint())
//!     .define(&registry)?;
//!
//! let process_response = StreamingPoint::<Response>::new("process_response");
//! process_response.add_callback_hook(&api, normalize_handler(), 10, false)?;
//!
//! let target: BoxedTarget = Arc::new(PluginHost::new(&api)?);
//! let response = process_response.invoke(&target, response).await?;
//! ```

pub use solder_core as core;
pub use solder_framework as framework;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use solder::prelude::*;
/// ```
pub mod prelude {
    // Engine - plugins, blueprints, targets, extension points
    pub use solder_core::prelude::*;

    // Built-in plugins
    pub use solder_framework::prelude::*;

    // The one-line Plugin implementation helper
    pub use solder_core::impl_plugin;
}
