//! Built-in dispatch-tracing plugin.
//!
//! [`TracePlugin`] observes extension-point dispatches without affecting
//! them: its handlers log the target class and owning plugin with structured
//! fields and always return `Ok(None)`, so results and accumulators pass
//! through untouched.
//!
//! Attach it like any plugin and bind [`TracePlugin::method`] as its default
//! method on the points of interest, or drop a label-only
//! [`observer`] in as a class-scoped callback hook.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use solder_core::builder::{Args, Blueprint};
use solder_core::plugin::{PluginHandle, PluginMeta};
use solder_core::point::{HookHandler, handler_fn, plugin_method};
use solder_core::target::BoxedTarget;

/// A plugin that logs every dispatch it participates in.
#[derive(Debug, Clone)]
pub struct TracePlugin {
    /// Label included in every log line.
    pub label: String,
}

impl Default for TracePlugin {
    fn default() -> Self {
        Self {
            label: "solder".to_string(),
        }
    }
}

solder_core::impl_plugin!(TracePlugin, "solder.trace.TracePlugin");

impl TracePlugin {
    /// The declarative blueprint for this plugin.
    pub fn blueprint() -> Arc<Blueprint> {
        Blueprint::new(Self::PATH, |args: Args| {
            Ok(TracePlugin {
                label: args.scalar_or("label", "solder".to_string()),
            })
        })
        .optional("label")
        .attr("label", json!("solder"))
        .arc()
    }

    /// The plugin's default method for any extension point: logs the
    /// dispatch and leaves the value untouched. Bind it with
    /// `point.bind_method::<TracePlugin>(TracePlugin::method())`.
    pub fn method<A, R>() -> Arc<dyn HookHandler<A, R>>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        plugin_method::<TracePlugin, A, R, _, _>(|plugin, target, _args| async move {
            let class = target.target_class();
            debug!(
                label = %plugin.label,
                target = class.path(),
                "extension point dispatched"
            );
            Ok(None)
        })
    }
}

/// A class-scoped observer handler, usable as a callback hook on any
/// extension point. Logs the dispatch and passes the value through.
pub fn observer<A, R>(label: &'static str) -> Arc<dyn HookHandler<A, R>>
where
    A: Send + 'static,
    R: Send + 'static,
{
    handler_fn(
        move |plugin: Option<PluginHandle>, target: BoxedTarget, _args: A| async move {
            let class = target.target_class();
            let plugin_path = plugin.as_ref().map(|p| p.ref_path());
            debug!(
                label,
                target = class.path(),
                plugin = plugin_path.as_deref().unwrap_or("-"),
                "extension point observed"
            );
            Ok(None)
        },
    )
}
