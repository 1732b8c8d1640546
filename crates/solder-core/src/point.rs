//! Extension points: hook registration, chain resolution, and dispatch.
//!
//! An extension point is a named hook point that target classes can be bound
//! to. Per point, a [`HookTable`] keeps explicit hook bindings for each
//! registered target class plus the default methods plugins expose under the
//! point's name. At invocation time the table resolves the ordered handler
//! chain for a concrete target instance:
//!
//! 1. The target's class chain is walked ancestors-first, collecting every
//!    explicit binding registered along the way. Within one class, bindings
//!    are kept sorted by descending priority; equal priorities preserve
//!    insertion order (the sort is stable and never reorders peers).
//! 2. Class-scoped callback bindings (no owning plugin type) run first.
//! 3. For each plugin in the instance's plugin set, in set order: every
//!    explicit binding for that plugin type anywhere in the hierarchy, or,
//!    only when none exists, the plugin's bound default method. Explicit and
//!    implicit handlers are mutually exclusive per plugin type.
//!
//! Dispatch is strictly sequential in both modes: a handler's returned
//! future is awaited in place before the next handler starts, so handlers
//! never run concurrently. The dispatch flavor is fixed at definition time
//! by choosing the type: [`ExtensionPoint`] invokes every handler with the
//! identical original arguments and returns the last handler's result, while
//! [`StreamingPoint`] threads an accumulator through the chain, letting each
//! handler replace it.
//!
//! There is one async implementation of each flavor; `invoke_blocking`
//! drives it to completion on the calling thread. A [`ModeRestriction`]
//! declared at definition time can limit a point to one of the two entry
//! points.

use std::any::TypeId;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::error::{
    BoxError, DispatchError, DispatchResult, HookError, HookResult, PluginCastError,
};
use crate::plugin::{Plugin, PluginHandle, PluginMeta};
use crate::target::{BoxedTarget, ClassKey, TargetClass};

// ─── Handler trait and adapters ───────────────────────────────────────────────

/// A handler attachable to an extension point.
///
/// Handlers receive the owning plugin instance (absent for class-scoped
/// callback bindings), the target the point was invoked against, and the
/// point's arguments. Returning `Ok(None)` means "no result": the previous
/// result (independent dispatch) or the current accumulator (streaming
/// dispatch) stands. Errors propagate to the invoker unchanged.
#[async_trait]
pub trait HookHandler<A, R = A>: Send + Sync {
    async fn call(
        &self,
        plugin: Option<PluginHandle>,
        target: BoxedTarget,
        args: A,
    ) -> Result<Option<R>, BoxError>;
}

struct HandlerFn<F>(F);

#[async_trait]
impl<A, R, F, Fut> HookHandler<A, R> for HandlerFn<F>
where
    A: Send + 'static,
    R: Send + 'static,
    F: Fn(Option<PluginHandle>, BoxedTarget, A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<R>, BoxError>> + Send + 'static,
{
    async fn call(
        &self,
        plugin: Option<PluginHandle>,
        target: BoxedTarget,
        args: A,
    ) -> Result<Option<R>, BoxError> {
        (self.0)(plugin, target, args).await
    }
}

/// Wraps an async closure as a shareable [`HookHandler`].
pub fn handler_fn<A, R, F, Fut>(f: F) -> Arc<dyn HookHandler<A, R>>
where
    A: Send + 'static,
    R: Send + 'static,
    F: Fn(Option<PluginHandle>, BoxedTarget, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<R>, BoxError>> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}

/// Adapts a typed plugin method into a [`HookHandler`].
///
/// The owning plugin instance is downcast to `P` before the method runs;
/// a missing or mismatched instance is reported as a handler error.
pub fn plugin_method<P, A, R, F, Fut>(f: F) -> Arc<dyn HookHandler<A, R>>
where
    P: Plugin + PluginMeta,
    A: Send + 'static,
    R: Send + 'static,
    F: Fn(Arc<P>, BoxedTarget, A) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Result<Option<R>, BoxError>> + Send + 'static,
{
    handler_fn(move |plugin: Option<PluginHandle>, target: BoxedTarget, args: A| {
        let f = f.clone();
        async move {
            let Some(handle) = plugin else {
                return Err(Box::new(PluginCastError::MissingInstance) as BoxError);
            };
            let Some(typed) = handle.downcast::<P>() else {
                return Err(Box::new(PluginCastError::TypeMismatch {
                    expected: P::PATH,
                    got: handle.type_path(),
                }) as BoxError);
            };
            f(typed, target, args).await
        }
    })
}

// ─── Mode restriction ─────────────────────────────────────────────────────────

/// Restricts which entry point may drive an extension point.
///
/// The engine has a single async dispatch implementation; this flag replaces
/// signature sniffing from the reflective original with a definition-time
/// contract checked at the entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeRestriction {
    /// Both `invoke` and `invoke_blocking` are allowed.
    #[default]
    Any,
    /// Only `invoke_blocking` is allowed.
    SyncOnly,
    /// Only `invoke` is allowed.
    AsyncOnly,
}

fn check_mode(name: &str, restriction: ModeRestriction, asynchronous: bool) -> DispatchResult<()> {
    match (restriction, asynchronous) {
        (ModeRestriction::SyncOnly, true) => Err(DispatchError::Mode {
            point: name.to_string(),
            declared: "synchronous",
            attempted: "asynchronously",
        }),
        (ModeRestriction::AsyncOnly, false) => Err(DispatchError::Mode {
            point: name.to_string(),
            declared: "asynchronous",
            attempted: "synchronously",
        }),
        _ => Ok(()),
    }
}

// ─── HookTable ────────────────────────────────────────────────────────────────

struct HookBinding<A, R> {
    /// Owning plugin type, or `None` for class-scoped callback bindings.
    plugin_type: Option<TypeId>,
    handler: Arc<dyn HookHandler<A, R>>,
    priority: i32,
}

impl<A, R> Clone for HookBinding<A, R> {
    fn clone(&self) -> Self {
        Self {
            plugin_type: self.plugin_type,
            handler: Arc::clone(&self.handler),
            priority: self.priority,
        }
    }
}

/// The registration surface of one extension point.
///
/// Holds, per registered target class, the ordered explicit bindings, plus
/// the default methods plugins expose under this point's name. Registration
/// is a setup-time activity; tables are read-only under steady-state
/// dispatch.
pub struct HookTable<A, R = A> {
    name: &'static str,
    hooks: RwLock<HashMap<ClassKey, Vec<HookBinding<A, R>>>>,
    methods: RwLock<HashMap<TypeId, Arc<dyn HookHandler<A, R>>>>,
}

impl<A, R> HookTable<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    fn new(name: &'static str) -> Self {
        Self {
            name,
            hooks: RwLock::new(HashMap::new()),
            methods: RwLock::new(HashMap::new()),
        }
    }

    /// The extension point's name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Opens an (initially empty) hook slot for a target class.
    pub fn register(&self, class: &Arc<TargetClass>) {
        self.hooks.write().entry(class.key()).or_default();
    }

    /// Removes a target class's hook slot and all its bindings.
    pub fn unregister(&self, class: &Arc<TargetClass>) {
        self.hooks.write().remove(&class.key());
    }

    /// Returns `true` if `register` has been called for the class.
    pub fn is_registered(&self, class: &Arc<TargetClass>) -> bool {
        self.hooks.read().contains_key(&class.key())
    }

    /// Binds `handler` to `(class, plugin type P)` at the given priority.
    ///
    /// With `registered_only`, fails unless [`register`](Self::register) was
    /// called for the class first; this guards against hooking extension
    /// points a class never declared.
    pub fn add_hook<P: Plugin + PluginMeta>(
        &self,
        class: &Arc<TargetClass>,
        handler: Arc<dyn HookHandler<A, R>>,
        priority: i32,
        registered_only: bool,
    ) -> HookResult<()> {
        self.add_binding(class, Some(TypeId::of::<P>()), handler, priority, registered_only)
    }

    /// Binds a class-scoped callback `handler` at the given priority.
    ///
    /// Callback bindings carry no owning plugin type: they intercept the
    /// point for every instance of the class (and its descendants),
    /// independent of the instance's plugin set, and run before the
    /// plugin-typed chain.
    pub fn add_callback_hook(
        &self,
        class: &Arc<TargetClass>,
        handler: Arc<dyn HookHandler<A, R>>,
        priority: i32,
        registered_only: bool,
    ) -> HookResult<()> {
        self.add_binding(class, None, handler, priority, registered_only)
    }

    fn add_binding(
        &self,
        class: &Arc<TargetClass>,
        plugin_type: Option<TypeId>,
        handler: Arc<dyn HookHandler<A, R>>,
        priority: i32,
        registered_only: bool,
    ) -> HookResult<()> {
        let mut hooks = self.hooks.write();
        if registered_only && !hooks.contains_key(&class.key()) {
            return Err(HookError::UnregisteredClass {
                point: self.name.to_string(),
                class: class.path().to_string(),
            });
        }
        let list = hooks.entry(class.key()).or_default();
        list.push(HookBinding {
            plugin_type,
            handler,
            priority,
        });
        // Stable sort: equal priorities keep their insertion order.
        list.sort_by_key(|b| Reverse(b.priority));
        Ok(())
    }

    /// Binds the default method plugins of type `P` expose under this
    /// point's name. Used only when no explicit binding exists for `P` on
    /// the resolved class hierarchy.
    pub fn bind_method<P: Plugin + PluginMeta>(
        &self,
        handler: Arc<dyn HookHandler<A, R>>,
    ) -> HookResult<()> {
        let mut methods = self.methods.write();
        if methods.contains_key(&TypeId::of::<P>()) {
            return Err(HookError::DuplicateMethod {
                point: self.name.to_string(),
                plugin: P::PATH.to_string(),
            });
        }
        methods.insert(TypeId::of::<P>(), handler);
        Ok(())
    }

    /// Resolves the ordered handler chain for a target instance.
    fn chain(&self, target: &BoxedTarget) -> Vec<(Option<PluginHandle>, Arc<dyn HookHandler<A, R>>)> {
        let lineage = target.target_class().lineage();

        let collected: Vec<HookBinding<A, R>> = {
            let hooks = self.hooks.read();
            lineage
                .iter()
                .filter_map(|class| hooks.get(&class.key()))
                .flat_map(|list| list.iter().cloned())
                .collect()
        };

        let mut chain = Vec::new();

        // Class-scoped callbacks run ahead of the plugin-typed chain.
        for binding in collected.iter().filter(|b| b.plugin_type.is_none()) {
            chain.push((None, Arc::clone(&binding.handler)));
        }

        let methods = self.methods.read();
        for entry in target.plugins().iter() {
            let Some(handle) = entry.handle() else {
                trace!(
                    point = self.name,
                    "skipping deferred plugin entry at dispatch time"
                );
                continue;
            };
            let ty = handle.plugin_type();
            let mut hooked = false;
            for binding in collected.iter().filter(|b| b.plugin_type == Some(ty)) {
                hooked = true;
                chain.push((Some(handle.clone()), Arc::clone(&binding.handler)));
            }
            if hooked {
                continue;
            }
            if let Some(method) = methods.get(&ty) {
                chain.push((Some(handle.clone()), Arc::clone(method)));
            }
        }

        chain
    }
}

impl<A, R> fmt::Debug for HookTable<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookTable")
            .field("name", &self.name)
            .field("classes", &self.hooks.read().len())
            .field("methods", &self.methods.read().len())
            .finish()
    }
}

// ─── ExtensionPoint (independent dispatch) ────────────────────────────────────

/// An extension point with independent dispatch: every handler receives the
/// identical original arguments, and the final handler's return value is the
/// result. Side effects of earlier handlers are visible to later ones only
/// through shared state reachable via the target.
pub struct ExtensionPoint<A, R = A> {
    table: HookTable<A, R>,
    restriction: ModeRestriction,
}

impl<A, R> ExtensionPoint<A, R>
where
    A: Clone + Send + 'static,
    R: Send + 'static,
{
    /// Defines a new extension point.
    pub fn new(name: &'static str) -> Self {
        Self::with_restriction(name, ModeRestriction::Any)
    }

    /// Defines a new extension point with a dispatch-mode restriction.
    pub fn with_restriction(name: &'static str, restriction: ModeRestriction) -> Self {
        Self {
            table: HookTable::new(name),
            restriction,
        }
    }

    /// Invokes the point against a target instance asynchronously.
    ///
    /// Handlers run strictly in resolution order; a suspended handler is
    /// awaited in place before the next one starts.
    pub async fn invoke(&self, target: &BoxedTarget, args: A) -> DispatchResult<Option<R>> {
        check_mode(self.table.name, self.restriction, true)?;
        self.dispatch(target, args).await
    }

    /// Invokes the point synchronously, blocking the calling thread until
    /// the chain completes.
    pub fn invoke_blocking(&self, target: &BoxedTarget, args: A) -> DispatchResult<Option<R>> {
        check_mode(self.table.name, self.restriction, false)?;
        futures::executor::block_on(self.dispatch(target, args))
    }

    async fn dispatch(&self, target: &BoxedTarget, args: A) -> DispatchResult<Option<R>> {
        let chain = self.table.chain(target);
        debug!(
            point = self.table.name,
            handlers = chain.len(),
            "dispatching"
        );

        let mut result = None;
        for (plugin, handler) in chain {
            result = handler
                .call(plugin, Arc::clone(target), args.clone())
                .await
                .map_err(|source| DispatchError::Handler {
                    point: self.table.name.to_string(),
                    source,
                })?;
        }
        Ok(result)
    }
}

impl<A, R> std::ops::Deref for ExtensionPoint<A, R> {
    type Target = HookTable<A, R>;

    fn deref(&self) -> &Self::Target {
        &self.table
    }
}

impl<A, R> fmt::Debug for ExtensionPoint<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionPoint")
            .field("table", &self.table)
            .field("restriction", &self.restriction)
            .finish()
    }
}

// ─── StreamingPoint (accumulator pipeline) ────────────────────────────────────

/// An extension point with streaming dispatch: a sequential transform
/// pipeline over one value.
///
/// Each handler receives the current accumulator (the original value until a
/// handler produces a replacement). A handler returning `Some(next)` makes
/// `next` the accumulator for the rest of the chain; `Ok(None)` leaves it
/// unchanged. The final accumulator is the result.
pub struct StreamingPoint<A> {
    table: HookTable<A, A>,
    restriction: ModeRestriction,
}

impl<A> StreamingPoint<A>
where
    A: Clone + Send + 'static,
{
    /// Defines a new streaming extension point.
    pub fn new(name: &'static str) -> Self {
        Self::with_restriction(name, ModeRestriction::Any)
    }

    /// Defines a new streaming extension point with a dispatch-mode
    /// restriction.
    pub fn with_restriction(name: &'static str, restriction: ModeRestriction) -> Self {
        Self {
            table: HookTable::new(name),
            restriction,
        }
    }

    /// Runs the pipeline against a target instance asynchronously.
    pub async fn invoke(&self, target: &BoxedTarget, args: A) -> DispatchResult<A> {
        check_mode(self.table.name, self.restriction, true)?;
        self.dispatch(target, args).await
    }

    /// Runs the pipeline synchronously, blocking the calling thread.
    pub fn invoke_blocking(&self, target: &BoxedTarget, args: A) -> DispatchResult<A> {
        check_mode(self.table.name, self.restriction, false)?;
        futures::executor::block_on(self.dispatch(target, args))
    }

    async fn dispatch(&self, target: &BoxedTarget, args: A) -> DispatchResult<A> {
        let chain = self.table.chain(target);
        debug!(
            point = self.table.name,
            handlers = chain.len(),
            "dispatching (streaming)"
        );

        let mut acc = args;
        for (plugin, handler) in chain {
            let produced = handler
                .call(plugin, Arc::clone(target), acc.clone())
                .await
                .map_err(|source| DispatchError::Handler {
                    point: self.table.name.to_string(),
                    source,
                })?;
            if let Some(next) = produced {
                acc = next;
            }
        }
        Ok(acc)
    }
}

impl<A> std::ops::Deref for StreamingPoint<A> {
    type Target = HookTable<A, A>;

    fn deref(&self) -> &Self::Target {
        &self.table
    }
}

impl<A> fmt::Debug for StreamingPoint<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingPoint")
            .field("table", &self.table)
            .field("restriction", &self.restriction)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Args, Blueprint};
    use crate::target::{PluginHost, Registry, TargetDef};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Probe;
    struct Other;

    crate::impl_plugin!(Probe, "tests.point.Probe");
    crate::impl_plugin!(Other, "tests.point.Other");

    fn probe_blueprint() -> Arc<Blueprint> {
        Blueprint::new("tests.point.Probe", |_args: Args| Ok(Probe)).arc()
    }

    fn other_blueprint() -> Arc<Blueprint> {
        Blueprint::new("tests.point.Other", |_args: Args| Ok(Other)).arc()
    }

    fn target_with_probe(registry: &Registry, path: &str) -> BoxedTarget {
        let class = TargetDef::new(path.to_string())
            .slot("probe", probe_blueprint())
            .define(registry)
            .unwrap();
        Arc::new(PluginHost::new(&class).unwrap())
    }

    fn recording_handler(
        log: &Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
    ) -> Arc<dyn HookHandler<i64, i64>> {
        let log = Arc::clone(log);
        handler_fn(move |_plugin, _target, _args: i64| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(label);
                Ok(None)
            }
        })
    }

    #[tokio::test]
    async fn priority_stability_preserves_insertion_order() {
        let registry = Registry::new();
        let target = target_with_probe(&registry, "tests.point.Prio");
        let class = target.target_class();

        let point = ExtensionPoint::<i64>::new("on_check");
        let log = Arc::new(Mutex::new(Vec::new()));
        for (label, priority) in [("a", 5), ("b", 5), ("c", 3), ("d", 5)] {
            point
                .add_callback_hook(&class, recording_handler(&log, label), priority, false)
                .unwrap();
        }

        point.invoke(&target, 0).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "d", "c"]);
    }

    #[tokio::test]
    async fn explicit_hook_suppresses_implicit_method() {
        let registry = Registry::new();
        let target = target_with_probe(&registry, "tests.point.Explicit");
        let class = target.target_class();

        let point = ExtensionPoint::<i64>::new("on_check");

        let implicit_calls = Arc::new(AtomicUsize::new(0));
        let explicit_calls = Arc::new(AtomicUsize::new(0));

        let implicit = Arc::clone(&implicit_calls);
        point
            .bind_method::<Probe>(handler_fn(move |_plugin, _target, _args: i64| {
                let implicit = Arc::clone(&implicit);
                async move {
                    implicit.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            }))
            .unwrap();

        let explicit = Arc::clone(&explicit_calls);
        point
            .add_hook::<Probe>(
                &class,
                handler_fn(move |_plugin, _target, _args: i64| {
                    let explicit = Arc::clone(&explicit);
                    async move {
                        explicit.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    }
                }),
                0,
                false,
            )
            .unwrap();

        point.invoke(&target, 0).await.unwrap();
        assert_eq!(explicit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(implicit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn implicit_method_runs_without_explicit_hooks() {
        let registry = Registry::new();
        let target = target_with_probe(&registry, "tests.point.Implicit");

        let point = ExtensionPoint::<i64>::new("on_check");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        point
            .bind_method::<Probe>(plugin_method::<Probe, _, _, _, _>(
                move |_plugin, _target, _args: i64| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    }
                },
            ))
            .unwrap();

        point.invoke(&target, 0).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hooks_on_ancestors_apply_to_descendants() {
        let registry = Registry::new();
        let base = TargetDef::new("tests.point.Base")
            .slot("probe", probe_blueprint())
            .define(&registry)
            .unwrap();
        let child = TargetDef::new("tests.point.Child")
            .parent(&base)
            .define(&registry)
            .unwrap();
        let target: BoxedTarget = Arc::new(PluginHost::new(&child).unwrap());

        let point = ExtensionPoint::<i64>::new("on_check");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        point
            .add_hook::<Probe>(
                &base,
                handler_fn(move |_plugin, _target, _args: i64| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    }
                }),
                0,
                false,
            )
            .unwrap();

        point.invoke(&target, 0).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ancestor_hook_suppresses_implicit_method_on_descendant() {
        let registry = Registry::new();
        let base = TargetDef::new("tests.point.SupBase")
            .slot("probe", probe_blueprint())
            .define(&registry)
            .unwrap();
        let child = TargetDef::new("tests.point.SupChild")
            .parent(&base)
            .define(&registry)
            .unwrap();
        let target: BoxedTarget = Arc::new(PluginHost::new(&child).unwrap());

        let point = ExtensionPoint::<i64>::new("on_check");
        let implicit_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&implicit_calls);
        point
            .bind_method::<Probe>(handler_fn(move |_plugin, _target, _args: i64| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            }))
            .unwrap();
        point
            .add_hook::<Probe>(
                &base,
                handler_fn(|_plugin, _target, _args: i64| async move { Ok(Some(1)) }),
                0,
                false,
            )
            .unwrap();

        let result = point.invoke(&target, 0).await.unwrap();
        assert_eq!(result, Some(1));
        assert_eq!(implicit_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn streaming_pipeline_threads_the_accumulator() {
        let registry = Registry::new();
        let target = target_with_probe(&registry, "tests.point.Stream");
        let class = target.target_class();

        let point = StreamingPoint::<i64>::new("transform");
        point
            .add_callback_hook(
                &class,
                handler_fn(|_plugin, _target, v: i64| async move { Ok(Some(v + 1)) }),
                0,
                false,
            )
            .unwrap();
        point
            .add_callback_hook(
                &class,
                handler_fn(|_plugin, _target, v: i64| async move { Ok(Some(v * 2)) }),
                0,
                false,
            )
            .unwrap();

        let result = point.invoke(&target, 3).await.unwrap();
        assert_eq!(result, 8);
    }

    #[tokio::test]
    async fn streaming_handler_returning_none_keeps_the_accumulator() {
        let registry = Registry::new();
        let target = target_with_probe(&registry, "tests.point.StreamNone");
        let class = target.target_class();

        let point = StreamingPoint::<i64>::new("transform");
        point
            .add_callback_hook(
                &class,
                handler_fn(|_plugin, _target, v: i64| async move { Ok(Some(v + 1)) }),
                0,
                false,
            )
            .unwrap();
        point
            .add_callback_hook(
                &class,
                handler_fn(|_plugin, _target, _v: i64| async move { Ok(None) }),
                0,
                false,
            )
            .unwrap();
        point
            .add_callback_hook(
                &class,
                handler_fn(|_plugin, _target, v: i64| async move { Ok(Some(v * 2)) }),
                0,
                false,
            )
            .unwrap();

        let result = point.invoke(&target, 3).await.unwrap();
        assert_eq!(result, 8);
    }

    #[tokio::test]
    async fn independent_dispatch_passes_original_args_to_every_handler() {
        let registry = Registry::new();
        let target = target_with_probe(&registry, "tests.point.Indep");
        let class = target.target_class();

        let point = ExtensionPoint::<i64>::new("on_check");
        point
            .add_callback_hook(
                &class,
                handler_fn(|_plugin, _target, v: i64| async move { Ok(Some(v + 1)) }),
                0,
                false,
            )
            .unwrap();
        point
            .add_callback_hook(
                &class,
                handler_fn(|_plugin, _target, v: i64| async move {
                    // Unaffected by the previous handler's return value.
                    assert_eq!(v, 3);
                    Ok(Some(v * 10))
                }),
                0,
                false,
            )
            .unwrap();

        let result = point.invoke(&target, 3).await.unwrap();
        assert_eq!(result, Some(30));
    }

    #[tokio::test]
    async fn async_handlers_never_interleave() {
        let registry = Registry::new();
        let target = target_with_probe(&registry, "tests.point.Order");
        let class = target.target_class();

        let point = ExtensionPoint::<i64>::new("on_check");
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&log);
        point
            .add_callback_hook(
                &class,
                handler_fn(move |_plugin, _target, _v: i64| {
                    let log = Arc::clone(&first);
                    async move {
                        log.lock().unwrap().push("first");
                        Ok(None)
                    }
                }),
                0,
                false,
            )
            .unwrap();

        let second = Arc::clone(&log);
        point
            .add_callback_hook(
                &class,
                handler_fn(move |_plugin, _target, _v: i64| {
                    let log = Arc::clone(&second);
                    async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        log.lock().unwrap().push("second");
                        Ok(None)
                    }
                }),
                0,
                false,
            )
            .unwrap();

        let third = Arc::clone(&log);
        point
            .add_callback_hook(
                &class,
                handler_fn(move |_plugin, _target, _v: i64| {
                    let log = Arc::clone(&third);
                    async move {
                        log.lock().unwrap().push("third");
                        Ok(None)
                    }
                }),
                0,
                false,
            )
            .unwrap();

        point.invoke(&target, 0).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn callback_hooks_run_before_the_plugin_chain() {
        let registry = Registry::new();
        let target = target_with_probe(&registry, "tests.point.CbFirst");
        let class = target.target_class();

        let point = ExtensionPoint::<i64>::new("on_check");
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let plugin_log = Arc::clone(&log);
        point
            .add_hook::<Probe>(
                &class,
                handler_fn(move |_plugin, _target, _v: i64| {
                    let log = Arc::clone(&plugin_log);
                    async move {
                        log.lock().unwrap().push("plugin");
                        Ok(None)
                    }
                }),
                100, // higher priority than the callback, still runs after it
                false,
            )
            .unwrap();
        point
            .add_callback_hook(&class, recording_handler(&log, "callback"), 0, false)
            .unwrap();

        point.invoke(&target, 0).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["callback", "plugin"]);
    }

    #[tokio::test]
    async fn handler_errors_propagate_unchanged() {
        let registry = Registry::new();
        let target = target_with_probe(&registry, "tests.point.Err");
        let class = target.target_class();

        let point = ExtensionPoint::<i64>::new("on_check");
        point
            .add_callback_hook(
                &class,
                handler_fn(|_plugin, _target, _v: i64| async move {
                    Err::<Option<i64>, BoxError>("handler exploded".into())
                }),
                0,
                false,
            )
            .unwrap();

        let err = point.invoke(&target, 0).await.unwrap_err();
        match err {
            DispatchError::Handler { point, source } => {
                assert_eq!(point, "on_check");
                assert_eq!(source.to_string(), "handler exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn registered_only_requires_prior_registration() {
        let registry = Registry::new();
        let target = target_with_probe(&registry, "tests.point.RegOnly");
        let class = target.target_class();

        let point = ExtensionPoint::<i64>::new("on_check");
        let handler = handler_fn(|_plugin, _target, _v: i64| async move { Ok(None) });

        let err = point
            .add_hook::<Probe>(&class, Arc::clone(&handler), 0, true)
            .unwrap_err();
        assert!(matches!(err, HookError::UnregisteredClass { .. }));

        point.register(&class);
        point.add_hook::<Probe>(&class, handler, 0, true).unwrap();
    }

    #[tokio::test]
    async fn unregister_drops_all_bindings() {
        let registry = Registry::new();
        let target = target_with_probe(&registry, "tests.point.Unreg");
        let class = target.target_class();

        let point = ExtensionPoint::<i64>::new("on_check");
        point
            .add_callback_hook(
                &class,
                handler_fn(|_plugin, _target, _v: i64| async move { Ok(Some(1)) }),
                0,
                false,
            )
            .unwrap();
        point.unregister(&class);

        let result = point.invoke(&target, 0).await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn hooks_only_fire_for_plugins_in_the_target_set() {
        let registry = Registry::new();
        let target = target_with_probe(&registry, "tests.point.SetGate");
        let class = target.target_class();

        let point = ExtensionPoint::<i64>::new("on_check");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        // `Other` is not attached to the target, so this hook never fires.
        point
            .add_hook::<Other>(
                &class,
                handler_fn(move |_plugin, _target, _v: i64| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    }
                }),
                0,
                false,
            )
            .unwrap();

        point.invoke(&target, 0).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // Attaching the plugin per-instance makes the hook fire.
        let host = PluginHost::with_overrides(
            &class,
            [crate::target::PluginEntry::Deferred(other_blueprint())],
        )
        .unwrap();
        let overridden: BoxedTarget = Arc::new(host);
        point.invoke(&overridden, 0).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mode_restriction_gates_entry_points() {
        let registry = Registry::new();
        let target = target_with_probe(&registry, "tests.point.Mode");

        let sync_only =
            ExtensionPoint::<i64>::with_restriction("sync_point", ModeRestriction::SyncOnly);
        assert!(sync_only.invoke_blocking(&target, 0).is_ok());
        let err = futures::executor::block_on(sync_only.invoke(&target, 0)).unwrap_err();
        assert!(matches!(err, DispatchError::Mode { .. }));

        let async_only =
            ExtensionPoint::<i64>::with_restriction("async_point", ModeRestriction::AsyncOnly);
        let err = async_only.invoke_blocking(&target, 0).unwrap_err();
        assert!(matches!(err, DispatchError::Mode { .. }));
        assert!(futures::executor::block_on(async_only.invoke(&target, 0)).is_ok());
    }

    #[tokio::test]
    async fn plugin_method_receives_the_typed_instance() {
        let registry = Registry::new();
        let target = target_with_probe(&registry, "tests.point.Typed");

        let point = ExtensionPoint::<i64>::new("on_check");
        point
            .bind_method::<Probe>(plugin_method::<Probe, _, _, _, _>(
                |plugin: Arc<Probe>, _target, v: i64| async move {
                    let _: &Probe = &plugin;
                    Ok(Some(v + 100))
                },
            ))
            .unwrap();

        let result = point.invoke(&target, 1).await.unwrap();
        assert_eq!(result, Some(101));
    }
}
