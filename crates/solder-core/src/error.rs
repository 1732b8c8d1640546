//! Error types for the Solder dispatch engine.
//!
//! The taxonomy mirrors the three phases of the engine's lifecycle:
//! [`BuildError`] for declarative construction, [`HookError`] for hook
//! registration, and [`DispatchError`] for invocation. Handler failures are
//! carried as opaque [`BoxError`] values and propagate unchanged; the engine
//! never catches, retries, or suppresses them.

use thiserror::Error;

/// Opaque error type returned by handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Construction Errors
// =============================================================================

/// Errors raised while building plugin instances or defining target classes.
///
/// These are always raised synchronously at class/instance build time and
/// name the offending plugin type, class, and parameter or slot.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A required constructor parameter had neither an override nor a
    /// declared attribute (strict mode only).
    #[error("`{plugin}`: required parameter `{param}` is not defined")]
    MissingParameter {
        /// Reference path of the plugin type being built.
        plugin: String,
        /// Name of the missing parameter.
        param: String,
    },

    /// A fixed slot received a value of the wrong plugin type.
    #[error("`{class}.{slot}` must hold a `{expected}` instance, got `{got}`")]
    FixedSlotMismatch {
        /// Path of the target class declaring the slot.
        class: String,
        /// Slot name.
        slot: String,
        /// Reference path of the declared plugin type.
        expected: String,
        /// Reference path of the value actually assigned.
        got: String,
    },

    /// A target class path was defined twice in the same registry.
    #[error("target class `{path}` is already defined")]
    DuplicateClass {
        /// The duplicate class path.
        path: String,
    },

    /// A blueprint constructor rejected its resolved arguments.
    #[error("`{plugin}`: constructor rejected arguments: {reason}")]
    Constructor {
        /// Reference path of the plugin type being built.
        plugin: String,
        /// Reason reported by the constructor.
        reason: String,
    },
}

impl BuildError {
    /// Creates a [`BuildError::Constructor`] error.
    pub fn constructor(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Constructor {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for build operations.
pub type BuildResult<T> = Result<T, BuildError>;

// =============================================================================
// Registration Errors
// =============================================================================

/// Errors raised while registering hooks on an extension point.
///
/// Registration is a setup-time activity; these errors surface immediately
/// at the registration call site.
#[derive(Debug, Clone, Error)]
pub enum HookError {
    /// `registered_only` was requested but `register` was never called for
    /// the target class.
    #[error("`{point}`: target class `{class}` is not registered")]
    UnregisteredClass {
        /// Name of the extension point.
        point: String,
        /// Path of the unregistered target class.
        class: String,
    },

    /// A default method is already bound for the plugin type.
    #[error("`{point}`: a method is already bound for plugin type `{plugin}`")]
    DuplicateMethod {
        /// Name of the extension point.
        point: String,
        /// Reference path of the plugin type.
        plugin: String,
    },
}

/// Result type for hook registration.
pub type HookResult<T> = Result<T, HookError>;

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Errors surfaced by extension-point invocation.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A handler failed. The underlying error is propagated unchanged;
    /// retry and recovery policy belong to the handlers themselves.
    #[error("`{point}`: handler failed: {source}")]
    Handler {
        /// Name of the extension point.
        point: String,
        /// The handler's error, untouched.
        #[source]
        source: BoxError,
    },

    /// The extension point's mode restriction forbids this entry point.
    #[error("`{point}` is {declared}-only and cannot be invoked {attempted}")]
    Mode {
        /// Name of the extension point.
        point: String,
        /// The declared restriction (`synchronous` or `asynchronous`).
        declared: &'static str,
        /// How the caller tried to invoke it.
        attempted: &'static str,
    },
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

// =============================================================================
// Plugin Method Adapter Errors
// =============================================================================

/// Errors raised by typed plugin-method adapters when the owning plugin
/// instance cannot be downcast to the expected type.
#[derive(Debug, Clone, Error)]
pub enum PluginCastError {
    /// The handler was invoked without an owning plugin instance.
    #[error("plugin method called without an owning plugin instance")]
    MissingInstance,

    /// The owning plugin instance has a different concrete type.
    #[error("plugin method expected `{expected}`, got `{got}`")]
    TypeMismatch {
        /// Reference path of the expected plugin type.
        expected: &'static str,
        /// Reference path of the actual instance.
        got: &'static str,
    },
}
