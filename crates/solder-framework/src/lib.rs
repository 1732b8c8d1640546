//! # Solder Framework
//!
//! Built-in plugins for the Solder dispatch engine.
//!
//! The engine in `solder-core` is policy-free: it resolves and invokes
//! handler chains but never decides what the handlers do. This crate ships
//! the cross-cutting behaviors most consumers reach for first:
//!
//! - [`retry::RetryPolicy`] — bounded, deadline-aware retries with a
//!   declaratively configured backoff schedule.
//! - [`trace::TracePlugin`] — dispatch observation with structured logging.
//!
//! Both are ordinary plugins: they mount on target classes through their
//! blueprints and are consumed through the target's plugin set or bound as
//! extension-point handlers.

pub mod retry;
pub mod trace;

pub use retry::{Backoff, RetryError, RetryPolicy};
pub use trace::{TracePlugin, observer};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::retry::{Backoff, RetryError, RetryPolicy};
    pub use crate::trace::{TracePlugin, observer};
}
