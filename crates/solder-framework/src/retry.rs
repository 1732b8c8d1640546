//! Built-in retry policy plugin.
//!
//! [`RetryPolicy`] is a declaratively configured retry policy: bounded
//! attempts, an optional overall deadline, a backoff schedule with optional
//! jitter, and a gate for operations the caller did not mark retryable.
//!
//! The policy attaches to target classes like any other plugin and is
//! usually consumed from a handler through the target's plugin set:
//!
//! ```rust,ignore
//! async fn resilient_fetch(host: &PluginHost) -> Result<Payload, RetryError> {
//!     let policy = host.plugin::<RetryPolicy>().unwrap_or_default();
//!     policy.run(true, |attempt| fetch_once(attempt)).await
//! }
//! ```
//!
//! The engine itself never retries anything; recovery is entirely this
//! plugin's decision (and that of others like it).
//!
//! # Declarative configuration
//!
//! [`RetryPolicy::blueprint`] declares the policy's defaults, including a
//! nested `backoff` schema, so target classes can mount a fully configured
//! policy without code:
//!
//! | Attribute | Default | Meaning |
//! |-----------|---------|---------|
//! | `max_attempts` | `3` | Total attempts, including the first |
//! | `deadline` | absent | Overall budget in seconds across all attempts |
//! | `jitter_ratio` | `0.0` | Random spread applied to each delay |
//! | `retryable_only` | `true` | Only retry operations marked retryable |
//! | `backoff.initial` | `0.5` | Delay in seconds before the first retry |
//! | `backoff.factor` | `2.0` | Multiplier per attempt (`1.0` = fixed) |
//! | `backoff.max` | `30.0` | Cap in seconds for any single delay |
//! | `backoff.schedule` | `[]` | Explicit per-attempt delays, last repeats |

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use solder_core::builder::{Args, Blueprint, Resolved, SchemaBlueprint, SchemaValue};
use solder_core::error::BoxError;
use solder_core::plugin::PluginMeta;

// ─── Errors ───────────────────────────────────────────────────────────────────

/// Errors produced by [`RetryPolicy::run`].
#[derive(Debug, Error)]
pub enum RetryError {
    /// The operation failed and the caller did not mark it retryable.
    #[error("operation is not retryable: {source}")]
    NotRetryable {
        /// The operation's error, untouched.
        #[source]
        source: BoxError,
    },

    /// Every permitted attempt failed.
    #[error("max attempts ({attempts}) exceeded: {source}")]
    MaxAttemptsExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// The last attempt's error.
        #[source]
        source: BoxError,
    },

    /// The overall deadline would elapse before the next attempt.
    #[error("retry deadline of {deadline:?} exceeded after {attempts} attempts: {source}")]
    DeadlineExceeded {
        /// The configured overall deadline.
        deadline: Duration,
        /// Number of attempts made.
        attempts: u32,
        /// The last attempt's error.
        #[source]
        source: BoxError,
    },
}

// ─── Backoff ──────────────────────────────────────────────────────────────────

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Multiplier applied per attempt; `1.0` keeps the delay fixed.
    pub factor: f64,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Explicit per-attempt delays. When non-empty this overrides the
    /// computed curve; the last entry repeats for later attempts.
    pub schedule: Vec<Duration>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(30),
            schedule: Vec::new(),
        }
    }
}

impl Backoff {
    /// A fixed delay before every retry.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            factor: 1.0,
            max: delay,
            schedule: Vec::new(),
        }
    }

    /// The delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        if !self.schedule.is_empty() {
            let idx = (attempt as usize).min(self.schedule.len() - 1);
            return self.schedule[idx];
        }
        let secs = self.initial.as_secs_f64() * self.factor.powi(attempt as i32);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }
}

// ─── RetryPolicy ──────────────────────────────────────────────────────────────

/// A declaratively configured retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Overall budget across all attempts and delays.
    pub deadline: Option<Duration>,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
    /// Random spread applied to each delay: a ratio of `0.25` turns a 1s
    /// delay into 0.75s..1.25s.
    pub jitter_ratio: f64,
    /// When set, operations the caller did not mark retryable fail on the
    /// first error instead of retrying.
    pub retryable_only: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            deadline: None,
            backoff: Backoff::default(),
            jitter_ratio: 0.0,
            retryable_only: true,
        }
    }
}

solder_core::impl_plugin!(RetryPolicy, "solder.retry.RetryPolicy");

impl RetryPolicy {
    /// The declarative blueprint for this plugin, with a nested `backoff`
    /// schema. Mount it on a target class via `TargetDef::slot`, overriding
    /// attributes as needed.
    pub fn blueprint() -> Arc<Blueprint> {
        let backoff = SchemaBlueprint::new("solder.retry.Backoff")
            .value("initial", json!(0.5))
            .value("factor", json!(2.0))
            .value("max", json!(30.0))
            .value("schedule", json!([]))
            .arc();

        Blueprint::new(Self::PATH, |args: Args| {
            Ok(RetryPolicy {
                max_attempts: args.scalar_or("max_attempts", 3),
                deadline: args
                    .get("deadline")
                    .and_then(|r| r.to::<f64>())
                    .map(Duration::from_secs_f64),
                backoff: args
                    .get("backoff")
                    .and_then(Resolved::as_schema)
                    .map(backoff_from_schema)
                    .unwrap_or_default(),
                jitter_ratio: args.scalar_or("jitter_ratio", 0.0),
                retryable_only: args.scalar_or("retryable_only", true),
            })
        })
        .required("max_attempts")
        .optional("deadline")
        .optional("jitter_ratio")
        .optional("retryable_only")
        .optional("backoff")
        .attr("max_attempts", json!(3))
        .schema("backoff", backoff)
        .arc()
    }

    /// Runs `op` under this policy.
    ///
    /// `op` receives the zero-based attempt index. `retryable` is the
    /// caller's statement that the operation is safe to repeat; with
    /// [`retryable_only`](Self::retryable_only) set, a failure of a
    /// non-retryable operation is returned immediately.
    ///
    /// The overall deadline is enforced cooperatively between attempts:
    /// when the next delay would overrun it, [`RetryError::DeadlineExceeded`]
    /// is returned before the delay starts. A running attempt is never
    /// interrupted.
    pub async fn run<T, F, Fut>(&self, retryable: bool, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(source) => {
                    if self.retryable_only && !retryable {
                        return Err(RetryError::NotRetryable { source });
                    }
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(RetryError::MaxAttemptsExceeded {
                            attempts: attempt,
                            source,
                        });
                    }
                    let delay = self.jittered(self.backoff.delay(attempt - 1));
                    if let Some(deadline) = self.deadline
                        && started.elapsed() + delay >= deadline
                    {
                        return Err(RetryError::DeadlineExceeded {
                            deadline,
                            attempts: attempt,
                            source,
                        });
                    }
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %source,
                        "attempt failed, retrying after backoff"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let spread = (rand::rng().random::<f64>() * 2.0 - 1.0) * self.jitter_ratio;
        Duration::from_secs_f64((delay.as_secs_f64() * (1.0 + spread)).max(0.0))
    }
}

fn backoff_from_schema(schema: &SchemaValue) -> Backoff {
    let schedule: Vec<f64> = schema.scalar_or("schedule", Vec::new());
    Backoff {
        initial: Duration::from_secs_f64(schema.scalar_or("initial", 0.5)),
        factor: schema.scalar_or("factor", 2.0),
        max: Duration::from_secs_f64(schema.scalar_or("max", 30.0)),
        schedule: schedule.into_iter().map(Duration::from_secs_f64).collect(),
    }
}
