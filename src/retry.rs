//! Conflict retry for store status writes.
//!
//! Every status write in the crate is a read-modify-write against an object
//! carrying a resource version; a 409 from the store means another writer
//! won the race and the mutation must be recomputed from a fresh read. The
//! helper here retries exactly that case, with jittered backoff so racing
//! handlers do not re-collide in lockstep.

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::Error;

/// Retry budget and pacing for conflicting status writes.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = unbounded)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// The retry discipline for status read-modify-write conflicts.
    ///
    /// Five quick attempts with small jittered delays. Conflicts past that
    /// budget bubble up to the work queue, which retries with its own
    /// backoff.
    pub fn conflict_default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }
}

/// Retry an operation only while it fails with a store version conflict.
///
/// Any other error returns immediately. The operation must re-read the
/// object on each attempt, otherwise it will conflict forever.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_conflict() => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        "Conflict retry budget exhausted"
                    );
                    return Err(e);
                }

                // Jitter: 0.5x to 1.5x of the delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    delay_ms = jittered_delay.as_millis(),
                    "Version conflict, re-reading and retrying"
                );

                tokio::time::sleep(jittered_delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
            Err(e) => return Err(e),
        }
    }
}
