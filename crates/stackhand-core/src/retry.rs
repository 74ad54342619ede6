//! Step-level retry with bounded exponential backoff.
//!
//! Capability failures are assumed transient at the call site; retry
//! happens here, per step, never across the whole run. Exhausted retries
//! hand the last error back to the caller, which records it as the step's
//! failure.

use std::future::Future;

use stackhand_cloud::{CapabilityError, CapabilityResult};
use tracing::warn;

use crate::config::RetryPolicy;

/// Outcome of a retried capability call: the final result plus the number
/// of attempts consumed (for the run history).
#[derive(Debug)]
pub struct Retried<T> {
    pub result: CapabilityResult<T>,
    pub attempts: u32,
}

/// Run `op` up to `policy.max_attempts` times with exponential backoff.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> Retried<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CapabilityResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.base_delay;
    let mut last_err: Option<CapabilityError> = None;

    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(err) => {
                if attempt < max_attempts {
                    warn!(
                        op = op_name,
                        attempt,
                        code = %err.code,
                        "capability call failed, retrying after {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * policy.factor).min(policy.max_delay);
                }
                last_err = Some(err);
            }
        }
    }

    Retried {
        result: Err(last_err.expect("at least one attempt ran")),
        attempts: max_attempts,
    }
}
