use engine_core::EngineError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry policy for a single activity: exponential backoff, capped
/// interval, bounded attempts. Validation failures never retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max_attempts: u32,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max_attempts: 3,
            max_interval: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled).min(self.max_interval)
    }
}

/// Timeout class per the orchestration contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    /// I/O-heavy batch work.
    BatchIo,
    /// Pure computation.
    Compute,
    /// Single-source fetches.
    SingleFetch,
}

impl TimeoutClass {
    pub fn duration(&self) -> Duration {
        match self {
            TimeoutClass::BatchIo => Duration::from_secs(600),
            TimeoutClass::Compute => Duration::from_secs(300),
            TimeoutClass::SingleFetch => Duration::from_secs(180),
        }
    }
}

/// Run an activity under its timeout class with retries.
///
/// The closure must be idempotent on output (keyed upserts): at-least-once
/// semantics mean a retry may repeat work that already persisted.
/// Cancellation is cooperative: checked between attempts, never mid-flight.
pub async fn run_activity<T, F, Fut>(
    name: &str,
    class: TimeoutClass,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut f: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut last_error = EngineError::Fatal(format!("{name}: no attempts made"));

    for attempt in 0..policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(EngineError::Fatal(format!("{name}: run cancelled")));
        }

        match tokio::time::timeout(class.duration(), f()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !e.is_retriable() => {
                return Err(e);
            }
            Ok(Err(e)) => {
                tracing::warn!("{} attempt {}/{} failed: {}", name, attempt + 1, policy.max_attempts, e);
                last_error = e;
            }
            Err(_) => {
                tracing::warn!(
                    "{} attempt {}/{} timed out after {:?}",
                    name,
                    attempt + 1,
                    policy.max_attempts,
                    class.duration()
                );
                last_error = EngineError::Provider(format!("{name}: activity timed out"));
            }
        }

        if attempt + 1 < policy.max_attempts {
            tokio::time::sleep(policy.backoff(attempt)).await;
        }
    }

    Err(last_error)
}
