use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Transient provider failure. Retried by the activity runner; on
    /// exhaustion the affected symbol is omitted from the stage output.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Bad input data (bar high < low, implausible daily move). The symbol
    /// is dropped from this run with a logged reason. Never retried.
    #[error("Data validation error: {0}")]
    Validation(String),

    /// Not enough history to score the symbol. A skip, not a failure.
    #[error("Insufficient history: {0}")]
    InsufficientHistory(String),

    /// The benchmark series could not be fetched. Fatal for the stage:
    /// everything downstream needs benchmark context.
    #[error("Benchmark unavailable: {0}")]
    BenchmarkUnavailable(String),

    /// Document store failure. Retried by the activity runner.
    #[error("Store error: {0}")]
    Store(String),

    /// Unrecoverable stage failure; aborts the weekly run.
    #[error("Stage failed: {0}")]
    Fatal(String),
}

impl EngineError {
    /// Whether the activity runner should retry on this error.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            EngineError::Provider(_) | EngineError::Store(_) | EngineError::BenchmarkUnavailable(_)
        )
    }
}
