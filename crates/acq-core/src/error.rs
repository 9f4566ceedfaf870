//! Error types shared by every acquisition crate.
//!
//! `AcqError` is the single error type flowing through the engine. It is
//! `Clone` because completion results are observed by more than one waiter
//! (the caller of `close()`, the lifecycle watchers, hooks), so variants carry
//! rendered messages rather than boxed sources.
//!
//! ## Error Categories
//!
//! 1. **Fatal to the acquisition** - `Generation`, `Hardware`, `Sink`,
//!    `PipelineClosed`
//!    - The generator stops issuing hardware requests, the pipeline is drained
//!      with the completion sentinel and the error surfaces through the
//!      matching completion.
//!
//! 2. **Reported, not fatal** - `Processor`
//!    - Logged by the processor runner; the image is dropped and the pipeline
//!      keeps flowing.
//!
//! 3. **Caller errors** - `AlreadyStarted`, `NotStarted`, `InvalidState`,
//!    `ReservedAxis`, `Config`
//!    - Returned synchronously from the call that violated the contract.

use thiserror::Error;

/// Convenience alias for results using the acquisition error type.
pub type AcqResult<T> = std::result::Result<T, AcqError>;

/// Primary error type for acquisition scheduling and the image pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcqError {
    /// An axis generator failed while expanding the event tree.
    ///
    /// **Error Type**: Fatal - the remaining event stream is abandoned.
    #[error("Event generation error: {0}")]
    Generation(String),

    /// The hardware executor failed to carry out an event.
    ///
    /// No retry is attempted at this layer; drivers that want retries must
    /// implement them inside their executor.
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// A processor failed on a single image.
    #[error("Processor '{processor}' failed: {message}")]
    Processor {
        /// Processor name as reported by the processor itself
        processor: String,
        /// Rendered failure
        message: String,
    },

    /// The data sink failed to persist an image or to flush.
    #[error("Data sink error: {0}")]
    Sink(String),

    /// The next pipeline stage went away while images were still flowing.
    #[error("Pipeline closed: {0}")]
    PipelineClosed(String),

    /// Hooks or processors were registered after `start()`.
    #[error("Acquisition already started: cannot {0}")]
    AlreadyStarted(String),

    /// An operation that requires a running acquisition was called before `start()`.
    #[error("Acquisition not started: cannot {0}")]
    NotStarted(String),

    /// The lifecycle state does not permit the requested transition.
    #[error("Cannot {operation}: acquisition is {state}")]
    InvalidState {
        /// Requested operation
        operation: &'static str,
        /// State at the time of the request
        state: String,
    },

    /// A generator tried to set an axis index that the engine infers itself.
    #[error("Axis '{0}' is reserved and inferred at acquisition time")]
    ReservedAxis(String),

    /// Configuration parsed but failed validation.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AcqError {
    /// Whether this error ends the acquisition when raised on the generator
    /// or sink path.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AcqError::Processor { .. })
    }

    /// Build a processor error from any displayable failure.
    pub fn processor(processor: impl Into<String>, err: impl std::fmt::Display) -> Self {
        AcqError::Processor {
            processor: processor.into(),
            message: err.to_string(),
        }
    }
}
