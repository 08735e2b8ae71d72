//! Error taxonomy described in spec §7.
//!
//! `anyhow::Result` stays the propagation idiom for glue code, but
//! adapters and the scheduler get a small closed classification so
//! recovery policy (retry at next tick / open the breaker / drop and
//! count) can be decided on the error's *class* rather than by
//! string-matching a generic `anyhow::Error`.
use std::fmt;

/// Recovery-policy classification for an error crossing a component boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Detected at startup; the process should terminate with non-zero status.
    Configuration,
    /// Retryable at the next scrape tick; counted and observed by the breaker.
    TransientIo,
    /// The breaker should open for this target; scraping is suppressed until cooldown.
    PersistentIo,
    /// A single data point is malformed; drop it, count it, leave the rest of the batch alone.
    DataQuality,
    /// A point or batch was dropped by policy (memory-limiter, sampler, cost-control).
    Policy,
    /// A programming invariant was violated; this is not expected to be recoverable.
    Internal,
}

impl ErrorClass {
    /// Whether the scheduler should retry the owning target at its next tick.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::TransientIo)
    }
}

/// An error tagged with its recovery class, wrapping the underlying cause.
#[derive(Debug)]
pub struct ClassifiedError {
    class: ErrorClass,
    target: Option<String>,
    source: anyhow::Error,
}

impl ClassifiedError {
    #[must_use]
    pub fn new(class: ErrorClass, source: anyhow::Error) -> Self {
        Self {
            class,
            target: None,
            source,
        }
    }

    /// Wrap an error with the target identifier it occurred against, as
    /// required by the scheduler's "wrap with target id" contract in §4.1.
    #[must_use]
    pub fn for_target(class: ErrorClass, target: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            class,
            target: Some(target.into()),
            source,
        }
    }

    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        self.class
    }

    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(t) => write!(f, "[{:?}] target={t}: {}", self.class, self.source),
            None => write!(f, "[{:?}] {}", self.class, self.source),
        }
    }
}

impl std::error::Error for ClassifiedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}

/// Error class belonging to a pool-exhaustion condition (§4.16): always
/// transient/retryable, but kept distinct so callers can tell it apart from
/// a bare query failure for metrics purposes.
#[must_use]
pub fn pool_exhausted(target: impl Into<String>, source: anyhow::Error) -> ClassifiedError {
    ClassifiedError::for_target(ErrorClass::TransientIo, target, source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        assert!(ErrorClass::TransientIo.is_retryable());
        assert!(!ErrorClass::PersistentIo.is_retryable());
        assert!(!ErrorClass::Configuration.is_retryable());
    }

    #[test]
    fn display_includes_target() {
        let err = ClassifiedError::for_target(
            ErrorClass::TransientIo,
            "db-1",
            anyhow::anyhow!("connection refused"),
        );
        let rendered = err.to_string();
        assert!(rendered.contains("db-1"));
        assert!(rendered.contains("connection refused"));
    }
}
