use thiserror::Error;

/// Classified error kinds a target, provider, or pipeline stage can raise.
///
/// These are kinds, not a full taxonomy of every failure mode — call sites
/// outside the classified retry/fatal state machine keep using
/// `anyhow::Result` with `.context(...)`, exactly as the rest of the
/// workspace does. `CraftError` exists so the orchestrator and the retry
/// envelopes can make a decision (`fatal`, `retry`, `skip`) without parsing
/// error strings.
#[derive(Debug, Error, Clone)]
pub enum CraftError {
    /// Invalid or missing config. Fatal, surfaced immediately with the
    /// offending field name.
    #[error("configuration error in `{field}`: {message}")]
    Configuration { field: String, message: String },

    /// Artifact or resource not present. Per-target configurable to be fatal
    /// or skip.
    #[error("not found: {resource}: {message}")]
    NotFound { resource: String, message: String },

    /// Network/5xx/process exit. Retried per the envelope; escalates to
    /// fatal after the envelope exhausts its attempts.
    #[error("transient error: {0}")]
    Transient(String),

    /// A state-machine invariant was violated (e.g. a Maven repository was
    /// not `open` when a close was attempted). Fatal; never retried.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// A polling loop exceeded its bound. Fatal.
    #[error("deadline exceeded: {0}")]
    Deadline(String),

    /// An external tool returned a recognizable "already done" signal.
    /// Normalized to success by the caller that recognizes it; this variant
    /// exists so that normalization can be expressed as a typed match rather
    /// than re-parsing stderr at every call site.
    #[error("upstream reports already complete: {0}")]
    Upstream(String),
}

impl CraftError {
    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        CraftError::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>, message: impl Into<String>) -> Self {
        CraftError::NotFound {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        CraftError::Transient(message.into())
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        CraftError::PreconditionFailed(message.into())
    }

    pub fn deadline(message: impl Into<String>) -> Self {
        CraftError::Deadline(message.into())
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        CraftError::Upstream(message.into())
    }

    /// Whether this kind should be retried by a generic retry envelope.
    /// `Upstream` is deliberately excluded: it isn't a failure to retry, it's
    /// a success signal the caller should normalize instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CraftError::Transient(_))
    }

    /// Whether this kind is fatal to the whole run (as opposed to skippable
    /// at the target level, which is `NotFound` under some target configs).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CraftError::Configuration { .. }
                | CraftError::PreconditionFailed(_)
                | CraftError::Deadline(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(CraftError::transient("503").is_retryable());
        assert!(!CraftError::configuration("targets[0].name", "missing").is_retryable());
        assert!(!CraftError::upstream("already published").is_retryable());
    }

    #[test]
    fn configuration_precondition_and_deadline_are_fatal() {
        assert!(CraftError::configuration("x", "y").is_fatal());
        assert!(CraftError::precondition_failed("not open").is_fatal());
        assert!(CraftError::deadline("2h").is_fatal());
        assert!(!CraftError::transient("network").is_fatal());
        assert!(!CraftError::not_found("artifact", "missing").is_fatal());
    }

    #[test]
    fn display_includes_field_name() {
        let err = CraftError::configuration("github.owner", "must not be empty");
        assert!(err.to_string().contains("github.owner"));
    }
}
