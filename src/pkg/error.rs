use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure kinds that callers need to tell apart. Everything else travels as
/// a plain `anyhow::Error` with path context attached.
#[derive(Debug, Error)]
pub enum PkgError {
    #[error("cannot reach {package} at {url}: {detail}")]
    VcsUnreachable {
        package: String,
        url: String,
        detail: String,
    },

    #[error("{package}: reference `{reference}` not found after update")]
    ReferenceNotFound { package: String, reference: String },

    #[error(
        "conflicting constraints for {package}: {first_requester} wants `{first_constraint}`, \
         {second_requester} wants `{second_constraint}`"
    )]
    ConstraintConflict {
        package: String,
        first_requester: String,
        first_constraint: String,
        second_requester: String,
        second_constraint: String,
    },

    #[error("malformed manifest {}: {detail}", path.display())]
    ManifestMalformed { path: PathBuf, detail: String },

    #[error("timed out after {}s waiting for cache lock {}", timeout.as_secs(), path.display())]
    CacheLockTimeout { path: PathBuf, timeout: Duration },

    #[error("unsupported vcs `{vcs}` for {package}: {detail}")]
    UnsupportedVcs {
        package: String,
        vcs: String,
        detail: String,
    },
}

impl PkgError {
    /// Kinds that are worth re-running the command for.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::VcsUnreachable { .. } | Self::CacheLockTimeout { .. }
        )
    }
}

/// Finds the first `PkgError` in an error chain.
pub fn kind_of(err: &anyhow::Error) -> Option<&PkgError> {
    err.chain().find_map(|e| e.downcast_ref::<PkgError>())
}
