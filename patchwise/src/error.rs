use thiserror::Error;

use crate::diagnostics::ErrorKind;
use crate::search::Candidate;

/// Outcomes and failures of patch resolution.
///
/// `NotPatchable`, `NotFullyPatchable` and `AlreadyProcessed` are modelled
/// results of the candidate search; the classifier turns them into a
/// classification instead of aborting.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("previous analysis stage did not succeed")]
    UpstreamFailure,

    #[error("lookup failed for {package}: {message}")]
    Lookup { package: String, message: String },

    #[error("cannot resolve constraint {constraint:?} for {package}")]
    UnparsableConstraint { package: String, constraint: String },

    #[error("{0} has already been classified")]
    AlreadyProcessed(String),

    #[error("no newer release of {0} exists")]
    NotPatchable(String),

    #[error("no release of {name} is free of known vulnerabilities (best: {})", .best.version)]
    NotFullyPatchable { name: String, best: Box<Candidate> },

    #[error("no fixed version derivable from {evidence} evidence of {vulnerability}")]
    UnsupportedEvidence {
        vulnerability: String,
        evidence: &'static str,
    },

    #[error("patch resolution cancelled")]
    Cancelled,
}

impl PatchError {
    pub fn lookup(package: impl Into<String>, err: &anyhow::Error) -> Self {
        PatchError::Lookup {
            package: package.into(),
            message: format!("{err:#}"),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PatchError::UpstreamFailure => ErrorKind::PreviousStageFailed,
            PatchError::Lookup { .. } => ErrorKind::LookupFailed,
            PatchError::UnparsableConstraint { .. } => ErrorKind::UnparsableConstraint,
            PatchError::AlreadyProcessed(_) => ErrorKind::AlreadyProcessed,
            PatchError::NotPatchable(_) | PatchError::NotFullyPatchable { .. } => {
                ErrorKind::NotPatchable
            }
            PatchError::UnsupportedEvidence { .. } => ErrorKind::UnsupportedEvidence,
            PatchError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Errors that abort the whole run rather than a single dependency.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PatchError::UpstreamFailure
                | PatchError::Cancelled
                | PatchError::UnsupportedEvidence { .. }
        )
    }
}
