use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    PreviousStageFailed,
    LookupFailed,
    UnparsableConstraint,
    AlreadyProcessed,
    NotPatchable,
    UnsupportedEvidence,
    Cancelled,
    GenericError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub kind: ErrorKind,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: ErrorKind,
    /// Dependency key the warning concerns, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub description: String,
}

/// Errors and warnings collected during a single run.
///
/// Public entries are safe to hand to end users; private entries carry
/// internal detail for operators only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub public_errors: Vec<ErrorEntry>,
    pub private_errors: Vec<ErrorEntry>,
    pub warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn record_error(
        &mut self,
        kind: ErrorKind,
        public: impl Into<String>,
        private: impl Into<String>,
    ) {
        self.public_errors.push(ErrorEntry {
            kind,
            description: public.into(),
        });
        self.private_errors.push(ErrorEntry {
            kind,
            description: private.into(),
        });
    }

    pub fn warn(&mut self, kind: ErrorKind, subject: Option<&str>, description: impl Into<String>) {
        self.warnings.push(Warning {
            kind,
            subject: subject.map(str::to_string),
            description: description.into(),
        });
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.public_errors.extend(other.public_errors);
        self.private_errors.extend(other.private_errors);
        self.warnings.extend(other.warnings);
    }
}
