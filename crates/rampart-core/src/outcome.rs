//! Attempt outcomes and failure classification.
//!
//! Every failure produced by a wrapped operation is tagged either
//! [`Classification::Transient`] or [`Classification::Permanent`] by a
//! caller-supplied [`Classifier`]. Policies only ever look at the tag, never
//! at the concrete error type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::PolicyError;

/// The result of running an operation through one or more policies.
///
/// `Ok` is a success carrying the operation's value, `Err` is a failure
/// describing whether the operation ran at all and how it failed.
pub type Outcome<T, E> = Result<T, PolicyError<E>>;

/// Whether retrying could plausibly fix a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Expected to resolve on its own (timeouts, temporary unavailability)
    Transient,

    /// Retrying cannot help (invalid input, authorization failure)
    Permanent,
}

impl Default for Classification {
    fn default() -> Self {
        Self::Transient
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Maps an operation error to its [`Classification`].
pub type Classifier<E> = Arc<dyn Fn(&E) -> Classification + Send + Sync>;

/// Classifier that treats every error as transient.
pub fn transient_classifier<E>() -> Classifier<E> {
    Arc::new(|_| Classification::Transient)
}

/// An operation error together with its classification tag.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedError<E> {
    /// The error returned by the operation
    pub error: E,

    /// How policies should treat it
    pub classification: Classification,
}

impl<E> ClassifiedError<E> {
    /// Wrap an error with an explicit classification.
    pub fn new(error: E, classification: Classification) -> Self {
        Self {
            error,
            classification,
        }
    }

    /// Wrap an error as transient.
    pub fn transient(error: E) -> Self {
        Self::new(error, Classification::Transient)
    }

    /// Wrap an error as permanent.
    pub fn permanent(error: E) -> Self {
        Self::new(error, Classification::Permanent)
    }

    /// Classify an error with the given classifier.
    pub fn classify(error: E, classifier: &(dyn Fn(&E) -> Classification + Send + Sync)) -> Self {
        let classification = classifier(&error);
        Self::new(error, classification)
    }

    pub fn is_transient(&self) -> bool {
        self.classification == Classification::Transient
    }

    pub fn is_permanent(&self) -> bool {
        self.classification == Classification::Permanent
    }

    /// Discard the tag and return the underlying error.
    pub fn into_inner(self) -> E {
        self.error
    }
}

impl<E: fmt::Display> fmt::Display for ClassifiedError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.classification, self.error)
    }
}

impl<E> std::error::Error for ClassifiedError<E>
where
    E: std::error::Error + 'static,
{
    // Display already carries the wrapped error's message.
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}
