//! Errors that a user can see.
//!
//! Most plumbing in this crate uses [`anyhow::Result`], but anything that ends
//! up in front of a user (in the browser or on the command line) is a
//! [`GradeError`]. Each error belongs to one [`ErrorKind`], which decides how
//! it is presented: validation and parse errors are shown as-is, upstream
//! errors get a suggestion to try again.

use std::fmt;

use schemars::JsonSchema;
use thiserror::Error;
use uuid::Uuid;

use crate::{chart::ChartError, grading::ParseError, prelude::*};

/// A [`Result`] carrying a [`GradeError`].
pub type GradeResult<T> = std::result::Result<T, GradeError>;

/// An external service we depend on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    /// Optical character recognition.
    Ocr,
    /// The grading LLM.
    Llm,
    /// The history document store.
    Store,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Ocr => write!(f, "the text recognition service"),
            Service::Llm => write!(f, "the grading service"),
            Service::Store => write!(f, "the history store"),
        }
    }
}

/// Everything that can go wrong while handling one grading request.
///
/// None of these are fatal to the process.
#[derive(Debug, Error)]
pub enum GradeError {
    #[error("Please enter a question.")]
    EmptyQuestion,

    #[error("Please enter an answer.")]
    EmptyAnswer,

    #[error("The uploaded image is empty.")]
    EmptyImage,

    #[error("The uploaded image is {size} bytes, but the limit is {max} bytes.")]
    ImageTooLarge { size: usize, max: usize },

    #[error("The uploaded file is not a supported image: {0}")]
    UndecodableImage(String),

    #[error("No text was detected in the image.")]
    NoTextDetected,

    #[error("{service} is unavailable: {message}")]
    Upstream { service: Service, message: String },

    #[error("Sign in to save or view grading history.")]
    Unauthenticated,

    #[error("The request could not be read: {0}")]
    BadRequest(String),

    #[error("The grade cannot be saved: {0}")]
    InvalidGrade(String),

    #[error("Grading record {0} was not found.")]
    NotFound(Uuid),

    #[error("The grader's response could not be read: {0}")]
    Parse(#[from] ParseError),

    #[error("The score chart could not be drawn: {0}")]
    Chart(#[from] ChartError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad classes of [`GradeError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The user's input was rejected before calling any service.
    Validation,
    /// OCR ran, but found nothing to grade.
    NoTextDetected,
    /// A remote service failed. Trying again may help.
    Upstream,
    /// The LLM answered, but not in the format we asked for.
    Parse,
    /// The caller has no user identity.
    Unauthenticated,
    /// The requested record does not exist.
    NotFound,
    /// A bug.
    Internal,
}

impl GradeError {
    /// Build an upstream error from anything printable.
    pub fn upstream(service: Service, err: impl fmt::Display) -> Self {
        GradeError::Upstream {
            service,
            message: err.to_string(),
        }
    }

    /// Which kind of error is this?
    pub fn kind(&self) -> ErrorKind {
        match self {
            GradeError::EmptyQuestion
            | GradeError::EmptyAnswer
            | GradeError::EmptyImage
            | GradeError::ImageTooLarge { .. }
            | GradeError::UndecodableImage(_)
            | GradeError::BadRequest(_)
            | GradeError::InvalidGrade(_)
            | GradeError::Chart(_) => ErrorKind::Validation,
            GradeError::NoTextDetected => ErrorKind::NoTextDetected,
            GradeError::Upstream { .. } => ErrorKind::Upstream,
            GradeError::Unauthenticated => ErrorKind::Unauthenticated,
            GradeError::NotFound(_) => ErrorKind::NotFound,
            GradeError::Parse(_) => ErrorKind::Parse,
            GradeError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The message we show to a user.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Upstream | ErrorKind::Parse => {
                format!("{self} Please try again in a moment.")
            }
            _ => self.to_string(),
        }
    }
}

/// JSON body used to report a [`GradeError`].
#[derive(Debug, JsonSchema, Serialize)]
pub struct ErrorReport {
    /// What kind of error this is.
    pub kind: ErrorKind,
    /// A human-readable message.
    pub message: String,
}

impl From<&GradeError> for ErrorReport {
    fn from(err: &GradeError) -> Self {
        ErrorReport {
            kind: err.kind(),
            message: err.user_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::Dimension;

    #[test]
    fn upstream_errors_suggest_retry() {
        let err = GradeError::upstream(Service::Llm, "connection refused");
        assert_eq!(err.kind(), ErrorKind::Upstream);
        let msg = err.user_message();
        assert!(msg.contains("grading service"), "got: {msg}");
        assert!(msg.contains("try again"), "got: {msg}");
    }

    #[test]
    fn validation_errors_do_not_suggest_retry() {
        let err = GradeError::EmptyAnswer;
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.user_message().contains("try again"));
    }

    #[test]
    fn parse_errors_are_their_own_kind() {
        let err = GradeError::from(ParseError::MissingScore(Dimension::Language));
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(err.to_string().contains("language"));
    }

    #[test]
    fn report_serializes_snake_case_kind() {
        let report = ErrorReport::from(&GradeError::NoTextDetected);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["kind"], "no_text_detected");
    }
}
