//! Support utilities for [`keen_retry`]'s retry API.

use std::iter;

use async_openai::error::OpenAIError;
use keen_retry::{ExponentialJitter, ResolvedResult, RetryResult};
use reqwest::StatusCode;

use crate::prelude::*;

/// A [`RetryResult`] with no input, and an [`anyhow::Error`] error type. This
/// is what all our remote calls return.
pub type SimpleRetryResult<T> = RetryResult<(), (), T, anyhow::Error>;

/// Macro which implements `?`-like behavior for [`RetryResult`].
macro_rules! try_retry_result {
    ($result:expr) => {
        match $result {
            ::keen_retry::RetryResult::Ok { output, .. } => output,
            ::keen_retry::RetryResult::Transient { input, error } => {
                return ::keen_retry::RetryResult::Transient {
                    input,
                    error: From::from(error),
                };
            }
            ::keen_retry::RetryResult::Fatal { input, error } => {
                return ::keen_retry::RetryResult::Fatal {
                    input,
                    error: From::from(error),
                };
            }
        }
    };
}

/// On error, return a [`RetryResult::Fatal`] value.
macro_rules! try_fatal {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) => {
                return ::keen_retry::RetryResult::Fatal {
                    input: (),
                    error: From::from(error),
                };
            }
        }
    };
}

/// On error, return either a [`RetryResult::Transient`] or [`RetryResult::Fatal`]
/// value, depending on the return value of [`IsKnownTransient::is_known_transient`].
macro_rules! try_potentially_transient {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) if $crate::retry::IsKnownTransient::is_known_transient(&error) => {
                ::tracing::debug!("Potentially transient error: {:?}", error);
                return ::keen_retry::RetryResult::Transient {
                    input: (),
                    error: From::from(error),
                };
            }
            Err(error) => {
                return ::keen_retry::RetryResult::Fatal {
                    input: (),
                    error: From::from(error),
                };
            }
        }
    };
}

// Here's a trick to export a macro within a crate as if it were a normal
// symbol.
pub(crate) use {try_fatal, try_potentially_transient, try_retry_result};

/// Build an [`RetryResult::Ok`] value.
pub(crate) fn retry_result_ok<T, E>(output: T) -> RetryResult<(), (), T, E> {
    RetryResult::Ok {
        reported_input: (),
        output,
    }
}

/// Build an [`RetryResult::Fatal`] value.
pub(crate) fn retry_result_fatal<T, E>(error: E) -> RetryResult<(), (), T, E> {
    RetryResult::Fatal { input: (), error }
}

/// Build an [`RetryResult::Transient`] value.
pub(crate) fn retry_result_transient<T, E>(error: E) -> RetryResult<(), (), T, E> {
    RetryResult::Transient { input: (), error }
}

/// Call `attempt` until it succeeds, fails fatally, or we run out of retries.
///
/// Transient failures back off exponentially with jitter. `what` is only used
/// for logging. On failure, we return the last error, with the number of
/// earlier transient failures attached as context.
pub async fn with_backoff<T, F, Fut>(what: &str, attempt: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = SimpleRetryResult<T>>,
{
    let jitter = ExponentialJitter::FromBackoffRange {
        backoff_range_millis: 250..=8_000,
        re_attempts: 3,
        jitter_ratio: 0.2,
    };
    let resolved = attempt()
        .await
        .retry_with_async(|_| attempt())
        .with_exponential_jitter(|| jitter)
        .await;

    match resolved {
        ResolvedResult::Ok { output, .. } => Ok(output),
        ResolvedResult::Recovered {
            output,
            retry_errors,
            ..
        } => {
            warn!(
                "{what} succeeded after retrying {} times (failed attempts: [{}])",
                retry_errors.len(),
                keen_retry::loggable_retry_errors(&retry_errors)
            );
            Ok(output)
        }
        ResolvedResult::Fatal { error, .. } => {
            error!("{what} FAILED with error {error:?}");
            Err(error)
        }
        ResolvedResult::GivenUp {
            retry_errors,
            fatal_error,
            ..
        }
        | ResolvedResult::Unrecoverable {
            retry_errors,
            fatal_error,
            ..
        } => {
            let attempts = retry_errors.len() + 1;
            error!(
                "{what} FAILED after {attempts} attempts: [{}]",
                retry_errors
                    .iter()
                    .chain(iter::once(&fatal_error))
                    .map(|e| format!("{e:#}"))
                    .collect::<Vec<_>>()
                    .join("; ")
            );
            Err(fatal_error.context(format!("{what} failed after {attempts} attempts")))
        }
    }
}

/// Is this error a known transient error?
///
/// By default, we assume errors are not transient, until they're been observed
/// in the wild, investigated and determined to be transient. The prevents us
/// from doing large numbers of retries with exponential backoff on errors that
/// will never resolve.
pub trait IsKnownTransient {
    /// Is this error likely to be transient?
    fn is_known_transient(&self) -> bool;
}

impl IsKnownTransient for reqwest::Error {
    fn is_known_transient(&self) -> bool {
        if let Some(status) = self.status() {
            status.is_known_transient()
        } else {
            // Connection resets, DNS hiccups and timeouts all land here, and
            // `reqwest` doesn't tell us enough to separate them.
            true
        }
    }
}

impl IsKnownTransient for StatusCode {
    fn is_known_transient(&self) -> bool {
        let transient_failures = [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ];
        transient_failures.contains(self)
    }
}

impl IsKnownTransient for OpenAIError {
    fn is_known_transient(&self) -> bool {
        match self {
            OpenAIError::Reqwest(err) => err.is_known_transient(),
            OpenAIError::ApiError(api_err) => {
                // Gateways disagree about where they put this, so look at both.
                let code = api_err.code.as_deref().unwrap_or_default();
                let kind = api_err.r#type.as_deref().unwrap_or_default();
                [code, kind].iter().any(|s| {
                    s.contains("rate_limit")
                        || s.contains("overloaded")
                        || s.contains("server_error")
                })
            }
            // Streaming errors only give us a message. If it names an HTTP
            // status, use that. Otherwise it's a dropped connection.
            OpenAIError::StreamError(msg) => match status_in_message(msg) {
                Some(status) => status.is_known_transient(),
                None => true,
            },
            _ => false,
        }
    }
}

/// Find an HTTP status like "401 Unauthorized" in an error message.
fn status_in_message(msg: &str) -> Option<StatusCode> {
    msg.split(|c: char| !c.is_ascii_digit())
        .filter(|word| word.len() == 3)
        .filter_map(|word| word.parse::<u16>().ok())
        .filter(|code| (400..600).contains(code))
        .find_map(|code| StatusCode::from_u16(code).ok())
}
