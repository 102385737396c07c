//! Generic error handling utilities
//!
//! Nothing in this crate is fatal: every failure is recoverable at the call
//! site. What differs is who can act on it, which decides how much detail is
//! logged and at which level.

/// Trait for errors that can distinguish between user-actionable and system errors
///
/// When `is_user_actionable()` returns `true`, `user_message()` should return
/// `Some(message)`; when it returns `false`, `user_message()` should return `None`.
pub trait ContextualError: std::error::Error {
    /// Returns true if this error carries a message the caller can act on
    /// (a missing queue, an oversized event, a bad configuration value)
    fn is_user_actionable(&self) -> bool;

    /// The actionable message, when there is one
    fn user_message(&self) -> Option<&str>;
}

/// Log a recoverable error with a level matching its specificity
///
/// User-actionable errors are logged at `warn` with their specific message.
/// System errors (transport failures, lost leases) are logged at `warn` with
/// their display text. The `Debug` form always follows at `debug`.
pub fn log_error_with_context<E: ContextualError + std::fmt::Display + std::fmt::Debug>(
    error: &E,
    operation_context: &str,
) {
    log::warn!("{}", warning_line(error, operation_context));
    log::debug!("DETAIL: {:?}", error);
}

fn warning_line<E>(error: &E, operation_context: &str) -> String
where
    E: ContextualError + std::fmt::Display,
{
    match error.user_message() {
        Some(user_msg) if error.is_user_actionable() => {
            format!("{}: {}", operation_context, user_msg)
        }
        _ => format!("{}: {}", operation_context, error),
    }
}
