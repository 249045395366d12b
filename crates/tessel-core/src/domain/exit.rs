//! Exit model: the terminal outcome of one effect chain.
//!
//! This module does not know about scopes or runtimes. It only defines the
//! "shape" of a finished evaluation and the outcome a finalizer is told about.

use serde::{Deserialize, Serialize};

use super::errors::EffectError;

/// Outcome passed to every finalizer when its scope closes.
///
/// A finalizer may branch on this (e.g. skip expensive diagnostics on success).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitKind {
    Success,
    Failure,
    Cancelled,
}

impl ExitKind {
    pub fn of<A>(result: &Result<A, EffectError>) -> Self {
        match result {
            Ok(_) => ExitKind::Success,
            Err(EffectError::Cancelled) => ExitKind::Cancelled,
            Err(_) => ExitKind::Failure,
        }
    }
}

/// Terminal result of running an effect.
///
/// `Cancelled` is kept apart from `Failure`: it is not an error for logging
/// purposes, but cleanup still ran.
#[derive(Debug, Clone)]
pub enum Exit<A> {
    Success(A),
    Failure(EffectError),
    Cancelled,
}

impl<A> Exit<A> {
    pub fn kind(&self) -> ExitKind {
        match self {
            Exit::Success(_) => ExitKind::Success,
            Exit::Failure(_) => ExitKind::Failure,
            Exit::Cancelled => ExitKind::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Exit::Success(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Exit::Cancelled)
    }

    pub fn failure(&self) -> Option<&EffectError> {
        match self {
            Exit::Failure(err) => Some(err),
            _ => None,
        }
    }

    /// Collapse into a `Result`, turning cancellation back into `EffectError::Cancelled`.
    pub fn into_result(self) -> Result<A, EffectError> {
        match self {
            Exit::Success(value) => Ok(value),
            Exit::Failure(err) => Err(err),
            Exit::Cancelled => Err(EffectError::Cancelled),
        }
    }
}

impl<A> From<Result<A, EffectError>> for Exit<A> {
    fn from(result: Result<A, EffectError>) -> Self {
        match result {
            Ok(value) => Exit::Success(value),
            Err(EffectError::Cancelled) => Exit::Cancelled,
            Err(err) => Exit::Failure(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_kind_serializes_as_screaming_snake_case() {
        let s = serde_json::to_string(&ExitKind::Cancelled).unwrap();
        assert_eq!(s, "\"CANCELLED\"");
    }

    #[test]
    fn cancellation_is_not_a_failure() {
        let exit: Exit<()> = Err(EffectError::Cancelled).into();
        assert!(exit.is_cancelled());
        assert!(exit.failure().is_none());
        assert_eq!(exit.kind(), ExitKind::Cancelled);
        assert!(matches!(exit.into_result(), Err(EffectError::Cancelled)));
    }

    #[test]
    fn failure_keeps_the_error() {
        let exit: Exit<u32> = Err(EffectError::custom("gpu", "lost")).into();
        assert_eq!(exit.kind(), ExitKind::Failure);
        assert!(exit.failure().unwrap().to_string().contains("lost"));
    }
}
