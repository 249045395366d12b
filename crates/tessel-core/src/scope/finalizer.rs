//! Finalizer - scope close 時に実行される release action

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::future::{BoxFuture, FutureExt};

use crate::domain::{EffectError, ExitKind};

type FinalizerFn = Box<dyn FnOnce(ExitKind) -> BoxFuture<'static, Result<(), EffectError>> + Send>;

/// A release action registered against exactly one scope.
///
/// It receives the scope's exit outcome so it can branch on it.
pub struct Finalizer {
    label: String,
    run: FinalizerFn,
}

impl Finalizer {
    pub fn new<F, Fut>(label: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(ExitKind) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), EffectError>> + Send + 'static,
    {
        Self {
            label: label.into(),
            run: Box::new(move |exit| f(exit).boxed()),
        }
    }

    /// Finalizer with no asynchronous work.
    pub fn sync<F>(label: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(ExitKind) -> Result<(), EffectError> + Send + 'static,
    {
        Self::new(label, move |exit| futures::future::ready(f(exit)))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the action, turning a panic (sync or async) into `FinalizerPanicked`.
    pub(crate) async fn invoke(self, exit: ExitKind) -> Result<(), EffectError> {
        let run = self.run;
        let fut = match std::panic::catch_unwind(AssertUnwindSafe(move || run(exit))) {
            Ok(fut) => fut,
            Err(payload) => return Err(panicked(payload)),
        };
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(panicked(payload)),
        }
    }
}

impl std::fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finalizer").field("label", &self.label).finish()
    }
}

fn panicked(payload: Box<dyn std::any::Any + Send>) -> EffectError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    EffectError::FinalizerPanicked { message }
}
