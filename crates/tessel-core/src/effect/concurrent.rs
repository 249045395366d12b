//! Parallel combinators: `all`, `race`, `timeout`.
//!
//! Branches run interleaved on the caller's task (`FuturesUnordered`), each
//! with a child cancel token. A losing or failing sibling is never dropped
//! mid-flight: it is cancelled and then awaited, so the scopes it opened are
//! closed before the combined effect reports its outcome.

use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};

use super::{Context, Effect};
use crate::domain::EffectError;

impl<A: Send + 'static> Effect<A> {
    /// Run every effect concurrently and collect their values in input order.
    ///
    /// If any branch fails, the still-running siblings are cancelled and the
    /// combination fails with that first failure. Zero branches succeed with
    /// an empty vector.
    pub fn all(effects: impl IntoIterator<Item = Effect<A>>) -> Effect<Vec<A>> {
        let effects: Vec<Effect<A>> = effects.into_iter().collect();
        Effect::from_fn(move |ctx: Context| {
            let effects = effects.clone();
            async move {
                if effects.is_empty() {
                    return Ok(Vec::new());
                }
                ctx.check_cancelled()?;

                let group = ctx.cancel.child();
                let mut running: FuturesUnordered<_> = effects
                    .iter()
                    .enumerate()
                    .map(|(index, effect)| {
                        let branch = effect.run(ctx.with_cancel(group.child()));
                        async move { (index, branch.await) }
                    })
                    .collect();

                let mut slots: Vec<Option<A>> = effects.iter().map(|_| None).collect();
                let mut first_failure: Option<EffectError> = None;
                while let Some((index, result)) = running.next().await {
                    match result {
                        Ok(value) => slots[index] = Some(value),
                        Err(err) if first_failure.is_none() => {
                            tracing::debug!(branch = index, error = %err, "parallel branch failed; cancelling siblings");
                            group.cancel();
                            first_failure = Some(err);
                        }
                        Err(_) => {}
                    }
                }

                if let Some(err) = first_failure {
                    return Err(err);
                }
                slots
                    .into_iter()
                    .collect::<Option<Vec<A>>>()
                    .ok_or(EffectError::Cancelled)
            }
        })
    }

    /// Run both effects; the first to finish wins and the other is cancelled.
    pub fn race(self, other: Effect<A>) -> Effect<A> {
        Effect::from_fn(move |ctx: Context| {
            let left_effect = self.clone();
            let right_effect = other.clone();
            async move {
                ctx.check_cancelled()?;
                let left_token = ctx.cancel.child();
                let right_token = ctx.cancel.child();
                let mut left = left_effect.run(ctx.with_cancel(left_token.clone()));
                let mut right = right_effect.run(ctx.with_cancel(right_token.clone()));

                tokio::select! {
                    result = &mut left => {
                        right_token.cancel();
                        let _ = right.await;
                        result
                    }
                    result = &mut right => {
                        left_token.cancel();
                        let _ = left.await;
                        result
                    }
                }
            }
        })
    }

    /// Fail with `EffectError::Timeout` if `self` does not finish within `after`.
    ///
    /// Races the body against a timer; on timeout the body is cancelled and
    /// awaited, so its cleanup runs first.
    pub fn timeout(self, after: Duration) -> Effect<A> {
        self.map(Some)
            .race(Effect::sleep(after).map(|()| None))
            .try_map(move |winner| winner.ok_or(EffectError::Timeout { after }))
    }
}
