//! CancelToken - 協調的キャンセル
//!
//! `tokio::sync::watch` の bool を「キャンセル要求」として使います。
//! 子トークンは親のキャンセルも観測します（親 → 子 の一方向）。
//!
//! # 学習ポイント
//! - watch::Sender::send_replace は receiver が 0 でも失敗しない
//! - borrow_and_update + changed で「true になるまで待つ」を表現する
//! - 再帰的な待機は BoxFuture で型を有限にする

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;

struct TokenInner {
    tx: watch::Sender<bool>,
    parent: Option<CancelToken>,
}

/// Cooperative cancellation signal shared along one effect chain.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(TokenInner { tx, parent: None }),
        }
    }

    /// A token that is cancelled when either itself or `self` is cancelled.
    pub fn child(&self) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(TokenInner {
                tx,
                parent: Some(self.clone()),
            }),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        if *self.inner.tx.borrow() {
            return true;
        }
        self.inner
            .parent
            .as_ref()
            .is_some_and(CancelToken::is_cancelled)
    }

    /// Resolves once cancellation is requested on this token or any ancestor.
    pub fn cancelled(&self) -> BoxFuture<'static, ()> {
        let token = self.clone();
        async move {
            let mut rx = token.inner.tx.subscribe();
            match &token.inner.parent {
                Some(parent) => {
                    tokio::select! {
                        _ = wait_until_set(&mut rx) => {}
                        _ = parent.cancelled() => {}
                    }
                }
                None => wait_until_set(&mut rx).await,
            }
        }
        .boxed()
    }
}

async fn wait_until_set(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // sender は token が保持しているので通常ここには来ない
            futures::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn child_observes_parent_cancellation() {
        let parent = CancelToken::new();
        let child = parent.child();
        assert!(!child.is_cancelled());

        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_cancellation_does_not_reach_parent() {
        let parent = CancelToken::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_wakes_waiting_task() {
        let parent = CancelToken::new();
        let grandchild = parent.child().child();

        let waiter = tokio::spawn({
            let token = grandchild.clone();
            async move { token.cancelled().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        parent.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .unwrap();
    }
}
