use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Interrupted;

// ============================================================================
// Run Scope - cancellation token plus optional deadline
// ============================================================================
//
// Every long-running operation (restore, sync, batch scan) receives a scope.
// A scope derived with `with_timeout` is a child of its parent: cancelling
// the parent cancels it, and its deadline never extends past the parent's.
//
// Work abandoned on interruption is not awaited. Tasks already spawned may
// still finish in the background.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RunScope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RunScope {
    pub fn new(token: CancellationToken) -> Self {
        Self { token, deadline: None }
    }

    /// A scope nobody else can cancel
    pub fn detached() -> Self {
        Self::new(CancellationToken::new())
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < candidate => parent,
            _ => candidate,
        };

        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Non-blocking check, used between units of work
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.token.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interrupted::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Resolves once the scope is cancelled or its deadline passes
    pub async fn interrupted(&self) -> Interrupted {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => Interrupted::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Interrupted::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                Interrupted::Cancelled
            }
        }
    }

    /// Drive `fut` unless the scope ends first; an interrupted future is dropped
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        tokio::select! {
            biased;
            reason = self.interrupted() => Err(reason),
            output = fut => Ok(output),
        }
    }
}

/// Cancel `token` once `signal` resolves. The task also ends, without
/// waiting on `signal`, if the token is cancelled some other way.
pub fn cancel_on<F>(token: CancellationToken, signal: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = signal => token.cancel(),
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_on_signal_reaches_child_scopes() {
        let token = CancellationToken::new();
        let scope = RunScope::new(token.child_token()).with_timeout(Duration::from_secs(60));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let listener = cancel_on(token.clone(), async move {
            let _ = rx.await;
        });
        tx.send(()).unwrap();
        listener.await.unwrap();

        assert!(token.is_cancelled());
        assert_eq!(scope.check(), Err(Interrupted::Cancelled));
    }

    #[tokio::test]
    async fn test_run_completes_within_deadline() {
        let scope = RunScope::detached().with_timeout(Duration::from_secs(5));
        let result = scope.run(async { 7 }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_run_reports_deadline() {
        let scope = RunScope::detached().with_timeout(Duration::from_millis(20));
        let result = scope
            .run(tokio::time::sleep(Duration::from_secs(10)))
            .await;

        assert_eq!(result, Err(Interrupted::DeadlineExceeded));
        assert_eq!(scope.check(), Err(Interrupted::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_child() {
        let parent = RunScope::detached();
        let child = parent.with_timeout(Duration::from_secs(60));

        assert_eq!(child.check(), Ok(()));
        parent.cancel();

        assert_eq!(child.check(), Err(Interrupted::Cancelled));
        assert_eq!(child.interrupted().await, Interrupted::Cancelled);
    }

    #[tokio::test]
    async fn test_child_cancellation_does_not_reach_parent() {
        let parent = RunScope::detached();
        let child = parent.with_timeout(Duration::from_secs(60));

        child.cancel();

        assert_eq!(child.check(), Err(Interrupted::Cancelled));
        assert_eq!(parent.check(), Ok(()));
    }

    #[tokio::test]
    async fn test_child_deadline_never_extends_parent() {
        let parent = RunScope::detached().with_timeout(Duration::from_millis(50));
        let child = parent.with_timeout(Duration::from_secs(3600));
        assert_eq!(child.deadline, parent.deadline);
    }
}
