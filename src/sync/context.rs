use std::future::Future;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

use crate::error::BotError;
use crate::Result;

/// Cancellation and deadline carried through every synchronization I/O call
#[derive(Clone, Default)]
pub struct SyncContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Owner side of a cancellable context
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl SyncContext {
    /// Context that never cancels
    pub fn new() -> Self {
        Self::default()
    }

    /// Context plus the handle that cancels it
    pub fn cancellable() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle { tx },
            Self {
                deadline: None,
                cancel: Some(rx),
            },
        )
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        let flagged = self.cancel.as_ref().is_some_and(|rx| *rx.borrow());
        let expired = self.deadline.is_some_and(|d| Instant::now() >= d);
        flagged || expired
    }

    /// Run `fut`, aborting with `BotError::Cancelled` if the context is
    /// cancelled or its deadline passes first
    pub async fn run<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(BotError::Cancelled(format!("{} not started", op)));
        }

        let mut cancel = self.cancel.clone();
        let cancelled = async move {
            match cancel.as_mut() {
                Some(rx) => {
                    // Sender dropped: nobody can cancel any more
                    if rx.wait_for(|flag| *flag).await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = fut => result,
            _ = cancelled => Err(BotError::Cancelled(format!("{} cancelled", op))),
            _ = deadline => Err(BotError::Cancelled(format!("{} deadline exceeded", op))),
        }
    }
}
