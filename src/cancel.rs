//! External cancellation for in-flight poll loops.

use std::future;

use tokio::sync::watch;

/// Owner side of a cancellation pair. Dropping it without calling
/// [`CancelHandle::cancel`] never cancels anything.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Creates a handle together with the signal it controls.
    #[must_use]
    pub fn channel() -> (Self, CancelSignal) {
        let (sender, receiver) = watch::channel(false);
        (
            Self { sender },
            CancelSignal {
                receiver: Some(receiver),
            },
        )
    }

    /// Cancels every coordinator call observing the paired signal.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

/// Observer side of a cancellation pair, cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct CancelSignal {
    receiver: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    #[must_use]
    pub const fn never() -> Self {
        Self { receiver: None }
    }

    /// Returns `true` once the paired handle has cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.receiver
            .as_ref()
            .is_some_and(|receiver| *receiver.borrow())
    }

    /// Resolves when the paired handle cancels; pends forever otherwise.
    pub async fn cancelled(&self) {
        let Some(source) = self.receiver.as_ref() else {
            return future::pending().await;
        };
        let mut receiver = source.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            // Handle dropped without cancelling.
            future::pending::<()>().await;
        }
    }
}
