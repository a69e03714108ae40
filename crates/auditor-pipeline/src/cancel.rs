use tokio::sync::watch;

/// Create a linked cancel trigger and signal.
pub fn cancel_pair() -> (Canceller, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (Canceller { tx }, CancelSignal { rx })
}

/// Trigger side; cancelling is idempotent.
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observed by an in-flight audit. A signal whose canceller was dropped
/// without firing never resolves.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that can never fire.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
