use super::cancellation::{CancellationMessage, CancellationToken};
use crossbeam::channel::{bounded, select, Receiver, Sender};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum LatchError {
    #[error("cancelled while waiting")]
    Cancelled,
}

/// One-shot signal: closed until [`Latch::open`] is called once, open
/// forever after. Waiters arriving after the open return immediately.
///
/// Openness is carried by channel disconnection, so any number of waiters
/// can select on it without consuming anything.
pub struct Latch {
    opener: Mutex<Option<Sender<CancellationMessage>>>,
    observer: Receiver<CancellationMessage>,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    pub fn new() -> Self {
        let (s, r) = bounded(1);
        Self {
            opener: Mutex::new(Some(s)),
            observer: r,
        }
    }

    /// Opens the latch. Subsequent calls are no-ops.
    pub fn open(&self) {
        self.opener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    pub fn is_open(&self) -> bool {
        self.opener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// Blocks until the latch is open or `cancellation` fires, whichever
    /// comes first. An already-open latch wins over a pending cancellation.
    pub fn wait(&self, cancellation: &CancellationToken) -> Result<(), LatchError> {
        if self.is_open() {
            return Ok(());
        }
        select! {
            recv(self.observer) -> _ => Ok(()),
            recv(cancellation.receiver()) -> _ => Err(LatchError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::cancellation::cancellation_pair;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_wait_returns_once_open() {
        let latch = Arc::new(Latch::new());
        let opener = latch.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            opener.open();
        });

        latch.wait(&CancellationToken::never()).unwrap();
        assert!(latch.is_open());
        handle.join().unwrap();
    }

    #[test]
    fn test_late_waiters_return_immediately() {
        let latch = Latch::new();
        latch.open();
        latch.open(); // idempotent

        latch.wait(&CancellationToken::never()).unwrap();
        latch.wait(&CancellationToken::never()).unwrap();
    }

    #[test]
    fn test_cancellation_interrupts_the_wait() {
        let latch = Latch::new();
        let (source, token) = cancellation_pair();
        source.cancel();

        assert_eq!(latch.wait(&token), Err(LatchError::Cancelled));
    }

    #[test]
    fn test_open_latch_wins_over_cancellation() {
        let latch = Latch::new();
        latch.open();
        let (source, token) = cancellation_pair();
        source.cancel();

        assert_eq!(latch.wait(&token), Ok(()));
    }
}
