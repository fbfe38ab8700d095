use crossbeam::channel::{bounded, never, Receiver, Sender};
use std::time::Duration;

pub type CancellationMessage = ();

/// Cancels the paired [`CancellationToken`] when told to or when dropped,
/// so a caller that goes away implicitly cancels the work it was waiting on.
pub struct CancellationSource(Sender<CancellationMessage>);

impl CancellationSource {
    pub fn cancel(self) {
        // Dropping the sender disconnects the channel, which every clone of
        // the token observes immediately.
        drop(self);
    }
}

/// Read side of a cancellation signal. Blocking waits select over the
/// underlying channel; see [`crate::utils::latch::Latch::wait`].
#[derive(Clone)]
pub struct CancellationToken(Receiver<CancellationMessage>);

impl CancellationToken {
    /// A token that never cancels, for callers willing to wait forever.
    pub fn never() -> Self {
        Self(never())
    }

    pub fn is_cancelled(&self) -> bool {
        self.is_cancelled_with_timeout(Duration::ZERO)
    }

    /// Blocks for at most `timeout`, returning whether cancellation fired.
    pub fn is_cancelled_with_timeout(&self, timeout: Duration) -> bool {
        use crossbeam::channel::RecvTimeoutError;
        match self.0.recv_timeout(timeout) {
            Ok(_) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    pub(crate) fn receiver(&self) -> &Receiver<CancellationMessage> {
        &self.0
    }
}

pub fn cancellation_pair() -> (CancellationSource, CancellationToken) {
    let (s, r) = bounded(1);
    (CancellationSource(s), CancellationToken(r))
}
