//! Single-shot confirmation gate for irreversible actions.
//!
//! The orchestrator arms the gate and awaits the returned
//! [`PendingConfirmation`]; the API resolves it. Arming again replaces any
//! earlier pending confirmation, which then reads as rejected.

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    Rejected,
    TimedOut,
}

#[derive(Debug, Default)]
pub struct ConfirmationGate {
    sender: Mutex<Option<oneshot::Sender<bool>>>,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self) -> PendingConfirmation {
        let (tx, rx) = oneshot::channel();
        *self.sender.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        PendingConfirmation { receiver: rx }
    }

    pub fn is_armed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Answer the pending confirmation. Returns `false` when nothing was
    /// waiting.
    pub fn resolve(&self, confirmed: bool) -> bool {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        match sender {
            Some(tx) => tx.send(confirmed).is_ok(),
            None => false,
        }
    }
}

#[derive(Debug)]
pub struct PendingConfirmation {
    receiver: oneshot::Receiver<bool>,
}

impl PendingConfirmation {
    pub async fn wait(self, timeout: Duration) -> ConfirmOutcome {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(true)) => ConfirmOutcome::Confirmed,
            Ok(Ok(false)) | Ok(Err(_)) => ConfirmOutcome::Rejected,
            Err(_) => ConfirmOutcome::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_confirms() {
        let gate = ConfirmationGate::new();
        assert!(!gate.resolve(true));

        let pending = gate.arm();
        assert!(gate.is_armed());
        assert!(gate.resolve(true));
        assert!(!gate.is_armed());
        assert_eq!(pending.wait(Duration::from_secs(1)).await, ConfirmOutcome::Confirmed);
    }

    #[tokio::test]
    async fn test_rearm_rejects_previous() {
        let gate = ConfirmationGate::new();
        let first = gate.arm();
        let second = gate.arm();
        assert_eq!(first.wait(Duration::from_secs(1)).await, ConfirmOutcome::Rejected);
        assert!(gate.resolve(false));
        assert_eq!(second.wait(Duration::from_secs(1)).await, ConfirmOutcome::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let gate = ConfirmationGate::new();
        let pending = gate.arm();
        assert_eq!(pending.wait(Duration::from_secs(300)).await, ConfirmOutcome::TimedOut);
    }
}
