//! Session confirmation gate.
//!
//! Holds the session auto-approval flags and forwards undecided requests to
//! whoever holds the receiving end (the terminal UI). Each request carries a
//! oneshot responder; dropping it without answering counts as a rejection.

use async_trait::async_trait;
use kestrel_config::ConfirmationConfig;
use kestrel_core::confirmation::{
    ConfirmationGate, ConfirmationRequest, ConfirmationResult, OperationCategory, SessionFlags,
};
use std::sync::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// A request waiting for a human decision.
#[derive(Debug)]
pub struct PendingConfirmation {
    pub request: ConfirmationRequest,
    responder: oneshot::Sender<ConfirmationResult>,
}

impl PendingConfirmation {
    pub fn respond(self, result: ConfirmationResult) {
        // The requester may have been cancelled
        let _ = self.responder.send(result);
    }
}

pub struct SessionConfirmation {
    flags: RwLock<SessionFlags>,
    requests: Option<mpsc::Sender<PendingConfirmation>>,
}

impl SessionConfirmation {
    /// A gate that forwards undecided requests over the returned channel.
    pub fn new(flags: SessionFlags) -> (Self, mpsc::Receiver<PendingConfirmation>) {
        let (tx, rx) = mpsc::channel(8);
        let gate = Self {
            flags: RwLock::new(flags),
            requests: Some(tx),
        };
        (gate, rx)
    }

    /// A gate with no human attached. Undecided requests are rejected.
    pub fn headless(flags: SessionFlags) -> Self {
        Self {
            flags: RwLock::new(flags),
            requests: None,
        }
    }

    /// Approves everything.
    pub fn auto_approve() -> Self {
        Self::headless(SessionFlags::all())
    }
}

/// Initial session flags from the `[confirmation]` config table.
pub fn flags_from_config(config: &ConfirmationConfig) -> SessionFlags {
    SessionFlags {
        file_operations: config.file_operations,
        bash_commands: config.bash_commands,
        all_operations: config.all_operations,
    }
}

#[async_trait]
impl ConfirmationGate for SessionConfirmation {
    fn session_flags(&self) -> SessionFlags {
        match self.flags.read() {
            Ok(flags) => *flags,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_session_flag(&self, category: OperationCategory, value: bool) {
        let mut flags = match self.flags.write() {
            Ok(flags) => flags,
            Err(poisoned) => poisoned.into_inner(),
        };
        flags.set(category, value);
        debug!(%category, value, "Session flag updated");
    }

    async fn request_confirmation(&self, request: ConfirmationRequest) -> ConfirmationResult {
        if self.session_flags().allows(request.category) {
            return ConfirmationResult::approved();
        }

        let Some(requests) = &self.requests else {
            return ConfirmationResult::rejected(Some("No confirmation handler is attached".into()));
        };

        let (responder, decision) = oneshot::channel();
        if requests.send(PendingConfirmation { request, responder }).await.is_err() {
            return ConfirmationResult::rejected(None);
        }

        decision.await.unwrap_or_else(|_| ConfirmationResult::rejected(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(category: OperationCategory) -> ConfirmationRequest {
        ConfirmationRequest {
            category,
            operation: "bash".into(),
            description: "rm -rf target".into(),
        }
    }

    #[tokio::test]
    async fn preapproved_returns_immediately() {
        let gate = SessionConfirmation::headless(SessionFlags {
            bash_commands: true,
            ..Default::default()
        });
        assert!(gate.request_confirmation(request(OperationCategory::Bash)).await.confirmed);
        assert!(!gate.request_confirmation(request(OperationCategory::File)).await.confirmed);
    }

    #[tokio::test]
    async fn forwards_to_handler() {
        let (gate, mut rx) = SessionConfirmation::new(SessionFlags::default());

        let handler = tokio::spawn(async move {
            let pending = rx.recv().await.unwrap();
            assert_eq!(pending.request.description, "rm -rf target");
            pending.respond(ConfirmationResult::rejected(Some("use cargo clean".into())));
        });

        let result = gate.request_confirmation(request(OperationCategory::Bash)).await;
        handler.await.unwrap();
        assert!(!result.confirmed);
        assert_eq!(result.feedback.as_deref(), Some("use cargo clean"));
    }

    #[tokio::test]
    async fn dropped_responder_is_rejection() {
        let (gate, mut rx) = SessionConfirmation::new(SessionFlags::default());
        tokio::spawn(async move {
            let pending = rx.recv().await.unwrap();
            drop(pending);
        });
        let result = gate.request_confirmation(request(OperationCategory::File)).await;
        assert!(!result.confirmed);
        assert!(result.feedback.is_none());
    }

    #[test]
    fn flags_from_config_maps_fields() {
        let config = ConfirmationConfig {
            file_operations: true,
            ..Default::default()
        };
        let flags = flags_from_config(&config);
        assert!(flags.allows(OperationCategory::File));
        assert!(!flags.allows(OperationCategory::Bash));
    }
}
