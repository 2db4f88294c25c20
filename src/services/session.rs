use crate::services::chat::ChatHistory;
use crate::types::events::StreamEvent;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const EVENT_BUFFER: usize = 100;

pub struct SessionManager {
    sessions: HashMap<String, Session>,
}

/// One browser tab: its SSE channel, chat transcript and running generation
pub struct Session {
    pub id: String,
    pub history: ChatHistory,
    pub created_at: DateTime<Utc>,
    sender: mpsc::Sender<StreamEvent>,
    receiver: Option<mpsc::Receiver<StreamEvent>>,
    active: Option<Ticket>,
}

/// Handle of one running generation
#[derive(Debug, Clone)]
pub struct Ticket {
    pub id: Uuid,
    pub token: CancellationToken,
}

impl Session {
    fn new(id: &str) -> Self {
        let (sender, receiver) = mpsc::channel(EVENT_BUFFER);
        Self {
            id: id.to_string(),
            history: ChatHistory::default(),
            created_at: Utc::now(),
            sender,
            receiver: Some(receiver),
            active: None,
        }
    }

    pub fn sender(&self) -> mpsc::Sender<StreamEvent> {
        self.sender.clone()
    }

    pub fn is_generating(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|ticket| !ticket.token.is_cancelled())
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn get_or_create(&mut self, id: &str) -> &mut Session {
        self.sessions.entry(id.to_string()).or_insert_with(|| {
            tracing::debug!("Created session {}", id);
            Session::new(id)
        })
    }

    /// Receiver for the SSE connection; a reconnect gets a fresh channel
    pub fn take_receiver(&mut self, id: &str) -> mpsc::Receiver<StreamEvent> {
        let session = self.get_or_create(id);
        session.receiver.take().unwrap_or_else(|| {
            let (sender, receiver) = mpsc::channel(EVENT_BUFFER);
            session.sender = sender;
            receiver
        })
    }

    pub fn sender(&mut self, id: &str) -> mpsc::Sender<StreamEvent> {
        self.get_or_create(id).sender()
    }

    /// Cancel whatever the session is running and hand out a token for the next run
    pub fn begin_generation(&mut self, id: &str) -> Ticket {
        let session = self.get_or_create(id);
        if let Some(previous) = session.active.take() {
            previous.token.cancel();
        }
        let ticket = Ticket {
            id: Uuid::now_v7(),
            token: CancellationToken::new(),
        };
        session.active = Some(ticket.clone());
        ticket
    }

    /// Forget the ticket unless a newer generation replaced it
    pub fn finish_generation(&mut self, id: &str, ticket: &Ticket) {
        if let Some(session) = self.sessions.get_mut(id) {
            if session.active.as_ref().is_some_and(|active| active.id == ticket.id) {
                session.active = None;
            }
        }
    }

    /// Returns whether a running generation was cancelled
    pub fn stop(&mut self, id: &str) -> bool {
        match self.sessions.get_mut(id).and_then(|s| s.active.take()) {
            Some(ticket) => {
                let running = !ticket.token.is_cancelled();
                ticket.token.cancel();
                running
            }
            None => false,
        }
    }

    /// Cancel every running generation, returning how many were running
    pub fn stop_all(&mut self) -> usize {
        let ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.iter().filter(|id| self.stop(id)).count()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receiver_is_recreated_on_reconnect() {
        let mut sessions = SessionManager::new();
        let first = sessions.take_receiver("a");
        drop(first);
        let mut second = sessions.take_receiver("a");
        sessions
            .sender("a")
            .try_send(StreamEvent::error("boom"))
            .unwrap();
        assert!(matches!(second.try_recv(), Ok(StreamEvent::Error { .. })));
        assert_eq!(sessions.count(), 1);
    }

    #[test]
    fn test_new_generation_cancels_previous() {
        let mut sessions = SessionManager::new();
        let first = sessions.begin_generation("a");
        let second = sessions.begin_generation("a");
        assert!(first.token.is_cancelled());
        assert!(!second.token.is_cancelled());

        sessions.finish_generation("a", &first);
        assert!(sessions.get("a").unwrap().is_generating());
        sessions.finish_generation("a", &second);
        assert!(!sessions.get("a").unwrap().is_generating());
    }

    #[test]
    fn test_stop_is_scoped_to_session() {
        let mut sessions = SessionManager::new();
        let a = sessions.begin_generation("a");
        let b = sessions.begin_generation("b");
        assert!(sessions.stop("a"));
        assert!(a.token.is_cancelled());
        assert!(!b.token.is_cancelled());
        assert!(!sessions.stop("a"));
        assert!(!sessions.stop("missing"));
    }

    #[test]
    fn test_stop_all_counts_running_generations() {
        let mut sessions = SessionManager::new();
        let a = sessions.begin_generation("a");
        let b = sessions.begin_generation("b");
        sessions.get_or_create("idle");
        sessions.stop("b");

        assert_eq!(sessions.stop_all(), 1);
        assert!(a.token.is_cancelled());
        assert!(b.token.is_cancelled());
        assert!(!sessions.get("a").unwrap().is_generating());
    }
}
