//! Session token holder
//!
//! The sync manager only fires while a session is authenticated, and stamps
//! the token onto request/response calls at fire time. Setting a new token
//! (after re-authentication) resumes a queue that stopped on `reauthorize`.

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Session {
    tx: watch::Sender<Option<String>>,
}

impl Session {
    /// An unauthenticated session
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn authenticated(token: impl Into<String>) -> Self {
        let session = Self::new();
        session.set_token(token);
        session
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn token(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    pub fn set_token(&self, token: impl Into<String>) {
        self.tx.send_replace(Some(token.into()));
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
