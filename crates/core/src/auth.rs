use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

/// Session token shared by every request the client makes.
///
/// Acquired once at session start; dropped on `logout` or as soon as the
/// server answers with code 401.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    token: Arc<RwLock<Option<String>>>,
}

impl AuthContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let ctx = Self::new();
        ctx.acquire(token);
        ctx
    }

    pub fn acquire(&self, token: impl Into<String>) {
        let token = token.into();
        let mut guard = self.token.write().unwrap_or_else(PoisonError::into_inner);
        *guard = (!token.trim().is_empty()).then_some(token);
    }

    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn logout(&self) {
        self.invalidate("logout");
    }

    pub(crate) fn invalidate(&self, reason: &str) {
        let had = self
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if had {
            info!(event = "auth.invalidated", reason, "auth.invalidated");
        }
    }
}
