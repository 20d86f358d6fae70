use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::marker::MarkerColor;
use super::record::{Session, SessionId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error("session {0} is busy")]
    Busy(SessionId),
}

/// Shared handle over every open session.
///
/// All mutation goes through [`SessionStore::try_update`] (or a helper built
/// on it), which runs under one short critical section. Service calls must
/// never happen while a closure holds the lock.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<StoreInner>>,
}

#[derive(Debug)]
struct StoreInner {
    sessions: Vec<Session>,
    active: SessionId,
    created: usize,
}

impl StoreInner {
    fn fresh_session(&mut self) -> Session {
        self.created += 1;
        Session::new(format!("Session {}", self.created))
    }

    fn position(&self, id: SessionId) -> Option<usize> {
        self.sessions.iter().position(|session| session.id == id)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Starts with one empty session, which is active.
    pub fn new() -> Self {
        let first = Session::new("Session 1");
        let active = first.id;
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                sessions: vec![first],
                active,
                created: 1,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_session(&self) -> SessionId {
        let mut inner = self.lock();
        let session = inner.fresh_session();
        let id = session.id;
        inner.sessions.push(session);
        inner.active = id;
        id
    }

    /// Removes a session. Deleting the last one leaves a fresh empty session
    /// in its place. Returns the id that is active afterwards.
    pub fn delete_session(&self, id: SessionId) -> Result<SessionId, SessionError> {
        let mut inner = self.lock();
        let idx = inner.position(id).ok_or(SessionError::NotFound(id))?;
        inner.sessions.remove(idx);
        if inner.sessions.is_empty() {
            let replacement = inner.fresh_session();
            inner.active = replacement.id;
            inner.sessions.push(replacement);
        } else if inner.active == id {
            let next = idx.min(inner.sessions.len() - 1);
            inner.active = inner.sessions[next].id;
        }
        Ok(inner.active)
    }

    pub fn switch_to(&self, id: SessionId) -> Result<(), SessionError> {
        let mut inner = self.lock();
        inner.position(id).ok_or(SessionError::NotFound(id))?;
        inner.active = id;
        Ok(())
    }

    pub fn active_id(&self) -> SessionId {
        self.lock().active
    }

    pub fn active(&self) -> Session {
        let inner = self.lock();
        let idx = inner.position(inner.active).unwrap_or(0);
        inner.sessions[idx].clone()
    }

    pub fn get(&self, id: SessionId) -> Option<Session> {
        let inner = self.lock();
        inner
            .position(id)
            .map(|idx| inner.sessions[idx].clone())
    }

    /// Consistent copy of the whole list, in creation order.
    pub fn snapshot(&self) -> Vec<Session> {
        self.lock().sessions.clone()
    }

    /// Resolves a 1-based list position or an id prefix.
    pub fn resolve(&self, selector: &str) -> Option<SessionId> {
        let selector = selector.trim();
        if selector.is_empty() {
            return None;
        }
        let inner = self.lock();
        if let Ok(position) = selector.parse::<usize>() {
            if position >= 1 && position <= inner.sessions.len() {
                return Some(inner.sessions[position - 1].id);
            }
        }
        let lowered = selector.to_ascii_lowercase();
        let mut matches = inner
            .sessions
            .iter()
            .filter(|session| session.id.to_string().starts_with(&lowered));
        match (matches.next(), matches.next()) {
            (Some(session), None) => Some(session.id),
            _ => None,
        }
    }

    pub fn try_update<R, E>(
        &self,
        id: SessionId,
        apply: impl FnOnce(&mut Session) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<SessionError>,
    {
        let mut inner = self.lock();
        let idx = inner.position(id).ok_or(SessionError::NotFound(id))?;
        apply(&mut inner.sessions[idx])
    }

    pub fn update<R>(
        &self,
        id: SessionId,
        apply: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, SessionError> {
        self.try_update(id, |session| Ok(apply(session)))
    }

    pub fn set_global_instruction(
        &self,
        id: SessionId,
        text: impl Into<String>,
    ) -> Result<(), SessionError> {
        let text = text.into();
        self.update(id, |session| session.global_instruction = text)
    }

    /// Blank text removes the color's instruction.
    pub fn set_region_instruction(
        &self,
        id: SessionId,
        color: MarkerColor,
        text: impl Into<String>,
    ) -> Result<(), SessionError> {
        let text = text.into();
        self.update(id, |session| {
            if text.trim().is_empty() {
                session.region_instructions.remove(&color);
            } else {
                session.region_instructions.insert(color, text);
            }
        })
    }

    pub fn set_pending_overlay(
        &self,
        id: SessionId,
        overlay: Option<Vec<u8>>,
    ) -> Result<(), SessionError> {
        self.update(id, |session| {
            session.pending_overlay = overlay.filter(|payload| !payload.is_empty());
        })
    }
}
