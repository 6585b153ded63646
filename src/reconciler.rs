//! Session reconciliation.
//!
//! A session is bound to one model and one retrieval configuration.  When
//! the user changes the configuration the client either edits the active
//! session in place (only while it holds no messages) or starts a new one.
//! [`SessionReconciler`] makes that decision and owns the session list, the
//! active session id, and the configuration snapshot.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::observability::{RECONCILE_CREATES, RECONCILE_PATCH_FALLBACKS, RECONCILE_PATCHES};
use crate::quota::QuotaGuard;
use crate::types::{
    ConfigOverride, ModelInfo, Session, SessionConfig, SessionCreateParams, SessionPatchParams,
};

/// What [`SessionReconciler::reconcile`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// The active session already had the desired configuration.
    Unchanged(String),
    /// The active session was edited in place.
    Patched(String),
    /// A new session was created and made active.
    Created(String),
}

impl Reconciled {
    /// The id of the session that is now active.
    pub fn session_id(&self) -> &str {
        match self {
            Reconciled::Unchanged(id) | Reconciled::Patched(id) | Reconciled::Created(id) => id,
        }
    }

    /// Returns true if a new session was created.
    pub fn is_created(&self) -> bool {
        matches!(self, Reconciled::Created(_))
    }
}

/// Owns the session list, the active session, and the configuration
/// snapshot.
///
/// After every successful [`reconcile`](Self::reconcile) the snapshot equals
/// the active session's configuration.
#[derive(Debug, Clone)]
pub struct SessionReconciler {
    sessions: Vec<Session>,
    active: Option<String>,
    snapshot: SessionConfig,
    models: Vec<ModelInfo>,
    quota: QuotaGuard,
}

impl SessionReconciler {
    /// Creates a reconciler with no sessions and the given starting
    /// configuration.  An empty model alias is resolved against the model
    /// list when a session is first created.
    pub fn new(quota: QuotaGuard, snapshot: SessionConfig) -> Self {
        Self {
            sessions: Vec::new(),
            active: None,
            snapshot,
            models: Vec::new(),
            quota,
        }
    }

    /// Known sessions, most recent first.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Looks up a known session.
    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    /// The active session id.
    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// The active session.
    pub fn active(&self) -> Option<&Session> {
        self.active.as_deref().and_then(|id| self.session(id))
    }

    /// The configuration snapshot.
    pub fn snapshot(&self) -> &SessionConfig {
        &self.snapshot
    }

    /// The quota guard consulted before creating sessions.
    pub fn quota(&self) -> &QuotaGuard {
        &self.quota
    }

    /// Known models.
    pub fn models(&self) -> &[ModelInfo] {
        &self.models
    }

    /// Replaces the model list.
    ///
    /// If the snapshot has no model yet it adopts the default model.
    pub fn set_models(&mut self, models: Vec<ModelInfo>) {
        self.models = models;
        if self.snapshot.model_alias.is_empty()
            && let Some(alias) = self.fallback_model()
        {
            self.snapshot.model_alias = alias;
        }
    }

    /// Replaces the session list with the backend's.
    ///
    /// The active session is kept if it is still listed.
    pub fn set_sessions(&mut self, sessions: Vec<Session>) {
        self.sessions = sessions;
        if let Some(active) = &self.active
            && self.session(active).is_none()
        {
            self.active = None;
        }
    }

    /// Makes a known session active and adopts its configuration.
    pub fn set_active(&mut self, session_id: &str) -> Result<()> {
        let config = match self.session(session_id) {
            Some(session) => session.config(),
            None => {
                return Err(Error::not_found(
                    "unknown session",
                    Some("session".to_string()),
                    Some(session_id.to_string()),
                ));
            }
        };
        self.active = Some(session_id.to_string());
        self.snapshot = config;
        Ok(())
    }

    /// Stores the backend's canonical copy of a known session.
    ///
    /// Returns false, and changes nothing, if the session is not known.
    pub fn refresh(&mut self, session: Session) -> bool {
        let Some(slot) = self.sessions.iter_mut().find(|s| s.id == session.id) else {
            return false;
        };
        if self.active.as_deref() == Some(session.id.as_str()) {
            self.snapshot = session.config();
        }
        *slot = session;
        true
    }

    /// Drops a session from the list.  If it was active, nothing is active
    /// afterwards.
    pub fn forget(&mut self, session_id: &str) -> Option<Session> {
        if self.active.as_deref() == Some(session_id) {
            self.active = None;
        }
        let index = self.sessions.iter().position(|s| s.id == session_id)?;
        Some(self.sessions.remove(index))
    }

    fn fallback_model(&self) -> Option<String> {
        self.models
            .iter()
            .find(|m| m.is_default)
            .or_else(|| self.models.first())
            .map(|m| m.alias.clone())
    }

    /// The snapshot with `desired` applied and a model alias filled in.
    fn target(&self, desired: &ConfigOverride) -> Result<SessionConfig> {
        let mut target = self.snapshot.apply(desired);
        if target.model_alias.is_empty() {
            target.model_alias = self.fallback_model().ok_or_else(|| {
                Error::validation("no model available", Some("model_alias".to_string()))
            })?;
        }
        Ok(target)
    }

    /// Moves the active session to the desired configuration.
    ///
    /// `message_count` is the number of locally cached messages of the
    /// active session.  An empty active session is patched in place; a
    /// refused patch (other than an authentication failure) falls back to
    /// creating a session.  Anything else creates a session, subject to the
    /// session quota.
    pub async fn reconcile<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        message_count: usize,
        desired: &ConfigOverride,
    ) -> Result<Reconciled> {
        let target = self.target(desired)?;

        if let Some(active) = self.active().cloned()
            && message_count == 0
        {
            if active.config() == target {
                self.snapshot = target;
                return Ok(Reconciled::Unchanged(active.id));
            }
            let patch = SessionPatchParams::between(&active, &target);
            match backend.patch_session(&active.id, &patch).await {
                Ok(session) => {
                    RECONCILE_PATCHES.click();
                    let id = session.id.clone();
                    self.refresh(session);
                    return Ok(Reconciled::Patched(id));
                }
                Err(err) if err.is_authentication() => return Err(err),
                Err(err) => {
                    RECONCILE_PATCH_FALLBACKS.click();
                    tracing::debug!(
                        session_id = %active.id,
                        error = %err,
                        "patch refused; creating a new session"
                    );
                }
            }
        }

        self.create(backend, &target).await.map(Reconciled::Created)
    }

    /// Returns the active session id, creating a session from the snapshot
    /// when nothing is active.
    pub async fn ensure_active<B: Backend + ?Sized>(&mut self, backend: &B) -> Result<Reconciled> {
        if let Some(active) = &self.active {
            return Ok(Reconciled::Unchanged(active.clone()));
        }
        let target = self.target(&ConfigOverride::none())?;
        self.create(backend, &target).await.map(Reconciled::Created)
    }

    /// Creates a session from the snapshot with `desired` applied and makes
    /// it active, whatever the state of the current one.
    pub async fn start_session<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        desired: &ConfigOverride,
    ) -> Result<String> {
        let target = self.target(desired)?;
        self.create(backend, &target).await
    }

    async fn create<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        config: &SessionConfig,
    ) -> Result<String> {
        self.quota.check_session_create(self.sessions.len())?;
        let session = backend
            .create_session(&SessionCreateParams::from(config))
            .await?;
        RECONCILE_CREATES.click();
        let id = session.id.clone();
        self.snapshot = session.config();
        self.sessions.retain(|s| s.id != id);
        self.sessions.insert(0, session);
        self.active = Some(id.clone());
        Ok(id)
    }
}
