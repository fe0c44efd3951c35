//! Session manager: the single owner of "who is logged in".
//!
//! State machine:
//!
//! ```text
//! Unauthenticated | Failed --login--> Authenticating
//! Authenticating --token ok--> Authenticated   (token saved)
//! Authenticating --transport/decode/expiry error--> Failed   (nothing saved)
//! Authenticated --replace_login--> Authenticating --error--> Authenticated (unchanged)
//! * --logout--> Unauthenticated   (store cleared)
//! start --rehydrate (once)--> Authenticated | Unauthenticated
//! ```
//!
//! Consumers never touch the state directly; they read [`SessionView`]
//! snapshots, either on demand or through a `watch` subscription. The raw
//! token only leaves through [`SessionManager::bearer_token`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::auth::claims::{self, Claims, Role, mask_token};
use crate::auth::token_store::TokenStore;
use crate::auth::transport::{CredentialTransport, Credentials, RegisterOutcome, Registration};
use crate::error::{PersistenceError, SessionError, TransportError};

/// Source of the current time, injectable for tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// An authenticated identity. Identity, role and token always come from the
/// same decoded token.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: String,
    pub role: Role,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn new(token: String, claims: Claims) -> Self {
        Self {
            identity: claims.identity,
            role: claims.role,
            token,
            expires_at: claims.expires_at,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("role", &self.role)
            .field("token", &mask_token(&self.token))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Authoritative session state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated(Session),
    Failed(SessionError),
}

impl AuthState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }

    /// Snapshot published to views. Never carries the token.
    pub fn view(&self) -> SessionView {
        match self {
            AuthState::Unauthenticated => SessionView::default(),
            AuthState::Authenticating => SessionView {
                loading: true,
                ..SessionView::default()
            },
            AuthState::Authenticated(session) => SessionView {
                identity: Some(session.identity.clone()),
                role: Some(session.role.clone()),
                expires_at: Some(session.expires_at),
                is_authenticated: true,
                ..SessionView::default()
            },
            AuthState::Failed(err) => SessionView {
                error: Some(err.display_message()),
                ..SessionView::default()
            },
        }
    }
}

/// What navbar and route components get to see.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionView {
    pub identity: Option<String>,
    pub role: Option<Role>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_authenticated: bool,
    /// A login is in flight.
    pub loading: bool,
    /// Message from the last failed login, for the inline error slot.
    pub error: Option<String>,
}

/// Result of a successful `login` call.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub view: SessionView,
    /// Session was already authenticated; nothing changed.
    pub already_authenticated: bool,
    /// The token could not be persisted. The session is valid for this process
    /// only and will not survive a restart.
    pub persistence_warning: Option<PersistenceError>,
}

/// Result of a `logout` call. Logout itself never fails.
#[derive(Debug, Clone)]
pub struct LogoutOutcome {
    pub was_authenticated: bool,
    pub persistence_warning: Option<PersistenceError>,
}

#[derive(Debug, Default)]
struct Inner {
    state: AuthState,
    /// Bumped by every login start and every logout; an in-flight login only
    /// commits if the epoch it started with is still current.
    epoch: u64,
}

/// Owns the session state and is the only writer of the token store.
pub struct SessionManager<T, S> {
    transport: T,
    store: S,
    clock: Clock,
    inner: Mutex<Inner>,
    published: watch::Sender<SessionView>,
    rehydrated: AtomicBool,
}

impl<T, S> SessionManager<T, S>
where
    T: CredentialTransport,
    S: TokenStore,
{
    pub fn new(transport: T, store: S) -> Self {
        Self {
            transport,
            store,
            clock: Arc::new(Utc::now),
            inner: Mutex::new(Inner::default()),
            published: watch::Sender::new(SessionView::default()),
            rehydrated: AtomicBool::new(false),
        }
    }

    /// Replaces the wall clock used for expiry checks.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Current snapshot.
    pub fn view(&self) -> SessionView {
        self.published.borrow().clone()
    }

    /// Subscribes to snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.published.subscribe()
    }

    /// Full state, including the failure reason. For the owner of the manager.
    pub fn state(&self) -> AuthState {
        self.lock().state.clone()
    }

    /// Token for authenticated backend calls, if logged in.
    pub fn bearer_token(&self) -> Option<String> {
        self.lock().state.session().map(|s| s.token.clone())
    }

    /// Restores the session saved by a previous run.
    ///
    /// Runs once per manager; later calls just return the current snapshot.
    /// The stored token is trusted locally without contacting the backend.
    /// An undecodable or expired token is removed from the store. A store
    /// that cannot be read counts as empty.
    pub fn rehydrate(&self) -> SessionView {
        if self.rehydrated.swap(true, Ordering::SeqCst) {
            debug!("rehydration already ran");
            return self.view();
        }

        let mut inner = self.lock();
        if !matches!(inner.state, AuthState::Unauthenticated) {
            debug!("session already active; skipping rehydration");
            return inner.state.view();
        }

        let token = match self.store.load() {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("no stored session");
                return inner.state.view();
            }
            Err(e) => {
                warn!(error = %e, "could not read stored session; starting logged out");
                return inner.state.view();
            }
        };

        match claims::decode(&token) {
            Ok(claims) if !claims::is_expired(&claims, (self.clock)()) => {
                info!(identity = %claims.identity, role = %claims.role, "restored stored session");
                inner.state = AuthState::Authenticated(Session::new(token, claims));
            }
            Ok(claims) => {
                info!(expired_at = %claims.expires_at, "stored session expired; discarding");
                self.discard_stored();
                inner.state = AuthState::Unauthenticated;
            }
            Err(e) => {
                warn!(error = %e, "stored session token is malformed; discarding");
                self.discard_stored();
                inner.state = AuthState::Unauthenticated;
            }
        }

        self.publish(&inner)
    }

    /// Logs in with `credentials`.
    ///
    /// A second call while one is in flight is rejected with
    /// [`SessionError::LoginInProgress`]. Calling it while already
    /// authenticated changes nothing. Failures are reported, never retried.
    ///
    /// # Errors
    /// Returns the reason the attempt failed; the state is then `Failed`.
    pub async fn login(&self, credentials: &Credentials) -> Result<LoginOutcome, SessionError> {
        self.attempt_login(credentials, false).await
    }

    /// Logs in with `credentials`, replacing the current session only once
    /// the new token has been obtained and validated.
    ///
    /// A failed attempt leaves the current session and the stored token as
    /// they were. Without a current session this behaves like [`Self::login`].
    ///
    /// # Errors
    /// Returns the reason the attempt failed.
    pub async fn replace_login(&self, credentials: &Credentials) -> Result<LoginOutcome, SessionError> {
        self.attempt_login(credentials, true).await
    }

    async fn attempt_login(
        &self,
        credentials: &Credentials,
        replace: bool,
    ) -> Result<LoginOutcome, SessionError> {
        let pending = {
            let mut inner = self.lock();
            match &inner.state {
                AuthState::Authenticating => {
                    debug!("login rejected: another login is in flight");
                    return Err(SessionError::LoginInProgress);
                }
                AuthState::Authenticated(session) if !replace => {
                    debug!(identity = %session.identity, "login ignored: already authenticated");
                    return Ok(LoginOutcome {
                        view: inner.state.view(),
                        already_authenticated: true,
                        persistence_warning: None,
                    });
                }
                AuthState::Authenticated(_) | AuthState::Unauthenticated | AuthState::Failed(_) => {}
            }

            inner.epoch += 1;
            let previous = std::mem::replace(&mut inner.state, AuthState::Authenticating);
            self.publish(&inner);
            PendingLogin {
                manager: self,
                epoch: inner.epoch,
                previous: Some(previous),
            }
        };

        debug!(email = %credentials.email, replace, "logging in");
        let result = self.transport.login(credentials).await;
        let (epoch, previous) = pending.disarm();
        let fallback = previous.filter(AuthState::is_authenticated);
        self.complete_login(epoch, fallback, result)
    }

    fn complete_login(
        &self,
        epoch: u64,
        fallback: Option<AuthState>,
        result: Result<String, TransportError>,
    ) -> Result<LoginOutcome, SessionError> {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            debug!("login resolved after logout; dropping result");
            return Err(SessionError::Cancelled);
        }

        let session = match self.validate(result) {
            Ok(session) => session,
            Err(err) => {
                return Err(match fallback {
                    Some(previous) => {
                        warn!(error = %err, "replacement login failed; keeping current session");
                        inner.state = previous;
                        self.publish(&inner);
                        err
                    }
                    None => self.fail(&mut inner, err),
                });
            }
        };

        let persistence_warning = match self.store.save(&session.token) {
            Ok(()) => None,
            Err(e) => {
                warn!(error = %e, "session will not survive a restart");
                Some(e)
            }
        };

        info!(identity = %session.identity, role = %session.role, "logged in");
        inner.state = AuthState::Authenticated(session);
        let view = self.publish(&inner);

        Ok(LoginOutcome {
            view,
            already_authenticated: false,
            persistence_warning,
        })
    }

    fn validate(&self, result: Result<String, TransportError>) -> Result<Session, SessionError> {
        let token = result?;
        let claims = claims::decode(&token)?;
        if claims::is_expired(&claims, (self.clock)()) {
            return Err(SessionError::TokenExpired);
        }
        Ok(Session::new(token, claims))
    }

    /// Logs out from any state and clears the store.
    ///
    /// Always succeeds locally. A login still in flight is invalidated and
    /// will not commit when it resolves.
    pub fn logout(&self) -> LogoutOutcome {
        let mut inner = self.lock();
        inner.epoch += 1;
        let was_authenticated = inner.state.is_authenticated();
        inner.state = AuthState::Unauthenticated;

        let persistence_warning = self.store.clear().err();
        if let Some(e) = &persistence_warning {
            warn!(error = %e, "failed to clear stored session");
        }
        if was_authenticated {
            info!("logged out");
        }

        self.publish(&inner);
        LogoutOutcome {
            was_authenticated,
            persistence_warning,
        }
    }

    /// Drops the session if its token has expired by now.
    ///
    /// Returns true if the session was dropped.
    pub fn expire_if_stale(&self) -> bool {
        let mut inner = self.lock();
        let expired = inner
            .state
            .session()
            .is_some_and(|s| (self.clock)() >= s.expires_at);
        if !expired {
            return false;
        }

        info!("session expired");
        inner.epoch += 1;
        inner.state = AuthState::Unauthenticated;
        self.discard_stored();
        self.publish(&inner);
        true
    }

    /// Creates an account. The session state is not touched; the user logs
    /// in afterwards.
    ///
    /// # Errors
    /// Returns the normalized transport error.
    pub async fn register(&self, registration: &Registration) -> Result<RegisterOutcome, TransportError> {
        debug!(email = %registration.email, role = %registration.role, "registering account");
        let outcome = self.transport.register(registration).await?;
        info!(email = %registration.email, "account created");
        Ok(outcome)
    }

    fn fail(&self, inner: &mut Inner, err: SessionError) -> SessionError {
        warn!(error = %err, "login failed");
        inner.state = AuthState::Failed(err.clone());
        self.publish(inner);
        err
    }

    fn discard_stored(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "failed to remove stored session");
        }
    }

    fn publish(&self, inner: &Inner) -> SessionView {
        let view = inner.state.view();
        self.published.send_replace(view.clone());
        view
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Restores the pre-login state if a login future is dropped before the
/// transport resolves.
struct PendingLogin<'a, T, S>
where
    T: CredentialTransport,
    S: TokenStore,
{
    manager: &'a SessionManager<T, S>,
    epoch: u64,
    previous: Option<AuthState>,
}

impl<T, S> PendingLogin<'_, T, S>
where
    T: CredentialTransport,
    S: TokenStore,
{
    fn disarm(mut self) -> (u64, Option<AuthState>) {
        (self.epoch, self.previous.take())
    }
}

impl<T, S> Drop for PendingLogin<'_, T, S>
where
    T: CredentialTransport,
    S: TokenStore,
{
    fn drop(&mut self) {
        let Some(previous) = self.previous.take() else {
            return;
        };
        let mut inner = self.manager.lock();
        if inner.epoch == self.epoch && matches!(inner.state, AuthState::Authenticating) {
            debug!("login abandoned before completion");
            inner.state = previous;
            self.manager.publish(&inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;
    use crate::auth::claims::test_tokens::{expired_token, valid_token};
    use crate::auth::token_store::MemoryTokenStore;
    use crate::error::TransportErrorKind;

    /// Replies with a fixed login result; optionally waits on a gate first.
    struct StubTransport {
        reply: StdMutex<Result<String, TransportError>>,
        gate: Option<Arc<Notify>>,
        calls: AtomicUsize,
    }

    impl StubTransport {
        fn ok(token: impl Into<String>) -> Self {
            Self {
                reply: StdMutex::new(Ok(token.into())),
                gate: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn err(err: TransportError) -> Self {
            Self {
                reply: StdMutex::new(Err(err)),
                gate: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn gated(token: impl Into<String>, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::ok(token)
            }
        }
    }

    impl CredentialTransport for StubTransport {
        async fn login(&self, _credentials: &Credentials) -> Result<String, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.reply.lock().unwrap().clone()
        }

        async fn register(&self, _registration: &Registration) -> Result<RegisterOutcome, TransportError> {
            Ok(RegisterOutcome::default())
        }
    }

    /// Store whose writes always fail.
    struct ReadOnlyStore;

    impl TokenStore for ReadOnlyStore {
        fn save(&self, _token: &str) -> Result<(), PersistenceError> {
            Err(PersistenceError::new("write", "/readonly/session.json", "read-only"))
        }

        fn load(&self) -> Result<Option<String>, PersistenceError> {
            Ok(None)
        }

        fn clear(&self) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    /// Store that cannot be read at all.
    struct BrokenStore;

    impl TokenStore for BrokenStore {
        fn save(&self, _token: &str) -> Result<(), PersistenceError> {
            Ok(())
        }

        fn load(&self) -> Result<Option<String>, PersistenceError> {
            Err(PersistenceError::new("read", "/broken/session.json", "I/O error"))
        }

        fn clear(&self) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    fn creds() -> Credentials {
        Credentials::new("ana@example.com", "secret")
    }

    #[test]
    fn test_rehydrate_valid_token_authenticates() {
        let token = valid_token("ana@example.com", "admin");
        let expected = claims::decode(&token).unwrap();
        let store = Arc::new(MemoryTokenStore::with_token(token.clone()));
        let manager = SessionManager::new(StubTransport::ok("unused"), Arc::clone(&store));

        let view = manager.rehydrate();

        assert!(view.is_authenticated);
        assert_eq!(view.identity.as_deref(), Some(expected.identity.as_str()));
        assert_eq!(view.role, Some(expected.role));
        assert_eq!(manager.bearer_token(), Some(token));
    }

    #[test]
    fn test_rehydrate_malformed_token_clears_store() {
        let store = Arc::new(MemoryTokenStore::with_token("garbage"));
        let manager = SessionManager::new(StubTransport::ok("unused"), Arc::clone(&store));

        let view = manager.rehydrate();

        assert!(!view.is_authenticated);
        assert_eq!(manager.state(), AuthState::Unauthenticated);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_rehydrate_expired_token_clears_store() {
        let store = Arc::new(MemoryTokenStore::with_token(expired_token("a@b.c", "user")));
        let manager = SessionManager::new(StubTransport::ok("unused"), Arc::clone(&store));

        assert!(!manager.rehydrate().is_authenticated);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_rehydrate_unreadable_store_starts_logged_out() {
        let manager = SessionManager::new(StubTransport::ok("unused"), BrokenStore);
        let view = manager.rehydrate();
        assert!(!view.is_authenticated);
        assert_eq!(view.error, None);
    }

    #[test]
    fn test_rehydrate_runs_once() {
        let store = Arc::new(MemoryTokenStore::new());
        let manager = SessionManager::new(StubTransport::ok("unused"), Arc::clone(&store));

        assert!(!manager.rehydrate().is_authenticated);
        store.save(&valid_token("a@b.c", "user")).unwrap();
        assert!(!manager.rehydrate().is_authenticated);
    }

    #[tokio::test]
    async fn test_login_success_persists_token() {
        let token = valid_token("ana@example.com", "admin");
        let store = Arc::new(MemoryTokenStore::new());
        let manager = SessionManager::new(StubTransport::ok(token.clone()), Arc::clone(&store));

        let outcome = manager.login(&creds()).await.unwrap();

        assert!(!outcome.already_authenticated);
        assert!(outcome.persistence_warning.is_none());
        assert_eq!(outcome.view.role, Some(Role::Admin));
        assert_eq!(outcome.view.identity.as_deref(), Some("ana@example.com"));
        assert_eq!(store.load().unwrap(), Some(token.clone()));
        assert_eq!(manager.bearer_token(), Some(token));
    }

    #[tokio::test]
    async fn test_login_transport_failure_leaves_store_untouched() {
        let previous = "previous.token.value";
        let store = Arc::new(MemoryTokenStore::with_token(previous));
        let manager = SessionManager::new(
            StubTransport::err(TransportError::rejected(401, "Invalid credentials")),
            Arc::clone(&store),
        );

        let err = manager.login(&creds()).await.unwrap_err();

        assert_eq!(err.display_message(), "Invalid credentials");
        assert!(matches!(manager.state(), AuthState::Failed(_)));
        assert_eq!(manager.view().error.as_deref(), Some("Invalid credentials"));
        assert_eq!(store.load().unwrap().as_deref(), Some(previous));
    }

    #[tokio::test]
    async fn test_login_malformed_token_is_not_persisted() {
        let store = Arc::new(MemoryTokenStore::new());
        let manager = SessionManager::new(StubTransport::ok("not-a-jwt"), Arc::clone(&store));

        let err = manager.login(&creds()).await.unwrap_err();

        assert!(matches!(err, SessionError::MalformedToken(_)));
        assert!(!manager.view().is_authenticated);
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_expired_token_is_not_persisted() {
        let store = Arc::new(MemoryTokenStore::new());
        let manager = SessionManager::new(
            StubTransport::ok(expired_token("a@b.c", "user")),
            Arc::clone(&store),
        );

        let err = manager.login(&creds()).await.unwrap_err();

        assert_eq!(err, SessionError::TokenExpired);
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_save_failure_keeps_session_with_warning() {
        let manager = SessionManager::new(StubTransport::ok(valid_token("a@b.c", "user")), ReadOnlyStore);

        let outcome = manager.login(&creds()).await.unwrap();

        assert!(outcome.view.is_authenticated);
        assert!(outcome.persistence_warning.is_some());
    }

    #[tokio::test]
    async fn test_login_when_authenticated_is_noop() {
        let transport = StubTransport::ok(valid_token("a@b.c", "user"));
        let manager = SessionManager::new(transport, MemoryTokenStore::new());

        manager.login(&creds()).await.unwrap();
        let again = manager.login(&creds()).await.unwrap();

        assert!(again.already_authenticated);
        assert_eq!(manager.transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replace_login_failure_keeps_current_session() {
        let previous = valid_token("ana@example.com", "meteorologo");
        let store = Arc::new(MemoryTokenStore::with_token(previous.clone()));
        let manager = SessionManager::new(
            StubTransport::err(TransportError::rejected(401, "Invalid credentials")),
            Arc::clone(&store),
        );
        assert!(manager.rehydrate().is_authenticated);

        let err = manager.replace_login(&creds()).await.unwrap_err();

        assert_eq!(err.display_message(), "Invalid credentials");
        assert_eq!(manager.bearer_token(), Some(previous.clone()));
        assert!(manager.view().is_authenticated);
        assert_eq!(store.load().unwrap(), Some(previous));
    }

    #[tokio::test]
    async fn test_replace_login_malformed_token_keeps_current_session() {
        let previous = valid_token("ana@example.com", "user");
        let store = Arc::new(MemoryTokenStore::with_token(previous.clone()));
        let manager = SessionManager::new(StubTransport::ok("not-a-jwt"), Arc::clone(&store));
        manager.rehydrate();

        let err = manager.replace_login(&creds()).await.unwrap_err();

        assert!(matches!(err, SessionError::MalformedToken(_)));
        assert_eq!(manager.bearer_token(), Some(previous.clone()));
        assert_eq!(store.load().unwrap(), Some(previous));
    }

    #[tokio::test]
    async fn test_replace_login_success_swaps_session() {
        let next = valid_token("admin@example.com", "admin");
        let store = Arc::new(MemoryTokenStore::with_token(valid_token("ana@example.com", "user")));
        let manager = SessionManager::new(StubTransport::ok(next.clone()), Arc::clone(&store));
        manager.rehydrate();

        let outcome = manager.replace_login(&creds()).await.unwrap();

        assert!(!outcome.already_authenticated);
        assert_eq!(outcome.view.role, Some(Role::Admin));
        assert_eq!(store.load().unwrap(), Some(next.clone()));
        assert_eq!(manager.bearer_token(), Some(next));
    }

    #[tokio::test]
    async fn test_replace_login_without_session_fails_like_login() {
        let manager = SessionManager::new(
            StubTransport::err(TransportError::rejected(401, "Invalid credentials")),
            MemoryTokenStore::new(),
        );

        manager.replace_login(&creds()).await.unwrap_err();

        assert!(matches!(manager.state(), AuthState::Failed(_)));
    }

    #[tokio::test]
    async fn test_login_after_failure_can_succeed() {
        let manager = SessionManager::new(
            StubTransport::err(TransportError::unreachable("down")),
            MemoryTokenStore::new(),
        );
        assert!(manager.login(&creds()).await.is_err());

        *manager.transport.reply.lock().unwrap() = Ok(valid_token("a@b.c", "user"));
        let outcome = manager.login(&creds()).await.unwrap();
        assert!(outcome.view.is_authenticated);
        assert_eq!(outcome.view.error, None);
    }

    #[tokio::test]
    async fn test_concurrent_login_is_rejected() {
        let gate = Arc::new(Notify::new());
        let manager = Arc::new(SessionManager::new(
            StubTransport::gated(valid_token("a@b.c", "user"), Arc::clone(&gate)),
            MemoryTokenStore::new(),
        ));
        let mut updates = manager.subscribe();

        let first = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.login(&creds()).await }
        });
        updates.wait_for(|v| v.loading).await.unwrap();

        let second = manager.login(&creds()).await.unwrap_err();
        assert_eq!(second, SessionError::LoginInProgress);

        gate.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert!(outcome.view.is_authenticated);
        assert_eq!(manager.transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_logout_during_login_wins() {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(MemoryTokenStore::new());
        let manager = Arc::new(SessionManager::new(
            StubTransport::gated(valid_token("a@b.c", "user"), Arc::clone(&gate)),
            Arc::clone(&store),
        ));
        let mut updates = manager.subscribe();

        let pending = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.login(&creds()).await }
        });
        updates.wait_for(|v| v.loading).await.unwrap();

        manager.logout();
        gate.notify_one();

        assert_eq!(pending.await.unwrap().unwrap_err(), SessionError::Cancelled);
        assert_eq!(manager.state(), AuthState::Unauthenticated);
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn test_dropped_login_restores_previous_state() {
        let gate = Arc::new(Notify::new());
        let manager = SessionManager::new(
            StubTransport::gated(valid_token("a@b.c", "user"), gate),
            MemoryTokenStore::new(),
        );

        let timed_out = tokio::time::timeout(Duration::from_millis(20), manager.login(&creds())).await;

        assert!(timed_out.is_err());
        assert_eq!(manager.state(), AuthState::Unauthenticated);
        assert!(!manager.view().loading);
    }

    #[tokio::test]
    async fn test_logout_clears_state_and_store() {
        let store = Arc::new(MemoryTokenStore::new());
        let manager = SessionManager::new(
            StubTransport::ok(valid_token("a@b.c", "admin")),
            Arc::clone(&store),
        );
        manager.login(&creds()).await.unwrap();

        let first = manager.logout();
        let second = manager.logout();

        assert!(first.was_authenticated);
        assert!(!second.was_authenticated);
        assert_eq!(manager.state(), AuthState::Unauthenticated);
        assert_eq!(manager.view(), SessionView::default());
        assert_eq!(store.load().unwrap(), None);
        assert_eq!(manager.bearer_token(), None);
    }

    #[test]
    fn test_logout_when_unauthenticated_clears_leftover_store() {
        let store = Arc::new(MemoryTokenStore::with_token("stale"));
        let manager = SessionManager::new(StubTransport::ok("unused"), Arc::clone(&store));

        let outcome = manager.logout();

        assert!(!outcome.was_authenticated);
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn test_expire_if_stale_uses_injected_clock() {
        let token = valid_token("a@b.c", "user");
        let expires_at = claims::decode(&token).unwrap().expires_at;
        let now = Arc::new(StdMutex::new(Utc::now()));
        let store = Arc::new(MemoryTokenStore::new());
        let manager = SessionManager::new(StubTransport::ok(token), Arc::clone(&store)).with_clock({
            let now = Arc::clone(&now);
            move || *now.lock().unwrap()
        });

        manager.login(&creds()).await.unwrap();
        assert!(!manager.expire_if_stale());

        *now.lock().unwrap() = expires_at;
        assert!(manager.expire_if_stale());
        assert!(!manager.view().is_authenticated);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_view_never_exposes_token() {
        let token = valid_token("a@b.c", "user");
        let manager = SessionManager::new(
            StubTransport::ok("unused"),
            MemoryTokenStore::with_token(token.clone()),
        );
        manager.rehydrate();

        let rendered = format!("{:?} {:?}", manager.view(), manager.state());
        assert!(!rendered.contains(&token));
    }

    #[test]
    fn test_failed_view_carries_message() {
        let state = AuthState::Failed(SessionError::Transport(TransportError::new(
            TransportErrorKind::Unreachable,
            "Cannot reach the server. Check your connection.",
        )));
        let view = state.view();
        assert!(!view.is_authenticated);
        assert_eq!(
            view.error.as_deref(),
            Some("Cannot reach the server. Check your connection.")
        );
    }
}
