use crate::auth::{AuthCoordinator, AuthEvent};
use crate::config::{ApiSettings, Endpoints};
use crate::credentials::{PersistedTokenStore, TokenStore};
use crate::executor::RequestExecutor;
use crate::session::ChatSessions;
use crate::transport::{ApiTransport, ReqwestTransport};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Wires the store, transport, auth coordinator and executor together.
#[derive(Clone)]
pub struct LegalApiClient {
    executor: RequestExecutor,
    endpoints: Endpoints,
}

impl LegalApiClient {
    pub fn new(
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn ApiTransport>,
        endpoints: Endpoints,
        timeout: Duration,
    ) -> (Self, UnboundedReceiver<AuthEvent>) {
        let (auth, events) =
            AuthCoordinator::new(store, transport.clone(), endpoints.clone(), timeout);
        let executor = RequestExecutor::new(auth, transport, timeout);
        (
            Self {
                executor,
                endpoints,
            },
            events,
        )
    }

    /// Client talking to the configured service, with tokens persisted in the
    /// configured session file.
    pub fn from_settings(
        settings: &ApiSettings,
    ) -> Result<(Self, UnboundedReceiver<AuthEvent>)> {
        let transport = ReqwestTransport::new(&settings.base_url)?;
        let store = PersistedTokenStore::open(&settings.session_file);
        Ok(Self::new(
            Arc::new(store),
            Arc::new(transport),
            settings.endpoints.clone(),
            settings.timeout,
        ))
    }

    pub fn auth(&self) -> &AuthCoordinator {
        self.executor.auth()
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// A fresh conversation holder; each one tracks its own session id.
    pub fn chat_sessions(&self) -> ChatSessions {
        ChatSessions::new(self.executor.clone(), &self.endpoints)
    }
}
