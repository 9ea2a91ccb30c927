use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;

use crate::config::SessionConfig;

use super::{find_cookie, CookieSigner, Identity, SessionError, SessionStore};

/// Resolves the identity behind a handshake from its session cookie.
pub struct SessionResolver {
    cookie_name: String,
    signer: CookieSigner,
    store: Arc<dyn SessionStore>,
    lookup_timeout: Option<Duration>,
}

impl SessionResolver {
    pub fn new(
        cookie_name: impl Into<String>,
        signer: CookieSigner,
        store: Arc<dyn SessionStore>,
        lookup_timeout: Option<Duration>,
    ) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            signer,
            store,
            lookup_timeout,
        }
    }

    pub fn from_config(config: &SessionConfig, store: Arc<dyn SessionStore>) -> Self {
        Self::new(
            config.cookie_name.clone(),
            CookieSigner::new(&config.secret),
            store,
            config.lookup_timeout(),
        )
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Cookie → signature check → store lookup → identity.
    #[tracing::instrument(name = "session.resolve", skip_all)]
    pub async fn resolve(&self, headers: &HeaderMap) -> Result<Identity, SessionError> {
        let cookie =
            find_cookie(headers, &self.cookie_name).ok_or(SessionError::NoSessionCookie)?;
        let token = self.signer.unsign(&cookie)?;

        let lookup = self.store.get(&token);
        let found = match self.lookup_timeout {
            Some(limit) => tokio::time::timeout(limit, lookup)
                .await
                .map_err(|_| SessionError::StoreLookup("timed out".to_string()))?,
            None => lookup.await,
        };

        found
            .map_err(|e| SessionError::StoreLookup(e.to_string()))?
            .ok_or(SessionError::NoIdentityInSession)
    }
}
