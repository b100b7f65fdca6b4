use crate::config::Endpoints;
use crate::credentials::{Credentials, TokenStore};
use crate::error::{ApiFailure, ApiResult};
use crate::transport::{ApiTransport, HttpMethod, TransportRequest};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Changes in authentication state that collaborators react to, e.g. by
/// navigating back to the sign-in form on `SignedOut`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn,
    Refreshed,
    SignedOut { reason: String },
}

type RefreshFlight = Shared<BoxFuture<'static, bool>>;

#[derive(Default)]
struct InFlight {
    generation: u64,
    current: Option<RefreshFlight>,
}

/// Owns the token lifecycle: login, the refresh-token exchange and logout.
#[derive(Clone)]
pub struct AuthCoordinator {
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn ApiTransport>,
    endpoints: Endpoints,
    timeout: Duration,
    in_flight: Arc<Mutex<InFlight>>,
    events_tx: UnboundedSender<AuthEvent>,
}

impl AuthCoordinator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn ApiTransport>,
        endpoints: Endpoints,
        timeout: Duration,
    ) -> (Self, UnboundedReceiver<AuthEvent>) {
        let (events_tx, events_rx) = unbounded_channel();
        (
            Self {
                store,
                transport,
                endpoints,
                timeout,
                in_flight: Arc::new(Mutex::new(InFlight::default())),
                events_tx,
            },
            events_rx,
        )
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub fn is_signed_in(&self) -> bool {
        self.store.is_valid(Utc::now())
    }

    pub async fn login(&self, username: &str, password: &str) -> ApiResult<Credentials> {
        let request = TransportRequest {
            method: HttpMethod::Post,
            endpoint: self.endpoints.login.clone(),
            headers: Vec::new(),
            body: Some(json!({ "username": username, "password": password })),
            bearer: None,
            timeout: self.timeout,
        };
        let response = tokio::time::timeout(self.timeout, self.transport.send(request))
            .await
            .map_err(|_| ApiFailure::timeout("login did not answer in time"))??;
        if !response.is_success() {
            let failure = ApiFailure::from_response(&response);
            warn!(status = response.status, "login rejected");
            return Err(failure);
        }
        let credentials = TokenGrant::parse(&response.body, None, Utc::now())
            .ok_or_else(|| ApiFailure::parse("login response is missing token fields"))?;
        self.store.set(credentials.clone());
        info!(user = username, "signed in");
        self.events_tx.send(AuthEvent::SignedIn).ok();
        Ok(credentials)
    }

    pub fn logout(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.store.clear();
        info!(%reason, "signed out");
        self.events_tx.send(AuthEvent::SignedOut { reason }).ok();
    }

    /// Exchange the stored refresh token for a new token pair.
    ///
    /// Concurrent callers share a single in-flight exchange. On any failure the
    /// store is left as it was and `false` is returned.
    pub async fn refresh(&self) -> bool {
        let (generation, flight) = {
            let mut slot = self.in_flight.lock();
            match slot.current.clone() {
                Some(flight) => (slot.generation, flight),
                None => {
                    slot.generation += 1;
                    let this = self.clone();
                    let flight = async move { this.exchange_refresh_token().await }
                        .boxed()
                        .shared();
                    slot.current = Some(flight.clone());
                    (slot.generation, flight)
                }
            }
        };
        let refreshed = flight.await;
        let mut slot = self.in_flight.lock();
        if slot.generation == generation {
            slot.current = None;
        }
        refreshed
    }

    /// Called after `rejected` was refused by the server. If the stored token
    /// already differs, another caller refreshed in the meantime and the retry
    /// can go ahead without a second exchange.
    pub(crate) async fn refresh_after_rejection(&self, rejected: &str) -> bool {
        match self.store.get() {
            Some(current) if current.access_token != rejected => {
                debug!("token already rotated by a concurrent refresh");
                true
            }
            _ => self.refresh().await,
        }
    }

    async fn exchange_refresh_token(&self) -> bool {
        let Some(current) = self.store.get() else {
            debug!("no stored credentials; skipping refresh");
            return false;
        };
        if current.refresh_token.is_empty() {
            debug!("no refresh token; skipping refresh");
            return false;
        }
        let request = TransportRequest {
            method: HttpMethod::Post,
            endpoint: self.endpoints.refresh.clone(),
            headers: Vec::new(),
            body: Some(json!({ "refreshToken": &current.refresh_token })),
            bearer: None,
            timeout: self.timeout,
        };
        let response = match tokio::time::timeout(self.timeout, self.transport.send(request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(%err, "token refresh failed");
                return false;
            }
            Err(_) => {
                warn!("token refresh timed out");
                return false;
            }
        };
        if !response.is_success() {
            warn!(status = response.status, "token refresh rejected");
            return false;
        }
        match TokenGrant::parse(&response.body, Some(&current.refresh_token), Utc::now()) {
            Some(credentials) => {
                self.store.set(credentials);
                info!("access token refreshed");
                self.events_tx.send(AuthEvent::Refreshed).ok();
                true
            }
            None => {
                warn!("token refresh response is malformed");
                false
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Expiry {
    Instant(String),
    Epoch(f64),
}

/// Epoch values above this are taken to be milliseconds (year 5138 in seconds).
const MAX_EPOCH_SECONDS: f64 = 1e11;

fn epoch_to_datetime(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let millis = if raw > MAX_EPOCH_SECONDS { raw } else { raw * 1000.0 };
    if millis > MAX_EPOCH_SECONDS * 1000.0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis as i64).single()
}

/// Body of a login or refresh response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenGrant {
    #[serde(alias = "access_token")]
    access_token: String,
    #[serde(default, alias = "refresh_token")]
    refresh_token: Option<String>,
    #[serde(default, alias = "expires_at")]
    expires_at: Option<Expiry>,
    #[serde(default, alias = "expires_in")]
    expires_in: Option<i64>,
}

impl TokenGrant {
    /// `previous_refresh` is kept when the server does not rotate refresh tokens.
    fn parse(
        body: &str,
        previous_refresh: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<Credentials> {
        let grant: TokenGrant = serde_json::from_str(body).ok()?;
        if grant.access_token.is_empty() {
            return None;
        }
        let expires_at = match (grant.expires_at, grant.expires_in) {
            (Some(Expiry::Instant(raw)), _) => DateTime::parse_from_rfc3339(&raw)
                .ok()?
                .with_timezone(&Utc),
            (Some(Expiry::Epoch(raw)), _) => epoch_to_datetime(raw)?,
            (None, Some(seconds)) => now + ChronoDuration::seconds(seconds),
            (None, None) => return None,
        };
        let refresh_token = grant
            .refresh_token
            .or_else(|| previous_refresh.map(str::to_string))
            .unwrap_or_default();
        Some(Credentials {
            access_token: grant.access_token,
            refresh_token,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryTokenStore;
    use crate::transport::{ScriptedReply, ScriptedTransport};

    fn coordinator(
        transport: &ScriptedTransport,
    ) -> (AuthCoordinator, UnboundedReceiver<AuthEvent>) {
        AuthCoordinator::new(
            Arc::new(MemoryTokenStore::new()),
            Arc::new(transport.clone()),
            Endpoints::default(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn grant_accepts_several_expiry_shapes() {
        let now = Utc::now();
        let rfc = TokenGrant::parse(
            r#"{"accessToken":"a","refreshToken":"r","expiresAt":"2030-01-01T00:00:00Z"}"#,
            None,
            now,
        )
        .unwrap();
        assert_eq!(rfc.expires_at.to_rfc3339(), "2030-01-01T00:00:00+00:00");

        let epoch =
            TokenGrant::parse(r#"{"accessToken":"a","expiresAt":1893456000}"#, Some("old"), now)
                .unwrap();
        assert_eq!(epoch.expires_at.timestamp(), 1_893_456_000);
        assert_eq!(epoch.refresh_token, "old");

        let relative =
            TokenGrant::parse(r#"{"access_token":"a","expires_in":60}"#, None, now).unwrap();
        assert_eq!(relative.expires_at, now + ChronoDuration::seconds(60));
    }

    #[test]
    fn epoch_expiry_in_millis_or_fractions() {
        let now = Utc::now();
        let millis =
            TokenGrant::parse(r#"{"accessToken":"a","expiresAt":1893456000000}"#, None, now)
                .unwrap();
        assert_eq!(millis.expires_at.timestamp(), 1_893_456_000);

        let fractional =
            TokenGrant::parse(r#"{"accessToken":"a","expiresAt":1893456000.5}"#, None, now)
                .unwrap();
        assert_eq!(fractional.expires_at.timestamp_millis(), 1_893_456_000_500);

        assert!(TokenGrant::parse(r#"{"accessToken":"a","expiresAt":-5}"#, None, now).is_none());
        assert!(
            TokenGrant::parse(r#"{"accessToken":"a","expiresAt":1e20}"#, None, now).is_none()
        );
    }

    #[test]
    fn grant_without_expiry_is_malformed() {
        assert!(TokenGrant::parse(r#"{"accessToken":"a"}"#, None, Utc::now()).is_none());
        assert!(TokenGrant::parse("not json", None, Utc::now()).is_none());
    }

    #[tokio::test]
    async fn login_stores_credentials_and_announces_it() {
        let transport = ScriptedTransport::new();
        transport.push(
            "auth/login",
            ScriptedReply::json(
                200,
                json!({ "accessToken": "a1", "refreshToken": "r1", "expiresIn": 900 }),
            ),
        );
        let (auth, mut events) = coordinator(&transport);

        let credentials = auth.login("clerk", "secret").await.expect("login");
        assert_eq!(credentials.access_token, "a1");
        assert!(auth.is_signed_in());
        assert_eq!(events.recv().await, Some(AuthEvent::SignedIn));

        let call = &transport.calls()[0];
        assert_eq!(call.bearer, None);
        assert_eq!(call.body, Some(json!({ "username": "clerk", "password": "secret" })));
    }

    #[tokio::test]
    async fn rejected_login_surfaces_unauthorized() {
        let transport = ScriptedTransport::new();
        transport.push(
            "auth/login",
            ScriptedReply::json(401, json!({ "message": "invalid credentials" })),
        );
        let (auth, _events) = coordinator(&transport);

        let failure = auth.login("clerk", "wrong").await.unwrap_err();
        assert!(failure.is_unauthorized());
        assert_eq!(failure.message, "invalid credentials");
        assert!(auth.store().get().is_none());
    }

    #[tokio::test]
    async fn refresh_without_token_skips_network() {
        let transport = ScriptedTransport::new();
        let (auth, _events) = coordinator(&transport);
        assert!(!auth.refresh().await);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn failed_refresh_leaves_store_untouched() {
        let transport = ScriptedTransport::new();
        transport.push("auth/refresh", ScriptedReply::text(500, "boom"));
        let (auth, _events) = coordinator(&transport);
        let original = Credentials {
            access_token: "a0".into(),
            refresh_token: "r0".into(),
            expires_at: Utc::now() + ChronoDuration::minutes(5),
        };
        auth.store().set(original.clone());

        assert!(!auth.refresh().await);
        assert_eq!(auth.store().get(), Some(original));
    }

    #[tokio::test]
    async fn logout_clears_and_announces() {
        let transport = ScriptedTransport::new();
        let (auth, mut events) = coordinator(&transport);
        auth.store().set(Credentials {
            access_token: "a0".into(),
            refresh_token: "r0".into(),
            expires_at: Utc::now() + ChronoDuration::minutes(5),
        });

        auth.logout("user request");
        assert!(auth.store().get().is_none());
        assert_eq!(
            events.recv().await,
            Some(AuthEvent::SignedOut {
                reason: "user request".into()
            })
        );
    }
}
