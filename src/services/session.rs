// Explicit session tokens for the remote systems.
// SAP Service Layer hands out a B1SESSION cookie valid for ~30 minutes and
// Microsoft Graph hands out a bearer token valid for ~1 hour. Both are carried
// as a `Session` value and checked with `ensure_valid` before every use.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

/// Margin taken off the advertised lifetime so a token is not used in its last seconds.
const EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Builds a session from a freshly issued token and its advertised lifetime.
    pub fn issued_now(token: impl Into<String>, lifetime: Duration) -> Self {
        let skew = Duration::seconds(EXPIRY_SKEW_SECONDS);
        let effective = if lifetime > skew * 2 { lifetime - skew } else { lifetime };
        Self {
            token: token.into(),
            expires_at: Utc::now() + effective,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Something that can hand out a new session (a login endpoint, a token endpoint).
#[async_trait]
pub trait SessionAuthority: Send + Sync {
    type Error: Send;

    async fn acquire(&self) -> Result<Session, Self::Error>;
}

/// Returns `current` when it is still valid, otherwise acquires a new session.
/// An expired token is never returned.
pub async fn ensure_valid<A>(authority: &A, current: Option<Session>) -> Result<Session, A::Error>
where
    A: SessionAuthority + ?Sized,
{
    match current {
        Some(session) if !session.is_expired() => Ok(session),
        Some(_) => {
            tracing::debug!("Session expired, acquiring a new one");
            authority.acquire().await
        }
        None => authority.acquire().await,
    }
}

/// Holds the current session for one authority.
#[derive(Debug, Default)]
pub struct SessionSlot {
    current: Mutex<Option<Session>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn valid<A>(&self, authority: &A) -> Result<Session, A::Error>
    where
        A: SessionAuthority + ?Sized,
    {
        let mut current = self.current.lock().await;
        let session = ensure_valid(authority, current.take()).await?;
        *current = Some(session.clone());
        Ok(session)
    }

    /// Drops the cached session, e.g. after the remote side answered 401.
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }
}
