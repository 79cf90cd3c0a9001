//! Credential leases for token-based sources
//!
//! A lease moves `Absent -> Valid -> Expired -> Absent`. Expiry is checked
//! lazily before each authenticated call. At most one authentication is in
//! flight per source: the first caller installs a shared pending future and
//! every concurrent caller awaits that same future.

use crate::cache::{lease_key, Cache};
use crate::error::{SourceError, SourceResult};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tokens are considered expired this long before the provider says so
pub const DEFAULT_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// A time-bounded credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Lease valid for `lifetime` from now
    pub fn new(token: impl Into<String>, lifetime: Duration) -> Self {
        let lifetime = chrono::Duration::from_std(lifetime)
            .unwrap_or_else(|_| chrono::Duration::seconds(0));
        Self {
            token: token.into(),
            expires_at: Utc::now() + lifetime,
        }
    }

    fn usable_until(&self, margin: Duration) -> DateTime<Utc> {
        let margin = chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::zero());
        self.expires_at - margin
    }

    /// Whether the lease may still be used
    pub fn is_valid(&self, margin: Duration) -> bool {
        Utc::now() < self.usable_until(margin)
    }

    /// Usable lifetime left
    pub fn remaining(&self, margin: Duration) -> Duration {
        (self.usable_until(margin) - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Observable lease state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    Absent,
    Valid,
    Expired,
}

type PendingLease = Shared<BoxFuture<'static, SourceResult<Lease>>>;

#[derive(Default)]
struct LeaseSlot {
    current: Option<Lease>,
    pending: Option<(u64, PendingLease)>,
    generation: u64,
}

/// Owns the lease of one source
pub struct LeaseManager {
    source: String,
    cache: Arc<Cache>,
    margin: Duration,
    slot: Mutex<LeaseSlot>,
}

impl LeaseManager {
    pub fn new(source: impl Into<String>, cache: Arc<Cache>) -> Self {
        Self {
            source: source.into(),
            cache,
            margin: DEFAULT_EXPIRY_MARGIN,
            slot: Mutex::new(LeaseSlot::default()),
        }
    }

    /// Override the expiry safety margin
    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    /// Current state, without side effects
    pub fn state(&self) -> LeaseState {
        match self.slot.lock().current {
            None => LeaseState::Absent,
            Some(ref lease) if lease.is_valid(self.margin) => LeaseState::Valid,
            Some(_) => LeaseState::Expired,
        }
    }

    /// Return a valid token, authenticating first if needed.
    ///
    /// `authenticate` is only invoked when no valid lease exists and no
    /// other caller is already authenticating; concurrent callers share the
    /// in-flight result, success or failure.
    pub async fn token<F, Fut>(&self, authenticate: F) -> SourceResult<String>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SourceResult<Lease>> + Send + 'static,
    {
        let (generation, pending) = {
            let mut slot = self.slot.lock();
            if let Some(ref lease) = slot.current {
                if lease.is_valid(self.margin) {
                    return Ok(lease.token.clone());
                }
                debug!("{}: lease expired", self.source);
            }

            let in_flight = slot
                .pending
                .as_ref()
                .map(|(generation, pending)| (*generation, pending.clone()));
            match in_flight {
                Some(joined) => joined,
                None => {
                    slot.generation += 1;
                    let generation = slot.generation;
                    let pending = self.refresh(authenticate).boxed().shared();
                    slot.pending = Some((generation, pending.clone()));
                    (generation, pending)
                }
            }
        };

        let result = pending.await;

        let mut slot = self.slot.lock();
        if matches!(slot.pending, Some((g, _)) if g == generation) {
            slot.pending = None;
            slot.current = result.as_ref().ok().cloned();
        }
        result.map(|lease| lease.token)
    }

    fn refresh<F, Fut>(&self, authenticate: F) -> impl Future<Output = SourceResult<Lease>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SourceResult<Lease>> + Send + 'static,
    {
        let cache = self.cache.clone();
        let key = lease_key(&self.source);
        let source = self.source.clone();
        let margin = self.margin;

        async move {
            if let Some(lease) = cache.get_json::<Lease>(&key).await {
                if lease.is_valid(margin) {
                    debug!("{}: reusing shared lease", source);
                    return Ok(lease);
                }
            }

            info!("{}: authenticating", source);
            match authenticate().await {
                Ok(lease) => {
                    let remaining = lease.remaining(margin);
                    if remaining.is_zero() {
                        return Err(SourceError::AuthenticationFailed(format!(
                            "{} issued an already expired token",
                            source
                        )));
                    }
                    cache.set_json(key, &lease, Some(remaining)).await;
                    Ok(lease)
                }
                Err(e) => {
                    warn!("{}: authentication failed: {}", source, e);
                    Err(match e {
                        SourceError::AuthenticationFailed(_) => e,
                        other => SourceError::AuthenticationFailed(other.to_string()),
                    })
                }
            }
        }
    }

    /// Drop the lease, e.g. after the provider rejected it
    pub async fn invalidate(&self) {
        self.slot.lock().current = None;
        self.cache.delete(&lease_key(&self.source)).await;
        info!("{}: lease invalidated", self.source);
    }
}
