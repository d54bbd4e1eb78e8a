//! Login lifecycle: token issuing, freshness checks and culling.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, trace};

use crate::error::{FsError, FsResult};
use crate::types::{NodeId, Token, UserId};

/// Time source for expiry decisions
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// An authenticated login in the registry
#[derive(Clone, Debug)]
pub struct Login {
    pub user: UserId,
    pub cwd: NodeId,
    pub token: Token,
    pub expires_at: DateTime<Utc>,
}

impl Login {
    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn extend(&mut self, now: DateTime<Utc>, ttl: Duration) -> FsResult<()> {
        self.expires_at = expiry(now, ttl)?;
        Ok(())
    }
}

/// `now + ttl`, failing instead of overflowing the timestamp range.
fn expiry(now: DateTime<Utc>, ttl: Duration) -> FsResult<DateTime<Utc>> {
    now.checked_add_signed(ttl)
        .ok_or_else(|| FsError::InvalidConfig(format!("session ttl of {}s overflows the clock", ttl.num_seconds())))
}

/// Per-call session context handed to service operations
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub token: Token,
    pub user: UserId,
    pub cwd: NodeId,
}

/// Active logins keyed by token. Callers hold the registry lock across
/// check-then-insert, so tokens stay unique.
#[derive(Debug, Default)]
pub(crate) struct SessionRegistry {
    logins: HashMap<Token, Login>,
}

impl SessionRegistry {
    pub(crate) fn len(&self) -> usize {
        self.logins.len()
    }

    /// Drop every expired login; returns how many went.
    pub(crate) fn cull(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.logins.len();
        self.logins.retain(|_, login| !login.has_expired(now));
        let culled = before - self.logins.len();
        if culled > 0 {
            debug!(culled, "expired logins removed");
        }
        culled
    }

    /// Register a new login, drawing tokens from `next_token` until one is
    /// free.
    pub(crate) fn issue(
        &mut self,
        user: UserId,
        cwd: NodeId,
        now: DateTime<Utc>,
        ttl: Duration,
        max_attempts: u32,
        mut next_token: impl FnMut() -> u64,
    ) -> FsResult<Token> {
        let expires_at = expiry(now, ttl)?;
        let mut attempts = 0;
        let token = loop {
            if attempts == max_attempts {
                return Err(FsError::TokenGeneration { attempts });
            }
            attempts += 1;
            let candidate = Token::from_u64(next_token());
            if !self.logins.contains_key(&candidate) {
                break candidate;
            }
            trace!(attempts, "token collision, retrying");
        };

        self.logins.insert(
            token,
            Login {
                user,
                cwd,
                token,
                expires_at,
            },
        );
        Ok(token)
    }

    /// Validate `token` and refresh its freshness window.
    pub(crate) fn touch(&mut self, token: Token, now: DateTime<Utc>, ttl: Duration) -> FsResult<Session> {
        let login = self.logins.get_mut(&token).ok_or(FsError::InvalidToken)?;
        if login.has_expired(now) {
            debug!(%token, "token expired");
            return Err(FsError::InvalidToken);
        }
        login.extend(now, ttl)?;
        Ok(Session {
            token,
            user: login.user.clone(),
            cwd: login.cwd,
        })
    }

    pub(crate) fn set_cwd(&mut self, token: Token, cwd: NodeId) -> FsResult<()> {
        let login = self.logins.get_mut(&token).ok_or(FsError::InvalidToken)?;
        login.cwd = cwd;
        Ok(())
    }

    pub(crate) fn remove(&mut self, token: Token) -> Option<Login> {
        self.logins.remove(&token)
    }

    pub(crate) fn clear(&mut self) -> usize {
        let count = self.logins.len();
        self.logins.clear();
        count
    }

    pub(crate) fn tokens(&self) -> Vec<Token> {
        self.logins.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL_SECS: i64 = 60;

    fn ttl() -> Duration {
        Duration::seconds(TTL_SECS)
    }

    #[test]
    fn test_touch_extends_window() {
        let clock = ManualClock::default();
        let mut registry = SessionRegistry::default();
        let mut seq = 0u64;
        let token = registry
            .issue(UserId::new("alice"), NodeId(3), clock.now(), ttl(), 8, || {
                seq += 1;
                seq
            })
            .unwrap();

        clock.advance(Duration::seconds(TTL_SECS - 1));
        let session = registry.touch(token, clock.now(), ttl()).unwrap();
        assert_eq!(session.user, UserId::new("alice"));
        assert_eq!(session.cwd, NodeId(3));

        // Refreshed, so still valid well past the original deadline.
        clock.advance(Duration::seconds(TTL_SECS - 1));
        assert!(registry.touch(token, clock.now(), ttl()).is_ok());

        clock.advance(ttl());
        assert!(matches!(registry.touch(token, clock.now(), ttl()), Err(FsError::InvalidToken)));
    }

    #[test]
    fn test_overflowing_expiry_is_an_error() {
        let mut registry = SessionRegistry::default();
        let res = registry.issue(UserId::new("a"), NodeId(1), DateTime::<Utc>::MAX_UTC, ttl(), 4, || 1);
        assert!(matches!(res, Err(FsError::InvalidConfig(_))));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_unknown_token_is_invalid() {
        let mut registry = SessionRegistry::default();
        let res = registry.touch(Token::from_u64(42), Utc::now(), ttl());
        assert!(matches!(res, Err(FsError::InvalidToken)));
    }

    #[test]
    fn test_issue_retries_on_collision() {
        let now = Utc::now();
        let mut registry = SessionRegistry::default();
        let first = registry
            .issue(UserId::new("a"), NodeId(1), now, ttl(), 8, || 7)
            .unwrap();

        let mut draws = vec![7u64, 7, 9].into_iter();
        let second = registry
            .issue(UserId::new("b"), NodeId(1), now, ttl(), 8, || draws.next().unwrap_or(0))
            .unwrap();
        assert_eq!(first, Token::from_u64(7));
        assert_eq!(second, Token::from_u64(9));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_issue_gives_up_after_max_attempts() {
        let now = Utc::now();
        let mut registry = SessionRegistry::default();
        registry.issue(UserId::new("a"), NodeId(1), now, ttl(), 4, || 1).unwrap();
        let res = registry.issue(UserId::new("b"), NodeId(1), now, ttl(), 4, || 1);
        assert!(matches!(res, Err(FsError::TokenGeneration { attempts: 4 })));
    }

    #[test]
    fn test_cull_removes_only_expired() {
        let clock = ManualClock::default();
        let mut registry = SessionRegistry::default();
        let mut seq = 0u64;
        let mut next = || {
            seq += 1;
            seq
        };
        let old = registry
            .issue(UserId::new("a"), NodeId(1), clock.now(), ttl(), 8, &mut next)
            .unwrap();
        clock.advance(Duration::seconds(TTL_SECS / 2));
        let fresh = registry
            .issue(UserId::new("b"), NodeId(1), clock.now(), ttl(), 8, &mut next)
            .unwrap();

        clock.advance(Duration::seconds(TTL_SECS / 2));
        assert_eq!(registry.cull(clock.now()), 1);
        assert_eq!(registry.tokens(), vec![fresh]);
        assert!(registry.remove(old).is_none());
    }
}
