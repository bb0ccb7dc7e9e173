//! Proof-of-work admission tokens.
//!
//! A client asks for a challenge, searches for a nonce such that
//! `SHA-256(context || target || nonce)` starts with `difficulty` zero hex
//! digits, and attaches `{target, nonce}` to its next admission-controlled
//! request. Targets are single-use and expire after a TTL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

/// Default challenge lifetime (90 seconds).
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(90);

/// Default number of leading zero hex digits required.
pub const DEFAULT_DIFFICULTY: u32 = 3;

/// Iteration cap used by clients when searching for a nonce.
pub const MAX_SOLVE_ITERATIONS: u64 = 1_000_000;

const TARGET_BYTES: usize = 32;

pub struct ChallengeConfig {
    pub ttl: Duration,
    pub difficulty: u32,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CHALLENGE_TTL,
            difficulty: DEFAULT_DIFFICULTY,
        }
    }
}

struct PendingChallenge {
    issued_at: Instant,
    context: Option<String>,
    expiry: AbortHandle,
}

struct Inner {
    outstanding: Mutex<HashMap<String, PendingChallenge>>,
    ttl: Duration,
    difficulty: u32,
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, HashMap<String, PendingChallenge>> {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn expire(&self, target: &str) {
        let mut table = self.table();
        let stale = table
            .get(target)
            .map(|pending| pending.issued_at.elapsed() >= self.ttl)
            .unwrap_or(false);
        if stale {
            table.remove(target);
            debug!(challenge = target, "challenge expired");
        }
    }
}

/// Issues and validates single-use proof-of-work targets.
///
/// Cheap to clone; clones share the same outstanding table.
#[derive(Clone)]
pub struct ChallengeEngine {
    inner: Arc<Inner>,
}

impl ChallengeEngine {
    pub fn new(config: ChallengeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                outstanding: Mutex::new(HashMap::new()),
                ttl: config.ttl,
                difficulty: config.difficulty,
            }),
        }
    }

    pub fn difficulty(&self) -> u32 {
        self.inner.difficulty
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Number of targets currently outstanding.
    pub fn outstanding(&self) -> usize {
        self.inner.table().len()
    }

    /// Issue a fresh target, optionally bound to a context string.
    ///
    /// Must be called from within a tokio runtime: the expiry is a spawned
    /// timer task.
    pub fn issue(&self, context: Option<&str>) -> String {
        let mut raw = [0u8; TARGET_BYTES];
        OsRng.fill_bytes(&mut raw);
        let target = hex::encode(raw);

        let mut table = self.inner.table();
        let expiry = spawn_expiry(Arc::downgrade(&self.inner), target.clone(), self.inner.ttl);
        table.insert(
            target.clone(),
            PendingChallenge {
                issued_at: Instant::now(),
                context: context.map(str::to_owned),
                expiry,
            },
        );
        debug!(challenge = %target, "challenge issued");
        target
    }

    /// Check a solution and consume the target on success.
    ///
    /// Returns false for unknown, expired or context-mismatched targets and
    /// for nonces that miss the difficulty. Failed attempts leave the target
    /// outstanding. When several callers race on the same target, at most
    /// one of them gets `true`.
    pub fn validate(&self, target: &str, nonce: &str, context: Option<&str>) -> bool {
        {
            let table = self.inner.table();
            let Some(pending) = table.get(target) else {
                return false;
            };
            if pending.issued_at.elapsed() >= self.inner.ttl {
                return false;
            }
            if pending.context.is_some() && pending.context.as_deref() != context {
                return false;
            }
        }

        let hash = digest(context.unwrap_or(""), target, nonce);
        if leading_zero_nibbles(&hash) < self.inner.difficulty {
            return false;
        }

        match self.inner.table().remove(target) {
            Some(pending) => {
                pending.expiry.abort();
                debug!(challenge = target, "challenge consumed");
                true
            }
            None => false,
        }
    }
}

fn spawn_expiry(inner: Weak<Inner>, target: String, ttl: Duration) -> AbortHandle {
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        if let Some(inner) = inner.upgrade() {
            inner.expire(&target);
        }
    })
    .abort_handle()
}

/// `SHA-256(context || target || nonce)`.
pub fn digest(context: &str, target: &str, nonce: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(context.as_bytes());
    hasher.update(target.as_bytes());
    hasher.update(nonce.as_bytes());
    hasher.finalize().into()
}

/// Number of leading zero hex digits in `hash`.
pub fn leading_zero_nibbles(hash: &[u8]) -> u32 {
    let mut count = 0;
    for byte in hash {
        if *byte == 0 {
            count += 2;
            continue;
        }
        if byte >> 4 == 0 {
            count += 1;
        }
        break;
    }
    count
}

/// Search decimal nonces `0..max_iterations` for one meeting `difficulty`.
pub fn solve(
    target: &str,
    difficulty: u32,
    context: Option<&str>,
    max_iterations: u64,
) -> Option<String> {
    let context = context.unwrap_or("");
    (0..max_iterations)
        .map(|n| n.to_string())
        .find(|nonce| leading_zero_nibbles(&digest(context, target, nonce)) >= difficulty)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(difficulty: u32) -> ChallengeEngine {
        ChallengeEngine::new(ChallengeConfig {
            difficulty,
            ..Default::default()
        })
    }

    #[test]
    fn counts_leading_zero_nibbles() {
        assert_eq!(leading_zero_nibbles(&[0x00, 0x00, 0x1f]), 4);
        assert_eq!(leading_zero_nibbles(&[0x00, 0x0f]), 3);
        assert_eq!(leading_zero_nibbles(&[0x10]), 0);
        assert_eq!(leading_zero_nibbles(&[0x01, 0x00]), 1);
    }

    #[test]
    fn digest_matches_hex_prefix_rule() {
        let target = "ab".repeat(32);
        let nonce = solve(&target, 3, Some("room-123"), MAX_SOLVE_ITERATIONS).unwrap();
        let hex_digest = hex::encode(digest("room-123", &target, &nonce));
        assert!(hex_digest.starts_with("000"));
    }

    #[tokio::test]
    async fn target_is_single_use() {
        let engine = engine(3);
        let target = engine.issue(None);
        assert_eq!(target.len(), 64);

        let nonce = solve(&target, 3, None, MAX_SOLVE_ITERATIONS).unwrap();
        assert!(engine.validate(&target, &nonce, None));
        assert!(!engine.validate(&target, &nonce, None));
        assert_eq!(engine.outstanding(), 0);
    }

    #[tokio::test]
    async fn failed_attempt_keeps_target() {
        let engine = engine(4);
        let target = engine.issue(None);

        let bad = (0..)
            .map(|n: u64| n.to_string())
            .find(|nonce| leading_zero_nibbles(&digest("", &target, nonce)) == 0)
            .unwrap();
        assert!(!engine.validate(&target, &bad, None));
        assert_eq!(engine.outstanding(), 1);

        let good = solve(&target, 4, None, 10_000_000).unwrap();
        assert!(engine.validate(&target, &good, None));
    }

    #[tokio::test]
    async fn context_changes_the_hash() {
        let engine = engine(3);
        let target = engine.issue(None);
        let nonce = solve(&target, 3, Some("brave-fox-101"), MAX_SOLVE_ITERATIONS).unwrap();

        // The nonce was found for one room id; hashing it with another is
        // overwhelmingly unlikely to pass.
        if leading_zero_nibbles(&digest("quiet-cat-202", &target, &nonce)) < 3 {
            assert!(!engine.validate(&target, &nonce, Some("quiet-cat-202")));
        }
        assert!(engine.validate(&target, &nonce, Some("brave-fox-101")));
    }

    #[tokio::test]
    async fn bound_context_must_match() {
        let engine = engine(1);
        let target = engine.issue(Some("brave-fox-101"));
        let nonce = solve(&target, 1, None, MAX_SOLVE_ITERATIONS).unwrap();
        assert!(!engine.validate(&target, &nonce, None));

        let nonce = solve(&target, 1, Some("brave-fox-101"), MAX_SOLVE_ITERATIONS).unwrap();
        assert!(engine.validate(&target, &nonce, Some("brave-fox-101")));
    }

    #[tokio::test]
    async fn unknown_target_fails() {
        let engine = engine(0);
        assert!(!engine.validate("deadbeef", "0", None));
    }

    #[tokio::test(start_paused = true)]
    async fn targets_expire_after_ttl() {
        let engine = ChallengeEngine::new(ChallengeConfig {
            ttl: Duration::from_secs(90),
            difficulty: 1,
        });
        let target = engine.issue(None);
        let nonce = solve(&target, 1, None, MAX_SOLVE_ITERATIONS).unwrap();

        tokio::time::sleep(Duration::from_secs(91)).await;
        assert_eq!(engine.outstanding(), 0);
        assert!(!engine.validate(&target, &nonce, None));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_validation_has_one_winner() {
        let engine = engine(2);
        let target = engine.issue(None);
        let nonce = solve(&target, 2, None, MAX_SOLVE_ITERATIONS).unwrap();

        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let engine = engine.clone();
                let target = target.clone();
                let nonce = nonce.clone();
                tokio::spawn(async move { engine.validate(&target, &nonce, None) })
            })
            .collect();

        let mut winners = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
