//! Collision-resistant id generation
//!
//! Hashes `identifier | creator | timestamp | nonce` with SHA-256, renders
//! the digest in base-36, and truncates to an adaptive length chosen from the
//! expected element count. Collisions are resolved by walking the nonce, then
//! growing the hash, before giving up with a conflict.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::ElementId;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Shortest hash the scheme emits
pub const MIN_HASH_LENGTH: usize = 3;
/// Longest hash the scheme emits
pub const MAX_HASH_LENGTH: usize = 8;
/// Default hash length when no element count is known
pub const DEFAULT_HASH_LENGTH: usize = 4;
/// Highest nonce tried at each hash length
pub const MAX_NONCE: u32 = 9;

/// Monotonic disambiguator folded into the timestamp so that two calls in
/// the same millisecond never hash identical input.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Asynchronous collision probe, typically backed by the element store
#[async_trait]
pub trait CollisionCheck: Send + Sync {
    /// Whether an element with this id already exists
    async fn exists(&self, id: &str) -> bool;
}

/// Lifecycle events emitted during generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdEvent {
    GenerationStarted { identifier: String },
    GenerationCompleted { id: String, attempts: u32 },
    GenerationFailed { identifier: String, reason: String },
    CollisionDetected { candidate: String },
    NonceIncrement { nonce: u32 },
    LengthIncrease { length: usize },
}

/// Pluggable sink for [`IdEvent`]s; delivery is synchronous, so observers
/// must not call back into the generator.
pub trait IdObserver: Send + Sync {
    fn on_event(&self, event: &IdEvent);
}

/// Observer that counts events by kind, for metrics and tests
#[derive(Debug, Default)]
pub struct CountingObserver {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    collisions: AtomicU64,
    nonce_increments: AtomicU64,
    length_increases: AtomicU64,
}

impl CountingObserver {
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn collisions(&self) -> u64 {
        self.collisions.load(Ordering::Relaxed)
    }

    pub fn nonce_increments(&self) -> u64 {
        self.nonce_increments.load(Ordering::Relaxed)
    }

    pub fn length_increases(&self) -> u64 {
        self.length_increases.load(Ordering::Relaxed)
    }
}

impl IdObserver for CountingObserver {
    fn on_event(&self, event: &IdEvent) {
        let counter = match event {
            IdEvent::GenerationStarted { .. } => &self.started,
            IdEvent::GenerationCompleted { .. } => &self.completed,
            IdEvent::GenerationFailed { .. } => &self.failed,
            IdEvent::CollisionDetected { .. } => &self.collisions,
            IdEvent::NonceIncrement { .. } => &self.nonce_increments,
            IdEvent::LengthIncrease { .. } => &self.length_increases,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Options for a single [`IdGenerator::generate`] call
#[derive(Default)]
pub struct GenerateOptions<'a> {
    /// Caller-provided timestamp; wall clock when absent
    pub time: Option<DateTime<Utc>>,
    /// Expected catalog size, used to pick the initial hash length
    pub element_count: Option<u64>,
    /// Collision probe; when absent the first candidate wins
    pub collision_check: Option<&'a dyn CollisionCheck>,
}

/// Generator for root element ids
pub struct IdGenerator {
    prefix: String,
    observer: Option<Arc<dyn IdObserver>>,
}

impl IdGenerator {
    /// Create a generator for a two-letter prefix tag
    pub fn new(prefix: impl Into<String>) -> OrchestratorResult<Self> {
        let prefix = prefix.into();
        let valid = prefix.len() == 2 && prefix.bytes().all(|b| b.is_ascii_lowercase());
        if !valid {
            return Err(OrchestratorError::validation(format!(
                "prefix must be two lowercase letters, got {prefix:?}"
            )));
        }
        Ok(Self {
            prefix,
            observer: None,
        })
    }

    /// Attach an event observer
    pub fn with_observer(mut self, observer: Arc<dyn IdObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn emit(&self, event: IdEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }

    /// Generate a collision-free root id
    ///
    /// Walks nonces 0..=[`MAX_NONCE`] at the initial hash length, then grows
    /// the hash up to [`MAX_HASH_LENGTH`] resetting the nonce each time, and
    /// fails with a conflict once every combination is exhausted.
    pub async fn generate(
        &self,
        identifier: &str,
        creator: &str,
        opts: GenerateOptions<'_>,
    ) -> OrchestratorResult<ElementId> {
        self.emit(IdEvent::GenerationStarted {
            identifier: identifier.to_string(),
        });

        let timestamp_ns = timestamp_ns(opts.time);
        let initial_length = opts
            .element_count
            .map(hash_length_for_count)
            .unwrap_or(DEFAULT_HASH_LENGTH);

        let mut attempts: u32 = 0;
        for length in initial_length..=MAX_HASH_LENGTH {
            if length > initial_length {
                self.emit(IdEvent::LengthIncrease { length });
                debug!(length, identifier, "growing id hash length");
            }
            for nonce in 0..=MAX_NONCE {
                attempts += 1;
                let digest = hash_input(identifier, creator, timestamp_ns, nonce);
                let hash = base36(&digest);
                let candidate = format!("{}-{}", self.prefix, &hash[..length]);

                let Some(check) = opts.collision_check else {
                    self.emit(IdEvent::GenerationCompleted {
                        id: candidate.clone(),
                        attempts,
                    });
                    return ElementId::parse(&candidate);
                };

                if !check.exists(&candidate).await {
                    self.emit(IdEvent::GenerationCompleted {
                        id: candidate.clone(),
                        attempts,
                    });
                    return ElementId::parse(&candidate);
                }

                self.emit(IdEvent::CollisionDetected {
                    candidate: candidate.clone(),
                });
                if nonce < MAX_NONCE {
                    self.emit(IdEvent::NonceIncrement { nonce: nonce + 1 });
                }
            }
        }

        warn!(identifier, attempts, "id space exhausted");
        self.emit(IdEvent::GenerationFailed {
            identifier: identifier.to_string(),
            reason: "exhausted nonce and length space".to_string(),
        });
        Err(OrchestratorError::conflict(format!(
            "could not find a free id for {identifier:?} after {attempts} attempts"
        )))
    }
}

/// Initial hash length targeting ~1% birthday-collision probability
fn hash_length_for_count(count: u64) -> usize {
    match count {
        0..=99 => 3,
        100..=499 => 4,
        500..=2_999 => 5,
        3_000..=19_999 => 6,
        20_000..=99_999 => 7,
        _ => 8,
    }
}

/// Nanosecond timestamp with a folded-in monotonic counter
fn timestamp_ns(time: Option<DateTime<Utc>>) -> u64 {
    let base = match time {
        Some(t) => t.timestamp_nanos_opt().unwrap_or_default().max(0) as u64,
        None => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64,
    };
    base.wrapping_add(SEQUENCE.fetch_add(1, Ordering::Relaxed))
}

fn hash_input(identifier: &str, creator: &str, timestamp_ns: u64, nonce: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(identifier.as_bytes());
    hasher.update(b"|");
    hasher.update(creator.as_bytes());
    hasher.update(b"|");
    hasher.update(timestamp_ns.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(nonce.to_string().as_bytes());
    hasher.finalize().into()
}

/// Render a 256-bit digest in base-36 by repeated division
///
/// The digest is treated as one big integer; no packing into native widths.
fn base36(digest: &[u8; 32]) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut scratch = digest.to_vec();
    let mut out = Vec::with_capacity(50);

    while scratch.iter().any(|&b| b != 0) {
        let mut remainder: u32 = 0;
        for byte in scratch.iter_mut() {
            let acc = (remainder << 8) | u32::from(*byte);
            *byte = (acc / 36) as u8;
            remainder = acc % 36;
        }
        out.push(DIGITS[remainder as usize]);
    }
    if out.is_empty() {
        out.push(b'0');
    }
    // Digits come out least-significant first; MAX_HASH_LENGTH leading
    // characters must exist even for small digests, so pad with zeros.
    while out.len() < MAX_HASH_LENGTH {
        out.push(b'0');
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ascii")
}
