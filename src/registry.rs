//! Connection Registry: owns live sessions and the two fleet-wide
//! admission counters.
//!
//! `DashMap` gives O(1) session lookup without a single coarse lock, the
//! same approach this crate's agent registry used; the two admission
//! counters are plain `AtomicUsize`s guarded by compare-exchange loops so
//! `start_sending`/`acquire_processing_slot` stay atomic with respect to
//! their release counterparts.

use crate::domain_types::{ClientTimezone, MaxProcessing, MaxSending};
use crate::time_provider::SharedTimeProvider;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A live client session.
pub struct Session {
    /// Declared timezone at handshake (or reconnect).
    pub timezone: ClientTimezone,
    /// Channel the Session Handler reads outbound frames from.
    pub outbound: UnboundedSender<crate::session::OutboundFrame>,
    /// Last time a heartbeat or inbound frame was observed.
    pub last_heartbeat_at: std::sync::Mutex<Instant>,
    /// Whether this session currently holds a sending-gate slot.
    pub is_sending: std::sync::atomic::AtomicBool,
    /// Cancelled by `disconnect` to tear down this session's receive loop
    /// and trigger a graceful transport close, from either the heartbeat
    /// scanner or the session's own transport-error path.
    pub cancellation: CancellationToken,
}

/// Owns the session map and the two admission gates.
pub struct ConnectionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    sending_count: AtomicUsize,
    processing_count: AtomicUsize,
    max_sending: MaxSending,
    max_processing: MaxProcessing,
    #[allow(dead_code)]
    time_provider: SharedTimeProvider,
    heartbeat_armed: AtomicBool,
}

impl ConnectionRegistry {
    /// Creates an empty registry with the given admission limits.
    #[must_use]
    pub fn new(
        max_sending: MaxSending,
        max_processing: MaxProcessing,
        time_provider: SharedTimeProvider,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            sending_count: AtomicUsize::new(0),
            processing_count: AtomicUsize::new(0),
            max_sending,
            max_processing,
            time_provider,
            heartbeat_armed: AtomicBool::new(false),
        }
    }

    /// Returns `true` exactly once, for the caller that wins the race to be
    /// the first `connect`. Per spec.md §4.3/§4.4, the heartbeat scanner is
    /// armed lazily on the first connection rather than spawned unconditionally
    /// at process startup.
    pub fn arm_heartbeat_once(&self) -> bool {
        self.heartbeat_armed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Registers a session, overwriting any existing entry for the same
    /// `client_id`. Always succeeds. Returns the session's cancellation
    /// token; the Session Handler selects on it to learn when it has been
    /// evicted, and the registry cancels it from `disconnect`.
    pub fn connect(
        &self,
        client_id: &str,
        timezone: ClientTimezone,
        outbound: UnboundedSender<crate::session::OutboundFrame>,
    ) -> CancellationToken {
        let cancellation = CancellationToken::new();
        let session = Arc::new(Session {
            timezone,
            outbound,
            last_heartbeat_at: std::sync::Mutex::new(Instant::now()),
            is_sending: std::sync::atomic::AtomicBool::new(false),
            cancellation: cancellation.clone(),
        });
        self.sessions.insert(client_id.to_string(), session);
        cancellation
    }

    /// Removes the session, idempotently, and cancels its token so the
    /// Session Handler's receive loop unblocks and attempts a graceful
    /// transport close with code 1000. Returns the removed session, if one
    /// existed.
    pub fn disconnect(&self, client_id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(client_id).map(|(_, session)| session);
        if let Some(session) = &removed {
            if session.is_sending.swap(false, Ordering::AcqRel) {
                self.sending_count.fetch_sub(1, Ordering::AcqRel);
            }
            session.cancellation.cancel();
        }
        removed
    }

    /// Attempts to mark `client_id` as sending. Returns `false` if the
    /// fleet-wide sending gate is already saturated.
    pub fn start_sending(&self, client_id: &str) -> bool {
        let Some(session) = self.sessions.get(client_id) else {
            return false;
        };
        if session.is_sending.load(Ordering::Acquire) {
            return true;
        }

        loop {
            let current = self.sending_count.load(Ordering::Acquire);
            if current >= self.max_sending.as_usize() {
                return false;
            }
            if self
                .sending_count
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                session.is_sending.store(true, Ordering::Release);
                return true;
            }
        }
    }

    /// Clears the sending flag for `client_id`. A no-op if it was not set.
    pub fn stop_sending(&self, client_id: &str) {
        if let Some(session) = self.sessions.get(client_id) {
            if session.is_sending.swap(false, Ordering::AcqRel) {
                self.sending_count.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    /// Attempts to acquire a fleet-wide processing slot.
    pub fn acquire_processing_slot(&self) -> bool {
        loop {
            let current = self.processing_count.load(Ordering::Acquire);
            if current >= self.max_processing.as_usize() {
                return false;
            }
            if self
                .processing_count
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Releases a processing slot, saturating at zero.
    pub fn release_processing_slot(&self) {
        let _ = self
            .processing_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(1))
            });
    }

    /// Refreshes the liveness timestamp for `client_id`.
    pub fn touch_heartbeat(&self, client_id: &str) {
        if let Some(session) = self.sessions.get(client_id) {
            *session.last_heartbeat_at.lock().expect("heartbeat mutex poisoned") = Instant::now();
        }
    }

    /// Number of sessions currently marked sending.
    pub fn sending_count(&self) -> usize {
        self.sending_count.load(Ordering::Acquire)
    }

    /// Number of in-flight message processing operations.
    pub fn processing_count(&self) -> usize {
        self.processing_count.load(Ordering::Acquire)
    }

    /// Number of live sessions.
    pub fn active_connections(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshots `(client_id, age_since_last_heartbeat)` for every live
    /// session, for the heartbeat scanner to act on outside any lock.
    pub fn heartbeat_snapshot(&self) -> Vec<(String, Arc<Session>, std::time::Duration)> {
        let now = Instant::now();
        self.sessions
            .iter()
            .map(|entry| {
                let age = now.duration_since(
                    *entry
                        .value()
                        .last_heartbeat_at
                        .lock()
                        .expect("heartbeat mutex poisoned"),
                );
                (entry.key().clone(), entry.value().clone(), age)
            })
            .collect()
    }
}
