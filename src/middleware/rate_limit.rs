//! Per-client fixed-window rate limiting.
//!
//! Each client key (the peer IP by default) owns a counter that resets when
//! its window elapses. One lock guards the whole key space; `admit` and the
//! background sweep are the only code that takes it.
//!
//! Windows are fixed, not sliding: a client can get up to `2 * limit`
//! requests through in a short span straddling a reset.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::RateLimitConfig;

/// Counter state for one client key.
#[derive(Debug, Clone, Copy)]
pub struct ClientBucket {
    pub count: u32,
    pub window_reset_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected {
        /// Unix seconds at which the client's window resets.
        reset_at: i64,
        limit: u32,
        window: Duration,
    },
}

#[derive(Debug)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, ClientBucket>>>,
    limit: u32,
    window: Duration,
    stop: watch::Sender<bool>,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Creates a limiter without a background sweep.
    pub fn new(limit: u32, window: Duration) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            limit,
            window,
            stop,
            sweeper: std::sync::Mutex::new(None),
        }
    }

    /// Creates a limiter and starts its sweep task on the current runtime.
    pub fn start(config: &RateLimitConfig) -> Arc<Self> {
        let limiter = Arc::new(Self::new(config.limit, config.window()));
        limiter.spawn_sweeper(config.sweep_interval());
        limiter
    }

    /// Decides whether one more request from `client_key` fits in its window.
    pub async fn admit(&self, client_key: &str) -> Admission {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;

        match buckets.get_mut(client_key) {
            None => {
                buckets.insert(
                    client_key.to_string(),
                    ClientBucket {
                        count: 1,
                        window_reset_at: now + self.window,
                    },
                );
                Admission::Allowed
            }
            Some(bucket) if now >= bucket.window_reset_at => {
                bucket.count = 1;
                bucket.window_reset_at = now + self.window;
                Admission::Allowed
            }
            Some(bucket) if bucket.count >= self.limit => Admission::Rejected {
                reset_at: unix_seconds_at(bucket.window_reset_at, now),
                limit: self.limit,
                window: self.window,
            },
            Some(bucket) => {
                bucket.count += 1;
                Admission::Allowed
            }
        }
    }

    /// Drops buckets whose window ended at least one further window ago.
    /// Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        sweep(&self.buckets, self.window).await
    }

    /// Number of client keys currently tracked.
    pub async fn tracked_clients(&self) -> usize {
        self.buckets.lock().await.len()
    }

    pub async fn bucket(&self, client_key: &str) -> Option<ClientBucket> {
        self.buckets.lock().await.get(client_key).copied()
    }

    fn spawn_sweeper(&self, interval: Duration) {
        let buckets = Arc::clone(&self.buckets);
        let window = self.window;
        let mut stop = self.stop.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = sweep(&buckets, window).await;
                        if removed > 0 {
                            tracing::debug!(removed, "Swept expired rate limit buckets");
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("Rate limit sweeper stopped");
        });

        if let Ok(mut slot) = self.sweeper.lock() {
            *slot = Some(handle);
        }
    }

    /// Stops the sweep task and waits for it to exit.
    pub async fn shutdown(&self) {
        let _ = self.stop.send(true);

        let handle = match self.sweeper.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Rate limit sweeper ended abnormally");
            }
        }
    }
}

async fn sweep(buckets: &Mutex<HashMap<String, ClientBucket>>, window: Duration) -> usize {
    let now = Instant::now();
    let mut buckets = buckets.lock().await;
    let before = buckets.len();
    buckets.retain(|_, bucket| now < bucket.window_reset_at + window);
    before - buckets.len()
}

fn unix_seconds_at(deadline: Instant, now: Instant) -> i64 {
    let remaining = deadline.saturating_duration_since(now);
    let remaining = chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());
    (Utc::now() + remaining).timestamp()
}

/// Renders a window as a compact duration: `1m0s`, `1s`, `1h30m0s`.
pub fn format_window(window: Duration) -> String {
    let total_ms = window.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }
    if total_ms < 1000 {
        return format!("{total_ms}ms");
    }

    let secs = window.as_secs();
    let millis = window.subsec_millis();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    let seconds = if millis == 0 {
        format!("{seconds}s")
    } else {
        let frac = format!("{millis:03}");
        format!("{seconds}.{}s", frac.trim_end_matches('0'))
    };

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}")
    } else {
        seconds
    }
}
