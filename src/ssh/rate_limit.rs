//! Per-source-IP connection rate limiting for the SSH listener.
//!
//! Sliding log: each IP keeps the instants of its accepted attempts. A new
//! attempt is allowed while fewer than `max_attempts` of them fall inside the
//! trailing `window`. Denied attempts are not recorded, so a client hammering
//! the listener cannot extend its own lockout.
//!
//! A background task owned by the limiter sweeps the map every
//! `cleanup_interval`, dropping attempts older than `2 × window` and IPs left
//! with none. Checks and sweeps share one mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_attempts: usize,
    pub window: Duration,
    pub cleanup_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

type AttemptLog = HashMap<String, Vec<Instant>>;

pub struct RateLimiter {
    config: RateLimitConfig,
    attempts: Arc<Mutex<AttemptLog>>,
    shutdown: watch::Sender<bool>,
}

impl RateLimiter {
    /// Create the limiter and start its cleanup task. Must be called from
    /// within a tokio runtime.
    pub fn new(config: RateLimitConfig) -> Arc<Self> {
        let attempts: Arc<Mutex<AttemptLog>> = Arc::default();
        let (shutdown, mut stopped) = watch::channel(false);

        let sweep_log = Arc::clone(&attempts);
        let retention = config.window * 2;
        let interval = config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => sweep(&sweep_log, retention, Instant::now()),
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            debug!("rate limiter cleanup stopped");
                            break;
                        }
                    }
                }
            }
        });

        Arc::new(Self {
            config,
            attempts,
            shutdown,
        })
    }

    /// Returns `true` and records the attempt if `ip` is under its limit.
    pub fn check_and_record(&self, ip: &str) -> bool {
        self.check_and_record_at(ip, Instant::now())
    }

    fn check_and_record_at(&self, ip: &str, now: Instant) -> bool {
        let Ok(mut log) = self.attempts.lock() else {
            warn!("rate limiter lock poisoned; denying connection");
            return false;
        };

        let window = self.config.window;
        let entry = log.entry(ip.to_string()).or_default();
        let live = entry
            .iter()
            .filter(|t| now.saturating_duration_since(**t) <= window)
            .count();

        if live >= self.config.max_attempts {
            if entry.is_empty() {
                log.remove(ip);
            }
            return false;
        }

        entry.push(now);
        true
    }

    /// Stop the background cleanup task.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    #[cfg(test)]
    fn sweep_at(&self, now: Instant) {
        sweep(&self.attempts, self.config.window * 2, now);
    }

    #[cfg(test)]
    fn tracked_ips(&self) -> usize {
        self.attempts.lock().map(|log| log.len()).unwrap_or(0)
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sweep(attempts: &Mutex<AttemptLog>, retention: Duration, now: Instant) {
    let Ok(mut log) = attempts.lock() else {
        warn!("rate limiter lock poisoned; skipping cleanup");
        return;
    };

    let before = log.len();
    log.retain(|_, times| {
        times.retain(|t| now.saturating_duration_since(*t) <= retention);
        !times.is_empty()
    });

    if before != log.len() {
        debug!(evicted = before - log.len(), tracked = log.len(), "rate limiter sweep");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_attempts: usize, window: Duration) -> Arc<RateLimiter> {
        RateLimiter::new(RateLimitConfig {
            max_attempts,
            window,
            cleanup_interval: Duration::from_secs(3600),
        })
    }

    #[tokio::test]
    async fn allows_up_to_max_attempts_within_window() {
        let rl = limiter(3, Duration::from_secs(60));
        let t0 = Instant::now();

        for i in 0..3 {
            assert!(rl.check_and_record_at("10.0.0.1", t0 + Duration::from_millis(i)));
        }
        assert!(!rl.check_and_record_at("10.0.0.1", t0 + Duration::from_millis(10)));
        assert!(!rl.check_and_record_at("10.0.0.1", t0 + Duration::from_secs(59)));
    }

    #[tokio::test]
    async fn allows_again_after_window_elapses() {
        let window = Duration::from_secs(60);
        let rl = limiter(2, window);
        let t0 = Instant::now();

        assert!(rl.check_and_record_at("10.0.0.1", t0));
        assert!(rl.check_and_record_at("10.0.0.1", t0));
        assert!(!rl.check_and_record_at("10.0.0.1", t0 + Duration::from_secs(30)));
        assert!(rl.check_and_record_at("10.0.0.1", t0 + window + Duration::from_millis(1)));
    }

    #[tokio::test]
    async fn denied_attempts_do_not_extend_the_lockout() {
        let window = Duration::from_secs(10);
        let rl = limiter(1, window);
        let t0 = Instant::now();

        assert!(rl.check_and_record_at("10.0.0.1", t0));
        for s in 1..10 {
            assert!(!rl.check_and_record_at("10.0.0.1", t0 + Duration::from_secs(s)));
        }
        assert!(rl.check_and_record_at("10.0.0.1", t0 + Duration::from_secs(11)));
    }

    #[tokio::test]
    async fn ips_are_limited_independently() {
        let rl = limiter(1, Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(rl.check_and_record_at("10.0.0.1", t0));
        assert!(!rl.check_and_record_at("10.0.0.1", t0));
        assert!(rl.check_and_record_at("10.0.0.2", t0));
        assert!(rl.check_and_record_at("::1", t0));
    }

    #[tokio::test]
    async fn zero_max_attempts_denies_everything_without_tracking() {
        let rl = limiter(0, Duration::from_secs(60));
        assert!(!rl.check_and_record("10.0.0.1"));
        assert_eq!(rl.tracked_ips(), 0);
    }

    #[tokio::test]
    async fn sweep_evicts_idle_ips_after_twice_the_window() {
        let window = Duration::from_secs(60);
        let rl = limiter(5, window);
        let t0 = Instant::now();

        rl.check_and_record_at("10.0.0.1", t0);
        rl.check_and_record_at("10.0.0.2", t0 + window);

        rl.sweep_at(t0 + window + Duration::from_secs(1));
        assert_eq!(rl.tracked_ips(), 2, "entries inside 2x window are kept");

        rl.sweep_at(t0 + window * 2 + Duration::from_secs(1));
        assert_eq!(rl.tracked_ips(), 1);

        rl.sweep_at(t0 + window * 3 + Duration::from_secs(1));
        assert_eq!(rl.tracked_ips(), 0);
    }

    #[tokio::test]
    async fn background_task_sweeps_and_stops() {
        let rl = RateLimiter::new(RateLimitConfig {
            max_attempts: 5,
            window: Duration::from_millis(20),
            cleanup_interval: Duration::from_millis(10),
        });
        assert!(rl.check_and_record("10.0.0.1"));
        assert_eq!(rl.tracked_ips(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(rl.tracked_ips(), 0);

        rl.stop();
        tokio::task::yield_now().await;
        assert!(rl.check_and_record("10.0.0.1"));
    }
}
