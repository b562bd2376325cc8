//! Retransmission timer.
//!
//! Reliable delivery requires that unacknowledged packets are re-sent if no
//! ACK arrives within a bounded time.  This module provides:
//! - [`TimerConfig`] — the RTT estimate and the multiplier that turns it into
//!   a timeout (`timeout = 4 × RTT`, 500 ms with the 125 ms default).
//! - [`RetransmitTimer`] — a single cancellable, restartable countdown keyed
//!   to the sequence number whose acknowledgement it is waiting for.
//!
//! The timer never spawns a task.  Connection loops race
//! [`RetransmitTimer::expired`] against the socket inside `tokio::select!`;
//! whichever completes first decides the next action.  A disarmed timer's
//! future never completes, so the select simply waits on the socket.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// Adjustable timeout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// Round-trip time estimate.
    pub rtt: Duration,
    /// Timeout is `rtt × rtt_multiplier`.
    pub rtt_multiplier: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            rtt: Duration::from_millis(125),
            rtt_multiplier: 4,
        }
    }
}

impl TimerConfig {
    /// Config with the given RTT and the default multiplier.
    pub fn with_rtt(rtt: Duration) -> Self {
        Self {
            rtt,
            ..Self::default()
        }
    }

    /// Retransmission timeout derived from the RTT estimate, saturating at
    /// [`Duration::MAX`].  Validated configs never get near it.
    pub fn timeout(&self) -> Duration {
        self.checked_timeout().unwrap_or(Duration::MAX)
    }

    /// `rtt × rtt_multiplier`, or `None` on overflow.
    pub fn checked_timeout(&self) -> Option<Duration> {
        self.rtt.checked_mul(self.rtt_multiplier)
    }
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    key: u32,
    deadline: Instant,
}

/// A running retransmit timer for one connection.
#[derive(Debug)]
pub struct RetransmitTimer {
    timeout: Duration,
    armed: Option<Armed>,
}

impl RetransmitTimer {
    /// Construct a disarmed timer that counts down `timeout` once armed.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            armed: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start (or restart) the countdown for the acknowledgement of `key`.
    pub fn arm(&mut self, key: u32) {
        self.armed = Some(Armed {
            key,
            deadline: Instant::now() + self.timeout,
        });
    }

    /// Restart the countdown for the current key.  No-op when disarmed.
    pub fn restart(&mut self) {
        if let Some(key) = self.key() {
            self.arm(key);
        }
    }

    /// Stop the countdown, returning the key it was waiting on.
    pub fn cancel(&mut self) -> Option<u32> {
        self.armed.take().map(|a| a.key)
    }

    /// Key the timer is currently armed for.
    pub fn key(&self) -> Option<u32> {
        self.armed.map(|a| a.key)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Bring the timer in line with the key a strategy wants covered.
    ///
    /// Arms a fresh countdown when the key changes, cancels on `None`, and
    /// leaves a running countdown for the same key untouched.
    pub fn track(&mut self, wanted: Option<u32>) {
        match wanted {
            None => {
                self.cancel();
            }
            Some(key) if self.key() != Some(key) => self.arm(key),
            Some(_) => {}
        }
    }

    /// `true` when the deadline has passed at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.armed.is_some_and(|a| now >= a.deadline)
    }

    /// Resolve with the armed key once the deadline passes.
    ///
    /// Pends forever while disarmed.  The timer stays armed after firing;
    /// the caller decides whether to restart or cancel it.
    pub async fn expired(&self) -> u32 {
        match self.armed {
            Some(Armed { key, deadline }) => {
                sleep_until(deadline).await;
                key
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(500);

    #[test]
    fn overflowing_timeout_saturates() {
        let cfg = TimerConfig::with_rtt(Duration::from_secs(u64::MAX));
        assert_eq!(cfg.checked_timeout(), None);
        assert_eq!(cfg.timeout(), Duration::MAX);
    }

    #[test]
    fn default_timeout_is_four_rtt() {
        let cfg = TimerConfig::default();
        assert_eq!(cfg.rtt, Duration::from_millis(125));
        assert_eq!(cfg.timeout(), Duration::from_millis(500));
        assert_eq!(
            TimerConfig::with_rtt(Duration::from_millis(10)).timeout(),
            Duration::from_millis(40)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fires_with_armed_key() {
        let mut t = RetransmitTimer::new(TIMEOUT);
        t.arm(7);
        let start = Instant::now();
        assert_eq!(t.expired().await, 7);
        assert!(start.elapsed() >= TIMEOUT);
        assert!(t.is_armed(), "firing does not disarm");
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_fire_early() {
        let mut t = RetransmitTimer::new(TIMEOUT);
        t.arm(1);
        let early = tokio::time::timeout(TIMEOUT - Duration::from_millis(1), t.expired()).await;
        assert!(early.is_err());
        assert!(t.is_expired_at(Instant::now() + Duration::from_millis(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_timer_never_fires() {
        let mut t = RetransmitTimer::new(TIMEOUT);
        t.arm(3);
        assert_eq!(t.cancel(), Some(3));
        let res = tokio::time::timeout(TIMEOUT * 10, t.expired()).await;
        assert!(res.is_err());
        assert!(!t.is_expired_at(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_pushes_deadline_back() {
        let mut t = RetransmitTimer::new(TIMEOUT);
        t.arm(2);
        tokio::time::advance(Duration::from_millis(400)).await;
        t.restart();
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(!t.is_expired_at(Instant::now()));
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(t.is_expired_at(Instant::now()));
        assert_eq!(t.key(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn track_rearms_only_on_key_change() {
        let mut t = RetransmitTimer::new(TIMEOUT);
        t.track(Some(1));
        tokio::time::advance(Duration::from_millis(300)).await;

        // Same key keeps the running countdown.
        t.track(Some(1));
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(t.is_expired_at(Instant::now()));

        // New key starts a fresh one.
        t.track(Some(2));
        assert!(!t.is_expired_at(Instant::now()));
        assert_eq!(t.key(), Some(2));

        t.track(None);
        assert!(!t.is_armed());
    }
}
