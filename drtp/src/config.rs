//! Transfer configuration.
//!
//! Both ends of a transfer are configured independently and must agree on
//! the [`ReliabilityMode`]; nothing on the wire negotiates it.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::fault::FaultConfig;
use crate::gbn_sender::GbnSender;
use crate::receiver::{InOrderReceiver, ReceiveStrategy};
use crate::sender::{SendStrategy, StopAndWaitSender};
use crate::sr_receiver::SrReceiver;
use crate::sr_sender::SrSender;
use crate::timer::TimerConfig;

/// Default send / receive window, in packets.
pub const DEFAULT_WINDOW: usize = 5;

/// Default number of FIN transmissions before teardown gives up.
pub const DEFAULT_TEARDOWN_RETRIES: u32 = 5;

/// Longest retransmission timeout a connection accepts.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(3600);

/// Which reliability algorithm carries the data phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReliabilityMode {
    #[default]
    StopAndWait,
    GoBackN,
    SelectiveRepeat,
}

impl ReliabilityMode {
    pub const ALL: [ReliabilityMode; 3] = [
        ReliabilityMode::StopAndWait,
        ReliabilityMode::GoBackN,
        ReliabilityMode::SelectiveRepeat,
    ];

    /// Sender half for this mode.  Stop-and-wait ignores `window`.
    pub fn sender(self, window: usize) -> Box<dyn SendStrategy> {
        match self {
            Self::StopAndWait => Box::new(StopAndWaitSender::new()),
            Self::GoBackN => Box::new(GbnSender::new(window)),
            Self::SelectiveRepeat => Box::new(SrSender::new(window)),
        }
    }

    /// Receiver half for this mode.  Stop-and-wait and GBN share one.
    pub fn receiver(self, window: usize) -> Box<dyn ReceiveStrategy> {
        match self {
            Self::StopAndWait | Self::GoBackN => Box::new(InOrderReceiver::new()),
            Self::SelectiveRepeat => Box::new(SrReceiver::new(window)),
        }
    }
}

impl std::fmt::Display for ReliabilityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::StopAndWait => "stop-and-wait",
            Self::GoBackN => "GBN",
            Self::SelectiveRepeat => "SR",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown reliability mode {0:?} (expected stop-and-wait, GBN or SR)")]
pub struct ParseModeError(pub String);

impl FromStr for ReliabilityMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stop-and-wait" | "stop_and_wait" | "saw" => Ok(Self::StopAndWait),
            "gbn" | "go-back-n" => Ok(Self::GoBackN),
            "sr" | "selective-repeat" => Ok(Self::SelectiveRepeat),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

/// A [`TransferConfig`] that no connection can run with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("window must hold at least one packet")]
    ZeroWindow,

    #[error("retransmission timeout must be non-zero (rtt={rtt:?}, multiplier={multiplier})")]
    ZeroTimeout { rtt: Duration, multiplier: u32 },

    #[error("retransmission timeout {rtt:?} x {multiplier} exceeds {max:?}", max = MAX_TIMEOUT)]
    TimeoutTooLong { rtt: Duration, multiplier: u32 },

    #[error("loss rate {0} is outside [0, 1]")]
    LossRate(f64),
}

/// Everything one end of a transfer needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferConfig {
    pub mode: ReliabilityMode,
    /// Window capacity `W` in packets (GBN / SR).
    pub window: usize,
    pub timer: TimerConfig,
    /// FIN transmissions before the client reports a teardown timeout.
    pub teardown_retries: u32,
    pub faults: FaultConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            mode: ReliabilityMode::default(),
            window: DEFAULT_WINDOW,
            timer: TimerConfig::default(),
            teardown_retries: DEFAULT_TEARDOWN_RETRIES,
            faults: FaultConfig::default(),
        }
    }
}

impl TransferConfig {
    pub fn new(mode: ReliabilityMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Reject settings the strategies or the timer cannot run with.
    ///
    /// [`crate::Connection::connect`] and [`crate::Connection::accept`] call
    /// this before anything reaches the wire.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        let (rtt, multiplier) = (self.timer.rtt, self.timer.rtt_multiplier);
        match self.timer.checked_timeout() {
            Some(t) if t.is_zero() => return Err(ConfigError::ZeroTimeout { rtt, multiplier }),
            Some(t) if t <= MAX_TIMEOUT => {}
            _ => return Err(ConfigError::TimeoutTooLong { rtt, multiplier }),
        }
        if !(0.0..=1.0).contains(&self.faults.loss_rate) {
            return Err(ConfigError::LossRate(self.faults.loss_rate));
        }
        Ok(())
    }

    /// Window size as advertised in the header's 16-bit field.
    pub fn advertised_window(&self) -> u16 {
        u16::try_from(self.window).unwrap_or(u16::MAX)
    }
}
