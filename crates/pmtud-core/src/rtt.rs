use crate::config::RtoConfig;
use std::time::Duration;

/// Clock granularity used as the floor for `rttvar`.
const GRANULARITY: Duration = Duration::from_millis(1);

/// Round-trip time estimation for a single path.
///
/// Follows RFC 4960 §6.3.1 with `RTO.Alpha = 1/8` and `RTO.Beta = 1/4`. The
/// estimate is fed only by probe acknowledgments and drives the probe timers,
/// independently of the data retransmission timer.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RttEstimator {
    config: RtoConfig,
    /// Smoothed round trip time.
    srtt: Option<Duration>,
    /// Round trip time variation.
    rttvar: Duration,
    /// The current retransmission timeout.
    rto: Duration,
}

impl RttEstimator {
    #[must_use]
    pub const fn new(config: RtoConfig) -> Self {
        Self {
            config,
            srtt: None,
            rttvar: Duration::ZERO,
            rto: config.initial,
        }
    }

    /// The current retransmission timeout.
    #[must_use]
    pub const fn rto(&self) -> Duration {
        self.rto
    }

    /// The smoothed round trip time, if any sample has been taken.
    #[must_use]
    pub const fn smoothed_rtt(&self) -> Option<Duration> {
        self.srtt
    }

    #[must_use]
    pub const fn rttvar(&self) -> Duration {
        self.rttvar
    }

    /// Update the estimate with a new round trip sample.
    pub fn update(&mut self, sample: Duration) {
        if sample.is_zero() {
            return;
        }
        match self.srtt {
            None => {
                self.srtt = Some(sample);
                self.rttvar = (sample / 2).max(GRANULARITY);
                self.rto = self.clamp(sample * 3);
            }
            Some(srtt) => {
                let delta = srtt.abs_diff(sample);
                self.rttvar = (self.rttvar * 3 / 4 + delta / 4).max(GRANULARITY);
                let srtt = srtt * 7 / 8 + sample / 8;
                self.srtt = Some(srtt);
                self.rto = self.clamp(srtt + self.rttvar * 4);
            }
        }
    }

    /// Double the timeout after an unanswered probe.
    pub fn backoff(&mut self) {
        self.rto = self.clamp(self.rto.saturating_mul(2));
    }

    fn clamp(&self, rto: Duration) -> Duration {
        rto.clamp(self.config.min, self.config.max)
    }
}
