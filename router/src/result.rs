use pcb_common::db::core::Route;
use pcb_common::db::indices::NetId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Why a net could not be (legally) routed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    Congestion,
    BlockedPath {
        components: Vec<String>,
        nets: Vec<String>,
    },
    Clearance,
    PinAccess,
    LayerConflict,
    /// The route is kept; its length is outside the net class limits.
    LengthConstraint {
        length: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
    DifferentialPair {
        partner: String,
        mismatch: f64,
    },
    Keepout,
    /// Routing hit its deadline before this net was attempted.
    Timeout,
    /// The caller stopped routing before this net was attempted.
    Cancelled,
}

impl FailureCause {
    /// Causes that still leave the net's copper on the board.
    pub fn keeps_route(&self) -> bool {
        matches!(
            self,
            FailureCause::LengthConstraint { .. } | FailureCause::DifferentialPair { .. }
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingFailure {
    pub net: NetId,
    pub net_name: String,
    pub cause: FailureCause,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingStats {
    pub routed: usize,
    pub failed: usize,
    pub vias: usize,
    pub total_length: f64,
    pub iterations: usize,
    pub overflow: usize,
    /// Overflow after the initial pass and after every negotiated iteration.
    #[serde(default)]
    pub overflow_history: Vec<usize>,
    pub elapsed_secs: f64,
    pub cancelled: bool,
    pub timed_out: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoutingResult {
    pub routes: Vec<Route>,
    pub failures: Vec<RoutingFailure>,
    pub stats: RoutingStats,
}

impl RoutingResult {
    pub fn route_for(&self, net: NetId) -> Option<&Route> {
        self.routes.iter().find(|r| r.net == net)
    }

    pub fn failure_for(&self, net: NetId) -> Option<&RoutingFailure> {
        self.failures.iter().find(|f| f.net == net)
    }

    /// Every net either has copper or only a failure that keeps copper.
    pub fn is_complete(&self) -> bool {
        self.failures.iter().all(|f| f.cause.keeps_route())
    }
}

pub type ProgressFn<'a> = dyn FnMut(f64, &str, bool) -> bool + 'a;

/// Absolute deadline `timeout_secs` from now; non-positive timeouts mean none.
pub fn deadline_after(timeout_secs: Option<f64>) -> Option<Instant> {
    timeout_secs
        .filter(|t| *t > 0.0)
        .map(|t| Instant::now() + Duration::from_secs_f64(t))
}

/// Cooperative cancellation: a caller callback plus an optional wall-clock deadline.
/// Work running off the caller's thread polls a shared stop flag instead.
pub struct Progress<'a> {
    callback: Option<&'a mut ProgressFn<'a>>,
    deadline: Option<Instant>,
    stop: Option<Arc<AtomicBool>>,
    cancelled: bool,
    timed_out: bool,
}

impl<'a> Progress<'a> {
    pub fn new(callback: Option<&'a mut ProgressFn<'a>>, timeout_secs: Option<f64>) -> Self {
        Self {
            callback,
            deadline: deadline_after(timeout_secs),
            stop: None,
            cancelled: false,
            timed_out: false,
        }
    }

    /// Stops at `deadline` or once `stop` is raised by whoever owns the caller's callback.
    pub fn linked(deadline: Option<Instant>, stop: Arc<AtomicBool>) -> Self {
        Self {
            callback: None,
            deadline,
            stop: Some(stop),
            cancelled: false,
            timed_out: false,
        }
    }

    pub fn silent() -> Self {
        Self::new(None, None)
    }

    pub fn with_deadline(timeout_secs: Option<f64>) -> Self {
        Self::new(None, timeout_secs)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Moves the deadline earlier to `deadline`; a later one is ignored.
    pub fn tighten_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
    }

    /// Reports progress in `[0, 1]`. Returns false once routing should stop.
    pub fn report(&mut self, fraction: f64, message: &str) -> bool {
        if self.stopped() {
            return false;
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            self.timed_out = true;
            log::warn!("Routing deadline reached: {}", message);
            return false;
        }
        if self.stop.as_ref().is_some_and(|s| s.load(Ordering::Relaxed)) {
            self.cancelled = true;
            log::debug!("Routing stopped by shared flag: {}", message);
            return false;
        }
        if let Some(cb) = self.callback.as_mut() {
            if !cb(fraction.clamp(0.0, 1.0), message, true) {
                self.cancelled = true;
                log::warn!("Routing cancelled by caller: {}", message);
                return false;
            }
        }
        true
    }

    /// Final, non-continuable notification.
    pub fn done(&mut self, message: &str) {
        if let Some(cb) = self.callback.as_mut() {
            cb(1.0, message, false);
        }
    }

    pub fn stopped(&self) -> bool {
        self.cancelled || self.timed_out
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_can_cancel() {
        let mut calls = 0;
        let mut cb = |_: f64, _: &str, _: bool| {
            calls += 1;
            calls < 2
        };
        let mut progress = Progress::new(Some(&mut cb), None);
        assert!(progress.report(0.1, "a"));
        assert!(!progress.report(0.2, "b"));
        assert!(progress.cancelled());
        assert!(!progress.report(0.3, "c"));
        drop(progress);
        assert_eq!(calls, 2);
    }

    #[test]
    fn linked_progress_follows_the_shared_flag() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut progress = Progress::linked(None, Arc::clone(&stop));
        assert!(progress.report(0.1, "a"));
        stop.store(true, Ordering::Relaxed);
        assert!(!progress.report(0.2, "b"));
        assert!(progress.cancelled() && !progress.timed_out());

        let past = Instant::now();
        let mut late = Progress::linked(Some(past), Arc::new(AtomicBool::new(false)));
        assert!(!late.report(0.0, "c"));
        assert!(late.timed_out());
    }

    #[test]
    fn tightened_deadline_only_moves_earlier() {
        let mut progress = Progress::with_deadline(Some(3600.0));
        let soon = Instant::now() + Duration::from_millis(5);
        progress.tighten_deadline(soon);
        assert_eq!(progress.deadline(), Some(soon));
        progress.tighten_deadline(soon + Duration::from_secs(60));
        assert_eq!(progress.deadline(), Some(soon));
        assert!(Progress::silent().deadline().is_none());
    }

    #[test]
    fn failure_causes_serialize_tagged() {
        let failure = RoutingFailure {
            net: NetId(3),
            net_name: "SDA".to_string(),
            cause: FailureCause::BlockedPath {
                components: vec!["U1".to_string()],
                nets: vec!["SCL".to_string()],
            },
            message: "blocked".to_string(),
        };
        let text = toml::to_string(&failure).unwrap();
        assert!(text.contains("kind = \"blocked_path\""));
        let back: RoutingFailure = toml::from_str(&text).unwrap();
        assert_eq!(back, failure);
    }
}
