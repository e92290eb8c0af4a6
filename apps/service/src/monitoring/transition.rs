//! Pure status transition rules: which beats are important, and how a check
//! outcome turns into a final status, retry counter and next delay.

use super::types::MonitorStatus;
use crate::database::models::Monitor;

/// Message stored when an upside-down monitor's check succeeds
pub const FLIP_MESSAGE: &str = "Flip UP to DOWN";

/// What the check reported before retry handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The checker finished and chose this status
    Completed(MonitorStatus),
    /// The checker returned an error, or a push window was missed
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub status: MonitorStatus,
    pub retries: u32,
    /// Seconds until the next tick
    pub interval: u64,
    /// Set when an upside-down monitor's success was turned into a failure
    pub flipped: bool,
}

/// Whether a beat marks a state change worth notifying about.
pub fn is_important_beat(is_first_beat: bool, previous: Option<MonitorStatus>, current: MonitorStatus) -> bool {
    use MonitorStatus::*;

    if is_first_beat {
        return true;
    }

    let Some(previous) = previous else {
        return false;
    };

    matches!(
        (previous, current),
        (Up, Down)
            | (Down, Up)
            | (Pending, Down)
            | (Maintenance, Up)
            | (Maintenance, Down)
            | (Up, Maintenance)
            | (Down, Maintenance)
    )
}

/// Fold a check outcome into the monitor's retry state.
///
/// Once retries are exhausted the counter is held, so a monitor that is
/// already DOWN stays DOWN instead of cycling back through PENDING.
pub fn apply_retry_policy(outcome: CheckOutcome, monitor: &Monitor, retries: u32) -> RetryDecision {
    match outcome {
        CheckOutcome::Completed(status) if monitor.upside_down => {
            let status = status.flip();
            if status == MonitorStatus::Down {
                RetryDecision { flipped: true, ..failure(monitor, retries) }
            } else {
                success(monitor, status)
            }
        }
        CheckOutcome::Completed(status) => success(monitor, status),
        // An upside-down monitor is healthy exactly when its check fails
        CheckOutcome::Failed if monitor.upside_down => success(monitor, MonitorStatus::Up),
        CheckOutcome::Failed => failure(monitor, retries),
    }
}

/// Retry interval, falling back to the regular interval when unset
fn retry_interval(monitor: &Monitor) -> u64 {
    if monitor.retry_interval > 0 {
        monitor.retry_interval
    } else {
        monitor.interval
    }
}

fn success(monitor: &Monitor, status: MonitorStatus) -> RetryDecision {
    let interval = if status == MonitorStatus::Pending {
        retry_interval(monitor)
    } else {
        monitor.interval
    };
    RetryDecision { status, retries: 0, interval, flipped: false }
}

fn failure(monitor: &Monitor, retries: u32) -> RetryDecision {
    if monitor.max_retries > 0 && retries < monitor.max_retries {
        RetryDecision {
            status: MonitorStatus::Pending,
            retries: retries + 1,
            interval: retry_interval(monitor),
            flipped: false,
        }
    } else {
        RetryDecision { status: MonitorStatus::Down, retries, interval: monitor.interval, flipped: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MonitorStatus::*;

    fn monitor(max_retries: u32) -> Monitor {
        let mut monitor = Monitor::new("api", "http");
        monitor.interval = 60;
        monitor.retry_interval = 20;
        monitor.max_retries = max_retries;
        monitor
    }

    #[test]
    fn importance_truth_table() {
        let important = [(Up, Down), (Down, Up), (Pending, Down), (Maintenance, Up), (Maintenance, Down), (Up, Maintenance), (Down, Maintenance)];
        let quiet = [(Up, Up), (Up, Pending), (Pending, Pending), (Pending, Up), (Down, Down), (Down, Pending), (Maintenance, Maintenance)];

        for (previous, current) in important {
            assert!(is_important_beat(false, Some(previous), current), "{previous} -> {current}");
        }
        for (previous, current) in quiet {
            assert!(!is_important_beat(false, Some(previous), current), "{previous} -> {current}");
        }
    }

    #[test]
    fn first_beat_is_always_important() {
        for status in [Up, Down, Pending, Maintenance] {
            assert!(is_important_beat(true, None, status));
        }
        assert!(!is_important_beat(false, None, Down));
    }

    #[test]
    fn retries_then_down() {
        let monitor = monitor(3);
        let mut retries = 0;
        let mut statuses = Vec::new();

        for _ in 0..5 {
            let decision = apply_retry_policy(CheckOutcome::Failed, &monitor, retries);
            retries = decision.retries;
            statuses.push((decision.status, decision.interval));
        }

        assert_eq!(
            statuses,
            vec![(Pending, 20), (Pending, 20), (Pending, 20), (Down, 60), (Down, 60)]
        );
        assert_eq!(retries, 3);

        let recovered = apply_retry_policy(CheckOutcome::Completed(Up), &monitor, retries);
        assert_eq!(recovered, RetryDecision { status: Up, retries: 0, interval: 60, flipped: false });
    }

    #[test]
    fn no_retries_goes_straight_down() {
        let decision = apply_retry_policy(CheckOutcome::Failed, &monitor(0), 0);
        assert_eq!(decision.status, Down);
        assert_eq!(decision.retries, 0);
        assert_eq!(decision.interval, 60);
    }

    #[test]
    fn retry_interval_falls_back_to_interval() {
        let mut monitor = monitor(2);
        monitor.retry_interval = 0;
        let decision = apply_retry_policy(CheckOutcome::Failed, &monitor, 0);
        assert_eq!((decision.status, decision.interval), (Pending, 60));
    }

    #[test]
    fn upside_down_inverts_health() {
        let mut monitor = monitor(0);
        monitor.upside_down = true;

        let healthy = apply_retry_policy(CheckOutcome::Failed, &monitor, 2);
        assert_eq!((healthy.status, healthy.retries, healthy.flipped), (Up, 0, false));

        let flipped = apply_retry_policy(CheckOutcome::Completed(Up), &monitor, 0);
        assert_eq!((flipped.status, flipped.flipped), (Down, true));

        monitor.max_retries = 1;
        let pending = apply_retry_policy(CheckOutcome::Completed(Up), &monitor, 0);
        assert_eq!((pending.status, pending.retries, pending.flipped), (Pending, 1, true));
    }

    #[test]
    fn checker_chosen_pending_uses_retry_interval() {
        let decision = apply_retry_policy(CheckOutcome::Completed(Pending), &monitor(0), 0);
        assert_eq!((decision.status, decision.interval, decision.retries), (Pending, 20, 0));
    }
}
