use std::time::{Duration, Instant};

use payment_protos::payment::PaymentEvent;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    New,
    Existing,
}

impl EventKind {
    /// Only the exact `"new"` marker counts as new, everything else is a re-emitted payment.
    pub fn classify(event_type: &str) -> Self {
        if event_type == "new" {
            EventKind::New
        } else {
            EventKind::Existing
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::New => "new",
            EventKind::Existing => "existing",
        }
    }
}

/// Running counters for one session. `total == new + existing` after every update.
#[derive(Debug)]
pub struct SessionStats {
    existing: u64,
    new: u64,
    total: u64,
    started: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub total: u64,
    pub new: u64,
    pub existing: u64,
    pub elapsed: Duration,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            existing: 0,
            new: 0,
            total: 0,
            started: Instant::now(),
        }
    }

    pub fn on_event(&mut self, event: &PaymentEvent) -> EventKind {
        let kind = EventKind::classify(&event.event_type);
        self.total += 1;
        match kind {
            EventKind::New => self.new += 1,
            EventKind::Existing => self.existing += 1,
        }
        kind
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            total: self.total,
            new: self.new,
            existing: self.existing,
            elapsed: self.started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_server::event;

    #[test]
    fn test_classify() {
        assert_eq!(EventKind::classify("new"), EventKind::New);
        assert_eq!(EventKind::classify("existing"), EventKind::Existing);
        assert_eq!(EventKind::classify(""), EventKind::Existing);
        assert_eq!(EventKind::classify("NEW"), EventKind::Existing);
    }

    #[test]
    fn test_counts_add_up() {
        let mut stats = SessionStats::new();
        let types = ["new", "existing", "new", "refund", "new", "existing", ""];
        for (i, event_type) in types.iter().enumerate() {
            stats.on_event(&event(&format!("pay_{i:03}"), event_type));
            let report = stats.report();
            assert_eq!(report.total, report.new + report.existing);
            assert_eq!(report.total, i as u64 + 1);
        }

        let report = stats.report();
        assert_eq!(report.new, 3);
        assert_eq!(report.existing, 4);
        assert_eq!(report.total, 7);
    }

    #[test]
    fn test_cumulative_in_delivery_order() {
        let mut stats = SessionStats::new();
        let kinds = ["new", "existing", "new"]
            .iter()
            .map(|t| {
                let kind = stats.on_event(&event("pay_001", t));
                (kind, stats.report().new, stats.report().existing)
            })
            .collect::<Vec<_>>();

        assert_eq!(
            kinds,
            vec![
                (EventKind::New, 1, 0),
                (EventKind::Existing, 1, 1),
                (EventKind::New, 2, 1),
            ]
        );
    }

    #[test]
    fn test_report_does_not_mutate() {
        let mut stats = SessionStats::new();
        stats.on_event(&event("pay_001", "new"));

        let first = stats.report();
        let second = stats.report();
        assert_eq!((first.total, first.new, first.existing), (1, 1, 0));
        assert_eq!((second.total, second.new, second.existing), (1, 1, 0));
        assert!(second.elapsed >= first.elapsed);
    }

    #[test]
    fn test_empty_session() {
        let report = SessionStats::default().report();
        assert_eq!((report.total, report.new, report.existing), (0, 0, 0));
    }
}
