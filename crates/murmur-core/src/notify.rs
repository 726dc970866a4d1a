//! ============================================================================
//! Notifications - Scheduling hooks for due dates and snoozes
//! ============================================================================
//! The executor receives a `NotificationScheduler` through its context and
//! calls `sync` after creating or changing an entry and `cancel` when an
//! entry is completed, archived or removed. Delivery is platform work; the
//! core only decides what should be scheduled.
//! ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{Entry, EntryCategory, EntryStatus};

/// Why an alert fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Due,
    SnoozeEnded,
}

/// One alert that should exist for an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAlert {
    pub entry_id: Uuid,
    pub kind: AlertKind,
    pub fire_at: DateTime<Utc>,
    pub title: String,
}

/// Alerts an entry should have at `now`. Empty means any existing alert
/// for it should be removed.
pub fn plan_notifications(entry: &Entry, now: DateTime<Utc>) -> Vec<PlannedAlert> {
    let mut alerts = Vec::new();

    match entry.status {
        EntryStatus::Active => {
            let dated = matches!(entry.category, EntryCategory::Reminder | EntryCategory::Todo);
            if let Some(due) = entry.due_date.filter(|d| dated && *d > now) {
                alerts.push(PlannedAlert {
                    entry_id: entry.id,
                    kind: AlertKind::Due,
                    fire_at: due,
                    title: entry.summary.clone(),
                });
            }
        }
        EntryStatus::Snoozed => {
            if let Some(until) = entry.snooze_until.filter(|u| *u > now) {
                alerts.push(PlannedAlert {
                    entry_id: entry.id,
                    kind: AlertKind::SnoozeEnded,
                    fire_at: until,
                    title: entry.summary.clone(),
                });
            }
        }
        EntryStatus::Completed | EntryStatus::Archived => {}
    }

    alerts
}

pub trait NotificationScheduler: Send + Sync {
    /// Bring the scheduled alerts for `entry` in line with its current state
    fn sync(&self, entry: &Entry);

    fn cancel(&self, entry_id: Uuid);
}

/// Scheduler that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScheduler;

impl NotificationScheduler for NoopScheduler {
    fn sync(&self, _entry: &Entry) {}

    fn cancel(&self, _entry_id: Uuid) {}
}

/// Scheduler that only logs what it would schedule
#[derive(Debug, Default, Clone, Copy)]
pub struct LogScheduler;

impl NotificationScheduler for LogScheduler {
    fn sync(&self, entry: &Entry) {
        let alerts = plan_notifications(entry, Utc::now());
        if alerts.is_empty() {
            debug!("No alerts for entry {}", entry.short_id());
        }
        for alert in alerts {
            info!(
                "Would schedule {:?} alert for [{}] '{}' at {}",
                alert.kind,
                entry.short_id(),
                alert.title,
                alert.fire_at.to_rfc3339()
            );
        }
    }

    fn cancel(&self, entry_id: Uuid) {
        debug!("Would cancel alerts for entry {}", entry_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntrySource;
    use chrono::Duration;

    fn entry(category: EntryCategory, now: DateTime<Utc>) -> Entry {
        Entry::new("dentist", category, EntrySource::Voice, now)
    }

    #[test]
    fn test_due_alert_for_future_reminder() {
        let now = Utc::now();
        let mut e = entry(EntryCategory::Reminder, now);
        e.due_date = Some(now + Duration::hours(3));

        let alerts = plan_notifications(&e, now);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Due);
        assert_eq!(alerts[0].fire_at, now + Duration::hours(3));
    }

    #[test]
    fn test_no_alert_for_past_or_undated() {
        let now = Utc::now();
        let mut e = entry(EntryCategory::Todo, now);
        assert!(plan_notifications(&e, now).is_empty());

        e.due_date = Some(now - Duration::minutes(5));
        assert!(plan_notifications(&e, now).is_empty());

        let mut idea = entry(EntryCategory::Idea, now);
        idea.due_date = Some(now + Duration::hours(1));
        assert!(plan_notifications(&idea, now).is_empty());
    }

    #[test]
    fn test_snoozed_and_finished_entries() {
        let now = Utc::now();
        let mut e = entry(EntryCategory::Reminder, now);
        e.due_date = Some(now + Duration::hours(3));
        e.snooze(now + Duration::hours(1), now);

        let alerts = plan_notifications(&e, now);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::SnoozeEnded);

        e.complete(now);
        assert!(plan_notifications(&e, now).is_empty());
    }
}
