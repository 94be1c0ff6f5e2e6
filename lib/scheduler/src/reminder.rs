//! Deadline reminders.
//!
//! A reminder names a due date and the lead times (days before it) at
//! which to notify the assignee on each configured channel. Every tick
//! looks at the calendar day of `now`; each (reminder, lead time) pair is
//! delivered at most once per channel, and a channel that failed is retried
//! on the next tick until every channel has succeeded.

use crate::error::{ReminderError, ReminderFireError};
use casewright_core::ReminderId;
use casewright_workflow::{Channel, NotificationDispatch};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

fn enabled_by_default() -> bool {
    true
}

/// A recurring deadline reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlineReminder {
    /// Assigned on creation when absent from the input.
    #[serde(default)]
    pub id: ReminderId,
    /// What the deadline is for, e.g. `1095-C filing`.
    pub title: String,
    /// The deadline; lead times count back from it.
    pub due_date: NaiveDate,
    /// Days before the due date to notify, largest first.
    pub lead_times: Vec<i64>,
    /// Every channel the reminder is sent on.
    pub channels: BTreeSet<Channel>,
    /// Recipient of every notification.
    pub assignee: String,
    /// Disabled reminders are skipped by `tick` but keep their schedule.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl DeadlineReminder {
    /// Creates an enabled reminder with no lead times or channels.
    #[must_use]
    pub fn new(title: impl Into<String>, due_date: NaiveDate, assignee: impl Into<String>) -> Self {
        Self {
            id: ReminderId::new(),
            title: title.into(),
            due_date,
            lead_times: Vec::new(),
            channels: BTreeSet::new(),
            assignee: assignee.into(),
            enabled: true,
        }
    }

    /// Sets the lead times.
    #[must_use]
    pub fn with_lead_times(mut self, lead_times: impl IntoIterator<Item = i64>) -> Self {
        self.lead_times = lead_times.into_iter().collect();
        self
    }

    /// Adds a delivery channel.
    #[must_use]
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channels.insert(channel);
        self
    }

    /// Checks the title, channels and lead times.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ReminderError> {
        if self.title.trim().is_empty() {
            return Err(ReminderError::EmptyTitle);
        }
        if self.channels.is_empty() {
            return Err(ReminderError::NoChannels { id: self.id });
        }
        let mut seen = HashSet::new();
        for &days in &self.lead_times {
            if days < 0 {
                return Err(ReminderError::NegativeLeadTime { days });
            }
            if !seen.insert(days) {
                return Err(ReminderError::DuplicateLeadTime { days });
            }
        }
        Ok(())
    }

    /// Days from `today` until the due date; negative once past.
    #[must_use]
    pub fn days_until(&self, today: NaiveDate) -> i64 {
        (self.due_date - today).num_days()
    }

    /// The lead time that falls on `today`, if any.
    #[must_use]
    pub fn offset_due(&self, today: NaiveDate) -> Option<i64> {
        let days = self.days_until(today);
        self.lead_times.contains(&days).then_some(days)
    }

    /// The notification text for a lead time.
    #[must_use]
    pub fn message(&self, offset_days: i64) -> String {
        let date = self.due_date.format("%Y-%m-%d");
        match offset_days {
            0 => format!("{} is due today ({date})", self.title),
            1 => format!("{} is due in 1 day on {date}", self.title),
            n => format!("{} is due in {n} days on {date}", self.title),
        }
    }
}

/// One delivered notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentReminder {
    /// The reminder that fired.
    pub reminder_id: ReminderId,
    /// Days before the due date this notification is for.
    pub offset_days: i64,
    /// Where it was delivered.
    pub channel: Channel,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderTick {
    /// Notifications delivered this tick.
    pub sent: Vec<SentReminder>,
    /// Deliveries that failed; retried on the next tick.
    pub failures: Vec<ReminderFireError>,
}

type FireKey = (ReminderId, i64);

#[derive(Debug, Default)]
struct ReminderState {
    reminders: HashMap<ReminderId, DeadlineReminder>,
    /// Pairs delivered on every channel.
    fired: HashSet<FireKey>,
    /// Channels delivered so far for pairs not yet fired.
    delivered: HashMap<FireKey, BTreeSet<Channel>>,
}

/// The deadline scheduler.
pub struct DeadlineScheduler {
    dispatch: Arc<dyn NotificationDispatch>,
    state: Mutex<ReminderState>,
}

impl std::fmt::Debug for DeadlineScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlineScheduler").finish_non_exhaustive()
    }
}

impl DeadlineScheduler {
    /// Creates a scheduler delivering through `dispatch`.
    pub fn new(dispatch: Arc<dyn NotificationDispatch>) -> Self {
        Self {
            dispatch,
            state: Mutex::new(ReminderState::default()),
        }
    }

    /// Adds a reminder.
    ///
    /// # Errors
    ///
    /// Returns an error if the reminder is invalid or its ID is taken.
    #[instrument(skip(self, reminder), fields(reminder_id = %reminder.id))]
    pub async fn schedule(&self, mut reminder: DeadlineReminder) -> Result<ReminderId, ReminderError> {
        reminder.validate()?;
        reminder.lead_times.sort_unstable_by(|a, b| b.cmp(a));

        let mut state = self.state.lock().await;
        if state.reminders.contains_key(&reminder.id) {
            return Err(ReminderError::AlreadyExists { id: reminder.id });
        }
        let id = reminder.id;
        info!(title = %reminder.title, due = %reminder.due_date, "reminder scheduled");
        state.reminders.insert(id, reminder);
        Ok(id)
    }

    /// Disables a reminder. Reminders are never deleted.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ID.
    pub async fn cancel(&self, id: ReminderId) -> Result<DeadlineReminder, ReminderError> {
        let mut state = self.state.lock().await;
        let reminder = state
            .reminders
            .get_mut(&id)
            .ok_or(ReminderError::NotFound { id })?;
        reminder.enabled = false;
        info!(reminder_id = %id, "reminder cancelled");
        Ok(reminder.clone())
    }

    /// Flips a reminder's enabled flag and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown ID.
    pub async fn toggle(&self, id: ReminderId) -> Result<bool, ReminderError> {
        let mut state = self.state.lock().await;
        let reminder = state
            .reminders
            .get_mut(&id)
            .ok_or(ReminderError::NotFound { id })?;
        reminder.enabled = !reminder.enabled;
        info!(reminder_id = %id, enabled = reminder.enabled, "reminder toggled");
        Ok(reminder.enabled)
    }

    /// Returns a reminder.
    pub async fn get(&self, id: ReminderId) -> Option<DeadlineReminder> {
        self.state.lock().await.reminders.get(&id).cloned()
    }

    /// Returns all reminders ordered by due date.
    pub async fn list(&self) -> Vec<DeadlineReminder> {
        let state = self.state.lock().await;
        let mut reminders: Vec<_> = state.reminders.values().cloned().collect();
        reminders.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.title.cmp(&b.title)));
        reminders
    }

    /// Delivers every reminder whose lead time falls on the day of `now`.
    ///
    /// Ticks are serialized, so repeating a tick for the same day sends
    /// nothing new.
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> ReminderTick {
        let today = now.date_naive();
        let mut state = self.state.lock().await;
        let mut report = ReminderTick::default();

        let mut due: Vec<(DeadlineReminder, i64)> = state
            .reminders
            .values()
            .filter(|r| r.enabled)
            .filter_map(|r| r.offset_due(today).map(|offset| (r.clone(), offset)))
            .filter(|(r, offset)| !state.fired.contains(&(r.id, *offset)))
            .collect();
        due.sort_by(|(a, _), (b, _)| a.due_date.cmp(&b.due_date).then(a.id.cmp(&b.id)));

        for (reminder, offset) in due {
            let key = (reminder.id, offset);
            let message = reminder.message(offset);
            let mut delivered = state.delivered.remove(&key).unwrap_or_default();

            for &channel in reminder.channels.difference(&delivered.clone()) {
                match self
                    .dispatch
                    .send(channel, &reminder.assignee, &message)
                    .await
                {
                    Ok(()) => {
                        delivered.insert(channel);
                        report.sent.push(SentReminder {
                            reminder_id: reminder.id,
                            offset_days: offset,
                            channel,
                        });
                    }
                    Err(error) => {
                        warn!(reminder_id = %reminder.id, offset, channel = %channel, error = %error, "reminder delivery failed");
                        report.failures.push(ReminderFireError {
                            reminder_id: reminder.id,
                            offset_days: offset,
                            channel,
                            error,
                        });
                    }
                }
            }

            if delivered.is_superset(&reminder.channels) {
                info!(reminder_id = %reminder.id, offset, "reminder fired");
                state.fired.insert(key);
            } else {
                state.delivered.insert(key, delivered);
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casewright_workflow::DispatchError;
    use chrono::TimeZone;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingDispatch {
        sent: StdMutex<Vec<(Channel, String)>>,
        failing: StdMutex<HashSet<Channel>>,
    }

    #[async_trait::async_trait]
    impl NotificationDispatch for RecordingDispatch {
        async fn send(
            &self,
            channel: Channel,
            _recipient: &str,
            message: &str,
        ) -> Result<(), DispatchError> {
            if self.failing.lock().unwrap().contains(&channel) {
                return Err(DispatchError::ChannelUnavailable { channel });
            }
            self.sent
                .lock()
                .unwrap()
                .push((channel, message.to_string()));
            Ok(())
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn on(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
    }

    fn filing_reminder() -> DeadlineReminder {
        DeadlineReminder::new("1095-C Employee Distribution", date(2026, 1, 31), "Compliance Team")
            .with_lead_times([7, 1])
            .with_channel(Channel::Email)
    }

    #[tokio::test]
    async fn fires_once_per_lead_time() {
        let dispatch = Arc::new(RecordingDispatch::default());
        let scheduler = DeadlineScheduler::new(dispatch.clone());
        scheduler.schedule(filing_reminder()).await.unwrap();

        assert_eq!(scheduler.tick(on(2026, 1, 24)).await.sent.len(), 1);
        assert_eq!(scheduler.tick(on(2026, 1, 24)).await.sent.len(), 0);
        assert_eq!(scheduler.tick(on(2026, 1, 25)).await.sent.len(), 0);
        assert_eq!(scheduler.tick(on(2026, 1, 30)).await.sent.len(), 1);

        let sent = dispatch.sent.lock().unwrap();
        assert_eq!(
            sent[0].1,
            "1095-C Employee Distribution is due in 7 days on 2026-01-31"
        );
        assert_eq!(
            sent[1].1,
            "1095-C Employee Distribution is due in 1 day on 2026-01-31"
        );
    }

    #[tokio::test]
    async fn partial_failure_retries_only_failed_channel() {
        let dispatch = Arc::new(RecordingDispatch::default());
        dispatch.failing.lock().unwrap().insert(Channel::Chat);
        let scheduler = DeadlineScheduler::new(dispatch.clone());
        let reminder = filing_reminder().with_channel(Channel::Chat);
        let id = scheduler.schedule(reminder).await.unwrap();

        let first = scheduler.tick(on(2026, 1, 24)).await;
        assert_eq!(first.sent.len(), 1);
        assert_eq!(first.failures.len(), 1);
        assert_eq!(first.failures[0].channel, Channel::Chat);
        assert_eq!(first.failures[0].reminder_id, id);

        dispatch.failing.lock().unwrap().clear();
        let retry = scheduler.tick(on(2026, 1, 24)).await;
        assert_eq!(
            retry.sent,
            vec![SentReminder {
                reminder_id: id,
                offset_days: 7,
                channel: Channel::Chat
            }]
        );
        assert!(scheduler.tick(on(2026, 1, 24)).await.sent.is_empty());
        assert_eq!(dispatch.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn disabled_reminders_do_not_fire() {
        let scheduler = DeadlineScheduler::new(Arc::new(RecordingDispatch::default()));
        let id = scheduler.schedule(filing_reminder()).await.unwrap();

        scheduler.cancel(id).await.unwrap();
        assert!(scheduler.tick(on(2026, 1, 24)).await.sent.is_empty());
        assert!(!scheduler.get(id).await.unwrap().enabled);

        assert!(scheduler.toggle(id).await.unwrap());
        assert_eq!(scheduler.tick(on(2026, 1, 24)).await.sent.len(), 1);
    }

    #[tokio::test]
    async fn validation_and_listing() {
        let scheduler = DeadlineScheduler::new(Arc::new(RecordingDispatch::default()));

        let no_channels = DeadlineReminder::new("X", date(2026, 2, 1), "ops");
        assert!(matches!(
            scheduler.schedule(no_channels).await,
            Err(ReminderError::NoChannels { .. })
        ));
        let duplicate = filing_reminder().with_lead_times([7, 7]);
        assert!(matches!(
            scheduler.schedule(duplicate).await,
            Err(ReminderError::DuplicateLeadTime { days: 7 })
        ));

        let later = DeadlineReminder::new("IRS Electronic Filing", date(2026, 3, 31), "ops")
            .with_lead_times([30, 14, 7])
            .with_channel(Channel::InApp);
        scheduler.schedule(later).await.unwrap();
        scheduler
            .schedule(filing_reminder().with_lead_times([1, 30, 7]))
            .await
            .unwrap();

        let listed = scheduler.list().await;
        assert_eq!(listed[0].title, "1095-C Employee Distribution");
        assert_eq!(listed[0].lead_times, vec![30, 7, 1]);
        assert_eq!(listed[1].title, "IRS Electronic Filing");
    }

    #[test]
    fn due_today_message() {
        let reminder = filing_reminder();
        assert_eq!(
            reminder.message(0),
            "1095-C Employee Distribution is due today (2026-01-31)"
        );
        assert_eq!(reminder.offset_due(date(2026, 1, 30)), Some(1));
        assert_eq!(reminder.offset_due(date(2026, 1, 29)), None);
    }
}
