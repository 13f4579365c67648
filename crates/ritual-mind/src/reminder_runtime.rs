use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, LocalResult, NaiveDate, NaiveTime, TimeZone};
use ritual_core::prompts::REMINDER_TEXT;
use ritual_core::ReflectionBook;
use ritual_storage::{EntryStore, StorageError};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderConfig {
    /// Local wall-clock time of the daily check.
    pub fire_at: NaiveTime,
    pub message: String,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            fire_at: NaiveTime::from_hms_opt(21, 0, 0).unwrap_or_default(),
            message: REMINDER_TEXT.to_string(),
        }
    }
}

impl ReminderConfig {
    pub fn at(fire_at: NaiveTime) -> Self {
        Self {
            fire_at,
            ..Self::default()
        }
    }
}

/// Parse an `HH:MM` (or `HH:MM:SS`) wall-clock time.
pub fn parse_fire_time(input: &str) -> Result<NaiveTime, String> {
    let trimmed = input.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|err| format!("invalid reminder time '{trimmed}': {err}"))
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReminderTickReport {
    /// The check already ran for this calendar day.
    pub already_fired: bool,
    pub candidates: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("store snapshot task failed: {0}")]
    Snapshot(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("reminder delivery to {person_id} failed: {message}")]
pub struct DeliveryError {
    pub person_id: String,
    pub message: String,
}

impl DeliveryError {
    pub fn new(person_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            person_id: person_id.into(),
            message: message.into(),
        }
    }
}

/// Delivery channel for reminders, owned by the transport.
#[async_trait]
pub trait ReminderNotifier: Send + Sync {
    async fn send_reminder(&self, person_id: &str, text: &str) -> Result<(), DeliveryError>;
}

/// People present in the store with no entry dated `today`.
///
/// A person who never completed a ritual is not a key of the store and is
/// therefore never reminded.
pub fn people_to_remind(book: &ReflectionBook, today: NaiveDate) -> BTreeSet<String> {
    book.people
        .keys()
        .filter(|person_id| !book.has_entry_on(person_id, today))
        .cloned()
        .collect()
}

/// The next occurrence of `fire_at` strictly after `now`, in `now`'s zone.
pub fn next_fire_after<Tz: TimeZone>(now: &DateTime<Tz>, fire_at: NaiveTime) -> DateTime<Tz> {
    let local_now = now.naive_local();
    let mut day = local_now.date();
    if day.and_time(fire_at) <= local_now {
        day = day.succ_opt().unwrap_or(day);
    }
    resolve_local(&now.timezone(), day.and_time(fire_at))
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: chrono::NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(value) => value,
        LocalResult::Ambiguous(earliest, _) => earliest,
        // Skipped by a DST jump; fire right after the gap.
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .unwrap_or_else(|| tz.from_utc_datetime(&naive)),
    }
}

/// Once-a-day reminder job. Reads the store, never writes it.
pub struct ReminderScheduler {
    config: ReminderConfig,
    store: Arc<EntryStore>,
    notifier: Arc<dyn ReminderNotifier>,
    last_fired: Mutex<Option<NaiveDate>>,
}

impl ReminderScheduler {
    pub fn new(
        config: ReminderConfig,
        store: Arc<EntryStore>,
        notifier: Arc<dyn ReminderNotifier>,
    ) -> Self {
        Self {
            config,
            store,
            notifier,
            last_fired: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ReminderConfig {
        &self.config
    }

    pub fn last_fired(&self) -> Option<NaiveDate> {
        *self.last_fired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the check for `today`. A second call for the same day is a no-op.
    pub async fn run_once(&self, today: NaiveDate) -> Result<ReminderTickReport, ReminderError> {
        let mut report = ReminderTickReport::default();
        if self.last_fired() == Some(today) {
            report.already_fired = true;
            return Ok(report);
        }

        let store = Arc::clone(&self.store);
        let book = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|err| ReminderError::Snapshot(err.to_string()))??;
        *self.last_fired.lock().unwrap_or_else(PoisonError::into_inner) = Some(today);

        let recipients = people_to_remind(&book, today);
        report.candidates = recipients.len();

        for person_id in &recipients {
            match self
                .notifier
                .send_reminder(person_id, &self.config.message)
                .await
            {
                Ok(()) => {
                    report.delivered += 1;
                    debug!(event = "reminder_sent", person_id = %person_id);
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(event = "reminder_failed", person_id = %person_id, error = %err);
                }
            }
        }

        info!(
            event = "reminder_tick",
            day = %today,
            candidates = report.candidates,
            delivered = report.delivered,
            failed = report.failed
        );
        Ok(report)
    }

    /// Sleep until each daily fire time and run the check, until `shutdown`
    /// resolves.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let now = Local::now();
            let next = next_fire_after(&now, self.config.fire_at);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(event = "reminder_scheduled", next = %next.to_rfc3339());

            tokio::select! {
                _ = &mut shutdown => {
                    info!(event = "reminder_stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let today = Local::now().date_naive();
            if let Err(err) = self.run_once(today).await {
                error!(event = "reminder_tick_failed", day = %today, error = %err);
            }
        }
    }
}
