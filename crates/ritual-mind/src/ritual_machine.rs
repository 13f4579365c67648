use chrono::{DateTime, Local, TimeZone};
use ritual_core::prompts::{step_prompt, StepPrompt};
use ritual_core::{capture_timestamp, ReflectionEntry, RitualStep};
use ritual_storage::{EntryStore, StorageError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RitualError {
    #[error("cannot {operation} for {person_id} while {}", describe_state(.state))]
    InvalidTransition {
        person_id: String,
        operation: &'static str,
        state: Option<RitualStep>,
    },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

fn describe_state(state: &Option<RitualStep>) -> String {
    match state {
        Some(step) => format!("at step {step}"),
        None => "idle".to_string(),
    }
}

/// The in-progress, not yet persisted ritual of one person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RitualSession {
    pub person_id: String,
    pub step: RitualStep,
    pub date: String,
    pub scan: String,
    pub voices: String,
    pub focus: String,
}

impl RitualSession {
    fn new(person_id: &str, date: String) -> Self {
        Self {
            person_id: person_id.to_string(),
            step: RitualStep::Scan,
            date,
            scan: String::new(),
            voices: String::new(),
            focus: String::new(),
        }
    }

    fn to_entry(&self, promise: String) -> ReflectionEntry {
        ReflectionEntry {
            date: self.date.clone(),
            scan: self.scan.clone(),
            voices: self.voices.clone(),
            focus: self.focus.clone(),
            promise,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The answer was recorded; ask the next question.
    Next(StepPrompt),
    /// The promise was recorded and the entry is durable.
    Completed(ReflectionEntry),
}

/// Drives each person through scan, voice, focus and promise.
///
/// Holds at most one session per person id. The session map lock is only held
/// for in-memory bookkeeping, never across the store write.
pub struct RitualMachine {
    store: Arc<EntryStore>,
    sessions: Mutex<HashMap<String, RitualSession>>,
}

impl RitualMachine {
    pub fn new(store: Arc<EntryStore>) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a fresh ritual, discarding any session already in progress.
    pub fn begin(&self, person_id: &str) -> StepPrompt {
        self.begin_at(person_id, &Local::now())
    }

    pub fn begin_at<Tz: TimeZone>(&self, person_id: &str, now: &DateTime<Tz>) -> StepPrompt {
        let session = RitualSession::new(person_id, capture_timestamp(now));
        let replaced = self.sessions().insert(person_id.to_string(), session);
        match replaced {
            Some(previous) => info!(
                event = "ritual_restarted",
                person_id = person_id,
                discarded_step = %previous.step
            ),
            None => info!(event = "ritual_started", person_id = person_id),
        }
        step_prompt(RitualStep::Scan)
    }

    pub fn submit_scan(&self, person_id: &str, text: &str) -> Result<StepPrompt, RitualError> {
        self.advance(person_id, RitualStep::Scan, "submit_scan", text)
    }

    /// Voices are kept verbatim; the chosen labels are not parsed.
    pub fn submit_voices(&self, person_id: &str, text: &str) -> Result<StepPrompt, RitualError> {
        self.advance(person_id, RitualStep::Voice, "submit_voices", text)
    }

    pub fn submit_focus(&self, person_id: &str, text: &str) -> Result<StepPrompt, RitualError> {
        self.advance(person_id, RitualStep::Focus, "submit_focus", text)
    }

    /// Record the promise and append the finished entry to the store.
    ///
    /// On a store failure the session stays at the promise step so the same
    /// promise can be sent again.
    pub fn submit_promise(
        &self,
        person_id: &str,
        text: &str,
    ) -> Result<ReflectionEntry, RitualError> {
        let session = {
            let mut sessions = self.sessions();
            let state = sessions.get(person_id).map(|session| session.step);
            if state != Some(RitualStep::Promise) {
                return Err(invalid(person_id, "submit_promise", state));
            }
            let Some(session) = sessions.remove(person_id) else {
                return Err(invalid(person_id, "submit_promise", None));
            };
            session
        };

        let entry = session.to_entry(text.to_string());
        match self.store.append(person_id, entry.clone()) {
            Ok(()) => {
                info!(event = "ritual_completed", person_id = person_id, date = %entry.date);
                Ok(entry)
            }
            Err(err) => {
                warn!(
                    event = "ritual_commit_failed",
                    person_id = person_id,
                    retryable = err.is_retryable(),
                    error = %err
                );
                // A ritual restarted meanwhile takes precedence.
                self.sessions()
                    .entry(person_id.to_string())
                    .or_insert(session);
                Err(err.into())
            }
        }
    }

    /// Feed free text to whichever step the person is at.
    pub fn submit(&self, person_id: &str, text: &str) -> Result<StepOutcome, RitualError> {
        match self.current_step(person_id) {
            Some(RitualStep::Scan) => self.submit_scan(person_id, text).map(StepOutcome::Next),
            Some(RitualStep::Voice) => self.submit_voices(person_id, text).map(StepOutcome::Next),
            Some(RitualStep::Focus) => self.submit_focus(person_id, text).map(StepOutcome::Next),
            Some(RitualStep::Promise) => self
                .submit_promise(person_id, text)
                .map(StepOutcome::Completed),
            None => Err(invalid(person_id, "submit", None)),
        }
    }

    /// Abort the person's ritual without writing anything. Returns the step
    /// that was abandoned.
    pub fn cancel(&self, person_id: &str) -> Result<RitualStep, RitualError> {
        let removed = self.sessions().remove(person_id);
        match removed {
            Some(session) => {
                info!(
                    event = "ritual_cancelled",
                    person_id = person_id,
                    step = %session.step
                );
                Ok(session.step)
            }
            None => Err(invalid(person_id, "cancel", None)),
        }
    }

    pub fn has_active_session(&self, person_id: &str) -> bool {
        self.sessions().contains_key(person_id)
    }

    pub fn current_step(&self, person_id: &str) -> Option<RitualStep> {
        self.sessions().get(person_id).map(|session| session.step)
    }

    pub fn session(&self, person_id: &str) -> Option<RitualSession> {
        self.sessions().get(person_id).cloned()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions().len()
    }

    fn advance(
        &self,
        person_id: &str,
        expected: RitualStep,
        operation: &'static str,
        text: &str,
    ) -> Result<StepPrompt, RitualError> {
        let mut sessions = self.sessions();
        match sessions.get_mut(person_id) {
            Some(session) if session.step == expected => {
                match expected {
                    RitualStep::Scan => session.scan = text.to_string(),
                    RitualStep::Voice => session.voices = text.to_string(),
                    RitualStep::Focus => session.focus = text.to_string(),
                    RitualStep::Promise => {
                        return Err(invalid(person_id, operation, Some(session.step)))
                    }
                }
                let Some(next) = expected.next() else {
                    return Err(invalid(person_id, operation, Some(session.step)));
                };
                session.step = next;
                debug!(event = "ritual_step", person_id = person_id, step = %next);
                Ok(step_prompt(next))
            }
            other => {
                let state = other.map(|session| session.step);
                Err(invalid(person_id, operation, state))
            }
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, RitualSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn invalid(person_id: &str, operation: &'static str, state: Option<RitualStep>) -> RitualError {
    RitualError::InvalidTransition {
        person_id: person_id.to_string(),
        operation,
        state,
    }
}
