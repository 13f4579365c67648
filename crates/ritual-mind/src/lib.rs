use ritual_core::model_contracts::{CompletionRequest, ModelError, ReflectionModel};
use ritual_core::mood::MoodRules;
use ritual_core::prompts::{
    build_summary_prompt, render_summary_reply, DEFAULT_CONSULTANT_PROMPT, DEFAULT_FIELD_LIMIT,
    NO_HISTORY, SUMMARY_FAILED, SUMMARY_SYSTEM_PROMPT, TALK_FAILED,
};
use ritual_core::ReflectionEntry;
use ritual_storage::EntryStore;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod reminder_runtime;
pub mod ritual_machine;

pub use reminder_runtime::{
    next_fire_after, parse_fire_time, people_to_remind, DeliveryError, ReminderConfig,
    ReminderError, ReminderNotifier, ReminderScheduler, ReminderTickReport,
};
pub use ritual_machine::{RitualError, RitualMachine, RitualSession, StepOutcome};

const DEFAULT_SUMMARY_LOOKBACK: usize = 3;
const DEFAULT_SUMMARY_MAX_TOKENS: u32 = 400;
const DEFAULT_TEMPERATURE: f32 = 0.6;

#[derive(Debug, Clone, PartialEq)]
pub struct AdvisorConfig {
    pub summary_lookback: usize,
    pub field_limit: usize,
    pub summary_max_tokens: u32,
    pub temperature: f32,
    pub consultant_prompt: String,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            summary_lookback: DEFAULT_SUMMARY_LOOKBACK,
            field_limit: DEFAULT_FIELD_LIMIT,
            summary_max_tokens: DEFAULT_SUMMARY_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            consultant_prompt: DEFAULT_CONSULTANT_PROMPT.to_string(),
        }
    }
}

impl AdvisorConfig {
    /// Use the consultant prompt stored at `path`, keeping the built-in one if
    /// the file is missing, unreadable or blank.
    pub fn with_consultant_prompt_file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(prompt) if !prompt.trim().is_empty() => {
                info!(event = "consultant_prompt_loaded", path = %path.display());
                self.consultant_prompt = prompt;
            }
            Ok(_) => {
                warn!(event = "consultant_prompt_empty", path = %path.display());
            }
            Err(err) => {
                debug!(
                    event = "consultant_prompt_default",
                    path = %path.display(),
                    error = %err
                );
            }
        }
        self
    }
}

/// Summaries and free conversation on top of the language-model capability.
///
/// Store reads happen on the blocking pool and finish before the model call
/// starts, so a slow model never holds the store lock.
pub struct ReflectionAdvisor {
    config: AdvisorConfig,
    store: Arc<EntryStore>,
    model: Arc<dyn ReflectionModel>,
    moods: MoodRules,
}

impl ReflectionAdvisor {
    pub fn new(
        config: AdvisorConfig,
        store: Arc<EntryStore>,
        model: Arc<dyn ReflectionModel>,
    ) -> Self {
        Self {
            config,
            store,
            model,
            moods: MoodRules::default(),
        }
    }

    pub fn with_moods(mut self, moods: MoodRules) -> Self {
        self.moods = moods;
        self
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    pub async fn summarize(&self, entries: &[ReflectionEntry]) -> Result<String, ModelError> {
        let request = CompletionRequest::new(
            SUMMARY_SYSTEM_PROMPT,
            build_summary_prompt(entries, self.config.field_limit),
        )
        .with_max_tokens(self.config.summary_max_tokens)
        .with_temperature(self.config.temperature);
        self.model.complete(request).await
    }

    pub async fn respond(&self, system_prompt: &str, user_text: &str) -> Result<String, ModelError> {
        let request = CompletionRequest::new(system_prompt, user_text)
            .with_temperature(self.config.temperature);
        self.model.complete(request).await
    }

    /// The person-facing answer to a history request. Never fails: errors are
    /// logged and replaced by an apology.
    pub async fn history_summary(&self, person_id: &str) -> String {
        let store = Arc::clone(&self.store);
        let owner = person_id.to_string();
        let lookback = self.config.summary_lookback;
        let entries = match tokio::task::spawn_blocking(move || store.entries_for(&owner, lookback))
            .await
        {
            Ok(Ok(entries)) => entries,
            Ok(Err(err)) => {
                warn!(event = "summary_store_failed", person_id = person_id, error = %err);
                return SUMMARY_FAILED.to_string();
            }
            Err(err) => {
                warn!(event = "summary_store_failed", person_id = person_id, error = %err);
                return SUMMARY_FAILED.to_string();
            }
        };

        if entries.is_empty() {
            return NO_HISTORY.to_string();
        }

        match self.summarize(&entries).await {
            Ok(reply) => {
                let symbol = self.moods.symbol_for(&reply);
                debug!(
                    event = "summary_ready",
                    person_id = person_id,
                    entries = entries.len(),
                    mood = symbol
                );
                render_summary_reply(symbol, &reply)
            }
            Err(err) => {
                warn!(
                    event = "summary_model_failed",
                    person_id = person_id,
                    provider = self.model.provider_name(),
                    kind = %err.kind,
                    error = %err
                );
                SUMMARY_FAILED.to_string()
            }
        }
    }

    /// Free-form supportive reply using the consultant prompt.
    pub async fn talk(&self, person_id: &str, text: &str) -> String {
        match self.respond(&self.config.consultant_prompt, text).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(
                    event = "talk_model_failed",
                    person_id = person_id,
                    provider = self.model.provider_name(),
                    kind = %err.kind,
                    error = %err
                );
                TALK_FAILED.to_string()
            }
        }
    }
}
