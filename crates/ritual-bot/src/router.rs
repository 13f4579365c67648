//! Maps incoming messages onto ritual and advisor operations, one command per
//! operation, independent of the transport that delivered them.

use ritual_core::prompts::{
    StepPrompt, GREETING, NOTHING_TO_CANCEL, RITUAL_CANCELLED, RITUAL_COMPLETE, SAVE_FAILED,
    UNKNOWN_COMMAND,
};
use ritual_mind::{ReflectionAdvisor, RitualError, RitualMachine, StepOutcome};
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Start,
    Ritual,
    Cancel,
    History,
    Unknown(String),
    Text(String),
}

impl Inbound {
    /// `/cmd@botname args` is treated as `/cmd`. Anything else is kept
    /// byte-for-byte, surrounding whitespace and emptiness included.
    pub fn parse(raw: &str) -> Self {
        let Some(command) = raw.trim().strip_prefix('/') else {
            return Self::Text(raw.to_string());
        };
        let word = command.split_whitespace().next().unwrap_or_default();
        let name = word.split('@').next().unwrap_or_default().to_lowercase();
        match name.as_str() {
            "start" => Self::Start,
            "ritual" => Self::Ritual,
            "cancel" => Self::Cancel,
            "history" => Self::History,
            _ => Self::Unknown(name),
        }
    }
}

/// Text to show plus the suggestion options a transport may render as buttons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub options: Vec<String>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            options: Vec::new(),
        }
    }
}

impl From<StepPrompt> for Reply {
    fn from(prompt: StepPrompt) -> Self {
        Self {
            text: prompt.text.to_string(),
            options: prompt.options.iter().map(|option| option.to_string()).collect(),
        }
    }
}

pub struct CommandRouter {
    machine: Arc<RitualMachine>,
    advisor: Arc<ReflectionAdvisor>,
}

impl CommandRouter {
    pub fn new(machine: Arc<RitualMachine>, advisor: Arc<ReflectionAdvisor>) -> Self {
        Self { machine, advisor }
    }

    pub async fn handle(&self, person_id: &str, raw: &str) -> Reply {
        let inbound = Inbound::parse(raw);
        debug!(event = "inbound", person_id = person_id, kind = kind_of(&inbound));
        match inbound {
            Inbound::Start => Reply::text(GREETING),
            Inbound::Ritual => self.machine.begin(person_id).into(),
            Inbound::Cancel => match self.machine.cancel(person_id) {
                Ok(_) => Reply::text(RITUAL_CANCELLED),
                Err(_) => Reply::text(NOTHING_TO_CANCEL),
            },
            Inbound::History => Reply::text(self.advisor.history_summary(person_id).await),
            Inbound::Unknown(_) => Reply::text(UNKNOWN_COMMAND),
            Inbound::Text(text) if self.machine.has_active_session(person_id) => {
                self.submit(person_id, text).await
            }
            Inbound::Text(text) if text.trim().is_empty() => Reply::text(UNKNOWN_COMMAND),
            Inbound::Text(text) => Reply::text(self.advisor.talk(person_id, &text).await),
        }
    }

    async fn submit(&self, person_id: &str, text: String) -> Reply {
        // The promise step writes the store, so keep it off the async workers.
        let machine = Arc::clone(&self.machine);
        let owner = person_id.to_string();
        let outcome = tokio::task::spawn_blocking(move || machine.submit(&owner, &text)).await;

        match outcome {
            Ok(Ok(StepOutcome::Next(prompt))) => prompt.into(),
            Ok(Ok(StepOutcome::Completed(_))) => Reply::text(RITUAL_COMPLETE),
            Ok(Err(RitualError::Storage(err))) => {
                error!(event = "ritual_save_failed", person_id = person_id, error = %err);
                Reply::text(SAVE_FAILED)
            }
            // The session vanished between the check and the submit.
            Ok(Err(err @ RitualError::InvalidTransition { .. })) => {
                warn!(event = "ritual_submit_rejected", person_id = person_id, error = %err);
                Reply::text(UNKNOWN_COMMAND)
            }
            Err(err) => {
                error!(event = "ritual_submit_panicked", person_id = person_id, error = %err);
                Reply::text(SAVE_FAILED)
            }
        }
    }
}

fn kind_of(inbound: &Inbound) -> &'static str {
    match inbound {
        Inbound::Start => "start",
        Inbound::Ritual => "ritual",
        Inbound::Cancel => "cancel",
        Inbound::History => "history",
        Inbound::Unknown(_) => "unknown",
        Inbound::Text(_) => "text",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ritual_core::model_contracts::{CompletionRequest, ModelError, ReflectionModel};
    use ritual_core::prompts::{FOCUS_OPTIONS, NO_HISTORY, SCAN_PROMPT, VOICE_LABELS};
    use ritual_core::RitualStep;
    use ritual_mind::AdvisorConfig;
    use ritual_storage::EntryStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct EchoModel {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ReflectionModel for EchoModel {
        fn provider_name(&self) -> &'static str {
            "echo"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<String, ModelError> {
            self.calls.lock().expect("calls").push(request.user_text.clone());
            Ok(format!("echo: {}", request.user_text))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<EntryStore>,
        model: Arc<EchoModel>,
        router: CommandRouter,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(EntryStore::open(dir.path().join("reflections.json")));
        let model = Arc::new(EchoModel::default());
        let machine = Arc::new(RitualMachine::new(Arc::clone(&store)));
        let advisor = Arc::new(ReflectionAdvisor::new(
            AdvisorConfig::default(),
            Arc::clone(&store),
            model.clone(),
        ));
        Fixture {
            _dir: dir,
            store,
            model,
            router: CommandRouter::new(machine, advisor),
        }
    }

    #[test]
    fn parses_commands_and_text() {
        assert_eq!(Inbound::parse("/start"), Inbound::Start);
        assert_eq!(Inbound::parse("  /ritual  "), Inbound::Ritual);
        assert_eq!(Inbound::parse("/cancel@reflect_bot"), Inbound::Cancel);
        assert_eq!(Inbound::parse("/HISTORY please"), Inbound::History);
        assert_eq!(Inbound::parse("/help"), Inbound::Unknown("help".to_string()));
        assert_eq!(
            Inbound::parse(" устал(а) сегодня "),
            Inbound::Text(" устал(а) сегодня ".to_string())
        );
        assert_eq!(Inbound::parse(""), Inbound::Text(String::new()));
    }

    #[tokio::test]
    async fn full_ritual_through_router_persists_one_entry() {
        let fx = fixture();

        let first = fx.router.handle("7", "/ritual").await;
        assert_eq!(first.text, SCAN_PROMPT);
        assert!(first.options.is_empty());

        let voice = fx.router.handle("7", "тяжесть в плечах").await;
        assert_eq!(voice.options, VOICE_LABELS.to_vec());
        let focus = fx.router.handle("7", "Критик").await;
        assert_eq!(focus.options, FOCUS_OPTIONS.to_vec());
        fx.router.handle("7", "Отдых").await;
        let done = fx.router.handle("7", "лечь до полуночи").await;
        assert_eq!(done.text, RITUAL_COMPLETE);

        let saved = fx.store.entries_for("7", 10).expect("entries");
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].scan, "тяжесть в плечах");
        assert_eq!(saved[0].promise, "лечь до полуночи");
        assert!(fx.model.calls.lock().expect("calls").is_empty());
    }

    #[tokio::test]
    async fn empty_and_padded_answers_advance_the_ritual_verbatim() {
        let fx = fixture();
        fx.router.handle("7", "/ritual").await;

        let voice = fx.router.handle("7", "").await;
        assert_eq!(voice.options, VOICE_LABELS.to_vec());
        assert_eq!(fx.router.machine.current_step("7"), Some(RitualStep::Voice));

        fx.router.handle("7", "  Критик  ").await;
        fx.router.handle("7", "   ").await;
        let done = fx.router.handle("7", "").await;
        assert_eq!(done.text, RITUAL_COMPLETE);

        let saved = fx.store.entries_for("7", 1).expect("entries");
        assert_eq!(saved[0].scan, "");
        assert_eq!(saved[0].voices, "  Критик  ");
        assert_eq!(saved[0].focus, "   ");
        assert_eq!(saved[0].promise, "");
    }

    #[tokio::test]
    async fn empty_text_while_idle_gets_help_without_model_call() {
        let fx = fixture();
        assert_eq!(fx.router.handle("7", "").await.text, UNKNOWN_COMMAND);
        assert_eq!(fx.router.handle("7", " \t").await.text, UNKNOWN_COMMAND);
        assert!(fx.model.calls.lock().expect("calls").is_empty());
    }

    #[tokio::test]
    async fn text_without_session_goes_to_conversation() {
        let fx = fixture();
        let reply = fx.router.handle("7", "мне тревожно").await;
        assert_eq!(reply.text, "echo: мне тревожно");
        assert!(fx.store.entries_for("7", 10).expect("entries").is_empty());
    }

    #[tokio::test]
    async fn cancel_discards_session_and_idle_cancel_is_explained() {
        let fx = fixture();
        assert_eq!(fx.router.handle("7", "/cancel").await.text, NOTHING_TO_CANCEL);

        fx.router.handle("7", "/ritual").await;
        fx.router.handle("7", "scan").await;
        assert_eq!(fx.router.handle("7", "/cancel").await.text, RITUAL_CANCELLED);
        assert!(fx.store.entries_for("7", 10).expect("entries").is_empty());

        // Free text after cancelling is conversation again.
        assert_eq!(fx.router.handle("7", "ну вот").await.text, "echo: ну вот");
    }

    #[tokio::test]
    async fn ritual_restart_goes_back_to_scan() {
        let fx = fixture();
        fx.router.handle("7", "/ritual").await;
        fx.router.handle("7", "scan").await;
        assert_eq!(fx.router.handle("7", "/ritual").await.text, SCAN_PROMPT);
        assert_eq!(fx.router.machine.current_step("7"), Some(RitualStep::Scan));
    }

    #[tokio::test]
    async fn start_unknown_and_history_replies() {
        let fx = fixture();
        assert_eq!(fx.router.handle("7", "/start").await.text, GREETING);
        assert_eq!(fx.router.handle("7", "/foo").await.text, UNKNOWN_COMMAND);
        assert_eq!(fx.router.handle("7", "/history").await.text, NO_HISTORY);
    }

    #[tokio::test]
    async fn people_do_not_share_sessions() {
        let fx = fixture();
        fx.router.handle("a", "/ritual").await;
        let reply = fx.router.handle("b", "привет").await;
        assert_eq!(reply.text, "echo: привет");
        assert_eq!(fx.router.machine.current_step("a"), Some(RitualStep::Scan));
    }
}
