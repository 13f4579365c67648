mod config;
mod console;
mod logging;
mod openai;
mod router;

use anyhow::Context;
use config::load_config;
use console::ConsoleNotifier;
use openai::OpenAiChatModel;
use ritual_mind::{ReflectionAdvisor, ReminderScheduler, RitualMachine};
use ritual_storage::{EntryStore, LoadOutcome};
use router::CommandRouter;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    let log_guard = logging::init(&config.logging);
    if let Some(path) = config.logging.file_path() {
        if log_guard.as_ref().is_some_and(|guard| guard.has_file()) {
            info!(event = "log_file_opened", path = %path.display());
        }
    }

    let store = Arc::new(EntryStore::open(&config.data_file));
    let load_store = Arc::clone(&store);
    let (book, outcome) = tokio::task::spawn_blocking(move || load_store.load_with_outcome())
        .await
        .context("store load task failed")?
        .with_context(|| format!("loading {}", config.data_file.display()))?;
    match outcome {
        LoadOutcome::Loaded => info!(
            event = "store_loaded",
            path = %store.path().display(),
            people = book.people.len()
        ),
        LoadOutcome::Created => info!(event = "store_created", path = %store.path().display()),
        LoadOutcome::Quarantined { backup } => warn!(
            event = "store_started_empty",
            path = %store.path().display(),
            backup = %backup.display()
        ),
    }

    let model = OpenAiChatModel::new(&config.model).context("building model client")?;
    let machine = Arc::new(RitualMachine::new(Arc::clone(&store)));
    let advisor = Arc::new(ReflectionAdvisor::new(
        config.advisor(),
        Arc::clone(&store),
        Arc::new(model),
    ));
    let router = CommandRouter::new(machine, advisor);

    let stdout = Arc::new(AsyncMutex::new(tokio::io::stdout()));
    let notifier = Arc::new(ConsoleNotifier::new(
        config.person_id.clone(),
        Arc::clone(&stdout),
    ));
    let scheduler = ReminderScheduler::new(config.reminder(), Arc::clone(&store), notifier);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let reminder_task = tokio::spawn(async move {
        scheduler
            .run_until(async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            })
            .await;
    });

    info!(
        event = "bot_start",
        person_id = %config.person_id,
        data_file = %config.data_file.display(),
        reminder_at = %config.reminder_at.format("%H:%M"),
        model = %config.model.model
    );

    let stdin = BufReader::new(tokio::io::stdin());
    let interrupted = tokio::select! {
        served = console::serve(&router, &config.person_id, stdin, Arc::clone(&stdout)) => {
            if let Err(err) = served {
                error!(event = "console_error", error = %err);
            }
            false
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                error!(event = "signal_error", error = %err);
            }
            true
        }
    };

    let _ = shutdown_tx.send(true);
    if let Err(err) = reminder_task.await {
        error!(event = "reminder_task_failed", error = %err);
    }
    info!(event = "bot_stop", interrupted = interrupted);
    if interrupted {
        // A pending stdin read would keep the runtime from shutting down.
        std::process::exit(0);
    }
    Ok(())
}
