//! Line-oriented transport: every input line is a message from one person,
//! replies and reminders are written back as plain text.

use crate::router::{CommandRouter, Reply};
use async_trait::async_trait;
use ritual_mind::{DeliveryError, ReminderNotifier};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub fn render_reply(reply: &Reply) -> String {
    let mut out = reply.text.clone();
    if !reply.options.is_empty() {
        out.push('\n');
        for (index, option) in reply.options.iter().enumerate() {
            out.push_str(&format!("\n  [{}] {option}", index + 1));
        }
    }
    out.push('\n');
    out
}

/// A numeric answer picks the matching suggestion from the previous reply.
fn resolve_choice(line: &str, options: &[String]) -> String {
    line.trim()
        .parse::<usize>()
        .ok()
        .and_then(|index| index.checked_sub(1))
        .and_then(|index| options.get(index))
        .cloned()
        .unwrap_or_else(|| line.to_string())
}

/// Writes reminders to the shared console output, but only for the person the
/// console is attached to.
pub struct ConsoleNotifier<W> {
    person_id: String,
    out: Arc<Mutex<W>>,
}

impl<W> ConsoleNotifier<W> {
    pub fn new(person_id: impl Into<String>, out: Arc<Mutex<W>>) -> Self {
        Self {
            person_id: person_id.into(),
            out,
        }
    }
}

#[async_trait]
impl<W> ReminderNotifier for ConsoleNotifier<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_reminder(&self, person_id: &str, text: &str) -> Result<(), DeliveryError> {
        if person_id != self.person_id {
            debug!(event = "reminder_unroutable", person_id = person_id);
            return Err(DeliveryError::new(person_id, "no console attached"));
        }
        let mut out = self.out.lock().await;
        let line = format!("\n🔔 {text}\n");
        out.write_all(line.as_bytes())
            .await
            .map_err(|err| DeliveryError::new(person_id, err.to_string()))?;
        out.flush()
            .await
            .map_err(|err| DeliveryError::new(person_id, err.to_string()))
    }
}

/// Serve until the input reaches EOF.
pub async fn serve<R, W>(
    router: &CommandRouter,
    person_id: &str,
    mut reader: R,
    out: Arc<Mutex<W>>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut options: Vec<String> = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            info!(event = "console_eof", person_id = person_id);
            return Ok(());
        }
        // Blank lines are answers too; the router decides what they mean.
        let message = resolve_choice(line.trim_end_matches(['\r', '\n']), &options);

        let reply = router.handle(person_id, &message).await;
        options = reply.options.clone();

        let mut out = out.lock().await;
        out.write_all(render_reply(&reply).as_bytes()).await?;
        out.flush().await?;
    }
}
