use crate::logging::{LogSettings, DEFAULT_LOG_FILE};
use crate::openai::{ModelSettings, DEFAULT_MODEL, DEFAULT_OPENAI_BASE_URL};
use anyhow::{bail, Context};
use chrono::NaiveTime;
use clap::Parser;
use ritual_mind::{parse_fire_time, AdvisorConfig, ReminderConfig};
use ritual_storage::DEFAULT_DATA_FILE;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PROMPT_FILE: &str = "consultant_prompt.txt";

#[derive(Parser, Debug)]
#[command(name = "ritual-bot", about = "Daily self-reflection ritual companion")]
pub struct Args {
    #[arg(long, env = "RITUAL_DATA_FILE", default_value = DEFAULT_DATA_FILE)]
    pub data_file: PathBuf,
    #[arg(long, env = "RITUAL_PROMPT_FILE", default_value = DEFAULT_PROMPT_FILE)]
    pub prompt_file: PathBuf,
    #[arg(long, env = "RITUAL_REMINDER_AT", default_value = "21:00")]
    pub reminder_at: String,
    #[arg(long, env = "RITUAL_SUMMARY_LOOKBACK", default_value_t = 3)]
    pub summary_lookback: usize,
    #[arg(long, env = "RITUAL_FIELD_LIMIT", default_value_t = 200)]
    pub field_limit: usize,
    #[arg(long, env = "OPENAI_KEY", default_value = "", hide_env_values = true)]
    pub openai_key: String,
    #[arg(long, env = "RITUAL_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    pub openai_base_url: String,
    #[arg(long, default_value_t = 400)]
    pub summary_max_tokens: u32,
    #[arg(long, default_value_t = 0.6)]
    pub temperature: f32,
    #[arg(long, default_value_t = 60)]
    pub model_timeout: u64,
    #[arg(long, env = "RITUAL_PERSON_ID", default_value = "local")]
    pub person: String,
    #[arg(long, env = "RITUAL_LOG_DIR", default_value = "")]
    pub log_dir: String,
    #[arg(long, env = "RITUAL_LOG_FILE", default_value = DEFAULT_LOG_FILE)]
    pub log_file: String,
    #[arg(long, env = "RITUAL_LOG_LEVEL")]
    pub log_level: Option<String>,
    #[arg(long, env = "RITUAL_DEBUG", default_value_t = false)]
    pub debug: bool,
}

#[derive(Clone, Debug)]
pub struct BotConfig {
    pub data_file: PathBuf,
    pub prompt_file: PathBuf,
    pub reminder_at: NaiveTime,
    pub summary_lookback: usize,
    pub field_limit: usize,
    pub summary_max_tokens: u32,
    pub temperature: f32,
    pub model: ModelSettings,
    pub person_id: String,
    pub logging: LogSettings,
}

impl BotConfig {
    pub fn from_args(args: Args) -> anyhow::Result<Self> {
        let api_key = args.openai_key.trim().to_string();
        if api_key.is_empty() {
            bail!("model API key is required (set OPENAI_KEY or pass --openai-key)");
        }
        let person_id = args.person.trim().to_string();
        if person_id.is_empty() {
            bail!("person id must not be blank");
        }
        let reminder_at = parse_fire_time(&args.reminder_at)
            .map_err(anyhow::Error::msg)
            .context("reading --reminder-at")?;
        if !(0.0..=2.0).contains(&args.temperature) {
            bail!("temperature must be within 0.0..=2.0, got {}", args.temperature);
        }

        Ok(Self {
            data_file: args.data_file,
            prompt_file: args.prompt_file,
            reminder_at,
            summary_lookback: args.summary_lookback.max(1),
            field_limit: args.field_limit.max(1),
            summary_max_tokens: args.summary_max_tokens,
            temperature: args.temperature,
            model: ModelSettings {
                api_key,
                model: args.model,
                base_url: args.openai_base_url,
                timeout: Duration::from_secs(args.model_timeout.max(1)),
            },
            person_id,
            logging: LogSettings::resolve(
                args.debug,
                args.log_level,
                &args.log_dir,
                &args.log_file,
            ),
        })
    }

    pub fn reminder(&self) -> ReminderConfig {
        ReminderConfig::at(self.reminder_at)
    }

    /// Reads the consultant prompt file, so call it once at start-up.
    pub fn advisor(&self) -> AdvisorConfig {
        AdvisorConfig {
            summary_lookback: self.summary_lookback,
            field_limit: self.field_limit,
            summary_max_tokens: self.summary_max_tokens,
            temperature: self.temperature,
            ..AdvisorConfig::default()
        }
        .with_consultant_prompt_file(&self.prompt_file)
    }
}

pub fn load_config() -> anyhow::Result<BotConfig> {
    BotConfig::from_args(Args::parse())
}
