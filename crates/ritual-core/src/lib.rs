use chrono::{DateTime, Local, NaiveDate, TimeZone};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod model_contracts;
pub mod mood;
pub mod prompts;

/// Placeholder used for entry fields absent from older artifacts.
pub const MISSING_FIELD: &str = "-";

const CAPTURE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Every person's history, keyed by person id.
///
/// Serializes as a flat JSON object so the on-disk artifact stays
/// `{"<person-id>": [entry, ...], ...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionBook {
    #[serde(flatten)]
    pub people: BTreeMap<String, Vec<ReflectionEntry>>,
}

impl ReflectionBook {
    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    pub fn history(&self, person_id: &str) -> &[ReflectionEntry] {
        self.people
            .get(person_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn push(&mut self, person_id: &str, entry: ReflectionEntry) {
        self.people
            .entry(person_id.to_string())
            .or_default()
            .push(entry);
    }

    /// The last `limit` entries of a person, oldest first.
    pub fn recent(&self, person_id: &str, limit: usize) -> Vec<ReflectionEntry> {
        let history = self.history(person_id);
        let start = history.len().saturating_sub(limit);
        history[start..].to_vec()
    }

    pub fn has_entry_on(&self, person_id: &str, day: NaiveDate) -> bool {
        self.history(person_id)
            .iter()
            .any(|entry| entry.is_on(day))
    }
}

/// One completed ritual. Never mutated after it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionEntry {
    #[serde(default = "missing_field", deserialize_with = "deserialize_text")]
    pub date: String,
    #[serde(default = "missing_field", deserialize_with = "deserialize_text")]
    pub scan: String,
    #[serde(default = "missing_field", deserialize_with = "deserialize_text")]
    pub voices: String,
    #[serde(default = "missing_field", deserialize_with = "deserialize_text")]
    pub focus: String,
    #[serde(default = "missing_field", deserialize_with = "deserialize_text")]
    pub promise: String,
}

impl ReflectionEntry {
    /// Calendar day of the capture timestamp. Only the `YYYY-MM-DD` prefix is
    /// read, so any time-of-day or offset suffix is ignored.
    pub fn captured_on(&self) -> Option<NaiveDate> {
        let day = self.date.get(..10)?;
        NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
    }

    pub fn is_on(&self, day: NaiveDate) -> bool {
        self.captured_on() == Some(day)
    }
}

/// ISO-8601 local wall-clock timestamp without offset, e.g.
/// `2024-03-14T21:05:09.120034`.
pub fn capture_timestamp<Tz: TimeZone>(now: &DateTime<Tz>) -> String {
    now.naive_local().format(CAPTURE_FORMAT).to_string()
}

pub fn local_capture_timestamp() -> String {
    capture_timestamp(&Local::now())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RitualStep {
    Scan,
    Voice,
    Focus,
    Promise,
}

impl RitualStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            RitualStep::Scan => "scan",
            RitualStep::Voice => "voice",
            RitualStep::Focus => "focus",
            RitualStep::Promise => "promise",
        }
    }

    /// The step that follows this one, `None` after the promise.
    pub fn next(&self) -> Option<RitualStep> {
        match self {
            RitualStep::Scan => Some(RitualStep::Voice),
            RitualStep::Voice => Some(RitualStep::Focus),
            RitualStep::Focus => Some(RitualStep::Promise),
            RitualStep::Promise => None,
        }
    }
}

impl fmt::Display for RitualStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn missing_field() -> String {
    MISSING_FIELD.to_string()
}

/// Any JSON value reads as text: strings verbatim, `null` as the missing
/// placeholder, everything else as its compact JSON rendering.
fn deserialize_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val: serde_json::Value = serde_json::Value::deserialize(deserializer)?;
    match val {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        serde_json::Value::Null => Ok(missing_field()),
        other => Ok(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn entry(date: &str) -> ReflectionEntry {
        ReflectionEntry {
            date: date.to_string(),
            scan: "calm".to_string(),
            voices: "Критик, Бунтарь".to_string(),
            focus: "Отдых".to_string(),
            promise: "sleep early".to_string(),
        }
    }

    #[test]
    fn capture_timestamp_is_local_iso_without_offset() {
        let tz = FixedOffset::east_opt(3 * 3600).expect("offset");
        let now = tz
            .with_ymd_and_hms(2024, 3, 14, 21, 5, 9)
            .single()
            .expect("ts");
        assert_eq!(capture_timestamp(&now), "2024-03-14T21:05:09.000000");
    }

    #[test]
    fn captured_on_ignores_time_of_day_and_offset() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 14).expect("day");
        assert_eq!(entry("2024-03-14T23:59:59.999999").captured_on(), Some(day));
        assert_eq!(entry("2024-03-14T00:00:00+05:00").captured_on(), Some(day));
        assert_eq!(entry("2024-03-14").captured_on(), Some(day));
        assert_eq!(entry("yesterday").captured_on(), None);
        assert_eq!(entry("").captured_on(), None);
    }

    #[test]
    fn missing_and_null_fields_read_as_placeholder() {
        let parsed: ReflectionEntry =
            serde_json::from_str(r#"{"date":"2024-03-14T10:00:00","scan":null,"focus":7}"#)
                .expect("parse");
        assert_eq!(parsed.scan, MISSING_FIELD);
        assert_eq!(parsed.voices, MISSING_FIELD);
        assert_eq!(parsed.focus, "7");
        assert_eq!(parsed.promise, MISSING_FIELD);
    }

    #[test]
    fn entry_without_date_or_with_structured_fields_still_parses() {
        let parsed: ReflectionEntry = serde_json::from_str(
            r#"{"scan":"legacy entry","voices":["Критик","Бунтарь"],"focus":{"area":"Отдых"}}"#,
        )
        .expect("parse");
        assert_eq!(parsed.date, MISSING_FIELD);
        assert_eq!(parsed.captured_on(), None);
        assert_eq!(parsed.scan, "legacy entry");
        assert_eq!(parsed.voices, r#"["Критик","Бунтарь"]"#);
        assert_eq!(parsed.focus, r#"{"area":"Отдых"}"#);
    }

    #[test]
    fn book_serializes_as_flat_person_map() {
        let mut book = ReflectionBook::default();
        book.push("42", entry("2024-03-14T10:00:00"));
        let value = serde_json::to_value(&book).expect("json");
        assert!(value["42"].is_array());
        assert_eq!(value["42"][0]["promise"], "sleep early");

        let back: ReflectionBook = serde_json::from_value(value).expect("back");
        assert_eq!(back, book);
    }

    #[test]
    fn recent_returns_tail_in_chronological_order() {
        let mut book = ReflectionBook::default();
        for day in 1..=5 {
            book.push("p", entry(&format!("2024-03-0{day}T10:00:00")));
        }
        let recent = book.recent("p", 3);
        let dates: Vec<_> = recent.iter().map(|e| e.date.as_str()).collect();
        assert_eq!(
            dates,
            vec![
                "2024-03-03T10:00:00",
                "2024-03-04T10:00:00",
                "2024-03-05T10:00:00"
            ]
        );
        assert_eq!(book.recent("p", 10).len(), 5);
        assert!(book.recent("nobody", 3).is_empty());
    }

    #[test]
    fn ritual_steps_advance_in_order() {
        assert_eq!(RitualStep::Scan.next(), Some(RitualStep::Voice));
        assert_eq!(RitualStep::Voice.next(), Some(RitualStep::Focus));
        assert_eq!(RitualStep::Focus.next(), Some(RitualStep::Promise));
        assert_eq!(RitualStep::Promise.next(), None);
        assert_eq!(RitualStep::Voice.to_string(), "voice");
    }
}
