//! User-facing texts and prompt builders.

use crate::{ReflectionEntry, RitualStep};
use std::borrow::Cow;

pub const DEFAULT_FIELD_LIMIT: usize = 200;
pub const TRUNCATION_MARKER: &str = "...";

pub const GREETING: &str = "Привет! Я помогу тебе сделать короткий ритуал саморефлексии.\n\n\
/ritual — начать ежедневный ритуал\n\
/history — посмотреть, что я замечаю в твоих последних записях\n\
/cancel — прервать ритуал\n\n\
А ещё можно просто написать мне, что у тебя на душе.";

pub const UNKNOWN_COMMAND: &str =
    "Я знаю команды /ritual, /history и /cancel. Или просто напиши, о чём хочется поговорить.";

pub const SCAN_PROMPT: &str = "🧘 Шаг 1. Сканирование.\n\
Остановись на минуту и прислушайся к себе. Что ты чувствуешь в теле? Какое у тебя сейчас настроение?";

pub const VOICE_PROMPT: &str = "🗣 Шаг 2. Внутренние голоса.\n\
Какие внутренние голоса сегодня звучат громче всего? Выбери из списка или напиши своими словами.";

pub const FOCUS_PROMPT: &str = "🎯 Шаг 3. Фокус недели.\n\
На чём тебе хочется сосредоточиться на этой неделе?";

pub const PROMISE_PROMPT: &str = "🤝 Шаг 4. Обещание себе.\n\
Какое маленькое обещание ты можешь дать себе на сегодня?";

pub const RITUAL_COMPLETE: &str =
    "✨ Спасибо! Ритуал завершён, запись сохранена. Береги себя ✨";

pub const RITUAL_CANCELLED: &str = "Ритуал прерван. Возвращайся, когда будешь готов(а) 🌱";

pub const NOTHING_TO_CANCEL: &str = "Сейчас нет начатого ритуала. Начать можно командой /ritual.";

pub const SAVE_FAILED: &str =
    "⚠️ Не удалось сохранить запись. Попробуй отправить обещание ещё раз чуть позже.";

pub const REMINDER_TEXT: &str =
    "🌙 Ты сегодня ещё не делал(а) ритуал. Найди пару минут для себя: /ritual";

pub const NO_HISTORY: &str =
    "✨ Пока нет записей для анализа. Возвращайся, когда будешь готов(а) поделиться собой ✨";

pub const SUMMARY_HEADER: &str = "Вот что я почувствовал(а), читая твои записи:";

pub const SUMMARY_FAILED: &str = "⚠️ Не удалось проанализировать историю. Попробуй позже.";

pub const TALK_FAILED: &str = "⚠️ Не получилось ответить прямо сейчас. Попробуй чуть позже.";

pub const SUMMARY_SYSTEM_PROMPT: &str =
    "Ты внимательный, тёплый и понимающий помощник. Не используй слово 'пользователь'.";

pub const DEFAULT_CONSULTANT_PROMPT: &str =
    "Ты заботливый и тёплый помощник. Отвечай с поддержкой, мягкостью и уважением.";

pub const SUMMARY_INSTRUCTIONS: &str = "Проанализируй следующие записи саморефлексии. \
Ответь тепло, с заботой и участием, будто пишешь близкому другу.\n\
- Какие состояния преобладают?\n\
- Какие внутренние темы повторяются?\n\
- Что ты бы мягко порекомендовал на следующую неделю?\n";

pub const VOICE_LABELS: &[&str] = &[
    "Критик",
    "Контролёр",
    "Внутренний ребёнок",
    "Заботливый взрослый",
    "Бунтарь",
    "Перфекционист",
];

pub const FOCUS_OPTIONS: &[&str] = &[
    "Здоровье",
    "Отношения",
    "Работа",
    "Отдых",
    "Творчество",
    "Саморазвитие",
];

/// A prompt for the person plus the suggestion buttons a transport may render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPrompt {
    pub text: &'static str,
    pub options: &'static [&'static str],
}

pub fn step_prompt(step: RitualStep) -> StepPrompt {
    match step {
        RitualStep::Scan => StepPrompt {
            text: SCAN_PROMPT,
            options: &[],
        },
        RitualStep::Voice => StepPrompt {
            text: VOICE_PROMPT,
            options: VOICE_LABELS,
        },
        RitualStep::Focus => StepPrompt {
            text: FOCUS_PROMPT,
            options: FOCUS_OPTIONS,
        },
        RitualStep::Promise => StepPrompt {
            text: PROMISE_PROMPT,
            options: &[],
        },
    }
}

/// Cut `text` to `limit` characters, appending the marker only when something
/// was removed.
pub fn truncate(text: &str, limit: usize) -> Cow<'_, str> {
    match text.char_indices().nth(limit) {
        None => Cow::Borrowed(text),
        Some((cut, _)) => Cow::Owned(format!("{}{TRUNCATION_MARKER}", &text[..cut])),
    }
}

pub fn render_entry(entry: &ReflectionEntry, field_limit: usize) -> String {
    format!(
        "Дата: {}\nЧувства: {}\nГолоса: {}\nФокус: {}\nОбещание: {}",
        entry.date,
        truncate(&entry.scan, field_limit),
        truncate(&entry.voices, field_limit),
        truncate(&entry.focus, field_limit),
        truncate(&entry.promise, field_limit),
    )
}

pub fn build_summary_prompt(entries: &[ReflectionEntry], field_limit: usize) -> String {
    let history = entries
        .iter()
        .map(|entry| render_entry(entry, field_limit))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{SUMMARY_INSTRUCTIONS}\nИстория:\n{history}")
}

pub fn render_summary_reply(symbol: &str, reply: &str) -> String {
    format!("{symbol} {SUMMARY_HEADER}\n\n{reply}")
}
