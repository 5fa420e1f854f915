use chrono::{DateTime, Duration, Utc};

use crate::translate::Translator;

const BEIJING_OFFSET_HOURS: i64 = 8;

/// `instant` in Beijing time (UTC+8) as `YYYY-MM-DD HH:MM:SS`.
pub fn beijing_time(instant: DateTime<Utc>) -> String {
    (instant.naive_utc() + Duration::hours(BEIJING_OFFSET_HOURS))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Undo UTF-8 text that was decoded as Latin-1 upstream ("â€œ" back to "“").
///
/// Every char is re-encoded as its Latin-1 byte and the result decoded as
/// UTF-8, dropping invalid sequences. Text holding any char above U+00FF was
/// not produced that way and is returned unchanged.
pub fn repair_mojibake(content: &str) -> String {
    let mut bytes = Vec::with_capacity(content.len());
    for c in content.chars() {
        match u8::try_from(u32::from(c)) {
            Ok(b) => bytes.push(b),
            Err(_) => return content.to_string(),
        }
    }

    let mut repaired = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        repaired.push_str(chunk.valid());
    }
    repaired
}

/// The notification text. A translation identical to the content is dropped.
pub fn render_message(time: &str, content: &str, translation: Option<&str>) -> String {
    match translation {
        Some(translated) if translated != content => {
            format!("🕐 {time} (北京时间)\n\n{content}\n\n📝 中文翻译：\n{translated}")
        }
        _ => format!("🕐 {time} (北京时间)\n\n{content}"),
    }
}

/// Build the message for one post: Beijing timestamp, repaired content and
/// the Chinese translation when one is available.
pub async fn format_message(
    created_at: DateTime<Utc>,
    content: &str,
    translator: &Translator,
) -> String {
    let time = beijing_time(created_at);
    let fixed = repair_mojibake(content);
    let translation = translator.translate_to_chinese(&fixed).await;
    render_message(&time, &fixed, translation.as_deref())
}
