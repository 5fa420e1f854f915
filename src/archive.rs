use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};

/// A post as written by the archive ingester. Extra fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    /// Absent or null when the ingester could not read a date; such posts
    /// are skipped at delivery.
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Post {
    /// `created_at` as an instant. A timestamp without offset is read as UTC.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at.as_deref().and_then(parse_timestamp)
    }

    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Read the post archive. A missing or malformed file is logged and treated
/// as an empty archive.
pub fn load_archive(path: &Path) -> Vec<Post> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("Archive file {} does not exist", path.display());
            return Vec::new();
        }
        Err(e) => {
            warn!("Failed to read archive file {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<Post>>(&content) {
        Ok(posts) => {
            debug!("Loaded {} posts from {}", posts.len(), path.display());
            posts
        }
        Err(e) => {
            warn!("Archive file {} is malformed: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Read the sent-ID ledger. A missing file is an empty ledger; a malformed
/// one is an error.
pub fn load_ledger(path: &Path) -> Result<Vec<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Ledger file {} does not exist yet", path.display());
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read ledger file: {}", path.display()))
        }
    };

    serde_json::from_str(&content)
        .with_context(|| format!("Ledger file is malformed: {}", path.display()))
}

/// Overwrite the ledger with a pretty-printed JSON array.
pub fn save_ledger(path: &Path, ids: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create ledger directory: {}", parent.display())
            })?;
        }
    }

    let json = serde_json::to_string_pretty(ids).context("Failed to serialize ledger")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write ledger file: {}", path.display()))?;
    debug!("Saved {} ids to {}", ids.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_load_archive_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_archive(&dir.path().join("nope.json")).is_empty());
    }

    #[test]
    fn test_load_archive_malformed_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.json");
        std::fs::write(&path, "[{\"id\": ").unwrap();
        assert!(load_archive(&path).is_empty());
    }

    #[test]
    fn test_load_archive_ignores_extra_fields_and_null_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "1", "created_at": "2025-03-01T12:00:00.000Z", "content": "hello",
                 "url": "https://example.com/1", "media": [], "replies_count": 3},
                {"id": "2", "created_at": "2025-03-01T13:00:00Z", "content": null},
                {"id": "3", "created_at": "2025-03-01T14:00:00Z"}
            ]"#,
        )
        .unwrap();

        let posts = load_archive(&path);
        assert_eq!(posts.len(), 3);
        assert_eq!(posts[0].content, "hello");
        assert!(posts[1].is_blank());
        assert!(posts[2].is_blank());
    }

    #[test]
    fn test_load_archive_keeps_posts_without_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "1", "created_at": null, "content": "no date"},
                {"id": "2", "content": "also no date"},
                {"id": "3", "created_at": "2025-03-01T14:00:00Z", "content": "dated"}
            ]"#,
        )
        .unwrap();

        let posts = load_archive(&path);
        assert_eq!(posts.len(), 3);
        assert!(posts[0].created_at.is_none());
        assert!(posts[0].timestamp().is_none());
        assert!(posts[1].timestamp().is_none());
        assert!(posts[2].timestamp().is_some());
    }

    #[test]
    fn test_load_ledger_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ids = load_ledger(&dir.path().join("sent_ids.json")).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn test_load_ledger_malformed_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sent_ids.json");
        std::fs::write(&path, "not json").unwrap();
        let err = load_ledger(&path).unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn test_save_ledger_pretty_and_unescaped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sent_ids.json");
        let ids = vec!["a1".to_string(), "帖子-2".to_string()];

        save_ledger(&path, &ids).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, "[\n  \"a1\",\n  \"帖子-2\"\n]");
        assert_eq!(load_ledger(&path).unwrap(), ids);
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2025-03-01T12:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-01T12:00:00.000Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-01T20:00:00+08:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-01T12:00:00"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
