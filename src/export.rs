use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Flat member row as written to export files. Optional columns stay in
/// place so every record has the same width.
#[derive(Debug, Serialize)]
pub struct ExportRow {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub is_bot: bool,
    pub source_guild: Option<i64>,
    pub added_at: DateTime<Utc>,
    pub last_contact_at: Option<DateTime<Utc>>,
    pub last_contact_status: Option<store::outreach::DeliveryStatus>,
}

impl From<&store::members::Member> for ExportRow {
    fn from(member: &store::members::Member) -> Self {
        Self {
            id: member.id,
            username: member.username.clone(),
            display_name: member.display_name.clone(),
            is_bot: member.is_bot,
            source_guild: member.source_guild,
            added_at: member.added_at,
            last_contact_at: member.last_contact_at,
            last_contact_status: member.last_contact_status,
        }
    }
}

/// Sidecar describing one export file.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExportMeta {
    pub file: String,
    pub title: String,
    pub source: u64,
    pub rows: usize,
    pub generated_at: DateTime<Utc>,
}

/// Write a member export plus its sidecar metadata, returning the csv path.
pub async fn write_members(
    dir: PathBuf,
    title: String,
    source: u64,
    rows: Vec<ExportRow>,
) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&dir)?;
        let stem = format!(
            "{}-{}",
            safe_name(&title),
            Utc::now().format("%Y%m%d-%H%M%S")
        );
        let path = dir.join(format!("{stem}.csv"));
        write_csv(&path, &rows)?;
        let meta = ExportMeta {
            file: format!("{stem}.csv"),
            title,
            source,
            rows: rows.len(),
            generated_at: Utc::now(),
        };
        std::fs::write(
            dir.join(format!("{stem}.meta.json")),
            serde_json::to_vec_pretty(&meta)?,
        )?;
        Ok(path)
    })
    .await
    .context("export task")?
}

pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reduce a guild name to a filename stem.
fn safe_name(title: &str) -> String {
    let mut name: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    name.truncate(64);
    let name = name.trim_matches('_');
    if name.is_empty() {
        "export".to_string()
    } else {
        name.to_string()
    }
}

/// One export file on disk, with its sidecar when one parses.
#[derive(Debug, Serialize)]
pub struct ExportEntry {
    pub file: String,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ExportMeta>,
}

/// List export files, newest first. A directory that does not exist yet is
/// an empty list, not an error.
pub async fn list(dir: PathBuf) -> Result<Vec<ExportEntry>> {
    tokio::task::spawn_blocking(move || {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };
        let mut exports = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("csv") {
                continue;
            }
            let Some(file) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let metadata = entry.metadata()?;
            let meta = std::fs::read(path.with_extension("meta.json"))
                .ok()
                .and_then(|bytes| serde_json::from_slice(&bytes).ok());
            exports.push(ExportEntry {
                file: file.to_string(),
                size: metadata.len(),
                modified_at: metadata.modified().ok().map(DateTime::from),
                meta,
            });
        }
        exports.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        Ok(exports)
    })
    .await
    .context("export task")?
}

/// Delete export files and their sidecars, returning how many exports were
/// removed.
pub async fn clear(dir: PathBuf) -> Result<usize> {
    tokio::task::spawn_blocking(move || {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default();
            if name.ends_with(".csv") {
                std::fs::remove_file(&path)?;
                removed += 1;
            } else if name.ends_with(".meta.json") {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(removed)
    })
    .await
    .context("export task")?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("guildcast-export-{}", uuid::Uuid::new_v4()))
    }

    fn row(id: i64) -> ExportRow {
        ExportRow {
            id,
            username: format!("user-{id}"),
            display_name: (id % 2 == 0).then(|| format!("User {id}")),
            is_bot: false,
            source_guild: Some(9),
            added_at: Utc::now(),
            last_contact_at: None,
            last_contact_status: None,
        }
    }

    #[tokio::test]
    async fn written_exports_show_up_in_the_listing() {
        let dir = temp_dir();
        let path = write_members(dir.clone(), "My Club!".to_string(), 9, vec![row(1), row(2)])
            .await
            .expect("write");
        let name = path.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with("My_Club"), "unexpected name {name}");

        let exports = list(dir.clone()).await.expect("list");
        assert_eq!(1, exports.len());
        let meta = exports[0].meta.as_ref().expect("meta");
        assert_eq!(2, meta.rows);
        assert_eq!(9, meta.source);
        assert_eq!("My Club!", meta.title);

        // Header plus one line per row, optional columns included.
        let content = std::fs::read_to_string(&path).expect("csv");
        assert_eq!(3, content.lines().count());

        assert_eq!(1, clear(dir.clone()).await.expect("clear"));
        assert!(list(dir.clone()).await.expect("list").is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_directory_lists_empty() {
        let dir = temp_dir();
        assert!(list(dir.clone()).await.expect("list").is_empty());
        assert_eq!(0, clear(dir).await.expect("clear"));
    }

    #[test]
    fn unsafe_titles_are_flattened() {
        assert_eq!("My_Club", safe_name("My Club!"));
        assert_eq!("export", safe_name("///"));
        assert_eq!(64, safe_name(&"x".repeat(100)).len());
    }
}
