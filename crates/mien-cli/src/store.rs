//! SQLite gallery store and recognition log.
//!
//! Templates are stored as their versioned JSON wire format, one row per
//! identity. The gallery loads in insertion order (rowid), which keeps
//! matcher tie-breaking stable across runs.

use chrono::Local;
use mien_core::template::TemplateError;
use mien_core::Template;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("stored template for '{identity}' is unreadable: {source}")]
    CorruptTemplate {
        identity: String,
        source: TemplateError,
    },
}

/// One row of the `list` output.
#[derive(Debug)]
pub struct IdentitySummary {
    pub identity: String,
    pub sample_count: usize,
    pub created_at: String,
}

/// One row of the recognition log.
#[derive(Debug)]
pub struct LogEntry {
    pub id: i64,
    pub identity: Option<String>,
    pub score: f32,
    pub status: String,
    pub at: String,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            // Best effort; Connection::open reports the real failure.
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS identities (
              identity TEXT PRIMARY KEY,
              template TEXT NOT NULL,
              created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS recognition_log (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              identity TEXT,
              score REAL NOT NULL,
              status TEXT NOT NULL,
              at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Insert or replace the template for an identity. Re-enrollment keeps
    /// the original row (and so its gallery position and created_at).
    pub fn save_identity(&self, identity: &str, template: &Template) -> Result<(), StoreError> {
        let blob = template
            .to_json()
            .map_err(|source| StoreError::CorruptTemplate {
                identity: identity.to_string(),
                source,
            })?;
        self.conn.execute(
            r#"
            INSERT INTO identities (identity, template, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(identity) DO UPDATE SET template = excluded.template
            "#,
            params![identity, blob, Local::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Load every identity/template pair in insertion order.
    pub fn load_gallery(&self) -> Result<Vec<(String, Template)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT identity, template FROM identities ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut gallery = Vec::new();
        for row in rows {
            let (identity, blob) = row?;
            let template =
                Template::from_json(&blob).map_err(|source| StoreError::CorruptTemplate {
                    identity: identity.clone(),
                    source,
                })?;
            gallery.push((identity, template));
        }
        Ok(gallery)
    }

    pub fn get_identity(&self, identity: &str) -> Result<Option<Template>, StoreError> {
        let blob: Option<String> = self
            .conn
            .query_row(
                "SELECT template FROM identities WHERE identity = ?1",
                params![identity],
                |row| row.get(0),
            )
            .optional()?;
        match blob {
            Some(blob) => {
                let template =
                    Template::from_json(&blob).map_err(|source| StoreError::CorruptTemplate {
                        identity: identity.to_string(),
                        source,
                    })?;
                Ok(Some(template))
            }
            None => Ok(None),
        }
    }

    /// Returns `true` when a row was actually deleted.
    pub fn remove_identity(&self, identity: &str) -> Result<bool, StoreError> {
        let affected = self.conn.execute(
            "DELETE FROM identities WHERE identity = ?1",
            params![identity],
        )?;
        Ok(affected > 0)
    }

    pub fn list_identities(&self) -> Result<Vec<IdentitySummary>, StoreError> {
        let gallery = self.load_gallery()?;
        let mut stmt = self
            .conn
            .prepare("SELECT created_at FROM identities WHERE identity = ?1")?;

        let mut out = Vec::with_capacity(gallery.len());
        for (identity, template) in gallery {
            let created_at: String = stmt.query_row(params![&identity], |row| row.get(0))?;
            out.push(IdentitySummary {
                identity,
                sample_count: template.sample_count,
                created_at,
            });
        }
        Ok(out)
    }

    pub fn log_recognition(
        &self,
        identity: Option<&str>,
        score: f32,
        status: &str,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO recognition_log (identity, score, status, at) VALUES (?1, ?2, ?3, ?4)",
            params![identity, score as f64, status, Local::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Most recent log entries, newest first.
    pub fn recent_log(&self, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, identity, score, status, at FROM recognition_log \
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(LogEntry {
                id: row.get(0)?,
                identity: row.get(1)?,
                score: row.get::<_, f64>(2)? as f32,
                status: row.get(3)?,
                at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn identity_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mien_core::{Signature, TemplateBuilder};

    fn template(bin: usize) -> Template {
        let mut intensity = vec![0.0f32; 8];
        intensity[bin] = 1.0;
        let sig = Signature {
            intensity,
            lbp: vec![0.125; 8],
            region_size: (100, 100),
            region_position: (0, 0),
        };
        TemplateBuilder::build(&[sig]).unwrap()
    }

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("gallery.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let (_dir, store) = open_temp();
        store.save_identity("alice", &template(0)).unwrap();

        let gallery = store.load_gallery().unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].0, "alice");
        assert!((gallery[0].1.mean_intensity[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_gallery_preserves_insertion_order() {
        let (_dir, store) = open_temp();
        store.save_identity("alice", &template(0)).unwrap();
        store.save_identity("bob", &template(1)).unwrap();
        store.save_identity("carol", &template(2)).unwrap();

        // Re-enrolling alice must not move her to the back.
        store.save_identity("alice", &template(3)).unwrap();

        let names: Vec<String> = store
            .load_gallery()
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_remove_identity() {
        let (_dir, store) = open_temp();
        store.save_identity("alice", &template(0)).unwrap();
        assert!(store.remove_identity("alice").unwrap());
        assert!(!store.remove_identity("alice").unwrap());
        assert_eq!(store.identity_count().unwrap(), 0);
    }

    #[test]
    fn test_get_identity() {
        let (_dir, store) = open_temp();
        assert!(store.get_identity("alice").unwrap().is_none());
        store.save_identity("alice", &template(2)).unwrap();
        let t = store.get_identity("alice").unwrap().unwrap();
        assert_eq!(t.sample_count, 1);
    }

    #[test]
    fn test_recognition_log_newest_first() {
        let (_dir, store) = open_temp();
        store.log_recognition(Some("alice"), 0.9, "match").unwrap();
        store.log_recognition(None, 0.2, "no_match").unwrap();
        store.log_recognition(None, 0.0, "no_face").unwrap();

        let entries = store.recent_log(2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, "no_face");
        assert_eq!(entries[1].status, "no_match");
        assert!(entries[0].id > entries[1].id);
    }

    #[test]
    fn test_list_identities_reports_sample_count() {
        let (_dir, store) = open_temp();
        store.save_identity("alice", &template(0)).unwrap();
        let rows = store.list_identities().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].identity, "alice");
        assert_eq!(rows[0].sample_count, 1);
        assert!(!rows[0].created_at.is_empty());
    }
}
