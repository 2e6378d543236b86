use chrono::{DateTime, Local};
use directories::ProjectDirs;
use rusqlite::{params, Connection, Result};
use std::path::{Path, PathBuf};

/// Which workflow produced a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum AttemptKind {
    #[strum(serialize = "enrollment")]
    Enrollment,
    #[strum(serialize = "authentication")]
    Authentication,
}

impl AttemptKind {
    fn parse(s: &str) -> Self {
        match s {
            "enrollment" => AttemptKind::Enrollment,
            _ => AttemptKind::Authentication,
        }
    }
}

/// One locally recorded submission outcome. This is the client's own journal;
/// the server keeps the authoritative history.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub username: String,
    pub kind: AttemptKind,
    pub accepted: bool,
    /// Only authentication attempts carry a score.
    pub confidence_score: Option<f64>,
    pub keystroke_count: usize,
    pub timestamp: DateTime<Local>,
}

/// Database manager for the local attempt log
#[derive(Debug)]
pub struct AttemptDb {
    conn: Connection,
}

impl AttemptDb {
    /// Initialize the database connection and create tables if needed
    pub fn new() -> Result<Self> {
        let db_path = Self::default_path().unwrap_or_else(|| PathBuf::from("keyauth_attempts.db"));
        Self::open_at(&db_path)
    }

    pub fn open_at(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some(format!("Failed to create directory: {}", e)),
                )
            })?;
        }

        let conn = Connection::open(db_path)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                kind TEXT NOT NULL,
                accepted BOOLEAN NOT NULL,
                confidence_score REAL,
                keystroke_count INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_attempts_username ON attempts(username)",
            [],
        )?;

        Ok(AttemptDb { conn })
    }

    /// Database file path under $HOME/.local/state/keyauth
    fn default_path() -> Option<PathBuf> {
        if let Ok(home) = std::env::var("HOME") {
            let state_dir = PathBuf::from(home)
                .join(".local")
                .join("state")
                .join("keyauth");
            Some(state_dir.join("attempts.db"))
        } else {
            ProjectDirs::from("", "", "keyauth")
                .map(|proj_dirs| proj_dirs.data_local_dir().join("attempts.db"))
        }
    }

    /// Sibling path used by the CSV export.
    pub fn export_path() -> PathBuf {
        Self::default_path()
            .map(|p| p.with_file_name("attempts.csv"))
            .unwrap_or_else(|| PathBuf::from("keyauth_attempts.csv"))
    }

    pub fn record_attempt(&self, record: &AttemptRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO attempts
            (username, kind, accepted, confidence_score, keystroke_count, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.username,
                record.kind.to_string(),
                record.accepted,
                record.confidence_score,
                record.keystroke_count as i64,
                record.timestamp.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    /// Most recent attempts first.
    pub fn recent(&self, limit: usize) -> Result<Vec<AttemptRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT username, kind, accepted, confidence_score, keystroke_count, timestamp
            FROM attempts
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let timestamp_str: String = row.get(5)?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map_err(|_| {
                    rusqlite::Error::InvalidColumnType(
                        5,
                        "timestamp".to_string(),
                        rusqlite::types::Type::Text,
                    )
                })?
                .with_timezone(&Local);

            Ok(AttemptRecord {
                username: row.get(0)?,
                kind: AttemptKind::parse(&row.get::<_, String>(1)?),
                accepted: row.get(2)?,
                confidence_score: row.get(3)?,
                keystroke_count: row.get::<_, i64>(4)? as usize,
                timestamp,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }

        Ok(records)
    }

    /// Dump the full log as CSV. Returns the number of exported rows.
    pub fn export_csv(&self, path: &Path) -> std::result::Result<usize, Box<dyn std::error::Error>> {
        let records = self.recent(10_000)?;

        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record([
            "timestamp",
            "username",
            "kind",
            "accepted",
            "confidence_score",
            "keystroke_count",
        ])?;
        for record in &records {
            writer.write_record([
                record.timestamp.to_rfc3339(),
                record.username.clone(),
                record.kind.to_string(),
                record.accepted.to_string(),
                record
                    .confidence_score
                    .map(|s| format!("{:.4}", s))
                    .unwrap_or_default(),
                record.keystroke_count.to_string(),
            ])?;
        }
        writer.flush()?;

        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(username: &str, kind: AttemptKind, accepted: bool, score: Option<f64>) -> AttemptRecord {
        AttemptRecord {
            username: username.to_string(),
            kind,
            accepted,
            confidence_score: score,
            keystroke_count: 43,
            timestamp: Local::now(),
        }
    }

    #[test]
    fn record_and_read_back() {
        let dir = tempdir().unwrap();
        let db = AttemptDb::open_at(&dir.path().join("attempts.db")).unwrap();

        let rec = record("ada", AttemptKind::Authentication, true, Some(0.91));
        db.record_attempt(&rec).unwrap();

        let recent = db.recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].username, "ada");
        assert_eq!(recent[0].kind, AttemptKind::Authentication);
        assert!(recent[0].accepted);
        assert_eq!(recent[0].confidence_score, Some(0.91));
        assert_eq!(recent[0].keystroke_count, 43);
    }

    #[test]
    fn recent_is_newest_first_and_limited() {
        let dir = tempdir().unwrap();
        let db = AttemptDb::open_at(&dir.path().join("attempts.db")).unwrap();

        db.record_attempt(&record("ada", AttemptKind::Enrollment, true, None))
            .unwrap();
        db.record_attempt(&record("ada", AttemptKind::Authentication, false, Some(0.4)))
            .unwrap();
        db.record_attempt(&record("ada", AttemptKind::Authentication, true, Some(0.9)))
            .unwrap();

        let recent = db.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].confidence_score, Some(0.9));
        assert_eq!(recent[1].confidence_score, Some(0.4));
    }

    #[test]
    fn enrollment_attempts_have_no_score() {
        let dir = tempdir().unwrap();
        let db = AttemptDb::open_at(&dir.path().join("attempts.db")).unwrap();

        db.record_attempt(&record("ada", AttemptKind::Enrollment, true, None))
            .unwrap();
        let recent = db.recent(1).unwrap();
        assert_eq!(recent[0].kind, AttemptKind::Enrollment);
        assert_eq!(recent[0].confidence_score, None);
    }

    #[test]
    fn csv_export_writes_all_rows() {
        let dir = tempdir().unwrap();
        let db = AttemptDb::open_at(&dir.path().join("attempts.db")).unwrap();

        db.record_attempt(&record("ada", AttemptKind::Enrollment, true, None))
            .unwrap();
        db.record_attempt(&record("ada", AttemptKind::Authentication, true, Some(0.88)))
            .unwrap();

        let csv_path = dir.path().join("attempts.csv");
        let exported = db.export_csv(&csv_path).unwrap();
        assert_eq!(exported, 2);

        let contents = std::fs::read_to_string(&csv_path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timestamp,username,kind,accepted,confidence_score,keystroke_count"
        );
        assert_eq!(contents.lines().count(), 3);
        assert!(contents.contains("authentication"));
        assert!(contents.contains("0.8800"));
    }

    #[test]
    fn kind_labels() {
        assert_eq!(AttemptKind::Enrollment.to_string(), "enrollment");
        assert_eq!(AttemptKind::Authentication.to_string(), "authentication");
        assert_eq!(AttemptKind::parse("enrollment"), AttemptKind::Enrollment);
        assert_eq!(
            AttemptKind::parse("authentication"),
            AttemptKind::Authentication
        );
    }
}
