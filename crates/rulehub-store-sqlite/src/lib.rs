use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rulehub_core::{ActivityAction, ActivityEntry, RuleId, RuleRecord, RuleStatus};
use rusqlite::{params, Connection, Transaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS rule_records (
  id TEXT PRIMARY KEY,
  rule_id TEXT NOT NULL,
  position INTEGER NOT NULL UNIQUE,
  template_name TEXT NOT NULL,
  benefit_type TEXT NOT NULL,
  business_area TEXT NOT NULL,
  sub_business_area TEXT NOT NULL,
  description TEXT NOT NULL,
  version TEXT NOT NULL,
  effective_date TEXT,
  status TEXT NOT NULL CHECK (status IN ('draft','active','archived')),
  category TEXT,
  language TEXT,
  repeater_type TEXT,
  published INTEGER NOT NULL CHECK (published IN (0,1)),
  last_modified TEXT NOT NULL,
  last_modified_by TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS activity_log (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  actor TEXT NOT NULL,
  action TEXT NOT NULL CHECK (action IN ('create','update','delete','upload')),
  target TEXT NOT NULL,
  details TEXT NOT NULL,
  related_rule_id TEXT,
  recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rule_records_position ON rule_records(position);
CREATE INDEX IF NOT EXISTS idx_activity_log_recorded_at ON activity_log(recorded_at);
";

const MIGRATION_002_SQL: &str = r"
ALTER TABLE rule_records ADD COLUMN tags_json TEXT NOT NULL DEFAULT '[]';
CREATE INDEX IF NOT EXISTS idx_rule_records_template_name ON rule_records(template_name);
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportFileDigest {
    pub path: String,
    pub sha256: String,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportManifest {
    pub schema_version: i64,
    pub exported_at: String,
    pub files: Vec<ExportFileDigest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported_rules: usize,
    pub skipped_existing_rules: usize,
    pub imported_activity_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open a SQLite-backed rule store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot
    /// be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bookkeeping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version == 0 {
            version = self.bootstrap_schema_version()?;
        }

        if version < 2 {
            self.conn.execute_batch(MIGRATION_002_SQL).context("failed to apply migration v2")?;
            record_schema_version(&self.conn, 2)?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn bootstrap_schema_version(&self) -> Result<i64> {
        if !table_exists(&self.conn, "rule_records")? {
            self.conn.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&self.conn, 1)?;
            return Ok(1);
        }

        if table_has_column(&self.conn, "rule_records", "tags_json")? {
            // Database already in v2 shape but missing migration records.
            record_schema_version(&self.conn, 1)?;
            record_schema_version(&self.conn, 2)?;
            return Ok(2);
        }

        // Legacy v1 table without bookkeeping; mark v1 and allow the standard
        // v2 upgrade.
        record_schema_version(&self.conn, 1)?;
        Ok(1)
    }

    /// Load the full rule collection in stored collection order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn read_all(&self) -> Result<Vec<RuleRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                id, rule_id, template_name, benefit_type, business_area,
                sub_business_area, description, version, effective_date, status,
                category, language, repeater_type, published, last_modified,
                last_modified_by, tags_json
             FROM rule_records
             ORDER BY position ASC",
        )?;

        let mut rows = stmt.query([])?;
        let mut records = Vec::new();

        while let Some(row) = rows.next()? {
            let id_raw: String = row.get(0)?;
            let status_raw: String = row.get(9)?;
            let effective_date_raw: Option<String> = row.get(8)?;
            let tags_json: String = row.get(16)?;

            records.push(RuleRecord {
                id: parse_rule_id(&id_raw)?,
                rule_id: row.get(1)?,
                template_name: row.get(2)?,
                benefit_type: row.get(3)?,
                business_area: row.get(4)?,
                sub_business_area: row.get(5)?,
                description: row.get(6)?,
                version: row.get(7)?,
                effective_date: effective_date_raw.as_deref().map(parse_rfc3339).transpose()?,
                status: RuleStatus::parse(&status_raw)
                    .ok_or_else(|| anyhow!("unknown rule status: {status_raw}"))?,
                category: row.get(10)?,
                language: row.get(11)?,
                repeater_type: row.get(12)?,
                published: row.get(13)?,
                last_modified: parse_rfc3339(&row.get::<_, String>(14)?)?,
                last_modified_by: row.get(15)?,
                tags: serde_json::from_str::<BTreeSet<String>>(&tags_json)
                    .context("failed to deserialize tags")?,
            });
        }

        Ok(records)
    }

    /// Replace the whole rule collection in one transaction, preserving the
    /// given slice order as the persisted collection order.
    ///
    /// # Errors
    /// Returns an error when any record fails validation or any write fails.
    pub fn replace_all(&mut self, records: &[RuleRecord]) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start replace transaction")?;
        write_rule_rows(&tx, records)?;
        tx.commit().context("failed to commit replace transaction")
    }

    /// Commit one reconciliation run: the replacement rule collection plus the
    /// run's activity entries, atomically. A failure leaves the pre-run state
    /// intact.
    ///
    /// # Errors
    /// Returns an error when validation or any write in the transaction fails.
    pub fn commit_run(&mut self, records: &[RuleRecord], activity: &[ActivityEntry]) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start run transaction")?;
        write_rule_rows(&tx, records)?;
        for entry in activity {
            insert_activity_row(&tx, entry)?;
        }
        tx.commit().context("failed to commit run transaction")
    }

    /// Append one activity entry to the audit log.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub fn append_activity(&mut self, entry: &ActivityEntry) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start activity transaction")?;
        insert_activity_row(&tx, entry)?;
        tx.commit().context("failed to commit activity transaction")
    }

    /// Load all activity entries in append order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_activity(&self) -> Result<Vec<ActivityEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT actor, action, target, details, related_rule_id, recorded_at
             FROM activity_log
             ORDER BY id ASC",
        )?;

        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();

        while let Some(row) = rows.next()? {
            let action_raw: String = row.get(1)?;
            let related_raw: Option<String> = row.get(4)?;

            entries.push(ActivityEntry {
                actor: row.get(0)?,
                action: ActivityAction::parse(&action_raw)
                    .ok_or_else(|| anyhow!("unknown activity action: {action_raw}"))?,
                target: row.get(2)?,
                details: row.get(3)?,
                related_rule_id: related_raw.as_deref().map(parse_rule_id).transpose()?,
                recorded_at: parse_rfc3339(&row.get::<_, String>(5)?)?,
            });
        }

        Ok(entries)
    }

    /// Export rules and activity entries as deterministic NDJSON plus manifest.
    ///
    /// # Errors
    /// Returns an error when export files cannot be created, written, or
    /// serialized.
    pub fn export_snapshot(&self, out_dir: &Path) -> Result<ExportManifest> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create export directory {}", out_dir.display()))?;

        let records = self.read_all()?;
        let activity = self.list_activity()?;

        let records_path = out_dir.join("rule_records.ndjson");
        let record_digest = write_ndjson_file(&records_path, &records)?;

        let activity_path = out_dir.join("activity_log.ndjson");
        let activity_digest = write_ndjson_file(&activity_path, &activity)?;

        let manifest = ExportManifest {
            schema_version: LATEST_SCHEMA_VERSION,
            exported_at: now_rfc3339()?,
            files: vec![
                ExportFileDigest {
                    path: "rule_records.ndjson".to_string(),
                    sha256: record_digest.0,
                    records: record_digest.1,
                },
                ExportFileDigest {
                    path: "activity_log.ndjson".to_string(),
                    sha256: activity_digest.0,
                    records: activity_digest.1,
                },
            ],
        };

        let manifest_path = out_dir.join("manifest.json");
        let manifest_json =
            serde_json::to_vec_pretty(&manifest).context("failed to serialize export manifest")?;
        fs::write(&manifest_path, manifest_json).with_context(|| {
            format!("failed to write export manifest {}", manifest_path.display())
        })?;

        Ok(manifest)
    }

    /// Import an exported snapshot directory into this database. Rules whose
    /// `id` already exists are skipped (or rejected when `skip_existing` is
    /// false); activity entries are always appended, never deduplicated.
    ///
    /// # Errors
    /// Returns an error when migration, manifest validation, or writes fail.
    pub fn import_snapshot(&mut self, in_dir: &Path, skip_existing: bool) -> Result<ImportSummary> {
        self.migrate()?;
        let manifest = read_export_manifest(&in_dir.join("manifest.json"))?;
        validate_import_manifest(in_dir, &manifest)?;

        let mut summary = ImportSummary {
            imported_rules: 0,
            skipped_existing_rules: 0,
            imported_activity_entries: 0,
        };

        let records = read_ndjson_file::<RuleRecord>(&in_dir.join("rule_records.ndjson"))?;
        let activity = read_ndjson_file::<ActivityEntry>(&in_dir.join("activity_log.ndjson"))?;

        let tx = self.conn.transaction().context("failed to start import transaction")?;
        let mut position = next_position(&tx)?;

        for record in &records {
            if rule_exists(&tx, record.id)? {
                if skip_existing {
                    summary.skipped_existing_rules += 1;
                    continue;
                }

                return Err(anyhow!("rule already exists for id {}", record.id));
            }

            insert_rule_row(&tx, record, position)?;
            position += 1;
            summary.imported_rules += 1;
        }

        for entry in &activity {
            insert_activity_row(&tx, entry)?;
            summary.imported_activity_entries += 1;
        }

        tx.commit().context("failed to commit import transaction")?;
        Ok(summary)
    }

    /// Run quick-check, foreign-key-check, and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }
}

fn write_rule_rows(tx: &Transaction<'_>, records: &[RuleRecord]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for record in records {
        record.validate().map_err(|err| anyhow!("rule validation failed: {err}"))?;
        if !seen.insert(record.id) {
            return Err(anyhow!("duplicate rule id in collection: {}", record.id));
        }
    }

    tx.execute("DELETE FROM rule_records", []).context("failed to clear rule collection")?;
    for (position, record) in records.iter().enumerate() {
        insert_rule_row(tx, record, i64::try_from(position).unwrap_or(i64::MAX))?;
    }

    Ok(())
}

fn insert_rule_row(tx: &Transaction<'_>, record: &RuleRecord, position: i64) -> Result<()> {
    tx.execute(
        "INSERT INTO rule_records(
            id, rule_id, position, template_name, benefit_type, business_area,
            sub_business_area, description, version, effective_date, status,
            category, language, repeater_type, published, last_modified,
            last_modified_by, tags_json
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9, ?10, ?11,
            ?12, ?13, ?14, ?15, ?16,
            ?17, ?18
        )",
        params![
            record.id.to_string(),
            record.rule_id,
            position,
            record.template_name,
            record.benefit_type,
            record.business_area,
            record.sub_business_area,
            record.description,
            record.version,
            record.effective_date.map(rfc3339).transpose()?,
            record.status.as_str(),
            record.category,
            record.language,
            record.repeater_type,
            record.published,
            rfc3339(record.last_modified)?,
            record.last_modified_by,
            serde_json::to_string(&record.tags).context("failed to serialize tags")?,
        ],
    )
    .context("failed to insert rule record")?;

    Ok(())
}

fn insert_activity_row(tx: &Transaction<'_>, entry: &ActivityEntry) -> Result<()> {
    tx.execute(
        "INSERT INTO activity_log(actor, action, target, details, related_rule_id, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.actor,
            entry.action.as_str(),
            entry.target,
            entry.details,
            entry.related_rule_id.map(|id| id.to_string()),
            rfc3339(entry.recorded_at)?,
        ],
    )
    .context("failed to append activity entry")?;

    Ok(())
}

fn rule_exists(tx: &Transaction<'_>, id: RuleId) -> Result<bool> {
    let exists = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM rule_records WHERE id = ?1)",
        params![id.to_string()],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(exists == 1)
}

fn next_position(tx: &Transaction<'_>) -> Result<i64> {
    let max = tx
        .query_row("SELECT COALESCE(MAX(position), -1) FROM rule_records", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read collection tail position")?;
    Ok(max + 1)
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }

    Ok(false)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if !table_exists(conn, "rule_records")? {
        return Ok((0, false));
    }

    if table_has_column(conn, "rule_records", "tags_json")? {
        return Ok((2, true));
    }

    Ok((1, true))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

fn parse_rule_id(raw: &str) -> Result<RuleId> {
    let parsed = Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))?;
    Ok(RuleId(parsed))
}

fn write_ndjson_file<T: Serialize>(path: &Path, values: &[T]) -> Result<(String, usize)> {
    let file = File::create(path)
        .with_context(|| format!("failed to create export file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut hasher = Sha256::new();

    for value in values {
        let line = serde_json::to_string(value).context("failed to serialize NDJSON row")?;
        writer
            .write_all(line.as_bytes())
            .with_context(|| format!("failed to write export file {}", path.display()))?;
        writer
            .write_all(b"\n")
            .with_context(|| format!("failed to write export file {}", path.display()))?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }

    writer.flush().with_context(|| format!("failed to flush export file {}", path.display()))?;

    Ok((format!("{:x}", hasher.finalize()), values.len()))
}

fn read_ndjson_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open NDJSON file {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut values = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| {
            format!("failed to read line {} from {}", index + 1, path.display())
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value = serde_json::from_str(trimmed).with_context(|| {
            format!("failed to parse NDJSON row {} from {}", index + 1, path.display())
        })?;
        values.push(value);
    }

    Ok(values)
}

fn ndjson_digest_and_records(path: &Path) -> Result<(String, usize)> {
    let file = File::open(path)
        .with_context(|| format!("failed to open NDJSON file {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut records = 0_usize;

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| {
            format!("failed to read line {} from {}", index + 1, path.display())
        })?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
        if !line.trim().is_empty() {
            records += 1;
        }
    }

    Ok((format!("{:x}", hasher.finalize()), records))
}

fn read_export_manifest(path: &Path) -> Result<ExportManifest> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read manifest file {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse manifest JSON {}", path.display()))
}

fn validate_import_manifest(in_dir: &Path, manifest: &ExportManifest) -> Result<()> {
    if manifest.schema_version <= 0 || manifest.schema_version > LATEST_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported export schema version {}; supported range is 1..={}",
            manifest.schema_version,
            LATEST_SCHEMA_VERSION
        ));
    }

    let mut by_path: BTreeMap<&str, &ExportFileDigest> = BTreeMap::new();
    for file in &manifest.files {
        if by_path.insert(file.path.as_str(), file).is_some() {
            return Err(anyhow!("manifest contains duplicate file entry: {}", file.path));
        }
    }

    for required in ["rule_records.ndjson", "activity_log.ndjson"] {
        let Some(expected) = by_path.get(required) else {
            return Err(anyhow!("manifest is missing required file entry: {required}"));
        };
        let file_path = in_dir.join(required);
        if !file_path.exists() {
            return Err(anyhow!("manifest references missing file {}", file_path.display()));
        }

        let (actual_sha256, actual_records) = ndjson_digest_and_records(&file_path)?;
        if actual_sha256 != expected.sha256 {
            return Err(anyhow!(
                "manifest digest mismatch for {required}: expected {}, got {}",
                expected.sha256,
                actual_sha256
            ));
        }
        if actual_records != expected.records {
            return Err(anyhow!(
                "manifest record count mismatch for {required}: expected {}, got {}",
                expected.records,
                actual_records
            ));
        }
    }

    Ok(())
}
