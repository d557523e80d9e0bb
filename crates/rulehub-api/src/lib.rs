use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use rulehub_core::{
    reconcile, run_summary, ActivityAction, ActivityEntry, BatchResult, Descriptor, EngineError,
    RuleId, RuleRecord, RuleStatus, RunSummary,
};
use rulehub_store_sqlite::{
    ExportManifest, ImportSummary, IntegrityReport, SchemaStatus, SqliteStore,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const API_CONTRACT_VERSION: &str = "api.v1";

pub const AUTO_LOAD_ACTOR: &str = "auto-loader";

/// A provider of extracted rule descriptors. Implementations must gather the
/// entire batch before returning; a fetch error means no descriptor from the
/// batch may be applied.
pub trait ExtractionSource {
    fn name(&self) -> &str;

    /// Fetch every descriptor in the batch.
    ///
    /// # Errors
    /// Returns [`EngineError::SourceFetch`] when the batch cannot be fully
    /// retrieved.
    fn fetch(&self) -> Result<Vec<Descriptor>, EngineError>;
}

/// Built-in descriptor feed used by the automatic load path.
#[derive(Debug, Clone, Default)]
pub struct CannedExtractionSource;

impl ExtractionSource for CannedExtractionSource {
    fn name(&self) -> &str {
        "embedded-benefits-feed"
    }

    fn fetch(&self) -> Result<Vec<Descriptor>, EngineError> {
        Ok(vec![
            Descriptor {
                title: "Medicare Advantage Annual Notice".to_string(),
                benefit_type: "Medical".to_string(),
                business_area: "Enrollment".to_string(),
                sub_business_area: "Renewals".to_string(),
                description: "Annual notice of change for Medicare Advantage members".to_string(),
            },
            Descriptor {
                title: "Dental Rider Summary".to_string(),
                benefit_type: "Dental".to_string(),
                business_area: "Claims".to_string(),
                sub_business_area: "Adjudication".to_string(),
                description: "Coverage summary for the optional dental rider".to_string(),
            },
            Descriptor {
                title: "Vision Benefits Explanation".to_string(),
                benefit_type: "Vision".to_string(),
                business_area: "Member Services".to_string(),
                sub_business_area: "Correspondence".to_string(),
                description: "Explanation of vision benefits and allowances".to_string(),
            },
            Descriptor {
                title: "Prescription Drug Formulary Update".to_string(),
                benefit_type: "Pharmacy".to_string(),
                business_area: "Pharmacy".to_string(),
                sub_business_area: "Formulary".to_string(),
                description: "Quarterly formulary tier changes".to_string(),
            },
            Descriptor {
                title: "Coordination of Benefits Questionnaire".to_string(),
                benefit_type: "Medical".to_string(),
                business_area: "Claims".to_string(),
                sub_business_area: "Intake".to_string(),
                description: "Questionnaire sent when other coverage is reported".to_string(),
            },
        ])
    }
}

/// Source backed by an in-memory batch, used by the upload paths.
#[derive(Debug, Clone)]
pub struct InlineBatchSource {
    descriptors: Vec<Descriptor>,
}

impl InlineBatchSource {
    #[must_use]
    pub fn new(descriptors: Vec<Descriptor>) -> Self {
        Self { descriptors }
    }
}

impl ExtractionSource for InlineBatchSource {
    fn name(&self) -> &str {
        "inline-batch"
    }

    fn fetch(&self) -> Result<Vec<Descriptor>, EngineError> {
        Ok(self.descriptors.clone())
    }
}

/// Source that reads a JSON array of descriptors from a file.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ExtractionSource for JsonFileSource {
    fn name(&self) -> &str {
        "json-file"
    }

    fn fetch(&self) -> Result<Vec<Descriptor>, EngineError> {
        let bytes = std::fs::read(&self.path).map_err(|err| {
            EngineError::SourceFetch(format!(
                "failed to read descriptor file {}: {err}",
                self.path.display()
            ))
        })?;
        serde_json::from_slice(&bytes).map_err(|err| {
            EngineError::SourceFetch(format!(
                "failed to parse descriptor file {}: {err}",
                self.path.display()
            ))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReport {
    pub actor: String,
    pub source: String,
    pub result: BatchResult,
    pub summary: RunSummary,
    pub total_records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateRuleRequest {
    pub actor: String,
    pub template_name: String,
    pub benefit_type: String,
    pub business_area: String,
    pub sub_business_area: String,
    pub description: String,
    pub version: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub effective_date: Option<OffsetDateTime>,
    pub status: Option<RuleStatus>,
    pub category: Option<String>,
    pub language: Option<String>,
    pub repeater_type: Option<String>,
    pub published: bool,
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateRuleRequest {
    pub actor: String,
    pub id: RuleId,
    pub template_name: Option<String>,
    pub benefit_type: Option<String>,
    pub business_area: Option<String>,
    pub sub_business_area: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub effective_date: Option<OffsetDateTime>,
    pub status: Option<RuleStatus>,
    pub category: Option<String>,
    pub language: Option<String>,
    pub repeater_type: Option<String>,
    pub published: Option<bool>,
    pub tags: Option<BTreeSet<String>>,
}

#[derive(Debug, Clone)]
pub struct RuleHubApi {
    db_path: PathBuf,
}

impl RuleHubApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                inferred_from_legacy: before.inferred_from_legacy,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            inferred_from_legacy: before.inferred_from_legacy,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// List the rule collection in stored order.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or read.
    pub fn list_rules(&self) -> Result<Vec<RuleRecord>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.read_all()
    }

    /// List activity entries in append order.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or read.
    pub fn list_activity(&self) -> Result<Vec<ActivityEntry>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_activity()
    }

    /// Run one reconciliation pass against the given source. The whole batch
    /// is fetched before the database is touched; a fetch failure leaves the
    /// collection and activity log unchanged.
    ///
    /// # Errors
    /// Returns an error when the fetch fails or the run cannot be committed.
    pub fn run_reconciliation(
        &self,
        source: &dyn ExtractionSource,
        actor: &str,
    ) -> Result<IngestReport> {
        let descriptors = source.fetch()?;

        let mut store = self.open_store()?;
        store.migrate()?;
        let current = store.read_all()?;

        let outcome = reconcile(&descriptors, &current, actor, OffsetDateTime::now_utc());
        store.commit_run(&outcome.records, &outcome.activity)?;

        let summary = run_summary(&outcome.result);
        Ok(IngestReport {
            actor: actor.to_string(),
            source: source.name().to_string(),
            result: outcome.result,
            summary,
            total_records: outcome.records.len(),
        })
    }

    /// Run reconciliation against the built-in feed as the automatic loader.
    ///
    /// # Errors
    /// Returns an error when the run cannot be committed.
    pub fn auto_load(&self) -> Result<IngestReport> {
        self.run_reconciliation(&CannedExtractionSource, AUTO_LOAD_ACTOR)
    }

    /// Run reconciliation for an uploaded descriptor batch on behalf of a user.
    ///
    /// # Errors
    /// Returns an error when the run cannot be committed.
    pub fn upload(&self, descriptors: Vec<Descriptor>, actor: &str) -> Result<IngestReport> {
        self.run_reconciliation(&InlineBatchSource::new(descriptors), actor)
    }

    /// Create one rule from user-provided fields and record a `create` entry.
    ///
    /// # Errors
    /// Returns an error when validation or persistence fails.
    pub fn create_rule(&self, input: CreateRuleRequest) -> Result<RuleRecord> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let mut records = store.read_all()?;

        let now = OffsetDateTime::now_utc();
        let id = RuleId::new();
        let record = RuleRecord {
            id,
            rule_id: id.to_string(),
            template_name: input.template_name,
            benefit_type: input.benefit_type,
            business_area: input.business_area,
            sub_business_area: input.sub_business_area,
            description: input.description,
            version: input.version.unwrap_or_else(|| "1.0".to_string()),
            effective_date: input.effective_date,
            status: input.status.unwrap_or(RuleStatus::Draft),
            category: input.category,
            language: input.language,
            repeater_type: input.repeater_type,
            published: input.published,
            last_modified: now,
            last_modified_by: input.actor.clone(),
            tags: input.tags,
        };
        record.validate()?;

        let entry = ActivityEntry {
            actor: input.actor,
            action: ActivityAction::Create,
            target: record.template_name.clone(),
            details: format!("created rule \"{}\"", record.template_name),
            related_rule_id: Some(record.id),
            recorded_at: now,
        };

        records.push(record.clone());
        store.commit_run(&records, std::slice::from_ref(&entry))?;
        Ok(record)
    }

    /// Update fields of an existing rule and record an `update` entry.
    /// Returns `None` without writing anything when the id is unknown.
    ///
    /// # Errors
    /// Returns an error when validation or persistence fails.
    pub fn update_rule(&self, input: UpdateRuleRequest) -> Result<Option<RuleRecord>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let mut records = store.read_all()?;

        let Some(record) = records.iter_mut().find(|record| record.id == input.id) else {
            return Ok(None);
        };

        if let Some(template_name) = input.template_name {
            record.template_name = template_name;
        }
        if let Some(benefit_type) = input.benefit_type {
            record.benefit_type = benefit_type;
        }
        if let Some(business_area) = input.business_area {
            record.business_area = business_area;
        }
        if let Some(sub_business_area) = input.sub_business_area {
            record.sub_business_area = sub_business_area;
        }
        if let Some(description) = input.description {
            record.description = description;
        }
        if let Some(version) = input.version {
            record.version = version;
        }
        if let Some(effective_date) = input.effective_date {
            record.effective_date = Some(effective_date);
        }
        if let Some(status) = input.status {
            record.status = status;
        }
        if let Some(category) = input.category {
            record.category = Some(category);
        }
        if let Some(language) = input.language {
            record.language = Some(language);
        }
        if let Some(repeater_type) = input.repeater_type {
            record.repeater_type = Some(repeater_type);
        }
        if let Some(published) = input.published {
            record.published = published;
        }
        if let Some(tags) = input.tags {
            record.tags = tags;
        }

        let now = OffsetDateTime::now_utc();
        record.last_modified = now;
        record.last_modified_by = input.actor.clone();
        record.validate()?;
        let updated = record.clone();

        let entry = ActivityEntry {
            actor: input.actor,
            action: ActivityAction::Update,
            target: updated.template_name.clone(),
            details: format!("updated rule \"{}\"", updated.template_name),
            related_rule_id: Some(updated.id),
            recorded_at: now,
        };

        store.commit_run(&records, std::slice::from_ref(&entry))?;
        Ok(Some(updated))
    }

    /// Delete a rule and record a `delete` entry. Returns `false` without
    /// writing anything when the id is unknown.
    ///
    /// # Errors
    /// Returns an error when persistence fails.
    pub fn delete_rule(&self, id: RuleId, actor: &str) -> Result<bool> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let mut records = store.read_all()?;

        let Some(index) = records.iter().position(|record| record.id == id) else {
            return Ok(false);
        };
        let removed = records.remove(index);

        let entry = ActivityEntry {
            actor: actor.to_string(),
            action: ActivityAction::Delete,
            target: removed.template_name.clone(),
            details: format!("deleted rule \"{}\"", removed.template_name),
            related_rule_id: Some(removed.id),
            recorded_at: OffsetDateTime::now_utc(),
        };

        store.commit_run(&records, std::slice::from_ref(&entry))?;
        Ok(true)
    }

    /// Export the database as NDJSON files plus a digest manifest.
    ///
    /// # Errors
    /// Returns an error when the export cannot be written.
    pub fn export_snapshot(&self, out_dir: &Path) -> Result<ExportManifest> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.export_snapshot(out_dir)
    }

    /// Import a previously exported snapshot directory.
    ///
    /// # Errors
    /// Returns an error when manifest validation or the import fails.
    pub fn import_snapshot(&self, in_dir: &Path, skip_existing: bool) -> Result<ImportSummary> {
        let mut store = self.open_store()?;
        store.import_snapshot(in_dir, skip_existing)
    }

    /// Run database health probes.
    ///
    /// # Errors
    /// Returns an error when any probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.integrity_check()
    }
}
