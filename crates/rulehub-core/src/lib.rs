use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("source fetch failed: {0}")]
    SourceFetch(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RuleId(pub Ulid);

impl RuleId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RuleId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Draft,
    Active,
    Archived,
}

impl RuleStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Create,
    Update,
    Delete,
    Upload,
}

impl ActivityAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Upload => "upload",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "upload" => Some(Self::Upload),
            _ => None,
        }
    }
}

/// One persisted content-management rule record.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RuleRecord {
    pub id: RuleId,
    pub rule_id: String,
    pub template_name: String,
    pub benefit_type: String,
    pub business_area: String,
    pub sub_business_area: String,
    pub description: String,
    pub version: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub effective_date: Option<OffsetDateTime>,
    pub status: RuleStatus,
    pub category: Option<String>,
    pub language: Option<String>,
    pub repeater_type: Option<String>,
    pub published: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
    pub last_modified_by: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl RuleRecord {
    /// Validate one rule record before it is persisted.
    ///
    /// # Errors
    /// Returns [`EngineError::Validation`] when identity or accountability
    /// fields are blank.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.rule_id.trim().is_empty() {
            return Err(EngineError::Validation("rule_id MUST be non-empty".to_string()));
        }

        if self.template_name.trim().is_empty() {
            return Err(EngineError::Validation("template_name MUST be non-empty".to_string()));
        }

        if self.version.trim().is_empty() {
            return Err(EngineError::Validation("version MUST be non-empty".to_string()));
        }

        if self.last_modified_by.trim().is_empty() {
            return Err(EngineError::Validation(
                "last_modified_by MUST be recorded for every mutation".to_string(),
            ));
        }

        Ok(())
    }
}

/// One externally extracted document descriptor. Ephemeral; identified only by
/// its title for matching purposes.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Descriptor {
    pub title: String,
    pub benefit_type: String,
    pub business_area: String,
    pub sub_business_area: String,
    pub description: String,
}

/// One append-only audit fact recording a single mutation.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ActivityEntry {
    pub actor: String,
    pub action: ActivityAction,
    pub target: String,
    pub details: String,
    pub related_rule_id: Option<RuleId>,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct BatchResult {
    pub matched: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub processed_titles: Vec<String>,
}

/// The full product of one reconciliation run. The caller commits `records`
/// and `activity` as a single logical unit; nothing is written here.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ReconcileOutcome {
    pub records: Vec<RuleRecord>,
    pub activity: Vec<ActivityEntry>,
    pub result: BatchResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RunSummary {
    pub message: String,
    pub processed_titles: Vec<String>,
}

/// Case-insensitive containment test between an extracted title and a stored
/// template name. Blank values never correspond: an empty string would
/// vacuously be contained in everything.
#[must_use]
pub fn titles_correspond(template_name: &str, extracted_title: &str) -> bool {
    let stored = template_name.trim().to_lowercase();
    let extracted = extracted_title.trim().to_lowercase();
    if stored.is_empty() || extracted.is_empty() {
        return false;
    }

    extracted.contains(&stored) || stored.contains(&extracted)
}

/// Find the stored rule matching an extracted title.
///
/// The first satisfying record in collection order wins. That is the contract:
/// containment matching carries no score or threshold, so short or generic
/// titles can collide and collection order decides the winner.
#[must_use]
pub fn match_rule<'a>(extracted_title: &str, records: &'a [RuleRecord]) -> Option<&'a RuleRecord> {
    records.iter().find(|record| titles_correspond(&record.template_name, extracted_title))
}

/// Reconcile one descriptor batch against the current rule collection.
///
/// Pure fold over the inputs: per descriptor, match against the working set
/// (records created or updated earlier in the batch are visible to later
/// descriptors), then merge into the matched record or synthesize a new one.
/// Descriptors without a usable title are counted as `skipped` and produce no
/// record and no activity entry. Activity entries are emitted in mutation
/// order, one per created or updated record.
#[must_use]
pub fn reconcile(
    descriptors: &[Descriptor],
    current: &[RuleRecord],
    actor: &str,
    run_at: OffsetDateTime,
) -> ReconcileOutcome {
    let mut working = current.to_vec();
    let mut activity = Vec::new();
    let mut result = BatchResult::default();

    for descriptor in descriptors {
        let title = descriptor.title.trim();
        if title.is_empty() {
            result.skipped += 1;
            continue;
        }

        let matched_index =
            working.iter().position(|record| titles_correspond(&record.template_name, title));

        match matched_index {
            Some(index) => {
                let record = &mut working[index];
                record.benefit_type = descriptor.benefit_type.clone();
                record.business_area = descriptor.business_area.clone();
                record.sub_business_area = descriptor.sub_business_area.clone();
                record.description = descriptor.description.clone();
                record.last_modified = run_at;
                record.last_modified_by = actor.to_string();

                result.matched += 1;
                result.updated += 1;
                activity.push(ActivityEntry {
                    actor: actor.to_string(),
                    action: ActivityAction::Upload,
                    target: record.template_name.clone(),
                    details: format!("merged extracted title \"{title}\""),
                    related_rule_id: Some(record.id),
                    recorded_at: run_at,
                });
            }
            None => {
                let record = rule_from_descriptor(descriptor, title, actor, run_at);
                result.created += 1;
                activity.push(ActivityEntry {
                    actor: actor.to_string(),
                    action: ActivityAction::Create,
                    target: record.template_name.clone(),
                    details: format!("created from extracted title \"{title}\""),
                    related_rule_id: Some(record.id),
                    recorded_at: run_at,
                });
                working.push(record);
            }
        }

        result.processed_titles.push(title.to_string());
    }

    ReconcileOutcome { records: working, activity, result }
}

/// Project a batch result into the user-facing run summary.
#[must_use]
pub fn run_summary(result: &BatchResult) -> RunSummary {
    RunSummary {
        message: format!(
            "{} titles matched, {} updated, {} created",
            result.matched, result.updated, result.created
        ),
        processed_titles: result.processed_titles.clone(),
    }
}

fn rule_from_descriptor(
    descriptor: &Descriptor,
    title: &str,
    actor: &str,
    run_at: OffsetDateTime,
) -> RuleRecord {
    let id = RuleId::new();
    RuleRecord {
        id,
        rule_id: id.to_string(),
        template_name: title.to_string(),
        benefit_type: descriptor.benefit_type.clone(),
        business_area: descriptor.business_area.clone(),
        sub_business_area: descriptor.sub_business_area.clone(),
        description: descriptor.description.clone(),
        version: "1.0".to_string(),
        effective_date: None,
        status: RuleStatus::Draft,
        category: None,
        language: None,
        repeater_type: None,
        published: false,
        last_modified: run_at,
        last_modified_by: actor.to_string(),
        tags: BTreeSet::new(),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use time::Duration;

    use super::*;

    fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
    }

    fn later_time() -> OffsetDateTime {
        fixture_time() + Duration::hours(2)
    }

    fn mk_rule(template_name: &str) -> RuleRecord {
        let id = RuleId::new();
        RuleRecord {
            id,
            rule_id: id.to_string(),
            template_name: template_name.to_string(),
            benefit_type: "Medical".to_string(),
            business_area: "Claims".to_string(),
            sub_business_area: "Intake".to_string(),
            description: "fixture".to_string(),
            version: "1.0".to_string(),
            effective_date: None,
            status: RuleStatus::Active,
            category: Some("Notices".to_string()),
            language: Some("en".to_string()),
            repeater_type: None,
            published: true,
            last_modified: fixture_time(),
            last_modified_by: "editor".to_string(),
            tags: BTreeSet::from(["seed".to_string()]),
        }
    }

    fn mk_descriptor(title: &str) -> Descriptor {
        Descriptor {
            title: title.to_string(),
            benefit_type: "Dental".to_string(),
            business_area: "Enrollment".to_string(),
            sub_business_area: "Renewals".to_string(),
            description: "extracted".to_string(),
        }
    }

    #[test]
    fn validate_rejects_blank_accountability_fields() {
        let mut record = mk_rule("Medicare Plan Notice");
        record.last_modified_by = "  ".to_string();

        let err = match record.validate() {
            Ok(()) => panic!("expected validation error"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("last_modified_by"));
    }

    #[test]
    fn validate_rejects_blank_template_name() {
        let mut record = mk_rule("Medicare Plan Notice");
        record.template_name = String::new();

        assert!(record.validate().is_err());
    }

    #[test]
    fn matching_is_case_insensitive_in_both_directions() {
        let records = vec![mk_rule("Medicare Plan Notice")];

        let contained = match_rule("medicare plan", &records);
        assert!(contained.is_some());

        let containing = match_rule("MEDICARE PLAN NOTICE - 2026 REVISION", &records);
        assert!(containing.is_some());
    }

    #[test]
    fn blank_titles_never_match() {
        let records = vec![mk_rule("Medicare Plan Notice"), mk_rule("   ")];

        assert!(match_rule("", &records).is_none());
        assert!(match_rule("   ", &records).is_none());

        // A record with a blank template name must not vacuously match.
        let matched = match_rule("Dental Rider", &records);
        assert!(matched.is_none());
    }

    #[test]
    fn first_match_in_collection_order_wins_for_mutual_substrings() {
        // Adversarial case: both stored titles satisfy the containment test
        // for the extracted title. The first in collection order wins, even
        // though the second is the exact-title candidate.
        let generic = mk_rule("Plan Benefits");
        let specific = mk_rule("Medicare Advantage Plan Benefits");
        let records = vec![generic.clone(), specific];

        let matched = match match_rule("Medicare Advantage Plan Benefits", &records) {
            Some(record) => record,
            None => panic!("expected a containment match"),
        };
        assert_eq!(matched.id, generic.id);
    }

    #[test]
    fn matched_descriptor_updates_instead_of_duplicating() {
        let stored = mk_rule("Medicare Advantage Plan Benefits");
        let stored_id = stored.id;
        let batch = vec![mk_descriptor("Medicare Advantage Plan Benefits Summary")];

        let outcome = reconcile(&batch, &[stored], "uploader", later_time());

        assert_eq!(outcome.result.matched, 1);
        assert_eq!(outcome.result.updated, 1);
        assert_eq!(outcome.result.created, 0);
        assert_eq!(outcome.records.len(), 1);

        let updated = &outcome.records[0];
        assert_eq!(updated.id, stored_id);
        assert_eq!(updated.benefit_type, "Dental");
        assert_eq!(updated.business_area, "Enrollment");
        assert_eq!(updated.sub_business_area, "Renewals");
        assert_eq!(updated.description, "extracted");

        assert_eq!(outcome.activity.len(), 1);
        assert_eq!(outcome.activity[0].action, ActivityAction::Upload);
        assert_eq!(outcome.activity[0].related_rule_id, Some(stored_id));
        assert!(outcome.activity[0].details.contains("Medicare Advantage Plan Benefits Summary"));
    }

    #[test]
    fn update_preserves_identity_status_version_and_tags() {
        let stored = mk_rule("Medicare Advantage Plan Benefits");
        let expected_id = stored.id;
        let expected_tags = stored.tags.clone();
        let batch = vec![mk_descriptor("Medicare Advantage Plan Benefits Summary")];

        let outcome = reconcile(&batch, &[stored], "uploader", later_time());
        let updated = &outcome.records[0];

        assert_eq!(updated.id, expected_id);
        assert_eq!(updated.status, RuleStatus::Active);
        assert_eq!(updated.version, "1.0");
        assert_eq!(updated.tags, expected_tags);
        assert!(updated.published);
    }

    #[test]
    fn unmatched_descriptors_create_draft_records_in_input_order() {
        let titles =
            ["Vision Rider", "Dental Rider", "Hearing Rider", "Wellness Rider", "Travel Rider"];
        let batch = titles.iter().map(|title| mk_descriptor(title)).collect::<Vec<_>>();

        let outcome = reconcile(&batch, &[], "uploader", later_time());

        assert_eq!(outcome.result.created, 5);
        assert_eq!(outcome.result.matched, 0);
        assert_eq!(outcome.result.processed_titles, titles);
        assert_eq!(outcome.records.len(), 5);
        assert_eq!(outcome.activity.len(), 5);
        for (entry, title) in outcome.activity.iter().zip(titles) {
            assert_eq!(entry.action, ActivityAction::Create);
            assert_eq!(entry.target, title);
        }

        let mut ids = outcome.records.iter().map(|record| record.id).collect::<Vec<_>>();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 5);

        for record in &outcome.records {
            assert_eq!(record.status, RuleStatus::Draft);
            assert_eq!(record.version, "1.0");
            assert!(!record.published);
            assert_eq!(record.last_modified_by, "uploader");
        }
    }

    #[test]
    fn blank_title_is_skipped_without_record_or_activity() {
        let batch = vec![mk_descriptor("Vision Rider"), mk_descriptor("  "), mk_descriptor("")];

        let outcome = reconcile(&batch, &[], "uploader", later_time());

        assert_eq!(outcome.result.created, 1);
        assert_eq!(outcome.result.skipped, 2);
        assert_eq!(outcome.result.processed_titles, vec!["Vision Rider".to_string()]);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.activity.len(), 1);
    }

    #[test]
    fn records_created_earlier_in_the_batch_are_visible_to_later_matches() {
        let batch = vec![mk_descriptor("Vision Rider"), mk_descriptor("Vision Rider Appendix")];

        let outcome = reconcile(&batch, &[], "uploader", later_time());

        assert_eq!(outcome.result.created, 1);
        assert_eq!(outcome.result.matched, 1);
        assert_eq!(outcome.records.len(), 1);
    }

    #[test]
    fn rerunning_a_batch_updates_rather_than_duplicates() {
        let titles = ["Vision Rider", "Dental Rider", "Hearing Rider"];
        let batch = titles.iter().map(|title| mk_descriptor(title)).collect::<Vec<_>>();

        let first = reconcile(&batch, &[], "uploader", fixture_time());
        assert_eq!(first.result.created, 3);

        let second = reconcile(&batch, &first.records, "uploader", later_time());
        assert_eq!(second.result.created, 0);
        assert_eq!(second.result.matched, 3);
        assert_eq!(second.records.len(), 3);
    }

    #[test]
    fn stamps_advance_and_carry_the_actor_label() {
        let stored = mk_rule("Medicare Plan Notice");
        let previous = stored.last_modified;
        let batch = vec![mk_descriptor("Medicare Plan Notice"), mk_descriptor("Dental Rider")];

        let outcome = reconcile(&batch, &[stored], "batch-runner", later_time());

        for record in &outcome.records {
            assert!(record.last_modified >= previous);
            assert_eq!(record.last_modified, later_time());
            assert_eq!(record.last_modified_by, "batch-runner");
        }
        for entry in &outcome.activity {
            assert_eq!(entry.actor, "batch-runner");
            assert_eq!(entry.recorded_at, later_time());
        }
    }

    #[test]
    fn run_summary_projects_counts_and_titles() {
        let batch = vec![mk_descriptor("Vision Rider"), mk_descriptor("Dental Rider")];
        let outcome = reconcile(&batch, &[mk_rule("Vision Rider")], "uploader", later_time());

        let summary = run_summary(&outcome.result);
        assert_eq!(summary.message, "1 titles matched, 1 updated, 1 created");
        assert_eq!(summary.processed_titles, outcome.result.processed_titles);
    }

    proptest! {
        #[test]
        fn property_every_descriptor_is_accounted_for(raw_titles in prop::collection::vec("[ a-z]{0,12}", 0..24)) {
            let batch = raw_titles.iter().map(|title| mk_descriptor(title)).collect::<Vec<_>>();
            let usable = raw_titles.iter().filter(|title| !title.trim().is_empty()).count();
            let blank = raw_titles.len() - usable;

            let outcome = reconcile(&batch, &[], "prop", OffsetDateTime::UNIX_EPOCH);

            prop_assert_eq!(outcome.result.matched + outcome.result.created, usable);
            prop_assert_eq!(outcome.result.skipped, blank);
            prop_assert_eq!(outcome.result.processed_titles.len(), usable);
            prop_assert_eq!(outcome.activity.len(), usable);
        }
    }

    proptest! {
        #[test]
        fn property_reconcile_never_drops_existing_records(count in 0_usize..8) {
            let current = (0..count)
                .map(|index| mk_rule(&format!("Stored Notice {index}")))
                .collect::<Vec<_>>();
            let batch = vec![mk_descriptor("Unrelated Extracted Title")];

            let outcome = reconcile(&batch, &current, "prop", OffsetDateTime::UNIX_EPOCH);

            prop_assert!(outcome.records.len() >= current.len());
            for record in &current {
                prop_assert!(outcome.records.iter().any(|kept| kept.id == record.id));
            }
        }
    }
}
