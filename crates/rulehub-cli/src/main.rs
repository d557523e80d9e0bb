use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rulehub_api::{CreateRuleRequest, JsonFileSource, RuleHubApi, UpdateRuleRequest};
use rulehub_core::{RuleId, RuleStatus};
use time::OffsetDateTime;
use ulid::Ulid;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "rh")]
#[command(about = "RuleHub CLI")]
struct Cli {
    #[arg(long, default_value = "./rulehub.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
    Rule {
        #[command(subcommand)]
        command: Box<RuleCommand>,
    },
    Ingest {
        #[command(subcommand)]
        command: Box<IngestCommand>,
    },
    Activity {
        #[command(subcommand)]
        command: Box<ActivityCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Export(DbExportArgs),
    Import(DbImportArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbExportArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbImportArgs {
    #[arg(long = "in")]
    input: PathBuf,
    #[arg(long, default_value_t = true)]
    skip_existing: bool,
}

#[derive(Debug, Subcommand)]
enum RuleCommand {
    Add(RuleAddArgs),
    Update(RuleUpdateArgs),
    Delete(RuleDeleteArgs),
    List,
}

#[derive(Debug, Args)]
struct RuleAddArgs {
    #[arg(long)]
    actor: String,
    #[arg(long)]
    template_name: String,
    #[arg(long)]
    benefit_type: String,
    #[arg(long)]
    business_area: String,
    #[arg(long)]
    sub_business_area: String,
    #[arg(long)]
    description: String,
    #[arg(long)]
    version: Option<String>,
    #[arg(long)]
    effective_date: Option<String>,
    #[arg(long)]
    status: Option<StatusArg>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    language: Option<String>,
    #[arg(long)]
    repeater_type: Option<String>,
    #[arg(long, default_value_t = false)]
    published: bool,
    #[arg(long = "tag")]
    tags: Vec<String>,
}

#[derive(Debug, Args)]
struct RuleUpdateArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    actor: String,
    #[arg(long)]
    template_name: Option<String>,
    #[arg(long)]
    benefit_type: Option<String>,
    #[arg(long)]
    business_area: Option<String>,
    #[arg(long)]
    sub_business_area: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    version: Option<String>,
    #[arg(long)]
    effective_date: Option<String>,
    #[arg(long)]
    status: Option<StatusArg>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    language: Option<String>,
    #[arg(long)]
    repeater_type: Option<String>,
    #[arg(long)]
    published: Option<bool>,
    #[arg(long = "tag")]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Args)]
struct RuleDeleteArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    actor: String,
}

#[derive(Debug, Subcommand)]
enum IngestCommand {
    AutoLoad,
    Upload(IngestUploadArgs),
}

#[derive(Debug, Args)]
struct IngestUploadArgs {
    #[arg(long)]
    file: PathBuf,
    #[arg(long)]
    actor: String,
}

#[derive(Debug, Subcommand)]
enum ActivityCommand {
    List,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Draft,
    Active,
    Archived,
}

impl StatusArg {
    fn into_status(self) -> RuleStatus {
        match self {
            Self::Draft => RuleStatus::Draft,
            Self::Active => RuleStatus::Active,
            Self::Archived => RuleStatus::Archived,
        }
    }
}

fn with_contract_version(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                serde_json::Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            serde_json::Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = RuleHubApi::new(cli.db);
    match cli.command {
        Command::Db { command } => run_db(*command, &api),
        Command::Rule { command } => run_rule(*command, &api),
        Command::Ingest { command } => run_ingest(*command, &api),
        Command::Activity { command } => run_activity(*command, &api),
    }
}

fn run_db(command: DbCommand, api: &RuleHubApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
                "inferred_from_legacy": status.inferred_from_legacy
            }))
        }
        DbCommand::Migrate(args) => {
            let result = api.migrate(args.dry_run)?;
            emit_json(serde_json::to_value(&result).context("failed to serialize migrate result")?)
        }
        DbCommand::Export(args) => {
            let manifest = api.export_snapshot(&args.out)?;
            emit_json(serde_json::json!({
                "out_dir": args.out,
                "manifest": manifest
            }))
        }
        DbCommand::Import(args) => {
            let summary = api.import_snapshot(&args.input, args.skip_existing)?;
            emit_json(serde_json::json!({
                "in_dir": args.input,
                "skip_existing": args.skip_existing,
                "summary": summary
            }))
        }
        DbCommand::IntegrityCheck => {
            let report = api.integrity_check()?;
            emit_json(
                serde_json::to_value(&report).context("failed to serialize integrity report")?,
            )
        }
    }
}

fn run_rule(command: RuleCommand, api: &RuleHubApi) -> Result<()> {
    match command {
        RuleCommand::Add(args) => {
            let record = api.create_rule(CreateRuleRequest {
                actor: args.actor,
                template_name: args.template_name,
                benefit_type: args.benefit_type,
                business_area: args.business_area,
                sub_business_area: args.sub_business_area,
                description: args.description,
                version: args.version,
                effective_date: args
                    .effective_date
                    .as_deref()
                    .map(parse_rfc3339)
                    .transpose()?,
                status: args.status.map(StatusArg::into_status),
                category: args.category,
                language: args.language,
                repeater_type: args.repeater_type,
                published: args.published,
                tags: args.tags.into_iter().collect(),
            })?;
            emit_json(serde_json::to_value(&record).context("failed to serialize rule record")?)
        }
        RuleCommand::Update(args) => {
            let id = parse_rule_id(&args.id)?;
            let updated = api.update_rule(UpdateRuleRequest {
                actor: args.actor,
                id,
                template_name: args.template_name,
                benefit_type: args.benefit_type,
                business_area: args.business_area,
                sub_business_area: args.sub_business_area,
                description: args.description,
                version: args.version,
                effective_date: args
                    .effective_date
                    .as_deref()
                    .map(parse_rfc3339)
                    .transpose()?,
                status: args.status.map(StatusArg::into_status),
                category: args.category,
                language: args.language,
                repeater_type: args.repeater_type,
                published: args.published,
                tags: args.tags.map(|tags| tags.into_iter().collect::<BTreeSet<_>>()),
            })?;
            match updated {
                Some(record) => emit_json(serde_json::json!({
                    "found": true,
                    "rule": record
                })),
                None => emit_json(serde_json::json!({
                    "found": false,
                    "rule": serde_json::Value::Null
                })),
            }
        }
        RuleCommand::Delete(args) => {
            let id = parse_rule_id(&args.id)?;
            let deleted = api.delete_rule(id, &args.actor)?;
            emit_json(serde_json::json!({
                "id": id.to_string(),
                "deleted": deleted
            }))
        }
        RuleCommand::List => {
            let records = api.list_rules()?;
            emit_json(serde_json::json!({ "rules": records }))
        }
    }
}

fn run_ingest(command: IngestCommand, api: &RuleHubApi) -> Result<()> {
    match command {
        IngestCommand::AutoLoad => {
            let report = api.auto_load()?;
            emit_json(serde_json::to_value(&report).context("failed to serialize ingest report")?)
        }
        IngestCommand::Upload(args) => {
            let source = JsonFileSource::new(args.file);
            let report = api.run_reconciliation(&source, &args.actor)?;
            emit_json(serde_json::to_value(&report).context("failed to serialize ingest report")?)
        }
    }
}

fn run_activity(command: ActivityCommand, api: &RuleHubApi) -> Result<()> {
    match command {
        ActivityCommand::List => {
            let entries = api.list_activity()?;
            emit_json(serde_json::json!({ "entries": entries }))
        }
    }
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 UTC timestamp: {value}"))?;

    if parsed.offset() != time::UtcOffset::UTC {
        return Err(anyhow!("timestamp MUST use UTC offset Z (received: {value})"));
    }

    Ok(parsed)
}

fn parse_rule_id(value: &str) -> Result<RuleId> {
    let parsed = Ulid::from_string(value).with_context(|| format!("invalid ULID: {value}"))?;
    Ok(RuleId(parsed))
}
