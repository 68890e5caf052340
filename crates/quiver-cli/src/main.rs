//! Quiver - skill acquisition and installation
//!
//! Usage:
//!   quiver install github:org/skills      # resolve, scan and install
//!   quiver resume <id> --decision x=keep  # continue a suspended install
//!   quiver search pdf extract             # ranked search over installed skills

mod interactive;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quiver_core::cache::{CacheEntry, ClearSummary};
use quiver_core::config::ConfigStore;
use quiver_core::context::AppContext;
use quiver_core::error::{EXIT_BLOCKED, EXIT_FAILURE, EXIT_OK, PipelineError};
use quiver_core::formats::SkillFormat;
use quiver_core::registry::{SearchHit, SkillRecord, SyncReport, UninstallReport, search};
use quiver_core::workflow::{
    Decision, InstallReport, InstallRequest, InstalledScan, PendingWorkflow, ValidationReport,
    WorkflowOutcome, scan_installed, validate_path,
};

use crate::interactive::DecisionPrompt;

#[derive(Parser)]
#[command(name = "quiver")]
#[command(about = "Skill acquisition and installation", long_about = None)]
struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    /// Config file (defaults to <config dir>/quiver/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install skills from a repository, directory or archive
    Install(InstallArgs),

    /// Continue a workflow suspended on a security decision
    Resume {
        /// Workflow id printed when the install was suspended
        workflow_id: String,

        /// Decision for a blocked skill (name=keep|uninstall), repeatable
        #[arg(long = "decision", value_name = "NAME=DECISION")]
        decisions: Vec<String>,

        /// Decisions as a JSON object, e.g. '{"skill-x":"keep"}'
        #[arg(long, value_name = "JSON")]
        decisions_json: Option<String>,
    },

    /// List workflows waiting for a decision
    Pending,

    /// Remove an installed skill
    #[command(alias = "rm")]
    Uninstall {
        name: String,
        /// Also remove the children of a parent skill
        #[arg(long)]
        force: bool,
    },

    /// List installed skills
    List,

    /// Search installed skills by keyword
    Search {
        #[arg(required = true)]
        keywords: Vec<String>,
        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
        /// Show scores and what matched
        #[arg(long)]
        score: bool,
    },

    /// Record one use of a skill
    Use { name: String },

    /// Reconcile the registry with the skills directory
    Sync,

    /// Re-scan installed skills
    Scan {
        /// Only scan this skill
        name: Option<String>,
    },

    /// Check what a directory would install, without installing
    Validate { path: PathBuf },

    /// Describe the recognised skill formats
    Formats,

    /// Manage the repository cache
    Cache(CacheArgs),
}

#[derive(Args)]
struct InstallArgs {
    /// github:owner/repo[@ref][/path], owner/repo, a git or archive URL, or a local path
    source: String,

    /// Install only this skill from the source
    #[arg(long)]
    skill: Option<String>,

    /// Overwrite skills that are already installed
    #[arg(long)]
    force: bool,

    /// Clone again even if the cache is fresh
    #[arg(long)]
    refresh_cache: bool,

    /// Decision for a skill the scanner may block (name=keep|uninstall), repeatable
    #[arg(long = "decision", value_name = "NAME=DECISION")]
    decisions: Vec<String>,

    /// Prompt for decisions instead of suspending
    #[arg(short, long)]
    interactive: bool,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheSubcommand,
}

#[derive(Subcommand)]
enum CacheSubcommand {
    /// List cached repositories and packages
    List,
    /// Remove cache entries
    Clear {
        /// Only remove entries older than this many days
        #[arg(long, value_name = "DAYS")]
        older_than: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so JSON on stdout stays parseable.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quiver=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let format = cli.format;
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => report_error(&err, format),
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let format = cli.format;
    if let Commands::Formats = cli.command {
        print_formats(format)?;
        return Ok(EXIT_OK);
    }

    let ctx = build_context(cli.config)?;
    match cli.command {
        Commands::Install(args) => run_install(&ctx, args, format).await,
        Commands::Resume {
            workflow_id,
            decisions,
            decisions_json,
        } => {
            let decisions = collect_decisions(&decisions, decisions_json.as_deref())?;
            let outcome = ctx
                .install_workflow()
                .resume(&workflow_id, &decisions)
                .await?;
            print_outcome(&outcome, format)?;
            Ok(outcome.exit_code())
        }
        Commands::Pending => {
            let pending = ctx.install_workflow().pending()?;
            print_pending(&pending, format)?;
            Ok(EXIT_OK)
        }
        Commands::Uninstall { name, force } => {
            let report = ctx.skill_installer().uninstall(&name, force)?;
            print_uninstall(&report, format)?;
            Ok(EXIT_OK)
        }
        Commands::List => {
            let records = ctx.skill_installer().list()?;
            print_records(&records, format)?;
            Ok(EXIT_OK)
        }
        Commands::Search {
            keywords,
            limit,
            score,
        } => {
            let records = ctx.skill_installer().list()?;
            let hits = search(&records, &keywords, limit);
            print_hits(&hits, score, format)?;
            Ok(EXIT_OK)
        }
        Commands::Use { name } => {
            let record = ctx.skill_installer().record_use(&name)?;
            match format {
                OutputFormat::Table => {
                    println!("✓ '{}' used {} time(s)", record.name, record.usage_count)
                }
                OutputFormat::Json => print_json(&record)?,
            }
            Ok(EXIT_OK)
        }
        Commands::Sync => {
            let report = ctx.skill_installer().sync()?;
            print_sync(&report, format)?;
            Ok(EXIT_OK)
        }
        Commands::Scan { name } => {
            let scan = &ctx.config().scan;
            let scans = scan_installed(
                &ctx.skill_installer(),
                ctx.scanner(),
                name.as_deref(),
                scan.block_threshold,
                scan.concurrency,
            )
            .await?;
            print_scans(&scans, format)?;
            let failed = scans.iter().any(|s| s.error.is_some());
            Ok(if failed { EXIT_FAILURE } else { EXIT_OK })
        }
        Commands::Validate { path } => {
            let report = validate_path(&path, &ctx.format_detector())?;
            print_validation(&report, format)?;
            Ok(if report.is_valid() { EXIT_OK } else { EXIT_FAILURE })
        }
        Commands::Cache(args) => run_cache(&ctx, args, format),
        Commands::Formats => Ok(EXIT_OK),
    }
}

fn build_context(config_path: Option<PathBuf>) -> Result<AppContext> {
    let store = match config_path {
        Some(path) => ConfigStore::from_path(path),
        None => ConfigStore::from_default_location()?,
    };
    let config = store.load()?;
    let project_root = std::env::current_dir().context("Failed to read current directory")?;
    AppContext::from_config(config, project_root)
}

async fn run_install(ctx: &AppContext, args: InstallArgs, format: OutputFormat) -> Result<i32> {
    let mut request = InstallRequest::new(&args.source)
        .with_force(args.force)
        .with_refresh(args.refresh_cache);
    if let Some(skill) = &args.skill {
        request = request.with_skill(skill);
    }
    for (name, decision) in collect_decisions(&args.decisions, None)? {
        request = request.with_decision(name, decision);
    }

    let workflow = ctx.install_workflow();
    let mut outcome = workflow.start(request).await?;

    if args.interactive {
        while let WorkflowOutcome::Suspended {
            workflow_id,
            blocked,
        } = &outcome
        {
            let workflow_id = workflow_id.clone();
            let decisions = DecisionPrompt::new().collect(blocked)?;
            outcome = workflow.resume(&workflow_id, &decisions).await?;
        }
    }

    print_outcome(&outcome, format)?;
    Ok(outcome.exit_code())
}

fn run_cache(ctx: &AppContext, args: CacheArgs, format: OutputFormat) -> Result<i32> {
    let cache = ctx.repo_cache();
    match args.command {
        CacheSubcommand::List => {
            let entries = cache.list()?;
            print_cache_entries(&entries, format)?;
        }
        CacheSubcommand::Clear { older_than } => {
            let age = older_than.map(|days| std::time::Duration::from_secs(days * 24 * 60 * 60));
            let summary = cache.clear(age)?;
            print_cache_clear(&summary, format)?;
        }
    }
    Ok(EXIT_OK)
}

/// Parse `name=decision` pairs and an optional JSON object into one map.
fn collect_decisions(pairs: &[String], json: Option<&str>) -> Result<BTreeMap<String, Decision>> {
    let mut decisions = BTreeMap::new();
    if let Some(json) = json {
        let parsed: BTreeMap<String, Decision> =
            serde_json::from_str(json).context("Invalid --decisions-json")?;
        decisions.extend(parsed);
    }
    for pair in pairs {
        let (name, decision) = parse_decision(pair)?;
        decisions.insert(name, decision);
    }
    Ok(decisions)
}

fn parse_decision(pair: &str) -> Result<(String, Decision)> {
    let (name, decision) = pair
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Expected NAME=keep|uninstall, got '{}'", pair))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Missing skill name in '{}'", pair);
    }
    Ok((name.to_string(), decision.parse()?))
}

fn report_error(err: &anyhow::Error, format: OutputFormat) -> i32 {
    let pipeline = err.downcast_ref::<PipelineError>();
    let code = pipeline.map(PipelineError::exit_code).unwrap_or(EXIT_FAILURE);
    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "error": format!("{:#}", err),
                "kind": pipeline.map(PipelineError::kind).unwrap_or("other"),
                "subject": pipeline.and_then(PipelineError::subject),
                "recoverable": pipeline.is_some_and(PipelineError::is_recoverable),
            });
            println!("{}", output);
        }
        OutputFormat::Table => {
            eprintln!("✗ {:#}", err);
            if let Some(pipeline) = pipeline {
                let hint = if pipeline.is_recoverable() {
                    "recoverable: retry, or adjust flags"
                } else {
                    "not recoverable"
                };
                eprintln!("  ({})", hint);
            }
        }
    }
    code
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_outcome(outcome: &WorkflowOutcome, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(outcome);
    }
    match outcome {
        WorkflowOutcome::Completed(report) => print_report(report),
        WorkflowOutcome::Suspended {
            workflow_id,
            blocked,
        } => {
            println!("⏸ Install suspended: {} skill(s) need a decision", blocked.len());
            println!();
            println!("  {:<30} {:<10} Findings", "Skill", "Severity");
            println!("  {}", "-".repeat(52));
            for candidate in blocked {
                println!(
                    "  {:<30} {:<10} {}",
                    candidate.name,
                    candidate.severity,
                    candidate.findings.len()
                );
                for finding in &candidate.findings {
                    println!("      - [{}] {}", finding.severity, finding.title);
                }
            }
            println!();
            println!(
                "Resume with: quiver resume {} --decision <skill>=keep|uninstall",
                workflow_id
            );
        }
    }
    Ok(())
}

fn print_report(report: &InstallReport) {
    for skill in &report.installed {
        println!("✓ Installed '{}' ({})", skill.name, skill.package_type);
        for warning in &skill.warnings {
            println!("  ⚠ {}", warning);
        }
    }
    for skipped in &report.skipped {
        println!("• Skipped '{}': {}", skipped.name, skipped.reason);
    }
    for failed in &report.failed {
        let hint = if failed.recoverable { " (recoverable)" } else { "" };
        println!("✗ Failed '{}': {}{}", failed.name, failed.error, hint);
    }
    for rejected in &report.rejected {
        println!("✗ Rejected {}: {}", rejected.relative_path, rejected.reason);
    }
    for warning in &report.warnings {
        println!("⚠ {}", warning);
    }
    println!(
        "Summary: {} installed, {} failed ({})",
        report.installed.len(),
        report.failure_count(),
        report.status
    );
}

fn print_pending(pending: &[PendingWorkflow], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(&pending);
    }
    if pending.is_empty() {
        println!("No suspended workflows.");
        return Ok(());
    }
    println!("  {:<34} {:<20} {:<30} Blocked", "Workflow", "Created", "Source");
    println!("  {}", "-".repeat(95));
    for workflow in pending {
        let blocked: Vec<&str> = workflow.blocked.iter().map(|b| b.name.as_str()).collect();
        println!(
            "  {:<34} {:<20} {:<30} {}",
            workflow.workflow_id,
            workflow.created_at.format("%Y-%m-%d %H:%M"),
            truncate(&workflow.input, 30),
            blocked.join(", ")
        );
    }
    Ok(())
}

fn print_uninstall(report: &UninstallReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(report)?,
        OutputFormat::Table => {
            for name in &report.removed {
                println!("✓ Uninstalled '{}'", name);
            }
        }
    }
    Ok(())
}

fn print_records(records: &[SkillRecord], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No skills installed.");
        return Ok(());
    }
    println!(
        "  {:<28} {:<12} {:<11} {:<6} {:<9} Description",
        "Name", "Format", "Type", "Uses", "Scan"
    );
    println!("  {}", "-".repeat(90));
    for record in records {
        let name = if record.installed {
            record.name.clone()
        } else {
            format!("{} (missing)", record.name)
        };
        let scan = record
            .last_scan
            .as_ref()
            .map(|s| s.severity.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<28} {:<12} {:<11} {:<6} {:<9} {}",
            truncate(&name, 28),
            record.format,
            record.package_type,
            record.usage_count,
            scan,
            truncate(&record.description, 40)
        );
    }
    Ok(())
}

fn print_hits(hits: &[SearchHit], show_score: bool, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(&hits);
    }
    if hits.is_empty() {
        println!("No matching skills.");
        return Ok(());
    }
    for hit in hits {
        if show_score {
            println!("{:>4}  {}", hit.score, hit.record.name);
            println!("      {}", hit.reasons.join("; "));
        } else {
            println!(
                "{:<28} {}",
                hit.record.name,
                truncate(&hit.record.description, 60)
            );
        }
    }
    Ok(())
}

fn print_sync(report: &SyncReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(report);
    }
    if report.is_empty() {
        println!("Registry is in sync.");
        return Ok(());
    }
    for name in &report.marked_missing {
        println!("⚠ '{}' directory is missing; marked not installed", name);
    }
    for name in &report.restored {
        println!("✓ '{}' directory found again", name);
    }
    for name in &report.adopted {
        println!("✓ Adopted '{}' from the skills directory", name);
    }
    Ok(())
}

fn print_scans(scans: &[InstalledScan], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(&scans);
    }
    if scans.is_empty() {
        println!("No installed skills to scan.");
        return Ok(());
    }
    println!("  {:<28} {:<10} {:<9} Status", "Name", "Severity", "Findings");
    println!("  {}", "-".repeat(60));
    for scan in scans {
        let severity = scan
            .severity
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = match (&scan.error, scan.flagged) {
            (Some(err), _) => format!("✗ {}", err),
            (None, true) => "⚠ flagged".to_string(),
            (None, false) => "✓".to_string(),
        };
        println!(
            "  {:<28} {:<10} {:<9} {}",
            truncate(&scan.name, 28),
            severity,
            scan.findings,
            status
        );
    }
    Ok(())
}

fn print_validation(report: &ValidationReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(report);
    }
    println!("Source: {}", report.root.display());
    for skill in &report.skills {
        println!(
            "✓ {} ({}, {}) at {}",
            skill.name, skill.format, skill.package_type, skill.relative_path
        );
        for warning in &skill.warnings {
            println!("  ⚠ {}", warning);
        }
    }
    for rejected in &report.rejected {
        println!("✗ {}: {}", rejected.relative_path, rejected.reason);
    }
    Ok(())
}

fn print_formats(format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        let formats: Vec<_> = SkillFormat::ALL
            .iter()
            .map(|f| {
                serde_json::json!({
                    "format": f.as_str(),
                    "description": f.description(),
                    "markers": f.markers(),
                })
            })
            .collect();
        return print_json(&formats);
    }
    println!("Detection priority (first match wins):");
    for (i, f) in SkillFormat::ALL.iter().enumerate() {
        println!("  {}. {:<13} {}", i + 1, f.as_str(), f.description());
        println!("     markers: {}", f.markers().join(", "));
    }
    Ok(())
}

fn print_cache_entries(entries: &[CacheEntry], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("Cache is empty.");
        return Ok(());
    }
    println!("  {:<8} {:<44} {:>10} {:>8}  Source", "Kind", "Key", "Size", "Age");
    println!("  {}", "-".repeat(100));
    let mut total = 0;
    for entry in entries {
        total += entry.size_bytes;
        println!(
            "  {:<8} {:<44} {:>10} {:>8}  {}",
            format!("{:?}", entry.kind).to_lowercase(),
            truncate(&entry.key, 44),
            human_size(entry.size_bytes),
            human_age(entry.age_secs),
            entry.url.as_deref().unwrap_or("-")
        );
    }
    println!();
    println!("Total: {} entries, {}", entries.len(), human_size(total));
    Ok(())
}

fn print_cache_clear(summary: &ClearSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(summary)?,
        OutputFormat::Table => println!(
            "✓ Cleared {} cache entries ({} kept)",
            summary.cleared.len(),
            summary.kept
        ),
    }
    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(1)).collect();
    format!("{}…", kept)
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

fn human_age(secs: u64) -> String {
    match secs {
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_pairs_parse() {
        let (name, decision) = parse_decision("risky-skill=keep").unwrap();
        assert_eq!(name, "risky-skill");
        assert_eq!(decision, Decision::Keep);
        assert!(parse_decision("risky-skill").is_err());
        assert!(parse_decision("=keep").is_err());
        assert!(parse_decision("x=later").is_err());
    }

    #[test]
    fn flags_override_json_decisions() {
        let decisions = collect_decisions(
            &["a=uninstall".to_string()],
            Some(r#"{"a": "keep", "b": "keep"}"#),
        )
        .unwrap();
        assert_eq!(decisions.get("a"), Some(&Decision::Uninstall));
        assert_eq!(decisions.get("b"), Some(&Decision::Keep));
        assert!(collect_decisions(&[], Some("not json")).is_err());
    }

    #[test]
    fn pipeline_errors_keep_their_exit_code() {
        let err: anyhow::Error = PipelineError::Timeout {
            operation: "git clone".to_string(),
            secs: 300,
        }
        .into();
        assert_eq!(report_error(&err, OutputFormat::Json), 3);
        let other = anyhow::anyhow!("boom");
        assert_eq!(report_error(&other, OutputFormat::Json), EXIT_FAILURE);
        assert_eq!(EXIT_BLOCKED, 2);
    }

    #[test]
    fn cli_parses_install_flags() {
        let cli = Cli::try_parse_from([
            "quiver",
            "--format",
            "json",
            "install",
            "github:org/repo",
            "--skill",
            "pdf",
            "--decision",
            "pdf=keep",
            "--force",
        ])
        .unwrap();
        assert!(cli.format == OutputFormat::Json);
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.source, "github:org/repo");
                assert_eq!(args.skill.as_deref(), Some("pdf"));
                assert!(args.force);
                assert_eq!(args.decisions, vec!["pdf=keep".to_string()]);
            }
            _ => panic!("expected install"),
        }
    }

    #[test]
    fn formatting_helpers() {
        assert_eq!(truncate("abcdef", 4), "abc…");
        assert_eq!(truncate("abc", 4), "abc");
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_age(7200), "2h");
    }
}
