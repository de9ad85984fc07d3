//! usermerge command-line tool.
//!
//! Provides subcommands for analyzing duplicate identities, cleaning up
//! unusable identities, executing merge plans, inspecting outstanding
//! failures, and generating / validating configuration files.

mod logging;
mod signals;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use usermerge_core::cleanup::run_cleanup;
use usermerge_core::config::AppConfig;
use usermerge_core::context::{PlanSource, RunContext};
use usermerge_core::dashboards::DashboardClient;
use usermerge_core::db::Database;
use usermerge_core::executor::MergeSummary;
use usermerge_core::grouping::group_duplicates;
use usermerge_core::models::MergePlan;
use usermerge_core::plan::{build_plans, plan_file};
use usermerge_core::report::{
    analyze, count_dashboards, write_duplicates_report, write_no_email_report,
};
use usermerge_core::source::fetch_all;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// usermerge command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "usermerge",
    version,
    about = "Find duplicate user identities and merge them into one"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./usermerge.toml")]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the total number of identities.
    Count,

    /// Find duplicates and write the duplicates and no-email reports.
    Analyze {
        /// Skip the dashboard service even if it is configured.
        #[arg(long)]
        no_dashboards: bool,
    },

    /// Delete identities matching the configured cleanup rules.
    Cleanup {
        /// Only count matching identities.
        #[arg(long)]
        dry_run: bool,
    },

    /// Merge duplicate identities.
    Merge {
        /// Plan file to execute (defaults to the duplicates report path).
        #[arg(long, conflicts_with = "from_store")]
        plan: Option<PathBuf>,

        /// Group and plan directly from the store instead of a plan file.
        #[arg(long)]
        from_store: bool,

        /// Report the plans without modifying anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// List transfers and deletes that failed and have not since succeeded.
    Outcomes {
        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// Show recent audit log entries.
    Audit {
        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./usermerge.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "command failed");
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => {
            let _guard = logging::init(cli.log_level.as_deref().unwrap_or("warn"), None);
            cmd_init(&output)
        }
        Commands::Validate => {
            let _guard = logging::init(cli.log_level.as_deref().unwrap_or("warn"), None);
            cmd_validate(&cli.config)
        }
        command => {
            let config = load_config(&cli.config)?;
            let level = cli
                .log_level
                .clone()
                .unwrap_or_else(|| config.run.log_level.clone());
            let _guard = logging::init(&level, config.run.log_dir.as_deref());

            match command {
                Commands::Outcomes { limit } => cmd_outcomes(&open_database(&config)?, limit),
                Commands::Audit { limit } => cmd_audit(&open_database(&config)?, limit),
                command => {
                    let ctx = RunContext::open(config).context("failed to open run context")?;
                    if let Commands::Merge {
                        plan,
                        from_store,
                        dry_run,
                    } = command
                    {
                        return cmd_merge(ctx, plan, from_store, dry_run).await;
                    }
                    let result = match command {
                        Commands::Count => cmd_count(&ctx),
                        Commands::Analyze { no_dashboards } => cmd_analyze(&ctx, no_dashboards).await,
                        Commands::Cleanup { dry_run } => cmd_cleanup(&ctx, dry_run),
                        _ => unreachable!(),
                    };
                    finish(ctx, result)
                }
            }
        }
    }
}

/// Close the run context, keeping the command's own error if it failed.
fn finish(ctx: RunContext, result: Result<()>) -> Result<()> {
    let closed = ctx.close().context("failed to close run context");
    result.and(closed)
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config =
        AppConfig::load_from_file(path).context("failed to load configuration file")?;
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    config
        .validate()
        .context("configuration validation failed")?;
    Ok(config)
}

fn open_database(config: &AppConfig) -> Result<Database> {
    Database::open(config.run.outcome_db_path()).context("failed to open outcome log")
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_count(ctx: &RunContext) -> Result<()> {
    let count = ctx
        .identity_count()
        .context("failed to count identities")?;
    info!(identities = count, "identity count");
    println!("{}", count);
    Ok(())
}

async fn cmd_analyze(ctx: &RunContext, no_dashboards: bool) -> Result<()> {
    let registry = ctx.registry().context("failed to build transfer registry")?;
    registry
        .verify_all()
        .context("record store schema does not match the configured collections")?;

    let dashboards = match (&ctx.config.dashboards, no_dashboards) {
        (Some(config), false) => Some(
            DashboardClient::from_config(config).context("failed to create dashboard client")?,
        ),
        _ => None,
    };

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message("identities counted");

    let store = Arc::clone(&ctx.store);
    let page_size = ctx.config.store.page_size;
    let scan_bar = bar.clone();
    let scanned = tokio::task::spawn_blocking(move || {
        analyze(&*store, &registry, page_size, &mut |done, total| {
            scan_bar.set_length(total as u64);
            scan_bar.set_position(done as u64);
        })
    })
    .await
    .context("analysis task failed")?;
    let mut report = match scanned {
        Ok(report) => report,
        Err(e) => {
            bar.finish_and_clear();
            return Err(e).context("analysis failed");
        }
    };

    if let Some(client) = &dashboards {
        bar.set_position(0);
        bar.set_message("dashboard owners counted");
        let counted = count_dashboards(&mut report, client, &mut |done, total| {
            bar.set_length(total as u64);
            bar.set_position(done as u64);
        })
        .await;
        if let Err(e) = counted {
            bar.finish_and_clear();
            return Err(e).context("dashboard counting failed");
        }
    }
    bar.finish_and_clear();

    let reports = &ctx.config.reports;
    write_duplicates_report(&reports.duplicates, &report)
        .context("failed to write duplicates report")?;
    write_no_email_report(&reports.no_email, &report.without_email)
        .context("failed to write no-email report")?;

    println!();
    println!("{}", style::header("Duplicate analysis"));
    println!();
    println!("  Identities       : {}", report.total_identities);
    println!("  Duplicate groups : {}", report.groups.len());
    println!("  Duplicate rows   : {}", report.rows.len());
    println!("  Without email    : {}", report.without_email.len());
    if dashboards.is_none() {
        println!("  {}", style::dim("Dashboards column left blank (no dashboard service)"));
    }
    println!();
    println!(
        "{}",
        style::success(&format!("Wrote {}", reports.duplicates.display()))
    );
    println!(
        "{}",
        style::success(&format!("Wrote {}", reports.no_email.display()))
    );
    Ok(())
}

fn cmd_cleanup(ctx: &RunContext, dry_run: bool) -> Result<()> {
    if dry_run {
        println!("{}", style::dry_run_banner());
    }
    let summary = run_cleanup(&ctx.store, &ctx.db, &ctx.config.cleanup.rules, dry_run)
        .context("cleanup failed")?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "Provider",
        "Missing email only",
        if dry_run { "Would delete" } else { "Deleted" },
    ]);
    for rule in &summary.rules {
        table.add_row(vec![
            Cell::new(&rule.provider),
            Cell::new(if rule.missing_email { "yes" } else { "no" }),
            Cell::new(rule.matched),
        ]);
    }
    println!("{}", table);
    println!("  Identities before: {}", summary.before);
    println!("  Identities after : {}", summary.after);
    Ok(())
}

fn load_plans(ctx: &RunContext, plan: Option<PathBuf>, from_store: bool) -> Result<(Vec<MergePlan>, Option<PathBuf>)> {
    if from_store {
        let records = fetch_all(&*ctx.store, ctx.config.store.page_size)
            .context("failed to read identities")?;
        let plans =
            build_plans(&group_duplicates(&records)).context("failed to build merge plans")?;
        return Ok((plans, None));
    }
    let path = plan.unwrap_or_else(|| ctx.config.reports.duplicates.clone());
    let plans = plan_file::load(&path)
        .with_context(|| format!("failed to load plan file {}", path.display()))?;
    Ok((plans, Some(path)))
}

async fn cmd_merge(
    ctx: RunContext,
    plan: Option<PathBuf>,
    from_store: bool,
    dry_run: bool,
) -> Result<()> {
    let (plans, path) = match load_plans(&ctx, plan, from_store) {
        Ok(loaded) => loaded,
        Err(e) => return finish(ctx, Err(e)),
    };
    if dry_run {
        println!("{}", style::dry_run_banner());
    }
    let pairs: usize = plans.iter().map(MergePlan::pair_count).sum();
    println!("{} merge plan(s), {} pair(s)", plans.len(), pairs);

    let shutdown = signals::setup_signal_handlers();
    let flag = shutdown.clone();
    let (ctx, result) = tokio::task::spawn_blocking(move || {
        let path_text = path.as_ref().map(|p| p.display().to_string());
        let source = match path_text.as_deref() {
            Some(p) => PlanSource::File(p),
            None => PlanSource::Store,
        };
        let result = ctx.merge(&plans, source, dry_run, Some(flag));
        (ctx, result)
    })
    .await
    .context("merge task failed")?;

    let outcome = result
        .context("merge run aborted")
        .map(|(run_id, summary)| {
            print_merge_summary(&run_id, &summary);
            if signals::is_shutdown_requested(&shutdown) {
                println!("{}", style::warn("Interrupted; re-run to continue where it stopped"));
            }
        });
    finish(ctx, outcome)
}

fn print_merge_summary(run_id: &str, summary: &MergeSummary) {
    println!();
    println!("{}", style::header("Merge summary"));
    println!("  {}", style::dim(&format!("run {}", run_id)));
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["", "Count"]);
    for (label, value) in [
        ("Plans", summary.plans as u64),
        ("Plans skipped (canonical missing)", summary.plans_skipped as u64),
        ("Pairs", summary.pairs as u64),
        ("Identities merged", summary.identities_merged as u64),
        ("Pairs partially failed", summary.pairs_partially_failed as u64),
        ("Delete failures", summary.delete_failures as u64),
        ("Identities deleted", summary.identities_deleted),
        ("Pairs already merged", summary.pairs_already_deleted as u64),
        ("Adapter calls skipped", summary.adapter_calls_skipped as u64),
        ("Records reassigned", summary.records_reassigned),
    ] {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    println!("{}", table);
    println!();

    if summary.dry_run {
        println!("{}", style::dim("Dry run: no adapter was invoked"));
    } else if summary.is_clean() {
        println!("{}", style::success(&summary.to_string()));
    } else {
        println!("{}", style::warn(&summary.to_string()));
        println!(
            "  {}",
            style::dim("Run 'usermerge outcomes' to list failures, then re-run merge to retry them")
        );
    }
}

fn cmd_outcomes(db: &Database, limit: u32) -> Result<()> {
    if let Some(run) = db
        .get_latest_merge_run()
        .context("failed to read latest merge run")?
    {
        println!(
            "Latest run {} ({}): {} plans, started {}, {}",
            run.id,
            run.source,
            run.plan_count,
            run.started_at,
            run.status
        );
        println!();
    }

    let failures = db
        .list_outstanding_failures(limit)
        .context("failed to list outstanding failures")?;
    if failures.is_empty() {
        println!("{}", style::success("No outstanding failures."));
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Email", "Main", "Other", "Collection", "Error", "Recorded"]);
    for entry in &failures {
        table.add_row(vec![
            Cell::new(&entry.email),
            Cell::new(&entry.main_id),
            Cell::new(&entry.other_id),
            Cell::new(&entry.collection).fg(comfy_table::Color::Red),
            Cell::new(truncate(entry.error.as_deref().unwrap_or("-"), 60)),
            Cell::new(&entry.recorded_at),
        ]);
    }
    println!("{}", table);
    println!();
    println!("{} outstanding failure(s) shown", failures.len());
    Ok(())
}

fn cmd_audit(db: &Database, limit: u32) -> Result<()> {
    let entries = db
        .list_audit_log(limit)
        .context("failed to list audit entries")?;

    if entries.is_empty() {
        println!("No audit log entries found.");
        return Ok(());
    }

    println!("{:<27} {:<10} {:<6} DETAILS", "TIMESTAMP", "ACTION", "OK");
    println!("{}", "-".repeat(90));

    for entry in &entries {
        println!(
            "{:<27} {:<10} {:<6} {}",
            entry.created_at,
            entry.action,
            if entry.success { "yes" } else { "no" },
            truncate(entry.details.as_deref().unwrap_or(""), 50),
        );
    }

    println!();
    println!("{} entries shown", entries.len());

    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# usermerge configuration

[run]
log_level = "info"
data_dir = "./usermerge-data"
# log_dir = "./usermerge-logs"

[store]
path = "./store.db"
# path_env = "USERMERGE_STORE"
page_size = 200

[reports]
duplicates = "duplicateEmails.csv"
no_email = "usersWithoutEmail.csv"

# [dashboards]
# url = "https://api.example.com"
# token_env = "DASHBOARD_TOKEN"

[[cleanup.rules]]
provider = "google-plus"

[[cleanup.rules]]
provider = "local"
missing_email = true

# Dependent collections default to the standard eight. To override, list
# every collection explicitly, in execution order:
#
# [[collections]]
# name = "datasets"
# label = "Datasets"
# table = "datasets"
# owner_field = "user_id"
# kind = "foreign_key"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Point [store] path at the record store");
    println!(
        "  2. Validate with: usermerge validate --config {}",
        output.display()
    );
    println!(
        "  3. Analyze with: usermerge analyze --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    let store_path = config.store_path()?;
    println!();
    println!("Configuration summary:");
    println!("  Record store   : {}", store_path.display());
    println!(
        "  Store exists   : {}",
        if store_path.exists() { "yes" } else { "NO" }
    );
    println!("  Data directory : {}", config.run.data_dir.display());
    println!("  Page size      : {}", config.store.page_size);
    match config.dashboards {
        Some(ref d) => println!(
            "  Dashboards     : {} (token {})",
            d.url,
            if d.token.is_some() { "set" } else { "NOT SET" }
        ),
        None => println!("  Dashboards     : not configured"),
    }
    println!("  Cleanup rules  : {}", config.cleanup.rules.len());
    let collections: Vec<String> = config
        .collection_configs()
        .into_iter()
        .map(|c| c.name)
        .collect();
    println!("  Collections    : {}", collections.join(", "));
    println!();
    println!("Configuration is valid.");

    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer message", 8), "a lon...");
    }

    #[test]
    fn test_default_config_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usermerge.toml");
        cmd_init(&path).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.cleanup.rules.len(), 2);
        assert_eq!(config.collection_configs().len(), 8);
        assert!(cmd_init(&path).is_err());
    }

    #[test]
    fn test_cli_parses_merge_flags() {
        let cli = Cli::try_parse_from(["usermerge", "merge", "--from-store", "--dry-run"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Merge {
                from_store: true,
                dry_run: true,
                plan: None
            }
        ));
        assert!(
            Cli::try_parse_from(["usermerge", "merge", "--from-store", "--plan", "x.csv"]).is_err()
        );
    }
}
