use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use blindjudge_core::{
    collate, group_by_prompt, parse_records, records_to_json, validate_records, AnswerRecord,
    JudgmentRecord, PromptAnswers,
};
use blindjudge_runtime::{
    judge_all, replay_failures, BackendRegistry, HintMode, JudgeAllOptions, JudgeRoster,
    JudgingConfig, ProgressEvent, ProgressSink, UsageSummary,
};

#[derive(Parser)]
#[command(name = "blindjudge", version, about = "Blind multi-judge evaluation of model answers")]
struct Cli {
    /// Debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Judge every prompt's answers with every configured judge
    Judge(JudgeArgs),

    /// Re-run the failed entries of a judgments file
    Rejudge(RejudgeArgs),

    /// Merge regenerated judgments into a judgments file
    Collate(CollateArgs),

    /// Check a judgments file against the record schema
    Validate {
        /// Judgments file to check
        path: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Answers file (JSON array of answer records)
    #[arg(long)]
    answers: PathBuf,

    /// Override `judging.workers`
    #[arg(long)]
    workers: Option<usize>,

    /// Override `judging.retries`
    #[arg(long)]
    retries: Option<u32>,

    /// Override `judging.retry_delay` (e.g. "500ms", "2s")
    #[arg(long, value_parser = humantime_duration)]
    retry_delay: Option<Duration>,
}

#[derive(Args)]
struct JudgeArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Output path; defaults to judgments_<timestamp>.json
    #[arg(long)]
    output: Option<PathBuf>,

    /// Judge ids to use instead of the configured roster
    #[arg(long, num_args = 1..)]
    judges: Option<Vec<String>>,

    /// Only judge the first N prompts
    #[arg(long)]
    limit: Option<usize>,

    /// Override `judging.shuffle_seed`
    #[arg(long)]
    seed: Option<u64>,

    /// Override `judging.hint_mode` (none, self, competitors, full)
    #[arg(long, value_parser = hint_mode)]
    hint_mode: Option<HintMode>,
}

#[derive(Args)]
struct RejudgeArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Judgments file to repair
    #[arg(long)]
    judgments: PathBuf,

    /// Output path; defaults to overwriting --judgments
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct CollateArgs {
    /// Judgments file with failed entries
    #[arg(long)]
    judgments: PathBuf,

    /// Regenerated judgments
    #[arg(long)]
    regenerated: PathBuf,

    /// Output path (required unless --inplace)
    #[arg(long, required_unless_present = "inplace", conflicts_with = "inplace")]
    out: Option<PathBuf>,

    /// Overwrite --judgments, keeping a .bak copy
    #[arg(long)]
    inplace: bool,

    /// Append regenerated successes missing from --judgments
    #[arg(long)]
    add_missing: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Judge(args) => judge(args).await,
        Command::Rejudge(args) => rejudge(args).await,
        Command::Collate(args) => collate_files(args),
        Command::Validate { path } => validate(&path),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn judge(args: JudgeArgs) -> Result<()> {
    let config = load_config(&args.run.config, |config| args.apply(config))?;

    let mut batch = load_answers(&args.run.answers)?;
    if let Some(limit) = args.limit {
        batch.truncate(limit);
        info!(prompts = batch.len(), "Limited prompt set");
    }

    let roster = JudgeRoster::from_config(&config, &BackendRegistry::with_defaults())
        .context("Failed to set up judges")?;
    info!(judges = ?roster.ids(), prompts = batch.len(), "Judging");

    let report = judge_all(
        &batch,
        &roster,
        JudgeAllOptions::from(&config.judging),
        Some(progress_logger()),
    )
    .await;

    let records: Vec<JudgmentRecord> = report.outcomes.iter().map(JudgmentRecord::from).collect();
    let output = args.output.unwrap_or_else(default_output_path);
    write_records(&output, &records)?;

    print_summary(&records, &report.usage);
    info!(path = %output.display(), records = records.len(), "Judgments saved");
    Ok(())
}

async fn rejudge(args: RejudgeArgs) -> Result<()> {
    let config = load_config(&args.run.config, |config| args.run.apply(config))?;
    let batch = load_answers(&args.run.answers)?;
    let records = read_records(&args.judgments)?;

    let failed = records.iter().filter(|r| r.has_error()).count();
    if failed == 0 {
        info!("No failed judgments found, nothing to do");
        return Ok(());
    }
    info!(failed, "Regenerating failed judgments");

    let roster = JudgeRoster::from_config(&config, &BackendRegistry::with_defaults())
        .context("Failed to set up judges")?;
    let report = replay_failures(
        records,
        &batch,
        &roster,
        JudgeAllOptions::from(&config.judging),
        Some(progress_logger()),
    )
    .await;

    let output = args.output.unwrap_or(args.judgments);
    write_records(&output, &report.records)?;

    info!(
        replayed = report.replayed,
        recovered = report.recovered,
        skipped = report.skipped,
        tokens = report.usage.total.total_tokens(),
        path = %output.display(),
        "Rejudge complete"
    );
    Ok(())
}

fn collate_files(args: CollateArgs) -> Result<()> {
    let base = read_records(&args.judgments)?;
    let regenerated = read_records(&args.regenerated)?;

    let report = collate(base, &regenerated, args.add_missing);

    let output = match args.out {
        Some(path) => path,
        None => {
            let backup = backup_path(&args.judgments);
            fs::copy(&args.judgments, &backup)
                .with_context(|| format!("Failed to back up {}", args.judgments.display()))?;
            info!(path = %backup.display(), "Backup written");
            args.judgments
        }
    };
    write_records(&output, &report.records)?;

    println!("Wrote:            {}", output.display());
    println!("Replaced:         {}", report.replaced);
    println!("Kept ok:          {}", report.kept_ok);
    println!("No regen match:   {}", report.no_regen_match);
    println!("Regen still bad:  {}", report.regen_still_bad);
    if args.add_missing {
        println!("Added missing:    {}", report.added);
    }
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;

    let issues = validate_records(&value)?;
    if issues.is_empty() {
        println!("{}: all records valid", path.display());
        return Ok(());
    }

    for issue in &issues {
        for error in &issue.errors {
            println!("record {}: {}", issue.index, error);
        }
    }
    bail!("{} invalid record(s) in {}", issues.len(), path.display())
}

impl RunArgs {
    fn apply(&self, config: &mut JudgingConfig) {
        let settings = &mut config.judging;
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(retries) = self.retries {
            settings.retries = retries;
        }
        if let Some(delay) = self.retry_delay {
            settings.retry_delay = delay;
        }
    }
}

impl JudgeArgs {
    fn apply(&self, config: &mut JudgingConfig) {
        self.run.apply(config);
        if let Some(judges) = &self.judges {
            config.judges.primary = judges.clone();
            config.judges.additional.clear();
        }
        if let Some(seed) = self.seed {
            config.judging.shuffle_seed = Some(seed);
        }
        if let Some(mode) = self.hint_mode {
            config.judging.hint_mode = mode;
        }
    }
}

/// Read the config, apply command-line overrides, then validate once.
fn load_config(path: &Path, overrides: impl FnOnce(&mut JudgingConfig)) -> Result<JudgingConfig> {
    let config = JudgingConfig::read_yaml_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    checked_config(config, overrides)
}

fn checked_config(
    mut config: JudgingConfig,
    overrides: impl FnOnce(&mut JudgingConfig),
) -> Result<JudgingConfig> {
    overrides(&mut config);
    config.validate().context("Invalid judging configuration")?;
    Ok(config)
}

/// `out.jsonl` is backed up as `out.jsonl.bak`.
fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

fn load_answers(path: &Path) -> Result<Vec<PromptAnswers>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let records: Vec<AnswerRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid answers file {}", path.display()))?;
    let batch = group_by_prompt(&records);
    info!(answers = records.len(), prompts = batch.len(), "Loaded answers");
    Ok(batch)
}

fn read_records(path: &Path) -> Result<Vec<JudgmentRecord>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    parse_records(&content).with_context(|| format!("Invalid judgments file {}", path.display()))
}

fn write_records(path: &Path, records: &[JudgmentRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = records_to_json(records)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

fn default_output_path() -> PathBuf {
    PathBuf::from(format!(
        "judgments_{}.json",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ))
}

fn progress_logger() -> ProgressSink {
    Arc::new(|event: ProgressEvent| {
        if event.done == event.total || event.done % 10 == 0 {
            info!(
                done = event.done,
                total = event.total,
                failed = event.failed,
                "Progress"
            );
        }
    })
}

fn print_summary(records: &[JudgmentRecord], usage: &UsageSummary) {
    let mut by_judge = std::collections::BTreeMap::<&str, (usize, usize)>::new();
    for record in records {
        let entry = by_judge.entry(record.judge_model.as_str()).or_default();
        entry.0 += 1;
        if record.has_error() {
            entry.1 += 1;
        }
    }

    println!("Judgments by judge:");
    for (judge, (total, errors)) in &by_judge {
        let tokens = usage
            .per_judge
            .get(*judge)
            .map(|u| u.total_tokens())
            .unwrap_or(0);
        println!("  {judge}: {total} ({errors} errors, {tokens} tokens)");
    }
    let errors: usize = by_judge.values().map(|(_, e)| e).sum();
    println!("Total: {} judgments, {} errors", records.len(), errors);
}

fn humantime_duration(text: &str) -> Result<Duration, String> {
    humantime::parse_duration(text).map_err(|e| e.to_string())
}

fn hint_mode(text: &str) -> Result<HintMode, String> {
    serde_json::from_value(serde_json::Value::String(text.to_string()))
        .map_err(|_| format!("unknown hint mode '{}' (none, self, competitors, full)", text))
}
