use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, CommandFactory, Parser, Subcommand};
use secretaribot_core::client::{Contribution, MediaWikiClient, WikiUser};
use secretaribot_core::config::{WikiConfig, credentials_from_env, load_config};
use secretaribot_core::meeting::{MeetingOptions, run_next_meeting};
use secretaribot_core::merge::{MergeOptions, run_merge_blocked};
use secretaribot_core::probe::HttpProbe;
use secretaribot_core::readme::{ReadmeOptions, run_publish_readme};
use secretaribot_core::runtime::{PathOverrides, ResolutionContext, ResolvedPaths, resolve_paths};
use secretaribot_core::spam::{DespamOptions, SpamJudge, SpamVerdict, run_despam};
use secretaribot_core::watch::{WatchOptions, run_watch};
use secretaribot_core::wikitable::WikiTable;
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(
    name = "secretaribot",
    version,
    about = "Wiki housekeeping jobs: link watching, meeting notes, README, spam cleanup"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Probe every URL on the watchlist page and record changes")]
    Watch(WatchArgs),
    #[command(name = "next-meeting", about = "Create next week's meeting notes page")]
    NextMeeting(NextMeetingArgs),
    #[command(about = "Rebuild README.md and publish it to the wiki")]
    Readme(DryRunArgs),
    #[command(about = "Review new users and clean up spam accounts")]
    Despam(UserWalkArgs),
    #[command(name = "merge-blocked", about = "Merge blocked users into the sink account")]
    MergeBlocked(UserWalkArgs),
    #[command(about = "Decode a local wiki table file")]
    Table(TableArgs),
}

#[derive(Debug, Args)]
struct WatchArgs {
    #[arg(long, value_name = "TITLE", help = "Watchlist page (default from config)")]
    page: Option<String>,
    #[arg(long, help = "Report changes without writing to the wiki")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct NextMeetingArgs {
    #[arg(long, value_name = "YYYY-MM-DD", help = "Pretend today is this date")]
    date: Option<NaiveDate>,
    #[arg(long, help = "Report the page without creating it")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DryRunArgs {
    #[arg(long, help = "Do everything except the wiki write")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct UserWalkArgs {
    #[arg(help = "Start with users registered after this one")]
    user: Option<String>,
    #[arg(long, help = "Report what would happen without writing to the wiki")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct TableArgs {
    path: PathBuf,
    #[arg(long, help = "Print re-encoded markup instead of JSON")]
    normalize: bool,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Watch(args)) => run_watch_command(&runtime, args),
        Some(Commands::NextMeeting(args)) => run_next_meeting_command(&runtime, args),
        Some(Commands::Readme(args)) => run_readme_command(&runtime, args),
        Some(Commands::Despam(args)) => run_despam_command(&runtime, args),
        Some(Commands::MergeBlocked(args)) => run_merge_command(&runtime, args),
        Some(Commands::Table(args)) => run_table_command(args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run_watch_command(runtime: &RuntimeOptions, args: WatchArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let mut api = MediaWikiClient::from_config(&config)?;
    let mut probe = HttpProbe::new(&config.user_agent(), None)?;
    let options = WatchOptions {
        page: args
            .page
            .unwrap_or_else(|| config.watchlist_page().to_string()),
        summary: config.watch_summary().to_string(),
        dry_run: args.dry_run,
    };
    let credentials = credentials_from_env();
    let report = run_watch(&mut api, &mut probe, &options, borrow_credentials(&credentials))?;

    println!("watch");
    println!("page: {}", report.page);
    println!("rows: {}", report.rows);
    println!("probed: {}", report.probed);
    println!("failures: {}", report.failures.len());
    for failure in &report.failures {
        println!("  - {}: {}", failure.url, failure.error);
    }
    println!("changed: {}", format_flag(report.changed));
    println!("written: {}", format_flag(report.written));
    println!("dry_run: {}", format_flag(report.dry_run));
    if let Some(diff) = &report.diff {
        println!("diff:\n{diff}");
    }
    println!("requests: {}", report.request_count);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_next_meeting_command(runtime: &RuntimeOptions, args: NextMeetingArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let mut api = MediaWikiClient::from_config(&config)?;
    let options = MeetingOptions {
        template_page: config.meeting_template().to_string(),
        page_prefix: config.meeting_prefix().to_string(),
        organization: config.organization().to_string(),
        weekday: config.meeting_weekday()?,
        bot_name: config.bot_name().to_string(),
        dry_run: args.dry_run,
    };
    let today = args.date.unwrap_or_else(|| Local::now().date_naive());
    let credentials = credentials_from_env();
    let report = run_next_meeting(&mut api, &options, today, borrow_credentials(&credentials))?;

    println!("next meeting");
    println!("last_page: {}", report.last_page);
    println!("next_page: {}", report.next_page);
    println!("ordinal: {}", report.ordinal);
    println!("action: {}", serde_json::to_value(&report.action)?.as_str().unwrap_or("unknown"));
    println!("requests: {}", report.request_count);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_readme_command(runtime: &RuntimeOptions, args: DryRunArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let mut api = MediaWikiClient::from_config(&config)?;
    let options = ReadmeOptions {
        intro_path: config.readme_intro(&paths.project_root),
        sources_dir: config.readme_sources(&paths.project_root),
        output_path: config.readme_output(&paths.project_root),
        pandoc: config.pandoc(),
        page: config.readme_page().to_string(),
        summary: config.readme_summary().to_string(),
        dry_run: args.dry_run,
    };
    let credentials = credentials_from_env();
    let report = run_publish_readme(&mut api, &options, borrow_credentials(&credentials))?;

    println!("readme");
    println!("output: {}", report.output_path);
    println!("sections: {}", report.sections);
    println!("markdown_bytes: {}", report.markdown_bytes);
    println!("wikitext_bytes: {}", report.wikitext_bytes);
    println!("page: {}", report.page);
    println!("published: {}", format_flag(report.published));
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_despam_command(runtime: &RuntimeOptions, args: UserWalkArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let mut api = MediaWikiClient::from_config(&config)?;
    let options = DespamOptions {
        start_user: args.user,
        default_start_user: config.spam_start_user().to_string(),
        cursor_path: paths.last_spammer_path(),
        user_limit: config.spam_user_limit(),
        bot_name: config.bot_name().to_string(),
        dry_run: args.dry_run,
    };
    let credentials = credentials_from_env();
    let mut judge = StdinJudge;
    let report = run_despam(&mut api, &mut judge, &options, borrow_credentials(&credentials))?;

    println!("despam");
    println!("start_user: {}", report.start_user);
    println!("users: {}", report.users.len());
    for outcome in &report.users {
        if matches!(
            outcome.verdict,
            SpamVerdict::Despammed | SpamVerdict::WouldDespam
        ) {
            println!(
                "  - {} ({} pages){}",
                outcome.user,
                outcome.deleted_pages.len(),
                if report.dry_run { " [dry run]" } else { "" }
            );
        }
    }
    println!("despammed: {}", report.despammed);
    println!("requests: {}", report.request_count);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_merge_command(runtime: &RuntimeOptions, args: UserWalkArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let mut api = MediaWikiClient::from_config(&config)?;
    let options = MergeOptions {
        start_user: args.user,
        sink_account: config.sink_account().to_string(),
        user_limit: config.merge_user_limit(),
        dry_run: args.dry_run,
    };
    let credentials = credentials_from_env();
    let report = run_merge_blocked(&mut api, &options, borrow_credentials(&credentials))?;

    println!("merge blocked");
    println!("start_user: {}", report.start_user);
    println!("sink: {}", report.sink_account);
    println!("examined: {}", report.examined);
    for merged in &report.merged {
        println!(
            "  - {}: {}",
            merged.user,
            serde_json::to_value(&merged.action)?
                .as_str()
                .unwrap_or("unknown")
        );
    }
    println!("requests: {}", report.request_count);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_table_command(args: TableArgs) -> Result<()> {
    let markup = fs::read_to_string(&args.path)
        .with_context(|| format!("failed to read {}", normalize_path(&args.path)))?;
    let table = WikiTable::decode(&markup)
        .with_context(|| format!("failed to decode {}", normalize_path(&args.path)))?;
    if args.normalize {
        println!("{table}");
        return Ok(());
    }
    let payload = json!({
        "header": table.header(),
        "fields": table.fields(),
        "labels": table.labels(),
        "rows": table.rows(),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

/// Asks on the terminal. Only `y` or `Y` counts as spam.
struct StdinJudge;

impl SpamJudge for StdinJudge {
    fn is_spam(&mut self, user: &WikiUser, last_edit: &Contribution) -> Result<bool> {
        println!();
        println!("user: {}", user.name);
        println!("last_edit.page: {}", last_edit.title);
        println!("last_edit.time: {}", last_edit.timestamp);
        if !last_edit.comment.is_empty() {
            println!("last_edit.comment: {}", last_edit.comment);
        }
        print!("Spam? [y/N] ");
        io::stdout().flush().context("failed to flush stdout")?;

        let mut answer = String::new();
        io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("failed to read answer")?;
        Ok(matches!(answer.trim(), "y" | "Y"))
    }
}

fn load_runtime(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, WikiConfig)> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    Ok((paths, config))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn borrow_credentials(credentials: &Option<(String, String)>) -> Option<(&str, &str)> {
    credentials
        .as_ref()
        .map(|(username, password)| (username.as_str(), password.as_str()))
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
