use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use taudac_build::config::{EmailConfig, RunConfig};
use taudac_build::error::{Error, Result};
use taudac_build::feed::CommitFeed;
use taudac_build::git::GitCli;
use taudac_build::notify::{ConsoleNotifier, EmailNotifier, Notify};
use taudac_build::pipeline::{BuildOrchestrator, RunOutcome};
use taudac_build::prompt::ConsolePrompt;
use taudac_build::resolver::{self, PendingBuild};
use taudac_build::runlog::RunLog;
use taudac_build::runner::CommandRunner;
use taudac_build::steps::{MakeBuilder, ScriptFetcher};
use taudac_build::targets;
use taudac_build::version::KernelVersion;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Answer yes to every confirmation prompt
    #[arg(short = 'y', long = "yes")]
    assume_yes: bool,

    /// Print external commands instead of running them
    #[arg(long)]
    dry_run: bool,

    /// Downstream modules working tree
    #[arg(long, default_value = "../modules")]
    modules_dir: PathBuf,

    /// TauDAC driver source directory handed to make -C
    #[arg(long, default_value = "../taudac-driver-dkms/src")]
    driver_dir: PathBuf,

    /// Script that fetches kernel sources for an upstream commit
    #[arg(long, default_value = "./get-rpi-kernel-sources.sh")]
    fetch_script: PathBuf,

    /// Mirror all output to this file (must not exist yet)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Build at most this many pending versions (oldest first)
    #[arg(short = 'm', long)]
    max_versions: Option<usize>,

    /// Baseline kernel version, skipping detection from the modules feed
    #[arg(short = 'k', long = "kernel")]
    kernel: Option<KernelVersion>,

    /// Extra make argument forwarded verbatim (repeatable)
    #[arg(long = "make-arg")]
    make_args: Vec<String>,

    /// Do not tag the release commits
    #[arg(long)]
    no_tags: bool,

    /// TOML file overriding the built-in target table
    #[arg(long)]
    targets: Option<PathBuf>,

    /// Abort the upstream walk after this many commits
    #[arg(long, default_value_t = 200)]
    scan_limit: usize,

    /// Per-push timeout in seconds
    #[arg(long, default_value_t = 60)]
    push_timeout: u64,

    /// Bearer token for the commit feeds (defaults to GITHUB_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Upstream firmware repository, owner/repo
    #[arg(long, default_value = "raspberrypi/rpi-firmware")]
    upstream: String,

    /// Downstream modules repository, owner/repo
    #[arg(long, default_value = "taudac/modules")]
    modules_repo: String,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Run the build and additionally report outcomes by email
    Email {
        /// Recipient address
        #[arg(long)]
        to: String,
        /// Sender address
        #[arg(long)]
        from: String,
        /// SMTP relay host
        #[arg(long)]
        host: String,
        /// SMTP relay port
        #[arg(long)]
        port: u16,
        /// SMTP user name
        #[arg(long)]
        user: String,
        /// SMTP password
        #[arg(long)]
        password: String,
    },
    /// Resolve pending kernel versions and print them, building nothing
    Check,
    /// List recent commits from the upstream firmware feed
    Commits {
        /// Number of commits to list
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Some(Cmd::Commits { count }) => report(cmd_commits(&args, count)),
        Some(Cmd::Check) => report(cmd_check(&args)),
        Some(Cmd::Email {
            ref to,
            ref from,
            ref host,
            port,
            ref user,
            ref password,
        }) => {
            let email = EmailConfig {
                to: to.clone(),
                from: from.clone(),
                host: host.clone(),
                port,
                user: user.clone(),
                password: password.clone(),
            };
            cmd_build(&args, Some(email))
        }
        None => cmd_build(&args, None),
    }
}

fn report(res: Result<()>) -> ExitCode {
    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run_config(args: &Args) -> RunConfig {
    RunConfig {
        assume_yes: args.assume_yes,
        dry_run: args.dry_run,
        modules_dir: args.modules_dir.clone(),
        driver_dir: args.driver_dir.clone(),
        fetch_script: args.fetch_script.clone(),
        log_file: args.log_file.clone(),
        max_versions: args.max_versions,
        baseline_override: args.kernel.clone(),
        make_args: args.make_args.clone(),
        tags: !args.no_tags,
        scan_limit: args.scan_limit,
        push_timeout: Duration::from_secs(args.push_timeout),
    }
}

fn split_repo(slug: &str) -> Result<(&str, &str)> {
    slug.split_once('/')
        .filter(|(owner, repo)| !owner.is_empty() && !repo.is_empty())
        .ok_or_else(|| Error::Config(format!("repository '{slug}' is not of the form owner/repo")))
}

/// Determine the baseline and the ordered pending list from the two feeds.
fn resolve_pending(args: &Args, cfg: &RunConfig) -> Result<(KernelVersion, Vec<PendingBuild>)> {
    let (up_owner, up_repo) = split_repo(&args.upstream)?;
    let upstream = CommitFeed::new(up_owner, up_repo, args.token.clone())?;

    let baseline = match &cfg.baseline_override {
        Some(v) => resolver::baseline(Some(v), &[])?,
        None => {
            let (dn_owner, dn_repo) = split_repo(&args.modules_repo)?;
            let downstream = CommitFeed::new(dn_owner, dn_repo, args.token.clone())?;
            let recent = downstream.page(resolver::BASELINE_WINDOW, "HEAD")?;
            resolver::baseline(None, &recent)?
        }
    };
    tracing::info!(%baseline, "latest supported kernel");

    let pending = resolver::pending(upstream.walk(cfg.scan_limit), &baseline, cfg.max_versions)?;
    Ok((baseline, pending))
}

fn cmd_commits(args: &Args, count: usize) -> Result<()> {
    let (owner, repo) = split_repo(&args.upstream)?;
    let feed = CommitFeed::new(owner, repo, args.token.clone())?;
    for commit in feed.page(count, "HEAD")? {
        println!("{} {}", commit.short_hash, commit.summary);
    }
    Ok(())
}

fn cmd_check(args: &Args) -> Result<()> {
    let cfg = run_config(args);
    let (baseline, pending) = resolve_pending(args, &cfg)?;
    if pending.is_empty() {
        println!("Up to date; latest supported kernel is {baseline}");
        return Ok(());
    }
    println!("Pending kernel versions (baseline {baseline}):");
    for p in &pending {
        println!("  {} (commit {})", p.version, p.commit);
    }
    Ok(())
}

fn cmd_build(args: &Args, email: Option<EmailConfig>) -> ExitCode {
    let cfg = run_config(args);
    let notifier: Box<dyn Notify> = match email {
        Some(e) => Box::new(EmailNotifier::new(e, cfg.log_file.clone())),
        None => Box::new(ConsoleNotifier),
    };

    match build_run(args, &cfg, notifier.as_ref()) {
        Ok(built) => {
            if built.is_empty() {
                tracing::info!("nothing to build");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            notifier.run_failed(&e);
            ExitCode::FAILURE
        }
    }
}

fn build_run(args: &Args, cfg: &RunConfig, notify: &dyn Notify) -> Result<Vec<KernelVersion>> {
    let log = Arc::new(match &cfg.log_file {
        Some(path) => RunLog::with_file(path)?,
        None => RunLog::console_only(),
    });

    let (_, pending) = resolve_pending(args, cfg)?;
    if pending.is_empty() {
        log.line("Up to date with the latest upstream kernel");
        return Ok(Vec::new());
    }
    for p in &pending {
        log.line(&format!("New kernel available: {} ({})", p.version, p.commit));
    }

    let target_table = match &args.targets {
        Some(path) => targets::load_targets(path)?,
        None => targets::builtin_targets(),
    };

    let runner = CommandRunner::new(Arc::clone(&log), cfg.dry_run);
    let fetcher = ScriptFetcher::new(&cfg.fetch_script, &runner);
    let builder = MakeBuilder::new(
        &cfg.driver_dir,
        cfg.make_args.clone(),
        targets::host_arch_class(),
        &runner,
    );
    let vcs = GitCli::new(&cfg.modules_dir, &runner);
    let prompt = ConsolePrompt::new(cfg.assume_yes);

    let orchestrator = BuildOrchestrator {
        cfg,
        targets: &target_table,
        fetcher: &fetcher,
        builder: &builder,
        vcs: &vcs,
        confirm: &prompt,
        notify,
    };
    match orchestrator.run(&pending) {
        RunOutcome::Success { built } => Ok(built),
        RunOutcome::Failure { error, built } => {
            if !built.is_empty() {
                tracing::warn!(
                    "{} version(s) were committed before the failure; rerun \
                     after fixing to pick up the rest",
                    built.len()
                );
            }
            Err(error)
        }
    }
}
