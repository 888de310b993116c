//! Automated test-and-repair orchestrator.
//!
//! Runs scenario test cases against an agent under test, writes run reports
//! under the reports directory, and optionally loops through external
//! reviewer, decision and fixer agents until the decision agent halts or the
//! run ceiling is reached.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use orchestrator::core::controller::StagePolicy;
use orchestrator::exit_codes;
use orchestrator::io::agent::ScriptAgent;
use orchestrator::io::collaborators::ClaudeCollaborators;
use orchestrator::io::config::{
    DEFAULT_CONFIG_FILE, OrchestratorConfig, load_config, write_config,
};
use orchestrator::io::executor::Grader;
use orchestrator::io::git::head_short_sha;
use orchestrator::io::scenarios::load_groups;
use orchestrator::logging;
use orchestrator::looping::{SessionSettings, run_session};
use orchestrator::session::Session;
use orchestrator::suite::Console;

#[derive(Parser)]
#[command(
    name = "orchestrator",
    version,
    about = "Automated test-and-repair orchestrator for command-generating agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the test suite, then review, decide and fix until halted.
    Run(RunArgs),
    /// List scenario groups with their test counts.
    List {
        /// Config file (defaults apply when missing).
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Config file (defaults apply when missing).
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Parallel workers per run (overrides config).
    #[arg(short = 'j', long)]
    workers: Option<usize>,
    /// Maximum RUN passes in this session (overrides config).
    #[arg(long)]
    max_iterations: Option<u32>,
    /// Skip the reviewer; also skips the decision and fixer agents.
    #[arg(long)]
    no_review: bool,
    /// Skip the decision agent; also skips the fixer agent.
    #[arg(long, alias = "no-pm")]
    no_decision: bool,
    /// Skip the fixer agent; RERUN decisions repeat the run unchanged.
    #[arg(long, alias = "no-dev")]
    no_fix: bool,
    /// Stream reviewer and fixer output instead of capturing it.
    #[arg(short, long)]
    verbose: bool,
}

impl RunArgs {
    fn policy(&self) -> StagePolicy {
        StagePolicy::new(!self.no_review, !self.no_decision, !self.no_fix)
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(&args),
        Command::List { config } => cmd_list(&config),
        Command::Init { force, config } => cmd_init(&config, force),
    }
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let mut config = load_config(&args.config)?;
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }
    config.validate().context("invalid command-line override")?;

    let workdir = std::env::current_dir().context("resolve working directory")?;
    let agent = ScriptAgent::new(&config.agent, workdir.clone(), config.output_limit_bytes)?;
    let collaborators = ClaudeCollaborators::new(
        config.collaborators.clone(),
        workdir.clone(),
        config.output_limit_bytes,
    );
    let grader = Grader::new(&config.rules);
    let mut session = Session::start(&config.reports_dir, head_short_sha(&workdir), args.verbose)?;

    let outcome = run_session(
        &SessionSettings::from_config(&config, args.policy()),
        &mut session,
        &agent,
        &grader,
        &collaborators,
        &Console::stdout(),
    )?;
    Ok(outcome.exit_code())
}

fn cmd_list(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let groups = load_groups(&config.scenarios_dir, &config.scenario_suffix)?;
    let mut total = 0;
    for group in &groups {
        total += group.cases.len();
        println!("{}: {} tests", group.name, group.cases.len());
        for malformed in &group.malformed {
            println!("  skipped {malformed}");
        }
    }
    println!("{} groups, {total} tests", groups.len());
    Ok(exit_codes::OK)
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &OrchestratorConfig::default())?;
    println!("Wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["orchestrator", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false, .. }));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["orchestrator", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true, .. }));
    }

    #[test]
    fn parse_run_defaults_enable_every_stage() {
        let cli = Cli::parse_from(["orchestrator", "run"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert_eq!(args.workers, None);
        assert_eq!(args.policy(), StagePolicy::all());
    }

    #[test]
    fn legacy_stage_flags_are_aliases() {
        let cli = Cli::parse_from(["orchestrator", "run", "--no-pm", "-j", "3", "--verbose"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.no_decision);
        assert_eq!(args.workers, Some(3));
        assert!(args.verbose);
        let policy = args.policy();
        assert!(policy.review());
        assert!(!policy.decide());
        assert!(!policy.fix());

        let cli = Cli::parse_from(["orchestrator", "run", "--no-dev"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.no_fix);
        assert_eq!(args.policy(), StagePolicy::new(true, true, false));
    }

    #[test]
    fn no_review_disables_downstream_stages() {
        let cli = Cli::parse_from(["orchestrator", "run", "--no-review"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.policy(), StagePolicy::new(false, false, false));
    }
}
