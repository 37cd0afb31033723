//! CLI for coverage-guided block exploration.
//!
//! The analyzed "binary" is a program model: a JSON control-flow graph
//! with byte-guarded edges (see `demos/`).
//!
//! # Usage
//!
//! ```bash
//! # Bootstrap, then explore uncovered blocks (resumes if the state file exists)
//! symcov run --binary demos/check_input.json
//!
//! # Restrict to one function, write test cases and a coverage graph
//! symcov run --binary demos/check_input.json --function check --output out/ --dot out/cfg.dot
//!
//! # Summarize saved coverage
//! symcov report --binary demos/check_input.json --state coverage_state.json
//!
//! # Emit a DOT coverage graph
//! symcov graph --binary demos/check_input.json --output cfg.dot
//! ```
//!
//! # Coverage state
//!
//! Coverage is saved to `--state` after every round together with the
//! SHA-256 of the binary. A state file recorded for a different binary is
//! rejected rather than merged.

use clap::{Parser, Subcommand};
use snafu::Snafu;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use symcov_engine::{
    BinaryImage, BlockUniverse, CfgRecovery, ControlFlow, DotRenderer, EngineError, ModelEngine,
    ModelRecovery, RecoveryOptions, Visualizer,
};
use symcov_explore::controller::{Controller, ControllerConfig, ExploreError};
use symcov_explore::report::{
    format_coverage_report, format_exploration_report, DEFAULT_SAMPLE_UNCOVERED, DEFAULT_TOP_HIT,
};
use symcov_explore::selector::SelectionPolicy;
use symcov_explore::session::CoverageSession;

/// CLI errors for the symcov binary.
#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("{source}"), context(false))]
    Explore { source: ExploreError },
    #[snafu(display("{source}"), context(false))]
    Engine { source: EngineError },
    #[snafu(display("I/O error: {source}"), context(false))]
    Io { source: std::io::Error },
    #[snafu(display("JSON error: {source}"), context(false))]
    Json { source: serde_json::Error },
    #[snafu(display("{message}"))]
    Other { message: String },
}

#[derive(Parser)]
#[command(name = "symcov")]
#[command(about = "Coverage-guided block exploration and test generation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Explore uncovered blocks and generate test cases.
    Run {
        /// Path to the program model.
        #[arg(short, long)]
        binary: PathBuf,

        /// Restrict exploration to one function.
        #[arg(short, long)]
        function: Option<String>,

        /// Max exploration rounds.
        #[arg(short, long, default_value = "10")]
        rounds: u64,

        /// Max targets per round.
        #[arg(short, long, default_value = "10")]
        cases: usize,

        /// Max test cases for the whole run.
        #[arg(long, default_value = "100")]
        max_cases: usize,

        /// Engine steps per target search.
        #[arg(long, default_value = "1000")]
        steps: u64,

        /// Engine steps per test case replay.
        #[arg(long, default_value = "10000")]
        replay_steps: u64,

        /// Steps for the initial untargeted pass (0 skips it).
        #[arg(long, default_value = "1000")]
        bootstrap_steps: u64,

        /// Target order: "ascending" or "fewest-attempts".
        #[arg(long, default_value = "ascending")]
        policy: SelectionPolicy,

        /// Wall-clock budget in seconds.
        #[arg(long)]
        time_budget: Option<u64>,

        /// Coverage state file (resumed if present).
        #[arg(short, long, default_value = "coverage_state.json")]
        state: PathBuf,

        /// Directory for test cases and the report.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write a DOT coverage graph here when done.
        #[arg(long)]
        dot: Option<PathBuf>,

        /// Print the final coverage summary as JSON.
        #[arg(long)]
        json: bool,

        /// Skip blocks reachable only through indirect jumps.
        #[arg(long)]
        no_indirect: bool,
    },

    /// Summarize saved coverage against a binary.
    Report {
        /// Path to the program model.
        #[arg(short, long)]
        binary: PathBuf,

        /// Coverage state file.
        #[arg(short, long, default_value = "coverage_state.json")]
        state: PathBuf,

        /// Restrict the report to one function.
        #[arg(short, long)]
        function: Option<String>,

        /// Number of most executed blocks to list.
        #[arg(long, default_value_t = DEFAULT_TOP_HIT)]
        top: usize,

        /// Number of uncovered blocks to list.
        #[arg(long, default_value_t = DEFAULT_SAMPLE_UNCOVERED)]
        sample: usize,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Write a DOT graph coloured by coverage.
    Graph {
        /// Path to the program model.
        #[arg(short, long)]
        binary: PathBuf,

        /// Coverage state file (everything uncovered if absent).
        #[arg(short, long, default_value = "coverage_state.json")]
        state: PathBuf,

        /// Restrict the graph to one function.
        #[arg(short, long)]
        function: Option<String>,

        /// Output path.
        #[arg(short, long, default_value = "cfg.dot")]
        output: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            binary,
            function,
            rounds,
            cases,
            max_cases,
            steps,
            replay_steps,
            bootstrap_steps,
            policy,
            time_budget,
            state,
            output,
            dot,
            json,
            no_indirect,
        } => {
            let config = ControllerConfig {
                max_rounds: rounds,
                cases_per_round: cases,
                max_total_cases: max_cases,
                step_budget: steps,
                replay_budget: replay_steps,
                bootstrap_budget: (bootstrap_steps > 0).then_some(bootstrap_steps),
                policy,
                time_budget: time_budget.map(Duration::from_secs),
                state_path: Some(state),
                output_dir: output,
            };
            cmd_run(binary, function, no_indirect, config, dot, json)
        }
        Commands::Report {
            binary,
            state,
            function,
            top,
            sample,
            json,
        } => cmd_report(binary, state, function, top, sample, json),
        Commands::Graph {
            binary,
            state,
            function,
            output,
        } => cmd_graph(binary, state, function, output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Load the binary, recover its control flow and pick the scope.
fn load_scope(
    binary: &Path,
    function: Option<&str>,
    options: &RecoveryOptions,
) -> Result<(BinaryImage, ControlFlow, BlockUniverse), CliError> {
    let image = BinaryImage::load(binary)?;
    let flow = ModelRecovery.recover_control_flow(&image, options)?;

    let universe = match function {
        Some(name) => flow.function_universe(name).ok_or_else(|| {
            OtherSnafu {
                message: format!(
                    "function '{}' not found (known: {})",
                    name,
                    flow.functions.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
            }
            .build()
        })?,
        None => flow.universe(),
    };
    Ok((image, flow, universe))
}

fn cmd_run(
    binary: PathBuf,
    function: Option<String>,
    no_indirect: bool,
    config: ControllerConfig,
    dot: Option<PathBuf>,
    json: bool,
) -> Result<(), CliError> {
    let options = RecoveryOptions {
        resolve_indirect_jumps: !no_indirect,
        ..RecoveryOptions::default()
    };
    let (image, flow, universe) = load_scope(&binary, function.as_deref(), &options)?;

    let state_path = config.state_path.clone().ok_or_else(|| {
        OtherSnafu {
            message: "no state path configured".to_string(),
        }
        .build()
    })?;
    let mut session = CoverageSession::open(&state_path, image.identity().clone())?;
    session.bind_universe(universe);

    eprintln!("═══════════════════════════════════════════════════════════════════════");
    eprintln!("  symcov Exploration");
    eprintln!("═══════════════════════════════════════════════════════════════════════");
    eprintln!();
    eprintln!("Configuration:");
    eprintln!("  Binary:          {}", binary.display());
    eprintln!("  Identity:        {}", image.identity().short());
    eprintln!("  Scope:           {}", function.as_deref().unwrap_or("<program>"));
    eprintln!("  Rounds:          {}", config.max_rounds);
    eprintln!("  Targets/round:   {}", config.cases_per_round);
    eprintln!("  Max cases:       {}", config.max_total_cases);
    eprintln!("  Steps/target:    {}", config.step_budget);
    eprintln!("  Steps/replay:    {}", config.replay_budget);
    match config.bootstrap_budget {
        Some(steps) => eprintln!("  Bootstrap:       {} steps", steps),
        None => eprintln!("  Bootstrap:       skipped"),
    }
    eprintln!("  Policy:          {}", config.policy);
    if let Some(budget) = config.time_budget {
        eprintln!("  Time budget:     {}s", budget.as_secs());
    }
    eprintln!("  State:           {}", state_path.display());
    if let Some(ref output_dir) = config.output_dir {
        eprintln!("  Output:          {}", output_dir.display());
    }
    eprintln!();

    let output_dir = config.output_dir.clone();
    let engine = ModelEngine::from_binary(&image)?;
    let mut controller = Controller::new(engine, config)?;
    let report = controller.run(&mut session)?;

    let formatted = format_exploration_report(&report);
    if json {
        println!("{}", serde_json::to_string_pretty(&report.coverage)?);
    } else {
        println!("{}", formatted);
    }

    if let Some(output_dir) = output_dir {
        let report_path = output_dir.join("report.txt");
        fs::write(&report_path, &formatted)?;
        eprintln!("Saved report to: {}", report_path.display());
    }

    if let Some(dot_path) = dot {
        DotRenderer.render(
            &flow,
            session.universe()?,
            &session.tracker().observed_set(),
            &dot_path,
        )?;
    }

    Ok(())
}

fn cmd_report(
    binary: PathBuf,
    state: PathBuf,
    function: Option<String>,
    top: usize,
    sample: usize,
    json: bool,
) -> Result<(), CliError> {
    let (image, _, universe) = load_scope(&binary, function.as_deref(), &RecoveryOptions::default())?;

    let mut session = CoverageSession::load(&state, image.identity())?;
    session.bind_universe(universe);
    let report = session.summarize(top, sample)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", format_coverage_report(&report));
    }
    Ok(())
}

fn cmd_graph(
    binary: PathBuf,
    state: PathBuf,
    function: Option<String>,
    output: PathBuf,
) -> Result<(), CliError> {
    let (image, flow, universe) = load_scope(&binary, function.as_deref(), &RecoveryOptions::default())?;

    let mut session = CoverageSession::open(&state, image.identity().clone())?;
    session.bind_universe(universe);

    DotRenderer.render(
        &flow,
        session.universe()?,
        &session.tracker().observed_set(),
        &output,
    )?;
    eprintln!("Saved coverage graph to: {}", output.display());
    Ok(())
}
