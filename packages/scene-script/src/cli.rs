use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::config::SessionConfig;
use crate::scene_graph::{SceneGraph, Transform};
use crate::script_diagnostics::{from_parse_error, ScriptDiagnostic};
use crate::scripting::{sandboxed_engine, ScriptSession};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script headlessly and print the resulting scene as JSON
    Run {
        /// Rhai script to run
        script: PathBuf,

        /// Session config (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Interpreter steps per tick (overrides the config)
        #[arg(long)]
        steps_per_tick: Option<u64>,

        /// Stop after this many ticks even if the script is still running
        #[arg(long, default_value_t = 100_000)]
        max_ticks: u64,

        /// Pretty-print the report
        #[arg(long)]
        pretty: bool,
    },
    /// Compile a script and report diagnostics without running it
    Check {
        /// Rhai script to check
        script: PathBuf,

        /// Session config (JSON); its sandbox limits apply when compiling
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
pub struct EntityReport {
    pub id: u64,
    #[serde(flatten)]
    pub transform: Transform,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub ticks: u64,
    pub finished: bool,
    pub entities: Vec<EntityReport>,
    pub diagnostics: Vec<ScriptDiagnostic>,
}

/// Parse arguments and run the chosen command. Ok(false) means the script failed.
pub fn run() -> Result<bool> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            script,
            config,
            steps_per_tick,
            max_ticks,
            pretty,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(steps) = steps_per_tick {
                config.steps_per_tick = steps;
            }

            let source = read_script(&script)?;
            let report = run_headless(&source, config, max_ticks);
            let ok = report.diagnostics.is_empty();
            print_json(&report, pretty)?;
            Ok(ok)
        }
        Commands::Check { script, config } => {
            let config = load_config(config.as_deref())?;
            let source = read_script(&script)?;
            let diagnostics = check(&source, &config);
            let ok = diagnostics.is_empty();
            print_json(&diagnostics, true)?;
            Ok(ok)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    match path {
        Some(path) => SessionConfig::from_json_file(path),
        None => Ok(SessionConfig::default()),
    }
}

fn read_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}

/// Compile `source` and return any diagnostics.
pub fn check(source: &str, config: &SessionConfig) -> Vec<ScriptDiagnostic> {
    match sandboxed_engine(config).compile(source) {
        Ok(_) => Vec::new(),
        Err(e) => vec![from_parse_error(&e)],
    }
}

/// Run `source` against an in-memory scene until it finishes or `max_ticks` pass.
pub fn run_headless(source: &str, config: SessionConfig, max_ticks: u64) -> RunReport {
    let mut session = ScriptSession::new(SceneGraph::new(), config);

    if session.load_script(source) {
        let ticks = session.run_until_idle(max_ticks);
        log::info!("Ran {} ticks", ticks);
    }

    let entities = session.with_catalog(|catalog| {
        catalog
            .iter()
            .map(|entity| EntityReport {
                id: entity.id().0,
                transform: *entity.transform(),
            })
            .collect()
    });

    RunReport {
        ticks: session.ticks(),
        finished: !session.is_running(),
        entities,
        diagnostics: session.take_diagnostics(),
    }
}
