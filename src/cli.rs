//! CLI surface: `run`/`list`/`graph`/`check`/`init`, global flags.
//!
//! Keeps the teacher's `clap` derive shape (`Cli`/`Commands` split, bare
//! trailing args treated as `run <task>`) but re-scopes the subcommand list
//! to what the engine actually has: no `watch`/`cache` subcommands (see
//! `DESIGN.md`), `--context` replaces the teacher's `--parallel`/`--shell`
//! flags since this engine has neither concept.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "runweave")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the run-file (defaults to searching for runweave.yaml)
    #[arg(short = 'f', long, global = true)]
    pub file: Option<PathBuf>,

    /// Context to resolve tasks under (e.g. `prod`, `ci`)
    #[arg(short, long, global = true, default_value = "default")]
    pub context: String,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Task to run (shorthand for `runweave run <task>`)
    #[arg(trailing_var_arg = true)]
    pub task: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one or more tasks
    Run {
        #[arg(required = true)]
        tasks: Vec<String>,

        /// Show the resolved execution order without running anything
        #[arg(long)]
        dry_run: bool,

        /// Run every task even if a `force:` expression would skip it
        #[arg(long)]
        force: bool,
    },

    /// List available tasks
    List {
        #[arg(short, long, default_value = "table")]
        format: ListFormat,

        #[arg(long)]
        deps: bool,
    },

    /// Show the resolved task dependency graph
    Graph {
        task: Option<String>,

        #[arg(short, long, default_value = "text")]
        format: GraphFormat,
    },

    /// Validate the run-file
    Check,

    /// Write a starter runweave.yaml
    Init {
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ListFormat {
    #[default]
    Table,
    Json,
    Plain,
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum GraphFormat {
    #[default]
    Text,
    Dot,
    Json,
}

impl Cli {
    pub fn effective_command(&self) -> EffectiveCommand {
        if let Some(cmd) = &self.command {
            EffectiveCommand::Subcommand(cmd)
        } else if !self.task.is_empty() {
            EffectiveCommand::RunTasks(&self.task)
        } else {
            EffectiveCommand::None
        }
    }
}

pub enum EffectiveCommand<'a> {
    Subcommand(&'a Commands),
    RunTasks(&'a Vec<String>),
    None,
}
