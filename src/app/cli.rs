use std::{
    io::{self, IsTerminal, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use crate::app::{config, interrupt, renderer::Renderer};
use crate::manager::scheduler::{RunOptions, Scheduler, MAX_PARALLEL_CMDS};

/// Run a YAML-defined list of commands behind a live terminal dashboard
#[derive(Debug, Parser)]
#[command(name = "taskdash")]
#[command(version)]
pub struct Cli {
    /// Task definition file
    pub config: PathBuf,

    /// Maximum number of commands of a group running at once
    #[arg(short = 'j', long, default_value_t = MAX_PARALLEL_CMDS as u16,
          value_parser = clap::value_parser!(u16).range(1..))]
    pub max_parallel: u16,

    /// Disable colored status glyphs
    #[arg(long)]
    pub no_color: bool,

    /// Write logs to this file
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

/// Loads the task tree and runs it, returning the process exit code.
pub fn run_cli(cli: Cli) -> Result<i32> {
    let stdout = io::stdout();
    let color = !cli.no_color && stdout.is_terminal();
    interrupt::install();
    run_with(&cli, Renderer::new(stdout, None, color))
}

fn run_with<W: Write>(cli: &Cli, mut renderer: Renderer<W>) -> Result<i32> {
    renderer
        .announce(&format!("Reading {} ...", cli.config.display()))
        .context("failed to write to the terminal")?;
    let tree = config::load(&cli.config)?;
    let mut tasks = tree.tasks;

    let options = RunOptions {
        max_parallel: usize::from(cli.max_parallel),
        show_steps: tree.options.show_steps,
    };
    let mut scheduler = Scheduler::new(renderer, options);
    let report = scheduler
        .run(&mut tasks)
        .context("failed to draw the dashboard")?;

    info!(
        "Run finished: {} step(s), cancelled: {}, exit code {}",
        report.steps.len(),
        report.cancelled,
        report.exit_code()
    );
    Ok(report.exit_code())
}
