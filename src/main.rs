mod app;
mod manager;
mod models;
mod worker;

use std::process;

use clap::Parser;

use app::cli::{self, Cli};
use models::error::ConfigError;

const EXIT_CONFIG_ERROR: i32 = 2;

fn main() {
    let args = Cli::parse();
    if let Err(e) = app::logging::init(args.log_file.as_deref()) {
        eprintln!("Warning: {:#}", e);
    }

    let code = match cli::run_cli(args) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            if e.downcast_ref::<ConfigError>().is_some() {
                EXIT_CONFIG_ERROR
            } else {
                1
            }
        }
    };
    process::exit(code);
}
