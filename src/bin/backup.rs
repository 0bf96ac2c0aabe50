use std::path::PathBuf;

use clap::Parser;
use netherit::session;

/// Backs up a single file to a listening server over a raw Ethernet
/// interface, bypassing the treasure-hunt game entirely.
#[derive(Parser, Debug)]
#[command(name = "backup", version, about)]
struct Cli {
    /// Network interface to bind the raw socket to (e.g. eth0).
    interface: String,
    /// Path to the file to back up.
    filename: PathBuf,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = session::run_backup(&cli.interface, &cli.filename) {
        eprintln!("backup: {e}");
        std::process::exit(1);
    }
}
