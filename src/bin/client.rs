use clap::Parser;
use netherit::session;

/// Treasure-hunt client: move around the grid and receive treasure
/// files over a raw Ethernet interface.
#[derive(Parser, Debug)]
#[command(name = "client", version, about)]
struct Cli {
    /// Network interface to bind the raw socket to (e.g. eth0).
    interface: String,
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

    if let Err(e) = session::run_client(&cli.interface) {
        eprintln!("client: {e}");
        std::process::exit(1);
    }
}
