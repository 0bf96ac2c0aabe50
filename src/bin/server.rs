use clap::Parser;
use netherit::session;

/// Treasure-hunt server: places treasure files on an 8x8 grid and
/// serves moves/transfers over a raw Ethernet interface.
#[derive(Parser, Debug)]
#[command(name = "server", version, about)]
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

    if let Err(e) = session::run_server(&cli.interface) {
        eprintln!("server: {e}");
        std::process::exit(1);
    }
}
