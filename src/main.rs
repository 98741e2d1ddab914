use clap::Parser;
use tracing_subscriber::EnvFilter;

use lineprof::cli::Cli;
use lineprof::launch;

fn main() {
    let args = Cli::parse();

    if args.debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("lineprof=debug")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    match launch::run(args) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("lineprof: {:#}", error);
            std::process::exit(2);
        }
    }
}
