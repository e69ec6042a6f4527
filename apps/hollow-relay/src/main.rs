use clap::Parser;
use hollow_relay::panel::capture_local_offset;
use hollow_relay::telemetry::logging;
use hollow_relay::terminal::{app, cli::Cli};

fn main() {
    // Must run before any thread exists, including the log writer.
    capture_local_offset();

    let cli = Cli::parse();
    if let Err(err) = logging::init(&cli.logging.to_config()) {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }

    if let Err(err) = app::run(cli) {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}
