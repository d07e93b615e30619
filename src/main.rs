use anyhow::Result;
use clap::Parser;
use schedbench::cli::{Cli, OutputFormat};
use schedbench::config::RunConfig;
use schedbench::runner;
use schedbench::sched::OsScheduler;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber; `--debug` forces TRACE, otherwise RUST_LOG or warn
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env()
            .add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    // Reject bad values before the scheduler or any file is touched
    let config = RunConfig::try_from(&args)?;

    let summary = runner::run(&config, &OsScheduler)?;

    match args.format {
        OutputFormat::Text => print!("{}", summary.render_text()),
        OutputFormat::Json => println!("{}", summary.to_json()?),
    }
    Ok(())
}
