use clap::Parser;

use termhost::CliError;
use termhost::commands::Cli;
use termhost::handlers;
use termhost::handlers::HandlerContext;
use termhost::presenter::presenter_for;
use termhost_common::init_tracing;
use termhost_daemon::DaemonConfig;

fn main() {
    let cli = Cli::parse();
    let presenter = presenter_for(cli.effective_format());
    let _telemetry = init_tracing("warn");

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            presenter.present_error(&e);
            std::process::exit(e.exit_code());
        }
    }
}

fn run(cli: Cli) -> Result<i32, CliError> {
    let mut config = DaemonConfig::from_env();
    if let Some(dir) = &cli.control_dir {
        config = config.with_control_dir(dir.clone());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("termhost")
        .build()
        .map_err(CliError::Runtime)?;

    runtime.block_on(async move {
        let ctx = HandlerContext::new(config, presenter_for(cli.effective_format()))?;
        handlers::dispatch(&ctx, cli).await
    })
}
