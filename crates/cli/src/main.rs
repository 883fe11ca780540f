// coedit CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod connect;
mod exit_code;
mod output;

use connect::ConnectionArgs;
use exit_code::ExitCode;
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "coedit", about = "Terminal client for collaborative documents")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: commands::Command,
}

fn main() -> std::process::ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let format = OutputFormat::detect(cli.connection.json);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            output::print_error(format, "RUNTIME", &format!("failed to start async runtime: {error}"));
            return ExitCode::Error.into();
        }
    };

    match runtime.block_on(commands::run(cli.command, cli.connection)) {
        Ok(()) => ExitCode::Success.into(),
        Err(error) => {
            output::print_anyhow_error(format, &error);
            ExitCode::from_error(&error).into()
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("COEDIT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
