//! echo-sshd - authenticated SSH echo server

use clap::{CommandFactory, Parser};
use clap_complete::env::CompleteEnv;

use echo_sshd::cli::commands;
use echo_sshd::cli::exit_code::ExitCode;
use echo_sshd::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Handle dynamic shell completion if COMPLETE env var is set
    CompleteEnv::with_factory(Cli::command).complete();

    let cli = Cli::parse();

    echo_sshd::logging::init(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, cli.config).await,
        Commands::Keygen(args) => commands::keygen::execute(args).await,
        Commands::Connect(args) => commands::connect::execute(args).await,
        Commands::Config(args) => commands::config::execute(args, cli.config).await,
        Commands::Version => commands::version::execute(cli.verbose).await,
        Commands::Completion(args) => commands::completion::execute(args).await,
    };

    match result {
        Ok(()) => ExitCode::Success.into(),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from_error(&e).into()
        }
    }
}
