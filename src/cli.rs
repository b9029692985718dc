use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::program::load_program;
use crate::registry::DispatcherRegistry;
use crate::runner::ProgramRunner;

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Quill - an embeddable program execution engine", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Execute with the suspendable strategy instead of direct execution
    #[arg(long, global = true)]
    pub non_blocking: bool,

    /// Pause execution for a remote debug client
    #[arg(long, global = true)]
    pub debug: bool,

    /// Port for the debug listener
    #[arg(long, global = true)]
    pub debug_port: Option<u16>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a program's main function
    Run {
        /// Path to the compiled program (JSON)
        program: String,

        /// Arguments passed to main
        args: Vec<String>,
    },

    /// Host a program's declared services
    Serve {
        /// Path to the compiled program (JSON)
        program: String,
    },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments (for embedders that filter args)
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    let config = Config::builder()
        .config_path(cli.config.map(std::path::PathBuf::from))
        .non_blocking(cli.non_blocking.then_some(true))
        .debug(cli.debug.then_some(true))
        .debug_port(cli.debug_port)
        .build()?;

    match cli.command {
        Commands::Run { program, args } => {
            let program = load_program(&program)?;
            let runner = ProgramRunner::new(config, DispatcherRegistry::new());
            let value = runner.run_main(&program, args).await?;
            println!("{}", value);
        }

        Commands::Serve { program } => {
            let program = load_program(&program)?;
            let runner = ProgramRunner::new(config, DispatcherRegistry::new());
            let started = runner.start_services(&program).await?;

            println!(
                "✓ {} service(s) up for program '{}'",
                started.env.service_count(),
                program.name
            );
            if let Some(port) = started.debug_port {
                println!("  debug listener on port {}", port);
            }

            // Dispatchers own their listeners; hold the process open.
            tokio::signal::ctrl_c().await?;
        }
    }

    Ok(())
}
