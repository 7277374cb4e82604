use std::process::ExitCode;

use clap::{Parser, Subcommand};

use beatline::commands::plan::PlanArgs;
use beatline::commands::status::StatusArgs;
use beatline::commands::verify::VerifyArgs;
use beatline::{commands, error, telemetry};

#[derive(Debug, Parser)]
#[command(
    name = "beatline",
    version,
    about = "Wave planning and auto-verification for beads-tracked agent workflows"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Compute the wave plan and readiness board
    Plan(PlanArgs),
    /// Show summary tallies and the recommended next beat
    Status(StatusArgs),
    /// Run verification for beats a completed agent action covered
    Verify(VerifyArgs),
    /// Print the JSON Schema for .beatline.toml
    Schema,
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Plan(_) => "plan",
            Self::Status(_) => "status",
            Self::Verify(_) => "verify",
            Self::Schema => "schema",
        }
    }
}

fn main() -> ExitCode {
    let _telemetry = telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Plan(args) => args.execute(),
        Commands::Status(args) => args.execute(),
        Commands::Verify(args) => args.execute(),
        Commands::Schema => commands::schema::run_schema(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(exit_err) = e.downcast_ref::<error::ExitError>() {
                eprintln!("error: {exit_err}");
                exit_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
