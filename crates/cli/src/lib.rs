pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "frontdesk",
    about = "Frontdesk operator CLI",
    long_about = "Operate Frontdesk migrations, readiness checks, tenant configuration, and \
                  session maintenance.",
    after_help = "Examples:\n  frontdesk doctor --json\n  frontdesk tenant validate --file \
                  tenants.json\n  frontdesk sessions purge-expired"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo tenants and verify every expected capability is present")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, model provider readiness, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Tenant configuration checks")]
    Tenant(TenantCommand),
    #[command(subcommand, about = "Session store maintenance")]
    Sessions(SessionsCommand),
}

#[derive(Debug, Subcommand)]
enum TenantCommand {
    #[command(about = "Validate tenant configs from a JSON file, or every stored tenant")]
    Validate {
        #[arg(long, help = "JSON file holding one tenant config or an array of them")]
        file: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
enum SessionsCommand {
    #[command(about = "Delete every session whose expiry has passed")]
    PurgeExpired,
    #[command(about = "Delete one session on behalf of its tenant")]
    Purge {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        session: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Tenant(TenantCommand::Validate { file }) => {
            commands::tenant::validate(file.as_deref())
        }
        Command::Sessions(SessionsCommand::PurgeExpired) => commands::sessions::purge_expired(),
        Command::Sessions(SessionsCommand::Purge { tenant, session }) => {
            commands::sessions::purge(&tenant, &session)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
