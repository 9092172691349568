//! Command-line front end for the identity core.
//!
//! # Responsibility
//! - Resolve one `(email, phone)` pair against a database file and print
//!   the resulting group as JSON.
//! - Without identifiers, print the core ping and version.

use clap::Parser;
use identity_core::db::open_db;
use identity_core::{IdentifyRequest, IdentityService, SqliteContactStore};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "identity_cli")]
#[command(about = "Resolve a contact pair into its identity group")]
struct Args {
    /// SQLite database file; created and migrated when missing.
    #[arg(long, env = "IDENTITY_DB_PATH", default_value = "./identity.sqlite3")]
    db: PathBuf,
    #[arg(long)]
    email: Option<String>,
    #[arg(long = "phone")]
    phone_number: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.email.is_none() && args.phone_number.is_none() {
        println!("identity_core ping={}", identity_core::ping());
        println!("identity_core version={}", identity_core::core_version());
        return ExitCode::SUCCESS;
    }

    match run(&args) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<String, Box<dyn std::error::Error>> {
    let conn = open_db(&args.db)?;
    let store = SqliteContactStore::try_new(&conn)?;
    let request = IdentifyRequest::new(args.email.as_deref(), args.phone_number.as_deref());
    let group = IdentityService::new(store).identify(&request)?;
    Ok(serde_json::to_string_pretty(&group)?)
}
