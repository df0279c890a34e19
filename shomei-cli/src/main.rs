use anyhow::{Context, Result};
use clap::Parser;
use shomei_core::SignaturePresence;
use std::path::PathBuf;
use std::process::ExitCode;

mod report;

/// Exit status for a recognised but unsigned binary.
const EXIT_UNSIGNED: u8 = 1;
/// Exit status for usage, I/O and format errors.
const EXIT_ERROR: u8 = 2;

/// Code-signature presence check for native executables
#[derive(Parser)]
#[command(
    name = "shomei",
    about = "Report whether a PE, Mach-O or universal binary carries an embedded code signature",
    version,
    author
)]
struct Cli {
    /// Path to binary file
    path: PathBuf,

    /// Print the result as a JSON object
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(presence) if presence.signed => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(EXIT_UNSIGNED),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn run(cli: &Cli) -> Result<SignaturePresence> {
    let size = std::fs::metadata(&cli.path)
        .with_context(|| format!("cannot read {}", cli.path.display()))?
        .len();

    let presence = shomei_core::probe(&cli.path).context("checking signature")?;
    log::debug!("{} classified as {}", cli.path.display(), presence.format);

    if cli.json {
        report::print_json(&cli.path, size, &presence)?;
    } else {
        report::print_text(&cli.path, size, &presence);
    }
    Ok(presence)
}
