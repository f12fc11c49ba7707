//! aws2fa
//!
//! Exchanges the long-term keys of an aws-cli profile plus an MFA code for
//! temporary session credentials, and stores them back under the same profile
//! so aws-cli and the SDKs pick them up transparently.
//!
//! Exit codes: `0` success, `1` unexpected error, `2` invalid profile,
//! `3` missing credentials file, `4` rejected credentials, `5` unreadable
//! configuration file.

use std::process::ExitCode;

use clap::Parser;

mod cli;
mod credentials;
mod error;
mod profile;
mod prompt;
mod store;
mod updater;

use cli::Args;
use credentials::StsTokenIssuer;
use error::Error;
use prompt::Terminal;
use updater::{Paths, SessionUpdater};

#[tokio::main]
async fn main() -> ExitCode {
    // Users can override the level with RUST_LOG.
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<Error>() {
            Some(known) => {
                eprintln!("{}", known.hint());
                ExitCode::from(known.code())
            }
            None => {
                eprint!("{}", bug_report(&args, &err));
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(args: &Args) -> anyhow::Result<()> {
    let paths = Paths::resolve(args.credentials_path.clone(), args.config_path.clone())?;
    let mut updater = SessionUpdater::new(paths, StsTokenIssuer, Terminal);
    updater.run(&args.profile, args.hours).await?;
    Ok(())
}

/// Diagnostic dump for failures outside the known taxonomy. Secrets never
/// reach `Args`, and key material is listed as `SENSITIVE`.
fn bug_report(args: &Args, err: &anyhow::Error) -> String {
    let rule = "=".repeat(80);
    let argv: Vec<String> = std::env::args().collect();

    format!(
        "\n{rule}\n\
         You've found a bug! Please raise an issue attaching the following report\n\
         {thin}\n\
         Version: {version}\n\
         Platform: {os} {arch} ({family})\n\
         Config: profile={profile} hours={hours} credentials_path={credentials:?} config_path={config:?} \
         aws_access_key_id=SENSITIVE aws_secret_access_key=SENSITIVE aws_session_token=SENSITIVE\n\
         Args: {argv:?}\n\n\
         {err:?}\n\
         {rule}\n",
        thin = "-".repeat(80),
        version = env!("CARGO_PKG_VERSION"),
        os = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        family = std::env::consts::FAMILY,
        profile = args.profile,
        hours = args.hours,
        credentials = args.credentials_path,
        config = args.config_path,
    )
}
