//! Command-line interface definitions.

use std::path::PathBuf;

use clap::Parser;

/// Handle 2FA authentication respecting aws-cli standard patterns.
///
/// Exchanges the long-term keys of a profile and an MFA code for session
/// credentials. The long-term keys are preserved under
/// `[<profile>::source-profile]` so later runs keep working.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// aws-cli profile name
    #[arg(default_value = "default")]
    pub profile: String,

    /// Number of hours for which the token will be valid
    #[arg(long, default_value_t = 12, value_parser = clap::value_parser!(u32).range(1..=36))]
    pub hours: u32,

    /// Path to AWS credentials file [default: ~/.aws/credentials]
    #[arg(long, env = "AWS_SHARED_CREDENTIALS_FILE")]
    pub credentials_path: Option<PathBuf>,

    /// Path to AWS config file [default: ~/.aws/config]
    #[arg(long, env = "AWS_CONFIG_FILE")]
    pub config_path: Option<PathBuf>,
}
