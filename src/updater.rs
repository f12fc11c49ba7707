//! Session orchestration.
//!
//! A run reads both AWS files, resolves the long-term keys and MFA device for
//! one profile, exchanges them for session credentials and writes the result
//! back:
//!
//! ```ini
//! # credentials
//! [dev]
//! aws_access_key_id=ASIA...           # session key
//! aws_secret_access_key=...
//! aws_session_token=...
//!
//! [dev::source-profile]
//! aws_access_key_id=AKIA...           # long-term key, written once
//! aws_secret_access_key=...
//!
//! # config
//! [profile dev]
//! mfa_serial=arn:aws:iam::123456789012:mfa/dev
//! region=eu-west-1
//! source_profile=dev::source-profile
//! ```
//!
//! Nothing is written until STS has issued credentials.

use std::path::PathBuf;

use anyhow::{Context, Result};
use aws_smithy_types::{DateTime, date_time::Format};
use log::{debug, info, warn};
use tokio::fs;

use crate::{
    credentials::{IssueError, TokenIssuer, TokenRequest},
    error::Error,
    profile::{self, DeviceRecord},
    prompt::{self, Prompt},
    store::ConfigStore,
};

/// Locations of the AWS shared files.
#[derive(Debug, Clone)]
pub struct Paths {
    pub credentials: PathBuf,
    pub config: PathBuf,
}

impl Paths {
    /// Fills unset paths with `~/.aws/credentials` and `~/.aws/config`.
    pub fn resolve(credentials: Option<PathBuf>, config: Option<PathBuf>) -> Result<Self> {
        let aws_dir = || {
            dirs::home_dir()
                .map(|d| d.join(".aws"))
                .context("Could not determine home directory")
        };

        let credentials = match credentials {
            Some(path) => path,
            None => aws_dir()?.join("credentials"),
        };
        let config = match config {
            Some(path) => path,
            None => aws_dir()?.join("config"),
        };

        Ok(Self { credentials, config })
    }
}

/// Refreshes MFA session credentials for aws-cli profiles.
///
/// The updater owns everything a run touches from the outside world: the
/// file locations, the [`TokenIssuer`] used to reach STS and the [`Prompt`]
/// that asks for the device serial and one-time codes. Production code wires
/// in [`crate::credentials::StsTokenIssuer`] and [`crate::prompt::Terminal`].
pub struct SessionUpdater<I, P> {
    paths: Paths,
    issuer: I,
    prompt: P,
}

impl<I: TokenIssuer, P: Prompt> SessionUpdater<I, P> {
    pub fn new(paths: Paths, issuer: I, prompt: P) -> Self {
        Self { paths, issuer, prompt }
    }

    /// Refreshes session credentials for `profile`, valid for `hours`.
    ///
    /// The workflow is:
    /// 1. Resolve long-term keys, preferring `[<profile>::source-profile]`
    /// 2. Read the MFA device from the config file, asking for it when missing
    /// 3. Ask for a six-character code and call STS, asking again on a bad code
    /// 4. Preserve the long-term keys under the alias and write the session keys
    /// 5. Save a newly registered device to the config file
    ///
    /// # Arguments
    ///
    /// * `profile` - aws-cli profile name, `default` for the default profile
    /// * `hours` - Session lifetime; STS accepts 1 to 36 hours
    ///
    /// # Returns
    ///
    /// * `Ok(DateTime)` - Expiration of the issued credentials
    /// * `Err(anyhow::Error)` - The run failed and no file was changed. Known
    ///   failures downcast to [`Error`] and carry an exit code.
    pub async fn run(&mut self, profile: &str, hours: u32) -> Result<DateTime> {
        if !fs::try_exists(&self.paths.credentials).await? {
            return Err(Error::CredentialsNotFound { path: self.paths.credentials.clone() }.into());
        }

        let mut secrets = ConfigStore::load(&self.paths.credentials)
            .await?
            .restrict_permissions();
        let mut settings = ConfigStore::load(&self.paths.config).await?;

        let keys = profile::long_term_keys(&secrets, profile)?;
        info!("Using long-term keys from [{}]", keys.section());

        let device = match DeviceRecord::stored(&settings, profile) {
            Some(device) => device,
            None => {
                let serial = prompt::device_serial(&mut self.prompt, profile)?;
                DeviceRecord::register(&settings, profile, serial)
            }
        };
        debug!("MFA device {} in {}", device.serial_number, device.region);

        let duration_seconds = hours
            .checked_mul(3600)
            .and_then(|seconds| i32::try_from(seconds).ok())
            .context("Session duration out of range")?;

        let mut request = TokenRequest {
            credentials: keys.clone(),
            region: device.region.clone(),
            duration_seconds,
            serial_number: device.serial_number.clone(),
            token_code: prompt::token_code(&mut self.prompt)?,
        };

        info!("Fetching credentials - Duration: {duration_seconds}s");
        let session = loop {
            match self.issuer.get_session_token(&request).await {
                Ok(session) => break session,
                Err(IssueError::BadOneTimeCode) => {
                    warn!("Invalid 2FA code, try again");
                    request.token_code = prompt::token_code(&mut self.prompt)?;
                }
                Err(IssueError::Rejected { message }) => {
                    return Err(Error::CredentialRejected { message }.into());
                }
                Err(IssueError::Other(err)) => return Err(err),
            }
        };

        profile::apply_session(&mut secrets, profile, &keys, &session);
        secrets.save().await?;

        if device.is_dirty() {
            device.apply(&mut settings);
            settings.save().await?;
            info!("Saved MFA device for [{}] to {}", device.section, settings.path().display());
        }

        let expiration = session.expiration.fmt(Format::DateTime)?;
        info!("Success! Your token will expire on: {expiration}");

        Ok(session.expiration)
    }
}
