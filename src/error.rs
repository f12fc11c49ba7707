//! Failures that end an invocation with a dedicated exit code.
//!
//! Everything else travels as a plain [`anyhow::Error`] and is reported as a bug.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("profile '{profile}' has no long-term keys in the credentials file")]
    InvalidProfile { profile: String },

    #[error("section [{section}] is missing {key}")]
    IncompleteProfile { section: String, key: &'static str },

    #[error("credentials file {} not found", path.display())]
    CredentialsNotFound { path: PathBuf },

    #[error("long-term credentials rejected: {message}")]
    CredentialRejected { message: String },

    #[error("failed to parse {}: {message}", path.display())]
    ConfigParse { path: PathBuf, message: String },
}

impl Error {
    /// Process exit code reported for this failure.
    pub fn code(&self) -> u8 {
        match self {
            Error::InvalidProfile { .. } | Error::IncompleteProfile { .. } => 2,
            Error::CredentialsNotFound { .. } => 3,
            Error::CredentialRejected { .. } => 4,
            Error::ConfigParse { .. } => 5,
        }
    }

    /// Short message shown to the user instead of the full error chain.
    pub fn hint(&self) -> String {
        match self {
            Error::InvalidProfile { profile } => format!(
                "The provided profile name '{profile}' is not present in your credentials file"
            ),
            Error::IncompleteProfile { section, key } => {
                format!("Section [{section}] of your credentials file has no {key}")
            }
            Error::CredentialsNotFound { path } => {
                format!("Credentials file {} not found", path.display())
            }
            Error::CredentialRejected { message } => {
                format!("Your credentials look invalid. Error: {message}")
            }
            Error::ConfigParse { path, message } => {
                format!("Could not parse {}: {message}", path.display())
            }
        }
    }
}
