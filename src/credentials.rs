use std::fmt;

use anyhow::Context;
use aws_config::Region;
use aws_sdk_sts::{Client, config::Credentials, error::ProvideErrorMetadata};
use aws_smithy_types::DateTime;
use log::debug;
use thiserror::Error;

/// STS code for a rejected one-time code.
const BAD_ONE_TIME_CODE: &str = "AccessDenied";

/// STS codes meaning the long-term keys themselves are unusable.
const REJECTED_CREDENTIAL_CODES: &[&str] = &[
    "AccessDeniedException",
    "SignatureDoesNotMatch",
    "InvalidClientTokenId",
    "ExpiredToken",
];

/// Long-term keys read from the credentials file.
///
/// These are the permanent IAM user keys (`AKIA...`) that sign
/// `GetSessionToken`. The section they came from is kept so logs can say
/// whether the alias or the profile itself was used. `Display` never shows
/// the secret.
#[derive(Clone)]
pub struct AwsCredentials {
    credentials: Credentials,
    section: String,
}

impl AwsCredentials {
    pub fn new(access_key_id: String, secret_access_key: String, section: String) -> Self {
        Self {
            credentials: Credentials::new(access_key_id, secret_access_key, None, None, "aws2fa"),
            section,
        }
    }

    pub fn access_key_id(&self) -> &str {
        self.credentials.access_key_id()
    }

    pub fn secret_access_key(&self) -> &str {
        self.credentials.secret_access_key()
    }

    /// Credentials-file section the keys were read from.
    pub fn section(&self) -> &str {
        &self.section
    }
}

impl fmt::Display for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] aws_access_key_id={} aws_secret_access_key=SENSITIVE",
            self.section,
            self.access_key_id(),
        )
    }
}

/// Temporary credentials returned by `GetSessionToken`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime,
}

/// Everything one `GetSessionToken` call needs.
///
/// The request is reused across retries; only `token_code` changes when a
/// one-time code is rejected.
pub struct TokenRequest {
    /// Long-term keys signing the request.
    pub credentials: AwsCredentials,
    /// Region of the STS endpoint.
    pub region: String,
    /// Requested lifetime, 900 to 129600 seconds.
    pub duration_seconds: i32,
    /// Serial number or ARN of the MFA device.
    pub serial_number: String,
    /// Current one-time code from the device.
    pub token_code: String,
}

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("invalid one-time code")]
    BadOneTimeCode,

    #[error("credentials rejected: {message}")]
    Rejected { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Issues session credentials for long-term keys plus an MFA code.
///
/// Implementations sort failures into [`IssueError`]: a rejected one-time code
/// is [`IssueError::BadOneTimeCode`] so the caller can ask again, unusable
/// long-term keys are [`IssueError::Rejected`], and anything else is passed
/// through untouched as [`IssueError::Other`].
pub trait TokenIssuer {
    async fn get_session_token(&self, request: &TokenRequest) -> Result<SessionCredentials, IssueError>;
}

/// [`TokenIssuer`] backed by AWS STS.
pub struct StsTokenIssuer;

impl TokenIssuer for StsTokenIssuer {
    async fn get_session_token(&self, request: &TokenRequest) -> Result<SessionCredentials, IssueError> {
        debug!(
            "Calling sts:GetSessionToken in {} as {}",
            request.region, request.credentials
        );

        let config = aws_config::from_env()
            .credentials_provider(request.credentials.credentials.clone())
            .region(Region::new(request.region.clone()))
            .load()
            .await;

        let output = Client::new(&config)
            .get_session_token()
            .duration_seconds(request.duration_seconds)
            .serial_number(&request.serial_number)
            .token_code(&request.token_code)
            .send()
            .await
            .map_err(|err| {
                let (code, message) = err
                    .as_service_error()
                    .map(|e| (e.code().map(str::to_owned), e.message().map(str::to_owned)))
                    .unwrap_or_default();
                classify(code.as_deref(), message.as_deref(), err.into())
            })?;

        let credentials = output
            .credentials()
            .context("No credentials returned")?;

        Ok(SessionCredentials {
            access_key_id: credentials.access_key_id().to_owned(),
            secret_access_key: credentials.secret_access_key().to_owned(),
            session_token: credentials.session_token().to_owned(),
            expiration: *credentials.expiration(),
        })
    }
}

/// Sorts a failed call by its STS error code.
fn classify(code: Option<&str>, message: Option<&str>, source: anyhow::Error) -> IssueError {
    match code {
        Some(BAD_ONE_TIME_CODE) => IssueError::BadOneTimeCode,
        Some(code) if REJECTED_CREDENTIAL_CODES.contains(&code) => IssueError::Rejected {
            message: message.unwrap_or(code).to_owned(),
        },
        _ => IssueError::Other(source),
    }
}
