//! Profile resolution over already-loaded stores.
//!
//! Nothing here prompts or touches the disk. The updater decides when to ask
//! and when to save.
//!
//! Long-term keys are read from `[<profile>::source-profile]` when that alias
//! exists and from `[<profile>]` otherwise. The config file's `source_profile`
//! key is written for aws-cli but never consulted here.

use crate::{
    credentials::{AwsCredentials, SessionCredentials},
    error::Error,
    store::ConfigStore,
};

pub const DEFAULT_PROFILE: &str = "default";

/// Region used when neither the profile nor `[default]` sets one.
pub const FALLBACK_REGION: &str = "us-east-1";

const ACCESS_KEY_ID: &str = "aws_access_key_id";
const SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
const SESSION_TOKEN: &str = "aws_session_token";
const MFA_SERIAL: &str = "mfa_serial";
const REGION: &str = "region";
const SOURCE_PROFILE: &str = "source_profile";

/// Credentials section preserving the long-term keys of `profile`.
pub fn source_alias(profile: &str) -> String {
    format!("{profile}::source-profile")
}

/// Config-file section for `profile`.
pub fn settings_section(profile: &str) -> String {
    if profile == DEFAULT_PROFILE {
        DEFAULT_PROFILE.to_string()
    } else {
        format!("profile {profile}")
    }
}

/// Finds the long-term keys to sign the next STS request for `profile`.
///
/// # Arguments
///
/// * `secrets` - The loaded credentials file
/// * `profile` - aws-cli profile name
///
/// # Returns
///
/// * `Ok(AwsCredentials)` - Keys from the alias section if present, otherwise
///   from `[<profile>]`
/// * `Err(Error::InvalidProfile)` - Neither section exists
/// * `Err(Error::IncompleteProfile)` - The chosen section lacks a key
pub fn long_term_keys(secrets: &ConfigStore, profile: &str) -> Result<AwsCredentials, Error> {
    let alias = source_alias(profile);
    let (section, entries) = [alias.as_str(), profile]
        .into_iter()
        .find_map(|section| secrets.section(section).map(|entries| (section, entries)))
        .ok_or_else(|| Error::InvalidProfile { profile: profile.to_string() })?;

    let get = |key: &'static str| {
        entries.get(key).cloned().ok_or_else(|| Error::IncompleteProfile {
            section: section.to_string(),
            key,
        })
    };

    Ok(AwsCredentials::new(
        get(ACCESS_KEY_ID)?,
        get(SECRET_ACCESS_KEY)?,
        section.to_string(),
    ))
}

/// MFA device settings for one profile, plus any keys still to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub section: String,
    pub serial_number: String,
    pub region: String,
    updates: Vec<(&'static str, String)>,
}

impl DeviceRecord {
    /// The stored record, if the profile already has an `mfa_serial`.
    pub fn stored(settings: &ConfigStore, profile: &str) -> Option<Self> {
        let section = settings_section(profile);
        let serial_number = settings.get(&section, MFA_SERIAL)?;
        let region = effective_region(settings, &section);

        Some(Self { section, serial_number, region, updates: Vec::new() })
    }

    /// A record for a freshly entered serial. Only unset keys are filled in.
    pub fn register(settings: &ConfigStore, profile: &str, serial_number: String) -> Self {
        let section = settings_section(profile);
        let mut updates = vec![(MFA_SERIAL, serial_number.clone())];

        let region = effective_region(settings, &section);
        if settings.get(&section, REGION).is_none() {
            updates.push((REGION, region.clone()));
        }
        if settings.get(&section, SOURCE_PROFILE).is_none() {
            updates.push((SOURCE_PROFILE, source_alias(profile)));
        }

        Self { section, serial_number, region, updates }
    }

    /// Whether the config file needs saving.
    pub fn is_dirty(&self) -> bool {
        !self.updates.is_empty()
    }

    /// Writes the pending keys into the device's config section.
    pub fn apply(&self, settings: &mut ConfigStore) {
        for (key, value) in &self.updates {
            settings.set(&self.section, key, value.as_str());
        }
    }
}

fn effective_region(settings: &ConfigStore, section: &str) -> String {
    settings
        .get(section, REGION)
        .or_else(|| settings.get(DEFAULT_PROFILE, REGION))
        .unwrap_or_else(|| FALLBACK_REGION.to_string())
}

/// Writes `session` over `profile`, first preserving `keys` under the alias.
///
/// An existing alias is never overwritten, so a second run keeps the original
/// long-term keys even though `keys` may have been read from the alias itself.
/// Only `aws_access_key_id`, `aws_secret_access_key` and `aws_session_token`
/// change in `[<profile>]`; other keys there stay as they were.
///
/// # Arguments
///
/// * `secrets` - The loaded credentials file, modified in memory only
/// * `profile` - aws-cli profile name receiving the session keys
/// * `keys` - Long-term keys used for the STS call
/// * `session` - Credentials returned by STS
pub fn apply_session(
    secrets: &mut ConfigStore,
    profile: &str,
    keys: &AwsCredentials,
    session: &SessionCredentials,
) {
    let alias = source_alias(profile);
    if !secrets.has_section(&alias) {
        secrets.set(&alias, ACCESS_KEY_ID, keys.access_key_id());
        secrets.set(&alias, SECRET_ACCESS_KEY, keys.secret_access_key());
    }

    secrets.set(profile, ACCESS_KEY_ID, session.access_key_id.as_str());
    secrets.set(profile, SECRET_ACCESS_KEY, session.secret_access_key.as_str());
    secrets.set(profile, SESSION_TOKEN, session.session_token.as_str());
}
