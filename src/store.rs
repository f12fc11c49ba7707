//! INI-backed storage for the AWS credentials and config files.
//!
//! Wraps `configparser` in case-sensitive mode with a private default section,
//! so a real `[default]` profile is an ordinary section. Keys found before the
//! first header are kept and written back without one.
//!
//! Parsing follows aws-cli's reading of these files: `;` and `#` only start a
//! comment at the beginning of a line, and indented continuation lines belong
//! to the key above them (nested settings such as `s3 =` blocks).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use configparser::ini::{Ini, IniDefault};
use log::debug;
use tokio::{fs, io::AsyncWriteExt};

use crate::error::Error;

/// Holds keys that appear before any `[section]` header.
const HEADERLESS_SECTION: &str = "\u{0}aws2fa-headerless";

/// One AWS shared file (`~/.aws/credentials` or `~/.aws/config`) held in memory.
///
/// Sections and keys keep their file order. Every section is written back on
/// [`ConfigStore::save`], whether or not it was touched.
///
/// # Example
///
/// ```no_run
/// let mut store = ConfigStore::load("/home/me/.aws/config").await?;
/// store.set("profile dev", "region", "eu-west-1");
/// store.save().await?;
/// ```
pub struct ConfigStore {
    path: PathBuf,
    ini: Ini,
    restricted: bool,
}

impl ConfigStore {
    /// Loads `path`, yielding an empty store when the file does not exist.
    ///
    /// # Arguments
    ///
    /// * `path` - Location of the file. It is remembered for [`ConfigStore::save`].
    ///
    /// # Returns
    ///
    /// * `Ok(ConfigStore)` - The parsed file, or an empty store for a missing file
    /// * `Err(anyhow::Error)` - The file could not be read, or it is malformed
    ///   ([`Error::ConfigParse`], e.g. an unterminated `[section` header)
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut ini = new_ini();

        if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            ini.read(content).map_err(|message| Error::ConfigParse {
                path: path.clone(),
                message,
            })?;
        } else {
            debug!("{} does not exist, starting empty", path.display());
        }

        let store = Self { path, ini, restricted: false };
        debug!("Loaded {:?} from {}", store.sections(), store.path.display());
        Ok(store)
    }

    /// Writes the file with owner-only permissions on unix.
    pub fn restrict_permissions(mut self) -> Self {
        self.restricted = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.ini.get_map_ref().contains_key(name)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        self.ini.get(section, key)
    }

    /// Sets `key` in `section`, creating the section when needed.
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.ini.set(section, key, Some(value.into()));
    }

    /// Key/value pairs of a section. Keys declared without a value are skipped.
    pub fn section(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.ini.get_map_ref().get(name).map(|entries| {
            entries
                .iter()
                .filter_map(|(key, value)| value.clone().map(|value| (key.clone(), value)))
                .collect()
        })
    }

    /// Section names in file order.
    pub fn sections(&self) -> Vec<String> {
        self.ini
            .get_map_ref()
            .keys()
            .filter(|name| name.as_str() != HEADERLESS_SECTION)
            .cloned()
            .collect()
    }

    /// Replaces the file on disk with the current contents.
    ///
    /// The contents go to a sibling staging file first, which is then renamed
    /// over the target, so an interrupted save never leaves a truncated file.
    /// On unix the staging file is created with its final mode: `0600` for a
    /// restricted store, otherwise the mode of the file being replaced.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The file now holds the store's contents
    /// * `Err(anyhow::Error)` - Directory creation, the write or the rename
    ///   failed. The staging file is removed and the original file is untouched.
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let staging = staging_path(&self.path);
        if let Err(err) = self.replace_via(&staging).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err);
        }
        debug!("Saved {}", self.path.display());

        Ok(())
    }

    async fn replace_via(&self, staging: &Path) -> Result<()> {
        // A leftover from an interrupted run may carry a looser mode.
        let _ = fs::remove_file(staging).await;

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);

        #[cfg(unix)]
        let mode = self.file_mode().await;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = mode {
                options.mode(mode);
            }
            let mut file = options
                .open(staging)
                .await
                .with_context(|| format!("Failed to create {}", staging.display()))?;
            // The umask may have narrowed the requested mode.
            if let Some(mode) = mode {
                fs::set_permissions(staging, std::fs::Permissions::from_mode(mode)).await?;
            }
            self.write_contents(&mut file, staging).await?;
        }
        #[cfg(not(unix))]
        {
            let mut file = options
                .open(staging)
                .await
                .with_context(|| format!("Failed to create {}", staging.display()))?;
            self.write_contents(&mut file, staging).await?;
        }

        fs::rename(staging, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))
    }

    async fn write_contents(&self, file: &mut fs::File, staging: &Path) -> Result<()> {
        file.write_all(self.ini.writes().as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        file.sync_all().await?;
        Ok(())
    }

    /// Mode for the staging file, if one should be forced.
    #[cfg(unix)]
    async fn file_mode(&self) -> Option<u32> {
        use std::os::unix::fs::PermissionsExt;

        if self.restricted {
            return Some(0o600);
        }
        fs::metadata(&self.path)
            .await
            .ok()
            .map(|meta| meta.permissions().mode() & 0o7777)
    }
}

fn new_ini() -> Ini {
    let mut defaults = IniDefault::default();
    defaults.case_sensitive = true;
    defaults.enable_inline_comments = false;
    defaults.multiline = true;
    defaults.default_section = HEADERLESS_SECTION.into();
    Ini::new_from_defaults(defaults)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".aws2fa-tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entries(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::load(dir.path().join("credentials")).await.unwrap();

        assert!(store.sections().is_empty());
        assert!(!store.has_section("default"));
    }

    #[tokio::test]
    async fn default_section_is_an_ordinary_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(&path, "[default]\naws_access_key_id = ID\naws_secret_access_key = SECRET\n")
            .unwrap();

        let mut store = ConfigStore::load(&path).await.unwrap();
        assert_eq!(store.get("default", "aws_access_key_id").as_deref(), Some("ID"));

        store.set("default", "aws_session_token", "TOKEN");
        store.save().await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[default]"));

        let reloaded = ConfigStore::load(&path).await.unwrap();
        assert_eq!(
            reloaded.section("default").unwrap(),
            entries(&[
                ("aws_access_key_id", "ID"),
                ("aws_secret_access_key", "SECRET"),
                ("aws_session_token", "TOKEN"),
            ])
        );
    }

    #[tokio::test]
    async fn section_names_are_case_sensitive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "[Dev]\nregion = eu-west-1\n\n[dev]\nregion = us-west-2\n").unwrap();

        let store = ConfigStore::load(&path).await.unwrap();

        assert_eq!(store.get("Dev", "region").as_deref(), Some("eu-west-1"));
        assert_eq!(store.get("dev", "region").as_deref(), Some("us-west-2"));
    }

    #[tokio::test]
    async fn save_keeps_unrelated_sections_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            "[profile zeta]\nregion = ap-northeast-1\n\n[default]\nregion = eu-west-1\n\n[profile alpha]\noutput = json\n",
        )
        .unwrap();

        let mut store = ConfigStore::load(&path).await.unwrap();
        store.set("profile alpha", "mfa_serial", "arn:aws:iam::123456789012:mfa/alpha");
        store.save().await.unwrap();

        let reloaded = ConfigStore::load(&path).await.unwrap();
        assert_eq!(reloaded.sections(), vec!["profile zeta", "default", "profile alpha"]);
        assert_eq!(
            reloaded.section("profile zeta").unwrap(),
            entries(&[("region", "ap-northeast-1")])
        );
        assert_eq!(
            reloaded.section("profile alpha").unwrap(),
            entries(&[("output", "json"), ("mfa_serial", "arn:aws:iam::123456789012:mfa/alpha")])
        );
    }

    #[tokio::test]
    async fn malformed_file_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(&path, "[default\naws_access_key_id = ID\n").unwrap();

        let err = ConfigStore::load(&path).await.err().unwrap();

        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ConfigParse { .. })));
    }

    #[tokio::test]
    async fn save_creates_parent_and_leaves_no_staging_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".aws").join("credentials");

        let mut store = ConfigStore::load(&path).await.unwrap();
        store.set("dev", "aws_access_key_id", "ID");
        store.save().await.unwrap();

        assert!(path.exists());
        assert!(!staging_path(&path).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn restricted_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials");

        let mut store = ConfigStore::load(&path).await.unwrap().restrict_permissions();
        store.set("dev", "aws_access_key_id", "ID");
        store.save().await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn comment_characters_inside_values_survive_a_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            "# managed by hand\n\
             [profile other]\n\
             credential_process = sh -c \"echo a; echo b\"\n\
             sso_start_url = https://d-123.awsapps.com/start#/\n",
        )
        .unwrap();

        let mut store = ConfigStore::load(&path).await.unwrap();
        store.set("profile dev", "region", "eu-west-1");
        store.save().await.unwrap();

        let reloaded = ConfigStore::load(&path).await.unwrap();
        assert_eq!(
            reloaded.section("profile other").unwrap(),
            entries(&[
                ("credential_process", "sh -c \"echo a; echo b\""),
                ("sso_start_url", "https://d-123.awsapps.com/start#/"),
            ])
        );
    }

    #[tokio::test]
    async fn nested_settings_stay_nested() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            "[profile other]\nregion = eu-west-1\ns3 =\n    max_concurrent_requests = 20\n",
        )
        .unwrap();

        let mut store = ConfigStore::load(&path).await.unwrap();
        let nested = store.get("profile other", "s3").unwrap();
        assert!(nested.contains("max_concurrent_requests = 20"));
        assert!(store.get("profile other", "max_concurrent_requests").is_none());

        store.set("profile dev", "region", "eu-west-1");
        store.save().await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.lines().any(|line| {
            line.starts_with(char::is_whitespace)
                && line.trim_start() == "max_concurrent_requests = 20"
        }));

        let reloaded = ConfigStore::load(&path).await.unwrap();
        assert_eq!(reloaded.get("profile other", "s3"), Some(nested));
        assert!(reloaded.get("profile other", "max_concurrent_requests").is_none());
        assert_eq!(reloaded.get("profile other", "region").as_deref(), Some("eu-west-1"));
    }

    #[tokio::test]
    async fn headerless_keys_never_merge_into_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "output = json\n\n[default]\nregion = eu-west-1\n").unwrap();

        let mut store = ConfigStore::load(&path).await.unwrap();
        assert_eq!(store.sections(), vec!["default"]);
        assert_eq!(store.section("default").unwrap(), entries(&[("region", "eu-west-1")]));

        store.set("default", "mfa_serial", "device-arn");
        store.save().await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let first = written.lines().find(|line| !line.trim().is_empty()).unwrap();
        assert!(!first.starts_with('['));
        assert!(first.contains("json"));

        let reloaded = ConfigStore::load(&path).await.unwrap();
        assert_eq!(reloaded.sections(), vec!["default"]);
        assert_eq!(
            reloaded.section("default").unwrap(),
            entries(&[("region", "eu-west-1"), ("mfa_serial", "device-arn")])
        );
    }

    #[tokio::test]
    async fn failed_rename_removes_staging_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), "").unwrap();

        let mut store = ConfigStore::load(dir.path().join("elsewhere")).await.unwrap();
        store.set("dev", "aws_access_key_id", "ID");
        store.path = path.clone();

        assert!(store.save().await.is_err());
        assert!(!staging_path(&path).exists());
        assert!(path.join("occupied").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn save_keeps_existing_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "[default]\nregion = eu-west-1\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();

        let mut store = ConfigStore::load(&path).await.unwrap();
        store.set("default", "output", "json");
        store.save().await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn restricted_store_tightens_a_loose_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(&path, "[dev]\naws_access_key_id = ID\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = ConfigStore::load(&path).await.unwrap().restrict_permissions();
        store.save().await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
