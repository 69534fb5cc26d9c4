//! Config file discovery, loading, and environment variable overlay.

use crate::{ArcamConfig, ConfigError};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/arcam/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("arcam/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("arcam.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

pub(crate) fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Deserialize a merged table. Missing keys take their defaults.
pub(crate) fn from_table(table: toml::Table, path: &Path) -> Result<ArcamConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`, key by key.
///
/// Nested tables merge recursively, so a later file only replaces the keys
/// it actually names. Arrays and scalars are replaced wholesale.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        let incoming = match value {
            toml::Value::Table(incoming) => incoming,
            other => {
                base.insert(key, other);
                continue;
            }
        };
        if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
            merge_tables(existing, incoming);
            continue;
        }
        base.insert(key, toml::Value::Table(incoming));
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut ArcamConfig, sources: &mut ConfigSources) {
    let credentials = &mut config.session.credentials;
    let string_overrides: [(&str, &mut String); 4] = [
        ("ARCAM_API_URL", &mut credentials.api_url),
        ("ARCAM_API_KEY", &mut credentials.api_key),
        ("ARCAM_SECRET_KEY", &mut credentials.secret_key),
        ("ARCAM_AUTH_KEY", &mut credentials.auth_key),
    ];
    for (var, slot) in string_overrides {
        if let Ok(v) = env::var(var) {
            *slot = v;
            sources.env_overrides.push(var.to_string());
        }
    }

    if let Ok(v) = env::var("ARCAM_REQUIRE_MICROPHONE") {
        if let Ok(flag) = v.parse() {
            config.session.capabilities.require_microphone = flag;
            sources.env_overrides.push("ARCAM_REQUIRE_MICROPHONE".to_string());
        }
    }

    if let Ok(v) = env::var("ARCAM_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("ARCAM_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CameraFacing;
    use std::io::Write;

    fn write_config(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn test_cli_override_is_last() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "override.toml", "[telemetry]\nlog_level = \"debug\"\n");

        let files = discover_config_files_with_override(Some(&path));
        assert_eq!(files.last(), Some(&path));
    }

    #[test]
    fn test_later_file_overrides_only_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_config(
            &dir,
            "first.toml",
            r#"
[session.credentials]
api_url = "https://one.example"
api_key = "k1"

[session.camera]
width = 1080
height = 1920
"#,
        );
        let second = write_config(
            &dir,
            "second.toml",
            r#"
[session.credentials]
api_key = "k2"

[session.camera]
facing = "back"
"#,
        );

        let mut merged = load_table(&first).unwrap();
        merge_tables(&mut merged, load_table(&second).unwrap());
        let config = from_table(merged, &second).unwrap();

        assert_eq!(config.session.credentials.api_url, "https://one.example");
        assert_eq!(config.session.credentials.api_key, "k2");
        assert_eq!(config.session.camera.width, 1080);
        assert_eq!(config.session.camera.height, 1920);
        assert_eq!(config.session.camera.facing, CameraFacing::Back);
    }

    #[test]
    fn test_load_files_records_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "arcam.toml", "[session.camera]\nzoom = 1.5\n");

        let (config, sources) = ArcamConfig::load_files(&[path.clone()]).unwrap();
        assert_eq!(config.session.camera.zoom, 1.5);
        assert_eq!(sources.files, vec![path]);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = load_table(Path::new("/nonexistent/arcam.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "bad.toml", "[session.camera]\nwidth = \"wide\"\n");

        let table = load_table(&path).unwrap();
        let err = from_table(table, &path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
