//! Key=value configuration file parsing with environment overrides.
//!
//! The file format is one `key=value` pair per line; blank lines and `#`
//! comments are ignored. Every recognized key can be overridden by an
//! environment variable of the same name uppercased (`api_port` →
//! `API_PORT`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::defaults;
use crate::error::{ConfigError, ConfigResult};
use crate::model::{DatabaseSettings, ServerMode, Settings, SiteSettings, TransferLimits};
use crate::validate;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/omnicloud/auth.config";

/// Keys recognized by the loader, used to drive environment overrides.
const KNOWN_KEYS: &[&str] = &[
    "host",
    "port",
    "database",
    "user",
    "password",
    "scan_interval",
    "api_port",
    "server_mode",
    "registration_key",
    "main_server_url",
    "server_name",
    "location",
    "library_dirs",
    "tracker_port",
    "torrent_data_port",
    "torrent_data_dir",
    "state_dir",
    "link_port",
    "max_upload_rate",
    "max_download_rate",
    "max_concurrent_seeds",
    "max_concurrent_downloads",
    "piece_hash_workers",
    "max_torrent_generation_workers",
    "relay_enabled",
    "relay_port",
    "relay_max_sessions",
];

/// Load, merge and validate settings from the given file path.
///
/// A missing file is not an error: sites are frequently configured through
/// the environment alone. Validation failures are.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be parsed, if a value
/// fails to parse into its typed form, or if validation rejects the merged
/// result.
pub fn load_settings(path: &Path) -> ConfigResult<Settings> {
    let mut values = BTreeMap::new();

    match std::fs::read_to_string(path) {
        Ok(contents) => parse_lines(path, &contents, &mut values)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "configuration file not found; using environment and defaults");
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    for key in KNOWN_KEYS {
        if let Ok(value) = std::env::var(key.to_ascii_uppercase()) {
            values.insert((*key).to_string(), value);
        }
    }

    let settings = settings_from_values(&values)?;
    validate::validate(&settings)?;
    Ok(settings)
}

fn parse_lines(
    path: &Path,
    contents: &str,
    values: &mut BTreeMap<String, String>,
) -> ConfigResult<()> {
    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::MalformedLine {
                path: path.to_path_buf(),
                line: index + 1,
            });
        };
        let key = key.trim().to_ascii_lowercase();
        if !KNOWN_KEYS.contains(&key.as_str()) {
            warn!(key = %key, "ignoring unrecognized configuration key");
            continue;
        }
        values.insert(key, value.trim().to_string());
    }
    Ok(())
}

/// Settings populated purely from defaults, before file and environment.
#[must_use]
pub fn base_settings() -> Settings {
    Settings {
        mode: ServerMode::Site,
        api_port: defaults::API_PORT,
        tracker_port: defaults::TRACKER_PORT,
        torrent_data_port: defaults::TORRENT_DATA_PORT,
        link_port: defaults::LINK_PORT,
        database: DatabaseSettings {
            host: "127.0.0.1".to_string(),
            port: defaults::DATABASE_PORT,
            database: "omnicloud".to_string(),
            user: "omnicloud".to_string(),
            password: String::new(),
        },
        registration_key: String::new(),
        torrent_data_dir: PathBuf::from(defaults::TORRENT_DATA_DIR),
        state_dir: PathBuf::from(defaults::STATE_DIR),
        limits: TransferLimits::default(),
        piece_hash_workers: 0,
        max_torrent_generation_workers: defaults::MAX_TORRENT_GENERATION_WORKERS,
        relay_enabled: false,
        relay_port: defaults::RELAY_PORT,
        relay_max_sessions: defaults::RELAY_MAX_SESSIONS,
        site: SiteSettings {
            main_server_url: None,
            server_name: hostname_or_default(),
            location: String::new(),
            library_dirs: Vec::new(),
            scan_interval_hours: defaults::SCAN_INTERVAL_HOURS,
        },
    }
}

fn hostname_or_default() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "omnicloud-site".to_string())
}

fn settings_from_values(values: &BTreeMap<String, String>) -> ConfigResult<Settings> {
    let mut settings = base_settings();

    for (key, value) in values {
        apply_value(&mut settings, key, value)?;
    }

    if settings.site.library_dirs.is_empty() {
        settings.site.library_dirs = vec![settings.torrent_data_dir.clone()];
    }

    Ok(settings)
}

fn apply_value(settings: &mut Settings, key: &str, value: &str) -> ConfigResult<()> {
    match key {
        "host" => settings.database.host = value.to_string(),
        "port" => settings.database.port = parse_number("port", value)?,
        "database" => settings.database.database = value.to_string(),
        "user" => settings.database.user = value.to_string(),
        "password" => settings.database.password = value.to_string(),
        "scan_interval" => settings.site.scan_interval_hours = parse_number("scan_interval", value)?,
        "api_port" => settings.api_port = parse_number("api_port", value)?,
        "server_mode" => settings.mode = ServerMode::parse(value)?,
        "registration_key" => settings.registration_key = value.to_string(),
        "main_server_url" => settings.site.main_server_url = Some(value.to_string()),
        "server_name" => settings.site.server_name = value.to_string(),
        "location" => settings.site.location = value.to_string(),
        "library_dirs" => {
            settings.site.library_dirs = value
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        "tracker_port" => settings.tracker_port = parse_number("tracker_port", value)?,
        "torrent_data_port" => settings.torrent_data_port = parse_number("torrent_data_port", value)?,
        "torrent_data_dir" => settings.torrent_data_dir = PathBuf::from(value),
        "state_dir" => settings.state_dir = PathBuf::from(value),
        "link_port" => settings.link_port = parse_number("link_port", value)?,
        "max_upload_rate" => settings.limits.max_upload_rate = parse_number("max_upload_rate", value)?,
        "max_download_rate" => settings.limits.max_download_rate = parse_number("max_download_rate", value)?,
        "max_concurrent_seeds" => settings.limits.max_concurrent_seeds = parse_number("max_concurrent_seeds", value)?,
        "max_concurrent_downloads" => {
            settings.limits.max_concurrent_downloads = parse_number("max_concurrent_downloads", value)?;
        }
        "piece_hash_workers" => settings.piece_hash_workers = parse_number("piece_hash_workers", value)?,
        "max_torrent_generation_workers" => {
            settings.max_torrent_generation_workers = parse_number("max_torrent_generation_workers", value)?;
        }
        "relay_enabled" => settings.relay_enabled = parse_bool(value),
        "relay_port" => settings.relay_port = parse_number("relay_port", value)?,
        "relay_max_sessions" => settings.relay_max_sessions = parse_number("relay_max_sessions", value)?,
        _ => {}
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidField {
            field,
            value: Some(value.to_string()),
            reason: "not_a_number",
        })
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn parses_hub_configuration() {
        let file = write_config(
            "# hub settings\n\
             server_mode=hub\n\
             host=db.internal\n\
             port=5433\n\
             database=omni\n\
             user=omni\n\
             password=pw\n\
             registration_key=fleet-secret\n\
             api_port=8080\n\
             tracker_port=7000\n",
        );
        let settings = load_settings(file.path()).expect("load settings");
        assert_eq!(settings.mode, ServerMode::Hub);
        assert_eq!(settings.api_port, 8080);
        assert_eq!(settings.tracker_port, 7000);
        assert!(settings.database.connect_url().contains("db.internal"));
    }

    #[test]
    fn site_mode_requires_main_server_url() {
        let file = write_config("server_mode=site\nregistration_key=k\n");
        let err = load_settings(file.path()).expect_err("must reject");
        assert!(matches!(err, ConfigError::MissingField { field } if field == "main_server_url"));
    }

    #[test]
    fn malformed_line_is_reported_with_its_number() {
        let file = write_config("server_mode=hub\nthis is not a pair\n");
        let err = load_settings(file.path()).expect_err("must reject");
        assert!(matches!(err, ConfigError::MalformedLine { line: 2, .. }));
    }

    #[test]
    fn library_dirs_split_on_commas() {
        let file = write_config(
            "server_mode=site\n\
             registration_key=k\n\
             main_server_url=http://hub:9080\n\
             library_dirs=/mnt/dcp-a, /mnt/dcp-b\n",
        );
        let settings = load_settings(file.path()).expect("load settings");
        assert_eq!(settings.site.library_dirs.len(), 2);
        assert_eq!(settings.site.library_dirs[1], PathBuf::from("/mnt/dcp-b"));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let file = write_config(
            "server_mode=hub\nregistration_key=k\nfuture_knob=1\n",
        );
        assert!(load_settings(file.path()).is_ok());
    }
}
