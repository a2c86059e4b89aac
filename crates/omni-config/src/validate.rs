//! Validation applied to the merged settings before the process starts.

use crate::defaults;
use crate::error::{ConfigError, ConfigResult};
use crate::model::{ServerMode, Settings};

/// Validate the merged settings for the selected mode.
///
/// # Errors
///
/// Returns the first violated constraint; startup maps these to exit code 1.
pub fn validate(settings: &Settings) -> ConfigResult<()> {
    if settings.registration_key.trim().is_empty() {
        return Err(ConfigError::MissingField {
            field: "registration_key",
        });
    }

    if settings.api_port == 0 {
        return Err(ConfigError::InvalidField {
            field: "api_port",
            value: Some("0".to_string()),
            reason: "zero_port",
        });
    }

    if settings.max_torrent_generation_workers == 0
        || settings.max_torrent_generation_workers > defaults::TORRENT_GENERATION_WORKERS_CAP
    {
        return Err(ConfigError::InvalidField {
            field: "max_torrent_generation_workers",
            value: Some(settings.max_torrent_generation_workers.to_string()),
            reason: "out_of_range",
        });
    }

    match settings.mode {
        ServerMode::Hub => validate_hub(settings),
        ServerMode::Site => validate_site(settings),
    }
}

fn validate_hub(settings: &Settings) -> ConfigResult<()> {
    if settings.tracker_port == 0 {
        return Err(ConfigError::InvalidField {
            field: "tracker_port",
            value: Some("0".to_string()),
            reason: "zero_port",
        });
    }
    if settings.link_port == 0 {
        return Err(ConfigError::InvalidField {
            field: "link_port",
            value: Some("0".to_string()),
            reason: "zero_port",
        });
    }
    if settings.database.database.trim().is_empty() {
        return Err(ConfigError::MissingField { field: "database" });
    }
    Ok(())
}

fn validate_site(settings: &Settings) -> ConfigResult<()> {
    let Some(url) = settings.site.main_server_url.as_deref() else {
        return Err(ConfigError::MissingField {
            field: "main_server_url",
        });
    };
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::InvalidField {
            field: "main_server_url",
            value: Some(url.to_string()),
            reason: "not_a_url",
        });
    }
    if settings.site.server_name.trim().is_empty() {
        return Err(ConfigError::MissingField {
            field: "server_name",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::base_settings;

    fn hub_settings() -> Settings {
        let mut settings = base_settings();
        settings.mode = ServerMode::Hub;
        settings.registration_key = "secret".to_string();
        settings
    }

    #[test]
    fn accepts_default_hub_settings() {
        assert!(validate(&hub_settings()).is_ok());
    }

    #[test]
    fn rejects_missing_registration_key() {
        let mut settings = hub_settings();
        settings.registration_key = "  ".to_string();
        assert!(matches!(
            validate(&settings),
            Err(ConfigError::MissingField {
                field: "registration_key"
            })
        ));
    }

    #[test]
    fn rejects_generation_worker_overflow() {
        let mut settings = hub_settings();
        settings.max_torrent_generation_workers = defaults::TORRENT_GENERATION_WORKERS_CAP + 1;
        assert!(matches!(
            validate(&settings),
            Err(ConfigError::InvalidField {
                field: "max_torrent_generation_workers",
                ..
            })
        ));
    }

    #[test]
    fn rejects_non_http_hub_url() {
        let mut settings = base_settings();
        settings.registration_key = "secret".to_string();
        settings.site.main_server_url = Some("ftp://hub".to_string());
        assert!(matches!(
            validate(&settings),
            Err(ConfigError::InvalidField {
                field: "main_server_url",
                ..
            })
        ));
    }
}
