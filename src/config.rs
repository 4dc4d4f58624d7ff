//! Configuration for the licence server.
//!
//! Settings are read from `Config.xml` (root element
//! `licence_server_config`); every field has a default, unknown elements
//! are ignored, and a missing file yields the defaults. Recognised
//! children: `datafolder`, `heartbeat`, `licencefolder`,
//! `maximumlogfilesize`, `numberoflogs`, `numberofthreads`, `port`,
//! `reloadtime`, `webserverport`, `enablewebserver`, `epassword`,
//! `password`, `username`.

use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use tracing::debug;

use crate::errors::{LicenceError, LicenceResult};
use crate::licence::document;

/// Default name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "Config.xml";

/// Default port for the licence server.
pub const DEFAULT_LICENCE_SERVER_PORT: u16 = 3180;

/// Default port for the web dashboard.
pub const DEFAULT_WEB_SERVER_PORT: u16 = 8080;

/// Lowest and highest acceptable web server ports.
pub const LOW_PORT: u16 = 1024;
pub const HIGH_PORT: u16 = 65535;

/// Default daily reload time of day.
pub const DEFAULT_RELOAD_TIME: &str = "02:30:00";

/// Licence server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Data folder, relative to the working directory; empty means the
    /// working directory itself.
    pub data_folder: String,
    /// Licence folder, same resolution rules as `data_folder`.
    pub licence_folder: String,
    /// Port the licence server listens on.
    pub port: u16,
    /// Port the web dashboard runs on.
    pub web_server_port: u16,
    /// Daily reload time of day, `HH:MM:SS`.
    pub reload_time: String,
    /// Size of the request worker pool.
    pub number_of_threads: usize,
    /// Client heartbeat period in seconds.
    pub heartbeat: u64,
    /// Whether the web dashboard is enabled.
    pub enable_web_server: bool,
    /// Maximum log file size before rotation.
    pub maximum_log_file_size: u64,
    /// Number of rotated log files to keep.
    pub number_of_logs: u32,
    /// Web dashboard login, plain password.
    pub password: String,
    /// Web dashboard login, encrypted password.
    pub e_password: String,
    /// Web dashboard login user name.
    pub user_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_folder: String::new(),
            licence_folder: String::new(),
            port: DEFAULT_LICENCE_SERVER_PORT,
            web_server_port: DEFAULT_WEB_SERVER_PORT,
            reload_time: DEFAULT_RELOAD_TIME.to_string(),
            number_of_threads: 5,
            heartbeat: 300,
            enable_web_server: false,
            maximum_log_file_size: 10000,
            number_of_logs: 10,
            password: String::new(),
            e_password: String::new(),
            user_name: String::new(),
        }
    }
}

fn trim_trailing_slash(uri: &str) -> &str {
    uri.strip_suffix('/').unwrap_or(uri)
}

impl ServerConfig {
    /// Parse configuration from an XML string, starting from the defaults.
    pub fn from_xml(xml: &str) -> LicenceResult<Self> {
        let root = document::parse(xml)?;
        if root.name != "licence_server_config" {
            return Err(LicenceError::ConfigError(format!(
                "unexpected root element '{}'",
                root.name
            )));
        }

        let mut config = Self::default();
        let text = |name: &str| root.child_text(name).map(str::to_string);
        let number = |name: &str| -> LicenceResult<Option<i64>> {
            match root.child_text(name) {
                None => Ok(None),
                Some(raw) => raw.trim().parse::<i64>().map(Some).map_err(|_| {
                    LicenceError::ConfigError(format!("'{name}' is not a number: '{raw}'"))
                }),
            }
        };

        if let Some(value) = text("datafolder") {
            config.data_folder = value;
        }
        if let Some(value) = number("heartbeat")? {
            // Non-positive heartbeats are ignored, keeping the default.
            if value > 0 {
                config.heartbeat = value as u64;
            }
        }
        if let Some(value) = text("licencefolder") {
            config.licence_folder = value;
        }
        if let Some(value) = number("maximumlogfilesize")? {
            config.maximum_log_file_size = value.max(0) as u64;
        }
        if let Some(value) = number("numberoflogs")? {
            config.number_of_logs = value.max(0) as u32;
        }
        if let Some(value) = number("numberofthreads")? {
            if value > 0 {
                config.number_of_threads = value as usize;
            }
        }
        if let Some(value) = number("port")? {
            config.port = u16::try_from(value)
                .map_err(|_| LicenceError::ConfigError(format!("'port' out of range: {value}")))?;
        }
        if let Some(value) = text("reloadtime") {
            config.reload_time = value;
        }
        if let Some(value) = number("webserverport")? {
            config.web_server_port = u16::try_from(value).map_err(|_| {
                LicenceError::ConfigError(format!("'webserverport' out of range: {value}"))
            })?;
        }
        if let Some(value) = text("enablewebserver") {
            config.enable_web_server = value == "true";
        }
        if let Some(value) = text("epassword") {
            config.e_password = value;
        }
        if let Some(value) = text("password") {
            config.password = value;
        }
        if let Some(value) = text("username") {
            config.user_name = value;
        }

        Ok(config)
    }

    /// Load the configuration file, or the defaults when it is absent.
    pub fn load(path: &Path) -> LicenceResult<Self> {
        if !path.is_file() {
            debug!("no configuration file at '{}', using defaults", path.display());
            return Ok(Self::default());
        }
        let xml = std::fs::read_to_string(path).map_err(|e| {
            LicenceError::ConfigError(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::from_xml(&xml)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LicenceResult<()> {
        if self.port == 0 {
            return Err(LicenceError::ConfigError(
                "port must be greater than 0".to_string(),
            ));
        }
        if !(LOW_PORT..=HIGH_PORT).contains(&self.web_server_port) {
            return Err(LicenceError::ConfigError(format!(
                "webserverport must be within {LOW_PORT}-{HIGH_PORT}"
            )));
        }
        if self.number_of_threads == 0 {
            return Err(LicenceError::ConfigError(
                "numberofthreads must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat == 0 {
            return Err(LicenceError::ConfigError(
                "heartbeat must be greater than 0".to_string(),
            ));
        }
        self.reload_time_of_day()?;
        Ok(())
    }

    /// The daily reload time of day.
    pub fn reload_time_of_day(&self) -> LicenceResult<NaiveTime> {
        NaiveTime::parse_from_str(&self.reload_time, "%H:%M:%S").map_err(|_| {
            LicenceError::ConfigError(format!(
                "reloadtime must be HH:MM:SS, got '{}'",
                self.reload_time
            ))
        })
    }

    /// Cron expression (sec min hour, daily) for the reload job. Firing at
    /// a wall-clock time of day gives the next occurrence today, or
    /// tomorrow when today's has passed.
    pub fn reload_cron(&self) -> LicenceResult<String> {
        let time = self.reload_time_of_day()?;
        use chrono::Timelike;
        Ok(format!(
            "{} {} {} * * *",
            time.second(),
            time.minute(),
            time.hour()
        ))
    }

    fn resolve_folder(folder: &str) -> PathBuf {
        let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        if folder.is_empty() {
            base
        } else {
            base.join(folder)
        }
    }

    /// Full path to the data folder.
    pub fn data_folder_path(&self) -> PathBuf {
        Self::resolve_folder(&self.data_folder)
    }

    /// Full path to the licence folder.
    pub fn licence_folder_path(&self) -> PathBuf {
        Self::resolve_folder(&self.licence_folder)
    }

    /// Full path to the database file.
    pub fn data_file(&self) -> PathBuf {
        self.data_folder_path()
            .join(crate::server::store::DATABASE_FILE_NAME)
    }

    /// Whether the configuration carries an encrypted password.
    pub fn has_encrypted_password(&self) -> bool {
        !self.e_password.trim().is_empty()
    }

    /// Whether the web dashboard is secured with a login.
    pub fn is_secure_web_server(&self) -> bool {
        if self.has_encrypted_password() || !self.password.trim().is_empty() {
            return !self.user_name.trim().is_empty();
        }
        false
    }

    /// Address the web dashboard is reachable at, or an empty string when
    /// it is disabled.
    pub fn web_server_address(&self) -> String {
        if !self.enable_web_server {
            return String::new();
        }
        let uri = format!("http://localhost:{}", self.web_server_port);
        trim_trailing_slash(&uri).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 3180);
        assert_eq!(config.web_server_port, 8080);
        assert_eq!(config.reload_time, "02:30:00");
        assert_eq!(config.heartbeat, 300);
        assert_eq!(config.number_of_threads, 5);
        assert!(!config.enable_web_server);
    }

    #[test]
    fn parses_known_elements() {
        let config = ServerConfig::from_xml(
            "<licence_server_config>\
                 <datafolder>Data</datafolder>\
                 <licencefolder>Licences</licencefolder>\
                 <heartbeat>120</heartbeat>\
                 <numberofthreads>8</numberofthreads>\
                 <port>4000</port>\
                 <reloadtime>03:15:00</reloadtime>\
                 <webserverport>9090</webserverport>\
                 <enablewebserver>true</enablewebserver>\
                 <username>admin</username>\
                 <password>secret</password>\
             </licence_server_config>",
        )
        .unwrap();
        assert_eq!(config.data_folder, "Data");
        assert_eq!(config.licence_folder, "Licences");
        assert_eq!(config.heartbeat, 120);
        assert_eq!(config.number_of_threads, 8);
        assert_eq!(config.port, 4000);
        assert_eq!(config.reload_time, "03:15:00");
        assert_eq!(config.web_server_port, 9090);
        assert!(config.enable_web_server);
        assert!(config.is_secure_web_server());
        assert!(!config.has_encrypted_password());
    }

    #[test]
    fn ignores_unknown_elements() {
        let config = ServerConfig::from_xml(
            "<licence_server_config>\
                 <heartbeat>60</heartbeat>\
                 <somethingelse>ignored</somethingelse>\
             </licence_server_config>",
        )
        .unwrap();
        assert_eq!(config.heartbeat, 60);
    }

    #[test]
    fn non_positive_guarded_values_keep_defaults() {
        let config = ServerConfig::from_xml(
            "<licence_server_config>\
                 <heartbeat>0</heartbeat>\
                 <numberofthreads>-3</numberofthreads>\
             </licence_server_config>",
        )
        .unwrap();
        assert_eq!(config.heartbeat, 300);
        assert_eq!(config.number_of_threads, 5);
    }

    #[test]
    fn rejects_wrong_root() {
        assert!(ServerConfig::from_xml("<other />").is_err());
    }

    #[test]
    fn validates_web_server_port_range() {
        let mut config = ServerConfig::default();
        config.web_server_port = 80;
        assert!(config.validate().is_err());
        config.web_server_port = 1024;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validates_reload_time() {
        let mut config = ServerConfig::default();
        config.reload_time = "25:00:00".to_string();
        assert!(config.validate().is_err());
        config.reload_time = "not a time".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reload_cron_matches_time_of_day() {
        let config = ServerConfig::default();
        assert_eq!(config.reload_cron().unwrap(), "0 30 2 * * *");
        let mut config = ServerConfig::default();
        config.reload_time = "23:05:10".to_string();
        assert_eq!(config.reload_cron().unwrap(), "10 5 23 * * *");
    }

    #[test]
    fn web_server_address_empty_when_disabled() {
        let mut config = ServerConfig::default();
        assert_eq!(config.web_server_address(), "");
        config.enable_web_server = true;
        assert_eq!(config.web_server_address(), "http://localhost:8080");
    }

    #[test]
    fn secure_web_server_requires_user_name() {
        let mut config = ServerConfig::default();
        config.password = "secret".to_string();
        assert!(!config.is_secure_web_server());
        config.user_name = "admin".to_string();
        assert!(config.is_secure_web_server());
        config.password.clear();
        config.e_password = "0badf00d".to_string();
        assert!(config.is_secure_web_server());
        assert!(config.has_encrypted_password());
    }
}
