//! Client and server configuration.
//!
//! The configuration file is TOML:
//!
//! ```toml
//! [[servers]]
//! url = "https://files.example.org/api/"
//! alias = "work"
//! username = "me"
//! password = "secret"
//!
//! [server]
//! data_dir = "/var/lib/bush"
//! threads = 8
//! ```
use std::fs;
use std::path::{
    Path,
    PathBuf,
};

use log::debug;
use serde::Deserialize;

use crate::auth::Credential;
use crate::error::{
    Error,
    Result,
};

pub const CONFIG_ENV: &str = "BUSH_CONFIG";

/// Address `serve` binds when no URL was given.
pub const LOCAL_URL: &str = "http://127.0.0.1:5000/";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub servers: Vec<ServerProfile>,
    #[serde(default)]
    pub server: ServeSection,
}

/// One registry a client can talk to.
#[derive(Debug, Default, Clone, Deserialize, PartialEq)]
pub struct ServerProfile {
    pub url: Option<String>,
    pub alias: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Settings for `serve`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServeSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_threads")]
    pub threads: usize,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_threads() -> usize {
    4
}

impl Default for ServeSection {
    fn default() -> ServeSection {
        ServeSection {
            data_dir: default_data_dir(),
            threads: default_threads(),
            username: None,
            password: None,
        }
    }
}

impl ServeSection {
    /// The shared credential, if both halves are configured.
    pub fn credential(&self) -> Option<Credential> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some(Credential::new(u, p)),
            _ => None,
        }
    }
}

/// Locations searched for the configuration file, in order.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec!();
    if let Ok(v) = std::env::var(CONFIG_ENV) {
        paths.push(PathBuf::from(v));
    }
    if let Some(mut dir) = dirs::config_dir() {
        dir.push("bush");
        dir.push("config.toml");
        paths.push(dir);
    }
    if let Some(mut home) = dirs::home_dir() {
        home.push(".bush.toml");
        paths.push(home);
    }
    paths
}

pub fn parse(raw: &str) -> Result<Config> {
    match toml::from_str(raw) {
        Ok(v) => Ok(v),
        Err(e) => Err(Error::Config(e.to_string())),
    }
}

/// Load an explicitly named file. It has to exist.
pub fn load_from(path: &Path) -> Result<Config> {
    let raw = match fs::read_to_string(path) {
        Ok(v) => v,
        Err(e) => {
            return Err(Error::Config(format!("cannot read {}: {}", path.display(), e)));
        },
    };
    match parse(&raw) {
        Ok(v) => Ok(v),
        Err(e) => Err(Error::Config(format!("{}: {}", path.display(), e))),
    }
}

/// Load the first configuration file found, or an empty configuration.
pub fn load(path_override: Option<&Path>) -> Result<Config> {
    if let Some(p) = path_override {
        return load_from(p);
    }
    for p in config_paths() {
        if p.is_file() {
            debug!("using config {}", p.display());
            return load_from(&p);
        }
    }
    debug!("no config file found");
    Ok(Config::default())
}

/// Connection settings after merging flags with the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Pick the server to talk to.
///
/// An explicit `url` that equals a profile's url or alias selects that
/// profile; one that matches nothing is used as given. Without `url` the
/// first profile is used. Explicit username and password override the
/// profile's.
pub fn resolve_endpoint(config: &Config, url: Option<&str>, username: Option<&str>, password: Option<&str>) -> Result<Endpoint> {
    let profile = match url {
        Some(u) => {
            config.servers
                .iter()
                .find(|s| s.url.as_deref() == Some(u) || s.alias.as_deref() == Some(u))
                .cloned()
                .unwrap_or_default()
        },
        None => config.servers.first().cloned().unwrap_or_default(),
    };

    let url = match profile.url.clone().or_else(|| url.map(|v| v.to_string())) {
        Some(v) => v,
        None => {
            return Err(Error::Config(String::from("No URL specified, check your configuration or specify --url.")));
        },
    };

    Ok(Endpoint {
        url,
        username: username.map(|v| v.to_string()).or(profile.username),
        password: password.map(|v| v.to_string()).or(profile.password),
    })
}
