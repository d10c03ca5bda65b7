//! Configuration file structures for the bot.
//!
//! This module defines the configuration file format using YAML. All
//! account fields live under the `matrix` section.
//!
//! # Configuration File Format
//!
//! ```yaml
//! matrix:
//!   # Base URL of the homeserver
//!   homeserver_url: "https://matrix.example.org"
//!
//!   # Fully qualified Matrix user id of the bot account
//!   bot_username: "@bot:example.org"
//!
//!   # Password of the bot account
//!   bot_password: "secret-password"
//!
//!   # Optional static access token, bypasses login when set
//!   access_token: null
//!
//!   # Lifetime of a cached access token, in hours
//!   token_ttl_hours: 6
//! ```
//!
//! # Environment Variable Overrides
//!
//! Any value can be overridden with a `TEKIR_`-prefixed environment
//! variable using `__` as the section separator:
//!
//! ```bash
//! export TEKIR_MATRIX__HOMESERVER_URL="https://matrix.example.org"
//! export TEKIR_MATRIX__BOT_USERNAME="@bot:example.org"
//! export TEKIR_MATRIX__BOT_PASSWORD="secret-from-env"
//! ```
//!
//! Presence of the credentials is checked at login time, not at load time:
//! an empty configuration loads fine and fails later with a config error.

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::Deserialize;

use crate::matrix::UserCredentials;

/// Default lifetime of a cached access token, in hours.
const DEFAULT_TOKEN_TTL_HOURS: u64 = 6;

fn default_token_ttl_hours() -> u64 {
    DEFAULT_TOKEN_TTL_HOURS
}

/// Root configuration structure for the bot.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Matrix account configuration.
    #[serde(default)]
    pub matrix: Matrix,
}

impl Config {
    /// Load the configuration from a YAML file, with `TEKIR_`-prefixed
    /// environment variables taking precedence.
    ///
    /// A missing file is not an error; the configuration then comes from
    /// the environment alone.
    pub fn load(path: &str) -> Result<Config, figment::Error> {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("TEKIR_").split("__"))
            .extract()
    }
}

/// Matrix account configuration.
///
/// All fields except the token TTL are optional at load time; login fails
/// with a config error when a required one is absent.
#[derive(Debug, Deserialize)]
pub struct Matrix {
    /// Base URL of the homeserver, e.g. `https://matrix.example.org`.
    #[serde(default)]
    pub homeserver_url: Option<String>,

    /// Fully qualified Matrix user id of the bot account.
    ///
    /// Also used by the default handler to skip the bot's own messages.
    #[serde(default)]
    pub bot_username: Option<String>,

    /// Password of the bot account.
    #[serde(default)]
    pub bot_password: Option<String>,

    /// Static access token. When set, login and the token cache are
    /// bypassed.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Lifetime of a cached access token, in hours.
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u64,
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix {
            homeserver_url: None,
            bot_username: None,
            bot_password: None,
            access_token: None,
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
        }
    }
}

impl Matrix {
    /// The credentials handed to the Matrix client.
    pub fn credentials(&self) -> UserCredentials {
        UserCredentials {
            homeserver_url: self.homeserver_url.clone(),
            username: self.bot_username.clone(),
            password: self.bot_password.clone(),
            access_token: self.access_token.clone(),
            token_ttl_hours: self.token_ttl_hours,
        }
    }
}
