// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Connection settings for a CVAT server.
//!
//! A [`ConnectionConfig`] is an explicit value handed to
//! [`Client::connect`](crate::Client::connect); nothing in the library reads
//! a process-wide default. [`ConnectionConfig::from_env`] layers built-in
//! defaults, an optional `cvat.toml` in the platform configuration directory
//! and `CVAT_*` environment variables.

use crate::{Error, JobId, TaskId};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_URL: &str = "cvat.org";

/// Username and password used for the session login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Location of a CVAT server and the credentials to log into it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Host name, without protocol, e.g. `cvat.org` or `localhost`.
    pub url: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

fn default_use_tls() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            url: DEFAULT_URL.to_owned(),
            port: None,
            use_tls: true,
            credentials: None,
        }
    }
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        ConnectionConfig {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Path of the optional `cvat.toml` configuration file.
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("ai", "EdgeFirst", "cvat-sync")
            .map(|dirs| dirs.config_dir().join("cvat.toml"))
    }

    /// Loads the configuration from defaults, the configuration file and the
    /// environment, in increasing order of precedence.
    ///
    /// Recognized environment variables are `CVAT_URL`, `CVAT_PORT`,
    /// `CVAT_USE_TLS`, `CVAT_USERNAME` and `CVAT_PASSWORD`. Credentials are
    /// only set when both username and password are present.
    pub fn from_env() -> Result<Self, Error> {
        let mut builder = config::Config::builder()
            .set_default("url", DEFAULT_URL)?
            .set_default("use_tls", true)?;

        if let Some(path) = Self::config_path() {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("CVAT").try_parsing(true))
            .build()?;

        let port = match settings.get_int("port") {
            Ok(port) => Some(u16::try_from(port).map_err(|_| {
                Error::InvalidParameters(format!("port {} is out of range", port))
            })?),
            Err(config::ConfigError::NotFound(_)) => None,
            Err(err) => return Err(err.into()),
        };

        let credentials = match (
            settings.get_string("username").ok(),
            settings.get_string("password").ok(),
        ) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            _ => None,
        };

        Ok(ConnectionConfig {
            url: settings.get_string("url")?,
            port,
            use_tls: settings.get_bool("use_tls")?,
            credentials,
        })
    }

    /// Server root, e.g. `https://cvat.org` or `http://localhost:8080`.
    pub fn base_url(&self) -> String {
        let protocol = if self.use_tls { "https" } else { "http" };
        match self.port {
            Some(port) => format!("{}://{}:{}", protocol, self.url, port),
            None => format!("{}://{}", protocol, self.url),
        }
    }

    /// Root of the REST API.
    pub fn api_url(&self) -> String {
        format!("{}/api/v1", self.base_url())
    }

    /// Browser URL of a task.
    pub fn task_url(&self, task_id: TaskId) -> String {
        format!("{}/tasks/{}", self.base_url(), task_id)
    }

    /// Browser URL of a job inside a task.
    pub fn job_url(&self, task_id: TaskId, job_id: JobId) -> String {
        format!("{}/tasks/{}/jobs/{}", self.base_url(), task_id, job_id)
    }
}
