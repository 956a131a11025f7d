//! Configuration for dbsync.
//!
//! Configuration is an explicit [`SyncConfig`] value handed to the engine;
//! nothing reads process state after construction. It can be seeded from a
//! TOML file and is then overlaid with `DBSYNC_*` environment variables.
//! Passwords are never written in the file itself: the file names an
//! environment variable (`password_env`) which is resolved at load time.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::models::{Endpoint, Role};

/// Prefix shared by every environment variable the tool reads.
pub const ENV_PREFIX: &str = "DBSYNC";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// The local (authoritative) database.
    #[serde(default = "EndpointConfig::local_default")]
    pub local: EndpointConfig,

    /// The remote / cloud database.
    #[serde(default = "EndpointConfig::remote_default")]
    pub remote: EndpointConfig,

    /// Sync behaviour settings.
    #[serde(default)]
    pub sync: SyncOptions,

    /// Log artifact settings.
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            local: EndpointConfig::local_default(),
            remote: EndpointConfig::remote_default(),
            sync: SyncOptions::default(),
            log: LogConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Connection settings for one database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub user: String,

    /// Environment variable holding the password.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Whether the server must be reached over TLS.
    #[serde(default)]
    pub require_tls: bool,

    /// Skip certificate verification when TLS is required.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Schema whose tables are synchronized.
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Resolved password (populated from the environment).
    #[serde(skip)]
    pub password: Option<String>,
}

fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    5432
}
fn default_schema() -> String {
    "public".into()
}

impl EndpointConfig {
    fn local_default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: String::new(),
            user: String::new(),
            password_env: None,
            require_tls: false,
            accept_invalid_certs: false,
            schema: default_schema(),
            password: None,
        }
    }

    fn remote_default() -> Self {
        Self {
            host: String::new(),
            require_tls: true,
            ..Self::local_default()
        }
    }

    /// Build the runtime endpoint for this database in the given role.
    pub fn endpoint(&self, name: &str, role: Role) -> Endpoint {
        Endpoint {
            role,
            name: name.to_string(),
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            user: self.user.clone(),
            password: self.password.clone().unwrap_or_default(),
            require_tls: self.require_tls,
            accept_invalid_certs: self.accept_invalid_certs,
            schema: self.schema.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync behaviour
// ---------------------------------------------------------------------------

/// Sync behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Glob patterns of tables never synchronized (framework bookkeeping).
    #[serde(default = "default_exclude_tables")]
    pub exclude_tables: Vec<String>,

    /// Also derive dependency edges from `<parent>_id` column names.
    #[serde(default = "default_true")]
    pub infer_foreign_keys: bool,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_secs: u64,

    /// Upper bound on the whole pre-start sync.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
}

fn default_exclude_tables() -> Vec<String> {
    vec!["django_*".into(), "auth_*".into()]
}
fn default_true() -> bool {
    true
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_statement_timeout() -> u64 {
    60
}
fn default_startup_timeout() -> u64 {
    300
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            exclude_tables: default_exclude_tables(),
            infer_foreign_keys: true,
            connect_timeout_secs: default_connect_timeout(),
            statement_timeout_secs: default_statement_timeout(),
            startup_timeout_secs: default_startup_timeout(),
        }
    }
}

impl SyncOptions {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log artifact configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Append-only detailed log file.
    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_file() -> PathBuf {
    PathBuf::from("database_sync.log")
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl SyncConfig {
    /// Load a [`SyncConfig`] from a TOML file at the given path.
    ///
    /// This does **not** apply the environment -- call
    /// [`apply_env`](Self::apply_env) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: SyncConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Overlay the process environment onto this config.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlay variables from `lookup` onto this config.
    ///
    /// `DBSYNC_<DB>_{HOST,PORT,DATABASE,USER,PASSWORD,REQUIRE_TLS,
    /// ACCEPT_INVALID_CERTS,SCHEMA}` for `<DB>` in `LOCAL` / `REMOTE`, plus
    /// the global `DBSYNC_*` tuning variables. A `password_env` named in the
    /// file is resolved through the same lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        info!("resolving environment configuration");
        let get = |key: &str| {
            lookup(&format!("{}_{}", ENV_PREFIX, key)).filter(|v| !v.trim().is_empty())
        };

        apply_endpoint_env(&mut self.local, "LOCAL", &get, &lookup)?;
        apply_endpoint_env(&mut self.remote, "REMOTE", &get, &lookup)?;

        if let Some(v) = get("EXCLUDE_TABLES") {
            self.sync.exclude_tables = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = get("INFER_FOREIGN_KEYS") {
            self.sync.infer_foreign_keys = parse_bool("sync.infer_foreign_keys", &v)?;
        }
        if let Some(v) = get("CONNECT_TIMEOUT_SECS") {
            self.sync.connect_timeout_secs = parse_u64("sync.connect_timeout_secs", &v)?;
        }
        if let Some(v) = get("STATEMENT_TIMEOUT_SECS") {
            self.sync.statement_timeout_secs = parse_u64("sync.statement_timeout_secs", &v)?;
        }
        if let Some(v) = get("STARTUP_TIMEOUT_SECS") {
            self.sync.startup_timeout_secs = parse_u64("sync.startup_timeout_secs", &v)?;
        }
        if let Some(v) = get("LOG_FILE") {
            self.log.file = PathBuf::from(v);
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log.level = v;
        }

        debug!("environment resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.local, "local", false)?;
        validate_endpoint(&self.remote, "remote", true)?;

        if self.sync.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.connect_timeout_secs".into(),
                detail: "timeout must be > 0".into(),
            });
        }
        if self.sync.statement_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.statement_timeout_secs".into(),
                detail: "timeout must be > 0".into(),
            });
        }
        Ok(())
    }

    /// Convenience: optional file, then environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::load_from_file(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }
}

fn apply_endpoint_env<G, L>(
    endpoint: &mut EndpointConfig,
    db: &str,
    get: &G,
    lookup: &L,
) -> Result<(), ConfigError>
where
    G: Fn(&str) -> Option<String>,
    L: Fn(&str) -> Option<String>,
{
    let prefix = db.to_ascii_lowercase();

    if let Some(v) = get(&format!("{db}_HOST")) {
        endpoint.host = v;
    }
    if let Some(v) = get(&format!("{db}_PORT")) {
        endpoint.port = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
            field: format!("{prefix}.port"),
            detail: format!("'{v}' is not a port number"),
        })?;
    }
    if let Some(v) = get(&format!("{db}_DATABASE")) {
        endpoint.database = v;
    }
    if let Some(v) = get(&format!("{db}_USER")) {
        endpoint.user = v;
    }
    if let Some(v) = get(&format!("{db}_REQUIRE_TLS")) {
        endpoint.require_tls = parse_bool(&format!("{prefix}.require_tls"), &v)?;
    }
    if let Some(v) = get(&format!("{db}_ACCEPT_INVALID_CERTS")) {
        endpoint.accept_invalid_certs =
            parse_bool(&format!("{prefix}.accept_invalid_certs"), &v)?;
    }
    if let Some(v) = get(&format!("{db}_SCHEMA")) {
        endpoint.schema = v;
    }

    if let Some(v) = get(&format!("{db}_PASSWORD")) {
        endpoint.password = Some(v);
    } else if let Some(ref env_name) = endpoint.password_env {
        match lookup(env_name).filter(|v| !v.is_empty()) {
            Some(v) => {
                debug!(field = %format!("{prefix}.password_env"), env_name, "resolved env var");
                endpoint.password = Some(v);
            }
            None => {
                return Err(ConfigError::EnvVarMissing {
                    var: env_name.clone(),
                    field: format!("{prefix}.password_env"),
                });
            }
        }
    }
    Ok(())
}

fn validate_endpoint(
    endpoint: &EndpointConfig,
    name: &str,
    password_required: bool,
) -> Result<(), ConfigError> {
    let required = [
        ("host", &endpoint.host),
        ("database", &endpoint.database),
        ("user", &endpoint.user),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(ConfigError::EnvVarMissing {
                var: format!("{}_{}_{}", ENV_PREFIX, name.to_ascii_uppercase(), field.to_ascii_uppercase()),
                field: format!("{name}.{field}"),
            });
        }
    }
    if endpoint.port == 0 {
        return Err(ConfigError::InvalidValue {
            field: format!("{name}.port"),
            detail: "port must be > 0".into(),
        });
    }
    if endpoint.password.is_none() {
        if password_required {
            return Err(ConfigError::EnvVarMissing {
                var: format!("{}_{}_PASSWORD", ENV_PREFIX, name.to_ascii_uppercase()),
                field: format!("{name}.password"),
            });
        }
        warn!(endpoint = name, "no password configured");
    }
    Ok(())
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "require" => Ok(true),
        "0" | "false" | "no" | "off" | "disable" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            detail: format!("'{other}' is not a boolean"),
        }),
    }
}

fn parse_u64(field: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        detail: format!("'{value}' is not a whole number"),
    })
}
