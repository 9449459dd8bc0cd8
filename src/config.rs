//! Configuration management for superstep.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (`SUPERSTEP_NPROCS`, etc.)
//! 2. Project-local config file (`./superstep.toml`)
//! 3. User config file (`~/.config/superstep/config.toml`)
//! 4. Built-in defaults
//!
//! The configuration fixes the capacities of the communication region.
//! They are validated once into [`Capacities`] and never change while
//! processes run.
//!
//! # Config File Format
//!
//! ```toml
//! # superstep.toml
//! nprocs = 16
//! max_requests = 64
//! payload_size = 16384
//! max_messages = 256
//! queue_payload_size = 8192
//! max_vars = 32
//! core_memory_size = 32768
//! tag_size = 0
//! debug_handshake = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

use crate::device::records::MAX_REQUEST_BYTES;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

const DEFAULT_NPROCS: usize = 16;
const DEFAULT_MAX_REQUESTS: usize = 64;
const DEFAULT_PAYLOAD_SIZE: usize = 16 * 1024;
const DEFAULT_MAX_MESSAGES: usize = 256;
const DEFAULT_QUEUE_PAYLOAD_SIZE: usize = 8 * 1024;
const DEFAULT_MAX_VARS: usize = 32;
const DEFAULT_CORE_MEMORY_SIZE: usize = 32 * 1024;

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("nprocs must be at least 1")]
    NoProcesses,

    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),

    #[error("{name} = {value} exceeds the 31-bit transfer length range")]
    TooLarge { name: &'static str, value: usize },

    #[error("tag size {tag_size} does not fit a queue arena of {arena} bytes")]
    TagTooLarge { tag_size: usize, arena: usize },
}

/// superstep configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Number of BSP processes (one per core).
    pub nprocs: Option<usize>,
    /// Deferred put/get requests per process per superstep.
    pub max_requests: Option<usize>,
    /// Bytes in the put payload arena.
    pub payload_size: Option<usize>,
    /// Message slots per queue.
    pub max_messages: Option<usize>,
    /// Bytes in each message queue arena.
    pub queue_payload_size: Option<usize>,
    /// Registered-variable slots.
    pub max_vars: Option<usize>,
    /// Bytes of local memory per core.
    pub core_memory_size: Option<usize>,
    /// Tag size in effect in the first superstep.
    pub tag_size: Option<usize>,
    /// Wait for the host's continue signal in `begin`.
    pub debug_handshake: Option<bool>,
}

/// Validated capacities of the communication region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacities {
    pub nprocs: usize,
    pub max_requests: usize,
    pub payload_size: usize,
    pub max_messages: usize,
    pub queue_payload_size: usize,
    pub max_vars: usize,
    pub core_memory_size: usize,
    pub initial_tag_size: usize,
    pub debug_handshake: bool,
}

impl Default for Capacities {
    fn default() -> Self {
        Self {
            nprocs: DEFAULT_NPROCS,
            max_requests: DEFAULT_MAX_REQUESTS,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            max_messages: DEFAULT_MAX_MESSAGES,
            queue_payload_size: DEFAULT_QUEUE_PAYLOAD_SIZE,
            max_vars: DEFAULT_MAX_VARS,
            core_memory_size: DEFAULT_CORE_MEMORY_SIZE,
            initial_tag_size: 0,
            debug_handshake: false,
        }
    }
}

impl Capacities {
    /// Default capacities for `nprocs` processes.
    pub fn with_nprocs(nprocs: usize) -> Self {
        Self {
            nprocs,
            ..Self::default()
        }
    }

    /// Check every bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nprocs == 0 {
            return Err(ConfigError::NoProcesses);
        }

        let nonzero = [
            ("max_requests", self.max_requests),
            ("payload_size", self.payload_size),
            ("max_messages", self.max_messages),
            ("queue_payload_size", self.queue_payload_size),
            ("max_vars", self.max_vars),
            ("core_memory_size", self.core_memory_size),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::ZeroCapacity(name));
            }
        }

        // Request lengths keep bit 31 for the put flag
        let sized = [
            ("payload_size", self.payload_size),
            ("queue_payload_size", self.queue_payload_size),
            ("core_memory_size", self.core_memory_size),
        ];
        for (name, value) in sized {
            if value > MAX_REQUEST_BYTES as usize {
                return Err(ConfigError::TooLarge { name, value });
            }
        }

        if self.initial_tag_size > self.queue_payload_size {
            return Err(ConfigError::TagTooLarge {
                tag_size: self.initial_tag_size,
                arena: self.queue_payload_size,
            });
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `superstep.toml`
    /// 3. User config `~/.config/superstep/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Resolve against the defaults and validate.
    pub fn capacities(&self) -> Result<Capacities, ConfigError> {
        let defaults = Capacities::default();
        let caps = Capacities {
            nprocs: self.nprocs.unwrap_or(defaults.nprocs),
            max_requests: self.max_requests.unwrap_or(defaults.max_requests),
            payload_size: self.payload_size.unwrap_or(defaults.payload_size),
            max_messages: self.max_messages.unwrap_or(defaults.max_messages),
            queue_payload_size: self
                .queue_payload_size
                .unwrap_or(defaults.queue_payload_size),
            max_vars: self.max_vars.unwrap_or(defaults.max_vars),
            core_memory_size: self.core_memory_size.unwrap_or(defaults.core_memory_size),
            initial_tag_size: self.tag_size.unwrap_or(defaults.initial_tag_size),
            debug_handshake: self.debug_handshake.unwrap_or(defaults.debug_handshake),
        };
        caps.validate()?;
        Ok(caps)
    }

    /// Load user configuration from ~/.config/superstep/config.toml
    fn load_user_config() -> Option<Self> {
        let path = Self::user_config_path()?;
        Self::load_from_file(&path)
    }

    /// Load project-local configuration from ./superstep.toml
    fn load_local_config() -> Option<Self> {
        let local_path = Path::new("superstep.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("superstep.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field;
                })*
            };
        }
        take!(
            nprocs,
            max_requests,
            payload_size,
            max_messages,
            queue_payload_size,
            max_vars,
            core_memory_size,
            tag_size,
            debug_handshake
        );
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
            let raw = std::env::var(name).ok()?;
            match raw.trim().parse() {
                Ok(value) => {
                    log::info!("Using {} from environment: {}", name, raw);
                    Some(value)
                }
                Err(_) => {
                    log::warn!("Ignoring {}: cannot parse {:?}", name, raw);
                    None
                }
            }
        }

        if let Some(v) = var("SUPERSTEP_NPROCS") {
            self.nprocs = Some(v);
        }
        if let Some(v) = var("SUPERSTEP_MAX_REQUESTS") {
            self.max_requests = Some(v);
        }
        if let Some(v) = var("SUPERSTEP_PAYLOAD_SIZE") {
            self.payload_size = Some(v);
        }
        if let Some(v) = var("SUPERSTEP_MAX_MESSAGES") {
            self.max_messages = Some(v);
        }
        if let Some(v) = var("SUPERSTEP_QUEUE_PAYLOAD_SIZE") {
            self.queue_payload_size = Some(v);
        }
        if let Some(v) = var("SUPERSTEP_MAX_VARS") {
            self.max_vars = Some(v);
        }
        if let Some(v) = var("SUPERSTEP_CORE_MEMORY_SIZE") {
            self.core_memory_size = Some(v);
        }
        if let Some(v) = var("SUPERSTEP_TAG_SIZE") {
            self.tag_size = Some(v);
        }
        if let Some(v) = var("SUPERSTEP_DEBUG") {
            self.debug_handshake = Some(v);
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("superstep").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# superstep configuration
# Place this file at ~/.config/superstep/config.toml or ./superstep.toml

# Number of BSP processes (one per core)
nprocs = 16

# Deferred put/get requests per process per superstep
max_requests = 64

# Bytes available to put payloads per superstep
payload_size = 16384

# Message slots per queue, and bytes for tags and payloads per queue
max_messages = 256
queue_payload_size = 8192

# Registered variables over the whole run
max_vars = 32

# Local memory per core
core_memory_size = 32768

# Tag size of the first superstep
# tag_size = 0

# Wait for the host's continue signal before running
# debug_handshake = false
"#
        .to_string()
    }
}
