//! # PodMusic Configuration Module
//!
//! This module provides configuration management for PodMusic, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters and setters for configuration values
//! - Thread-safe shared access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use podconfig::get_config;
//!
//! let config = get_config();
//!
//! let skip = config.get_skip_seconds();
//! let queue_file = config.get_queue_file()?;
//!
//! config.set_skip_seconds(30)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Context, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{info, warn};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("podmusic.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load PodMusic configuration"));
}

const ENV_CONFIG_DIR: &str = "PODMUSIC_CONFIG";
const ENV_PREFIX: &str = "PODMUSIC_CONFIG__";

const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;
const DEFAULT_STORAGE_DIR: &str = "data";
const DEFAULT_QUEUE_FILE: &str = "queue.json";
const DEFAULT_LIBRARY_FILE: &str = "library.json";
const DEFAULT_SKIP_SECONDS: u64 = 15;
const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
const DEFAULT_PERSIST_INTERVAL_MS: u64 = 1000;
const DEFAULT_REVEAL_THRESHOLD: f64 = 60.0;
const DEFAULT_DELETE_THRESHOLD: f64 = 220.0;
const DEFAULT_VELOCITY_THRESHOLD: f64 = 900.0;
const DEFAULT_COMMIT_ANIMATION_MS: u64 = 250;

/// Macro to generate getter/setter for u64 values with default
macro_rules! impl_u64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> u64 {
            match self.get_value($path) {
                Ok(Value::Number(n)) if n.is_u64() => n.as_u64().unwrap_or($default),
                Ok(Value::String(s)) => s.trim().parse::<u64>().unwrap_or_else(|_| {
                    warn!(path = %$path.join("."), value = %s, "Invalid integer, using default");
                    $default
                }),
                Ok(_) | Err(_) => $default,
            }
        }

        pub fn $setter(&self, value: u64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for f64 values with default
macro_rules! impl_f64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> f64 {
            match self.get_value($path) {
                Ok(Value::Number(n)) => n.as_f64().unwrap_or($default),
                Ok(Value::String(s)) => s.trim().parse::<f64>().unwrap_or_else(|_| {
                    warn!(path = %$path.join("."), value = %s, "Invalid number, using default");
                    $default
                }),
                Ok(_) | Err(_) => $default,
            }
        }

        pub fn $setter(&self, value: f64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> bool {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => b,
                _ => $default,
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Configuration manager for PodMusic
///
/// This structure manages the application configuration, including:
/// - Loading configuration from YAML files
/// - Merging with default configuration
/// - Handling environment variable overrides
/// - Providing typed getters/setters for configuration values
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.lock().clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    fn lock(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        if Path::new(".podmusic").exists() {
            return ".podmusic".to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(".podmusic");
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        ".podmusic".to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        // Test d'écriture
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PODMUSIC_CONFIG` environment variable
    /// 3. `.podmusic` in the current directory
    /// 4. `.podmusic` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for read/write permissions.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "Loaded config file");
            data
        } else {
            info!(config_file = %path, "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        // Merger avec la config par défaut
        let external_value: Value = serde_yaml::from_slice(&yaml_data)
            .with_context(|| format!("failed to parse {}", path))?;
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = Self::lower_keys_value(default_value);

        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let yaml = {
            let data = self.lock();
            serde_yaml::to_string(&*data)?
        };
        fs::write(&self.path, yaml).with_context(|| format!("failed to write {}", self.path))?;
        Ok(())
    }

    /// Returns the directory holding `config.yaml`.
    pub fn directory(&self) -> &str {
        &self.config_dir
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["player", "skip_seconds"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock();
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                match map.get(&Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                if let Err(err) = Self::set_value_internal(config, &key_path, yaml_value) {
                    warn!(variable = %key, error = %err, "Ignoring environment override");
                }
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let key = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    new_map.insert(key, Self::lower_keys_value(v));
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Résout un chemin relatif ou absolu et crée le répertoire si nécessaire
    fn resolve_and_create_dir(&self, dir_path: &str) -> Result<PathBuf> {
        let path = Path::new(dir_path);

        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.config_dir).join(path)
        };

        if !absolute_path.exists() {
            fs::create_dir_all(&absolute_path)
                .with_context(|| format!("failed to create {}", absolute_path.display()))?;
            info!(directory = %absolute_path.display(), "Created storage directory");
        }

        Ok(absolute_path)
    }

    /// Returns a directory managed by the configuration.
    ///
    /// The directory can be absolute or relative to the configuration
    /// directory. It is created if it does not exist; when the key is missing
    /// the `default` name is written back to the configuration.
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<PathBuf> {
        let dir_path = match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => {
                self.set_managed_dir(path, default.to_string())?;
                default.to_string()
            }
        };
        self.resolve_and_create_dir(&dir_path)
    }

    /// Sets a directory managed by the configuration.
    pub fn set_managed_dir(&self, path: &[&str], directory: String) -> Result<()> {
        self.set_value(path, Value::String(directory))
    }

    fn get_string(&self, path: &[&str], default: &str) -> String {
        match self.get_value(path) {
            Ok(Value::String(s)) if !s.trim().is_empty() => s,
            _ => default.to_string(),
        }
    }

    /// Directory holding the queue and library files.
    pub fn get_storage_dir(&self) -> Result<PathBuf> {
        self.get_managed_dir(&["storage", "directory"], DEFAULT_STORAGE_DIR)
    }

    /// Path of the persisted play queue.
    pub fn get_queue_file(&self) -> Result<PathBuf> {
        let name = self.get_string(&["storage", "queue_file"], DEFAULT_QUEUE_FILE);
        Ok(self.get_storage_dir()?.join(name))
    }

    /// Path of the episode library (podcasts, episodes and resume positions).
    pub fn get_library_file(&self) -> Result<PathBuf> {
        let name = self.get_string(&["storage", "library_file"], DEFAULT_LIBRARY_FILE);
        Ok(self.get_storage_dir()?.join(name))
    }

    impl_u64_config!(
        get_skip_seconds,
        set_skip_seconds,
        &["player", "skip_seconds"],
        DEFAULT_SKIP_SECONDS
    );

    impl_u64_config!(
        get_tick_interval_ms,
        set_tick_interval_ms,
        &["player", "tick_interval_ms"],
        DEFAULT_TICK_INTERVAL_MS
    );

    impl_u64_config!(
        get_persist_interval_ms,
        set_persist_interval_ms,
        &["player", "persist_interval_ms"],
        DEFAULT_PERSIST_INTERVAL_MS
    );

    impl_f64_config!(
        get_swipe_reveal_threshold,
        set_swipe_reveal_threshold,
        &["swipe", "reveal_threshold"],
        DEFAULT_REVEAL_THRESHOLD
    );

    impl_f64_config!(
        get_swipe_delete_threshold,
        set_swipe_delete_threshold,
        &["swipe", "delete_threshold"],
        DEFAULT_DELETE_THRESHOLD
    );

    impl_f64_config!(
        get_swipe_velocity_threshold,
        set_swipe_velocity_threshold,
        &["swipe", "velocity_threshold"],
        DEFAULT_VELOCITY_THRESHOLD
    );

    impl_u64_config!(
        get_swipe_commit_animation_ms,
        set_swipe_commit_animation_ms,
        &["swipe", "commit_animation_ms"],
        DEFAULT_COMMIT_ANIMATION_MS
    );

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    /// Récupère le niveau de log minimum depuis la configuration
    pub fn get_log_min_level(&self) -> String {
        self.get_string(&["host", "logger", "min_level"], DEFAULT_LOG_MIN_LEVEL)
    }

    /// Définit le niveau de log minimum dans la configuration
    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["host", "logger", "min_level"], Value::String(level))
    }
}

/// Returns the shared configuration instance, loaded lazily on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings, keys from `external` are merged recursively into `default`
/// - For scalars and sequences, external values replace default values
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_config() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        (dir, config)
    }

    #[test]
    fn defaults_are_loaded_from_embedded_yaml() {
        let (_dir, config) = fresh_config();
        assert_eq!(config.get_skip_seconds(), 15);
        assert_eq!(config.get_tick_interval_ms(), 1000);
        assert_eq!(config.get_swipe_delete_threshold(), 220.0);
        assert!(config.get_log_enable_console());
        assert_eq!(config.get_log_min_level(), "INFO");
    }

    #[test]
    fn setters_are_persisted_to_config_file() {
        let (dir, config) = fresh_config();
        config.set_skip_seconds(30).unwrap();

        let reloaded = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(reloaded.get_skip_seconds(), 30);
    }

    #[test]
    fn user_file_is_merged_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "Player:\n  Skip_Seconds: 10\n",
        )
        .unwrap();

        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(config.get_skip_seconds(), 10);
        assert_eq!(config.get_persist_interval_ms(), 1000);
    }

    #[test]
    fn managed_files_live_under_storage_dir() {
        let (dir, config) = fresh_config();
        let queue = config.get_queue_file().unwrap();
        assert_eq!(queue, dir.path().join("data").join("queue.json"));
        assert!(dir.path().join("data").is_dir());
    }

    #[test]
    fn merge_replaces_scalars_and_keeps_missing_keys() {
        let mut base: Value = serde_yaml::from_str("a: 1\nb:\n  c: 2\n  d: 3\n").unwrap();
        let ext: Value = serde_yaml::from_str("b:\n  c: 5\n").unwrap();
        merge_yaml(&mut base, &ext);
        let get = |path: &[&str]| Config::get_value_internal(&base, path).unwrap().as_u64();
        assert_eq!(get(&["b", "c"]), Some(5));
        assert_eq!(get(&["b", "d"]), Some(3));
        assert_eq!(get(&["a"]), Some(1));
    }
}
