//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{VaultError, VaultResult};
use crate::ui::{self, UiContext};
use std::path::PathBuf;
use std::str::FromStr;

const VALID_KEYS: &[&str] = &[
    "general.verbose",
    "general.log_format",
    "general.audit_log",
    "kdf.memory_kib",
    "kdf.iterations",
    "kdf.parallelism",
    "sync.interval_secs",
    "sync.backoff_base_ms",
    "sync.backoff_cap_ms",
    "sync.max_attempts",
    "sync.cold_start_delay_ms",
    "sync.debounce_normal_ms",
    "sync.debounce_high_ms",
    "lock.ttl_secs",
    "lock.watch_poll_ms",
    "storage.data_dir",
    "storage.remote_dir",
];

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    config: &Config,
    manager: &ConfigManager,
    ctx: &UiContext,
) -> VaultResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config, ctx),
        Some(ConfigAction::Path) => {
            if ctx.is_json() {
                return ui::json(&serde_json::json!({ "path": manager.path() }));
            }
            println!("{}", manager.path().display());
            Ok(())
        }
        Some(ConfigAction::Init { force }) => init_config(manager, force, ctx).await,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value, ctx).await,
    }
}

fn show_config(config: &Config, ctx: &UiContext) -> VaultResult<()> {
    if ctx.is_json() {
        return ui::json(config);
    }
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool, ctx: &UiContext) -> VaultResult<()> {
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok(ctx, &format!("Configuration initialized at {}", path.display()));
    Ok(())
}

async fn set_value(
    manager: &ConfigManager,
    config: &Config,
    key: &str,
    value: &str,
    ctx: &UiContext,
) -> VaultResult<()> {
    let mut config = config.clone();
    apply(&mut config, key, value)?;

    if config.general.log_format != "text" && config.general.log_format != "json" {
        return Err(VaultError::User(format!(
            "Invalid log format: {}. Use text or json",
            config.general.log_format
        )));
    }

    manager.save(&config).await?;
    ui::step_ok(ctx, &format!("Set {} = {}", key, value));
    Ok(())
}

/// Assign one dot-separated key
fn apply(config: &mut Config, key: &str, value: &str) -> VaultResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "verbose"] => config.general.verbose = parse_bool(value)?,
        ["general", "log_format"] => config.general.log_format = value.to_lowercase(),
        ["general", "audit_log"] => config.general.audit_log = parse_bool(value)?,

        ["kdf", "memory_kib"] => config.kdf.memory_kib = parse_number(value)?,
        ["kdf", "iterations"] => config.kdf.iterations = parse_number(value)?,
        ["kdf", "parallelism"] => config.kdf.parallelism = parse_number(value)?,

        ["sync", "interval_secs"] => config.sync.interval_secs = parse_number(value)?,
        ["sync", "backoff_base_ms"] => config.sync.backoff_base_ms = parse_number(value)?,
        ["sync", "backoff_cap_ms"] => config.sync.backoff_cap_ms = parse_number(value)?,
        ["sync", "max_attempts"] => config.sync.max_attempts = parse_number(value)?,
        ["sync", "cold_start_delay_ms"] => config.sync.cold_start_delay_ms = parse_number(value)?,
        ["sync", "debounce_normal_ms"] => config.sync.debounce_normal_ms = parse_number(value)?,
        ["sync", "debounce_high_ms"] => config.sync.debounce_high_ms = parse_number(value)?,

        ["lock", "ttl_secs"] => config.lock.ttl_secs = parse_number(value)?,
        ["lock", "watch_poll_ms"] => config.lock.watch_poll_ms = parse_number(value)?,

        ["storage", "data_dir"] => config.storage.data_dir = parse_dir(value),
        ["storage", "remote_dir"] => config.storage.remote_dir = parse_dir(value),

        _ => {
            return Err(VaultError::User(format!(
                "Unknown config key: {}. Valid keys: {}",
                key,
                VALID_KEYS.join(", ")
            )))
        }
    }
    Ok(())
}

fn parse_bool(value: &str) -> VaultResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(VaultError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}

fn parse_number<T: FromStr>(value: &str) -> VaultResult<T> {
    value
        .parse()
        .map_err(|_| VaultError::User(format!("Invalid number: {}", value)))
}

/// Empty string clears the setting
fn parse_dir(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    (!value.is_empty()).then(|| PathBuf::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_sets_nested_values() {
        let mut config = Config::default();
        apply(&mut config, "lock.ttl_secs", "90").unwrap();
        apply(&mut config, "sync.debounce_high_ms", "500").unwrap();
        apply(&mut config, "general.audit_log", "no").unwrap();
        apply(&mut config, "storage.remote_dir", "/mnt/shared").unwrap();

        assert_eq!(config.lock.ttl_secs, 90);
        assert_eq!(config.sync.debounce_high_ms, 500);
        assert!(!config.general.audit_log);
        assert_eq!(config.storage.remote_dir, Some(PathBuf::from("/mnt/shared")));
    }

    #[test]
    fn apply_clears_dirs_with_empty_value() {
        let mut config = Config::default();
        config.storage.data_dir = Some(PathBuf::from("/tmp/vault"));
        apply(&mut config, "storage.data_dir", "").unwrap();
        assert!(config.storage.data_dir.is_none());
    }

    #[test]
    fn apply_rejects_unknown_keys_and_bad_values() {
        let mut config = Config::default();
        assert!(matches!(
            apply(&mut config, "vm.name", "x"),
            Err(VaultError::User(_))
        ));
        assert!(apply(&mut config, "kdf.iterations", "many").is_err());
        assert!(apply(&mut config, "general.verbose", "maybe").is_err());
    }

    #[tokio::test]
    async fn set_value_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("config.toml"));
        let ctx = UiContext::non_interactive();

        set_value(&manager, &Config::default(), "sync.interval_secs", "120", &ctx)
            .await
            .unwrap();

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.sync.interval_secs, 120);
    }

    #[tokio::test]
    async fn set_value_rejects_unknown_log_format() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("config.toml"));
        let ctx = UiContext::non_interactive();

        let result = set_value(&manager, &Config::default(), "general.log_format", "xml", &ctx).await;
        assert!(result.is_err());
        assert!(!manager.path().exists());
    }
}
