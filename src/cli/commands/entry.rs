//! Entry command - read and change vault entries

use crate::cache::MutationOutcome;
use crate::cli::args::{EntryAction, EntryArgs};
use crate::cli::commands::unlock;
use crate::config::Config;
use crate::error::{VaultError, VaultResult};
use crate::ui::{self, UiContext};
use serde_json::{json, Value};

pub async fn execute(args: EntryArgs, config: &Config, ctx: &UiContext) -> VaultResult<()> {
    let session = unlock::open_local(ctx, config, &args.credentials, None).await?;
    let cache = session.cache();

    match args.action {
        EntryAction::List { prefix } => {
            let entries = match prefix.as_deref() {
                Some(prefix) => cache.entries_with_prefix(prefix),
                None => cache.entries(),
            };
            if ctx.is_json() {
                return ui::json(&entries);
            }
            if entries.is_empty() {
                ui::remark(ctx, "No entries");
            }
            for entry in entries {
                println!("{}\t{}", entry.key, entry.value);
            }
            Ok(())
        }
        EntryAction::Get { key } => {
            let entry = cache
                .get_entry(&key)
                .filter(|e| e.is_live())
                .ok_or_else(|| not_found(&key))?;
            if ctx.is_json() {
                return ui::json(&entry);
            }
            println!("{}", serde_json::to_string_pretty(&entry.value)?);
            Ok(())
        }
        EntryAction::Set { key, value } => {
            let entry = cache.set(&key, parse_value(&value)?).await?;
            report(ctx, "Set", &key, MutationOutcome::Applied(entry))
        }
        EntryAction::Patch { key, patch } => {
            let patch = parse_value(&patch)?;
            if !patch.is_object() {
                return Err(VaultError::User("A patch must be a JSON object".to_string()));
            }
            let outcome = cache.update(&key, &patch).await?;
            report(ctx, "Patched", &key, outcome)
        }
        EntryAction::Rm { key } => {
            let outcome = cache.remove(&key).await?;
            report(ctx, "Removed", &key, outcome)
        }
    }
}

/// JSON if it parses, otherwise the raw text as a string
fn parse_value(raw: &str) -> VaultResult<Value> {
    match serde_json::from_str(raw) {
        Ok(value) => Ok(value),
        Err(_) if !looks_structured(raw) => Ok(Value::String(raw.to_string())),
        Err(e) => Err(VaultError::User(format!("Invalid JSON value: {}", e))),
    }
}

fn looks_structured(raw: &str) -> bool {
    matches!(raw.trim_start().chars().next(), Some('{' | '[' | '"'))
}

fn report(ctx: &UiContext, verb: &str, key: &str, outcome: MutationOutcome) -> VaultResult<()> {
    match outcome {
        MutationOutcome::Applied(entry) => {
            if ctx.is_json() {
                return ui::json(&json!({
                    "key": entry.key,
                    "lastModified": entry.last_modified,
                    "deleted": entry.deleted,
                }));
            }
            ui::step_ok(ctx, &format!("{} {}", verb, key));
            Ok(())
        }
        MutationOutcome::NotFound => Err(not_found(key)),
    }
}

fn not_found(key: &str) -> VaultError {
    VaultError::User(format!("No entry named {}", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_value_accepts_json_and_bare_text() {
        assert_eq!(parse_value("{\"balance\":800}").unwrap(), json!({"balance": 800}));
        assert_eq!(parse_value("42").unwrap(), json!(42));
        assert_eq!(parse_value("groceries").unwrap(), json!("groceries"));
    }

    #[test]
    fn parse_value_rejects_broken_objects() {
        assert!(parse_value("{\"balance\":").is_err());
        assert!(parse_value("[1, 2").is_err());
    }
}
