//! Vault command - create and inspect the encrypted vault

use crate::cli::args::{VaultAction, VaultArgs};
use crate::cli::commands::unlock;
use crate::clock::from_ms;
use crate::config::Config;
use crate::error::VaultResult;
use crate::store::VaultDocument;
use crate::ui::{self, UiContext};
use serde_json::json;

pub async fn execute(args: VaultArgs, config: &Config, ctx: &UiContext) -> VaultResult<()> {
    let user_name = match &args.action {
        VaultAction::Init { name } => {
            ui::intro(ctx, "vvsync vault init");
            name.clone()
        }
        _ => None,
    };
    let session = unlock::open_local(ctx, config, &args.credentials, user_name).await?;
    let document = session.document().await?;

    match args.action {
        VaultAction::Init { .. } => {
            if ctx.is_json() {
                return ui::json(&json!({
                    "budgetId": document.budget.id,
                    "deviceId": document.device_id,
                    "userName": document.user_name,
                }));
            }
            ui::outro_success(
                ctx,
                &format!("Vault ready for budget {}", session.identity().budget_id().short()),
            );
            Ok(())
        }
        VaultAction::Show => show(&document, ctx),
        VaultAction::Status => status(&document, ctx),
    }
}

fn show(document: &VaultDocument, ctx: &UiContext) -> VaultResult<()> {
    let budget = &document.budget;
    let live = document.live_entries().count();

    if ctx.is_json() {
        return ui::json(&json!({
            "budgetId": budget.id,
            "schemaVersion": document.schema_version,
            "deviceId": document.device_id,
            "userName": document.user_name,
            "unassignedCash": budget.unassigned_cash,
            "actualBalance": budget.actual_balance,
            "isActualBalanceManual": budget.is_actual_balance_manual,
            "biweeklyAllocation": budget.biweekly_allocation,
            "supplementalAccounts": budget.supplemental_accounts.len(),
            "entries": live,
        }));
    }

    ui::section(ctx, "Budget");
    ui::key_value(ctx, "Id", &budget.id);
    ui::key_value(ctx, "Unassigned cash", &format!("{:.2}", budget.unassigned_cash));
    let balance_source = if budget.is_actual_balance_manual {
        " (manual)"
    } else {
        ""
    };
    ui::key_value(
        ctx,
        "Actual balance",
        &format!("{:.2}{}", budget.actual_balance, balance_source),
    );
    ui::key_value(
        ctx,
        "Biweekly allocation",
        &format!("{:.2}", budget.biweekly_allocation),
    );
    ui::key_value(
        ctx,
        "Supplemental accounts",
        &budget.supplemental_accounts.len().to_string(),
    );

    ui::section(ctx, "Vault");
    ui::key_value(ctx, "Schema", &document.schema_version.to_string());
    ui::key_value(ctx, "Device", &document.device_id);
    ui::key_value(ctx, "User", document.user_name.as_deref().unwrap_or("-"));
    ui::key_value(ctx, "Entries", &live.to_string());
    Ok(())
}

fn status(document: &VaultDocument, ctx: &UiContext) -> VaultResult<()> {
    let markers = &document.sync;
    let pending = pending_count(document);

    if ctx.is_json() {
        return ui::json(&json!({
            "lastSyncedAt": markers.last_synced_at,
            "lastAcknowledged": markers.last_acknowledged,
            "pending": pending,
        }));
    }

    ui::section(ctx, "Sync");
    match markers.last_synced_at {
        Some(at) => ui::key_value_status(ctx, "Last synced", &from_ms(at).to_rfc3339(), true),
        None => ui::key_value_status(ctx, "Last synced", "never", false),
    }
    let acknowledged = if markers.last_acknowledged > 0 {
        from_ms(markers.last_acknowledged).to_rfc3339()
    } else {
        "-".to_string()
    };
    ui::key_value(ctx, "Acknowledged up to", &acknowledged);
    ui::key_value_status(ctx, "Pending changes", &pending.to_string(), pending == 0);
    Ok(())
}

/// Entries (tombstones included) the remote has not acknowledged
fn pending_count(document: &VaultDocument) -> usize {
    document
        .entries
        .values()
        .filter(|e| e.last_modified > document.sync.last_acknowledged)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use serde_json::json;

    #[test]
    fn pending_counts_unacknowledged_changes() {
        let mut document = VaultDocument::new("budget_0123456789abcdef", None, 1_000);
        for (key, at) in [("a", 900), ("b", 1_500), ("c", 2_000)] {
            document
                .entries
                .insert(key.to_string(), CacheEntry::new(key, json!(1), at));
        }
        document
            .entries
            .insert("d".to_string(), CacheEntry::tombstone("d", 2_500));
        document.sync.last_acknowledged = 1_500;

        assert_eq!(pending_count(&document), 2);
    }
}
