//! Lock command - acquire, release, break or inspect edit locks

use crate::cli::args::{LockAction, LockArgs, LockTarget};
use crate::cli::commands::unlock;
use crate::config::Config;
use crate::error::VaultResult;
use crate::lock::{EditStatus, LockDocument};
use crate::ui::{self, UiContext};
use serde_json::json;

pub async fn execute(args: LockArgs, config: &Config, ctx: &UiContext) -> VaultResult<()> {
    let session = unlock::open_local(ctx, config, &args.credentials, None).await?;
    let locks = session.locks();
    let owner = session.owner();

    match args.action {
        LockAction::Acquire(target) => {
            let lock = locks
                .acquire_lock(&target.record_type, &target.record_id, owner)
                .await?;
            if ctx.is_json() {
                return ui::json(&lock);
            }
            ui::step_ok(
                ctx,
                &format!(
                    "Locked {} until {}",
                    describe(&target),
                    lock.expires_at_utc().format("%H:%M:%S")
                ),
            );
            Ok(())
        }
        LockAction::Release(target) => {
            locks
                .release_lock(&target.record_type, &target.record_id, &owner.user_id)
                .await?;
            if ctx.is_json() {
                return ui::json(&json!({ "released": target.record_id }));
            }
            ui::step_ok(ctx, &format!("Released {}", describe(&target)));
            Ok(())
        }
        LockAction::Break { target, yes } => {
            let question = format!("Break the lock on {}?", describe(&target));
            if !yes && !ui::confirm(ctx, &question, false).await? {
                ui::remark(ctx, "Lock left in place");
                return Ok(());
            }

            let broken = locks
                .break_lock(&target.record_type, &target.record_id)
                .await?;
            if ctx.is_json() {
                return ui::json(&json!({ "broken": broken }));
            }
            match broken {
                Some(lock) => ui::step_warn(
                    ctx,
                    &format!("Broke expired lock held by {}", lock.user_name),
                ),
                None => ui::remark(ctx, "No lock to break"),
            }
            Ok(())
        }
        LockAction::Show(target) => {
            let status = locks
                .edit_status(&target.record_type, &target.record_id, &owner.user_id)
                .await?;
            if ctx.is_json() {
                return ui::json(&status_json(&status));
            }
            show(ctx, &target, &status);
            Ok(())
        }
    }
}

fn describe(target: &LockTarget) -> String {
    format!("{} {}", target.record_type, target.record_id)
}

fn status_json(status: &EditStatus) -> serde_json::Value {
    json!({
        "canEdit": status.can_edit,
        "lockedBy": status.locked_by,
        "remainingMs": status.remaining.map(|r| r.as_millis() as u64),
        "lock": status.lock.as_ref().map(LockDocument::lock_id),
    })
}

fn show(ctx: &UiContext, target: &LockTarget, status: &EditStatus) {
    ui::section(ctx, &describe(target));
    let Some(lock) = &status.lock else {
        ui::key_value_status(ctx, "Lock", "free", true);
        return;
    };

    let holder = status.locked_by.as_deref().unwrap_or("this device");
    ui::key_value_status(ctx, "Held by", holder, status.can_edit);
    ui::key_value(
        ctx,
        "Expires",
        &format!(
            "{} ({}s left)",
            lock.expires_at_utc().format("%H:%M:%S"),
            status.remaining.map_or(0, |r| r.as_secs())
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn status_json_reports_remaining_millis() {
        let status = EditStatus {
            lock: None,
            can_edit: true,
            locked_by: None,
            remaining: Some(Duration::from_millis(1_500)),
        };
        let value = status_json(&status);
        assert_eq!(value["canEdit"], true);
        assert_eq!(value["remainingMs"], 1_500);
        assert!(value["lock"].is_null());
    }
}
