//! Sync command - one pass against the shared remote directory

use crate::cli::args::SyncArgs;
use crate::cli::commands::unlock;
use crate::config::Config;
use crate::error::{VaultError, VaultResult};
use crate::sync::{SyncOutcome, SyncReport};
use crate::ui::{self, TaskSpinner, UiContext};

pub async fn execute(args: SyncArgs, config: &Config, ctx: &UiContext) -> VaultResult<()> {
    let session = unlock::open_synced(ctx, config, &args.credentials).await?;
    session.start().await;

    let mut spinner = TaskSpinner::new(ctx);
    spinner.start("Syncing...");
    let report = session.sync().force_sync().await;
    session.stop().await;

    match &report.outcome {
        SyncOutcome::Completed => spinner.stop(&format!(
            "Synced in {} ms",
            report.duration_ms
        )),
        SyncOutcome::Skipped { reason } => spinner.stop(&format!("Sync skipped: {}", reason)),
        SyncOutcome::Failed { .. } => spinner.stop_error("Sync failed"),
    }

    if ctx.is_json() {
        ui::json(&report)?;
    } else {
        print_report(ctx, &report);
    }

    match report.outcome {
        SyncOutcome::Failed {
            message, retryable, ..
        } => Err(if retryable {
            VaultError::RemoteUnavailable(message)
        } else {
            VaultError::Remote(message)
        }),
        _ => Ok(()),
    }
}

fn print_report(ctx: &UiContext, report: &SyncReport) {
    if !report.is_completed() {
        return;
    }
    ui::key_value(ctx, "Pulled", &report.pulled.to_string());
    ui::key_value(ctx, "Applied", &report.applied.to_string());
    ui::key_value(ctx, "Pushed", &report.pushed.to_string());
    if report.undecryptable > 0 {
        ui::step_warn_hint(
            ctx,
            &format!("{} remote records could not be decrypted", report.undecryptable),
            "Another budget may share this remote directory",
        );
    }
}
