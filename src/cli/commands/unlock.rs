//! Credential resolution and session opening shared by vault commands

use crate::cli::args::CredentialArgs;
use crate::config::{Config, ConfigManager};
use crate::error::{VaultError, VaultResult};
use crate::lock::FsLockBackend;
use crate::session::{Credentials, Session};
use crate::store::FileStorage;
use crate::sync::{FsRemote, MemoryRemote, RemoteStore};
use crate::ui::{self, TaskSpinner, UiContext};
use tracing::debug;

/// Session over the local data directory
pub type LocalSession<R> = Session<FileStorage, R, FsLockBackend>;

/// Flags and environment first, then prompts in a terminal
pub async fn credentials(
    ctx: &UiContext,
    args: &CredentialArgs,
    user_name: Option<String>,
) -> VaultResult<Credentials> {
    let password = match args.password.clone().filter(|p| !p.is_empty()) {
        Some(password) => password,
        None => ui::password(ctx, "Vault password").await?,
    };
    let share_code = match args.share_code.clone().filter(|c| !c.trim().is_empty()) {
        Some(code) => code,
        None => ui::share_code(ctx, "Share code").await?,
    };

    let credentials = Credentials::new(password, share_code);
    Ok(match user_name {
        Some(name) => credentials.with_user_name(name),
        None => credentials,
    })
}

/// Open the vault for commands that never sync
pub async fn open_local(
    ctx: &UiContext,
    config: &Config,
    args: &CredentialArgs,
    user_name: Option<String>,
) -> VaultResult<LocalSession<MemoryRemote>> {
    // Never started, so nothing reaches it
    open(ctx, config, args, user_name, MemoryRemote::new()).await
}

/// Open the vault with the directory remote from `storage.remote_dir`
pub async fn open_synced(
    ctx: &UiContext,
    config: &Config,
    args: &CredentialArgs,
) -> VaultResult<LocalSession<FsRemote>> {
    let remote_dir = config
        .storage
        .remote_dir
        .clone()
        .ok_or(VaultError::RemoteNotConfigured)?;
    open(ctx, config, args, None, FsRemote::new(remote_dir)).await
}

async fn open<R: RemoteStore>(
    ctx: &UiContext,
    config: &Config,
    args: &CredentialArgs,
    user_name: Option<String>,
    remote: R,
) -> VaultResult<LocalSession<R>> {
    let credentials = credentials(ctx, args, user_name).await?;
    let data_dir = ConfigManager::ensure_data_dir(config).await?;
    // Locks live next to the shared remote when there is one
    let lock_dir = config
        .storage
        .remote_dir
        .clone()
        .unwrap_or_else(|| data_dir.clone());
    debug!("Vault dir {}, lock dir {}", data_dir.display(), lock_dir.display());

    let mut spinner = TaskSpinner::new(ctx);
    spinner.start("Unlocking vault...");
    match Session::open(
        config,
        &credentials,
        FileStorage::new(&data_dir),
        remote,
        FsLockBackend::new(lock_dir),
    )
    .await
    {
        Ok(session) => {
            spinner.stop(&format!(
                "Unlocked budget {}",
                session.identity().budget_id().short()
            ));
            Ok(session)
        }
        Err(e) => {
            spinner.stop_error("Could not unlock vault");
            Err(e)
        }
    }
}
