//! CLI argument definitions using clap derive

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// vvsync - encrypted budget vault
///
/// Unlocks a budget with a password and a four-word share code, keeps it
/// encrypted at rest, syncs it through a shared directory and coordinates
/// edits with short-lived locks.
#[derive(Parser, Debug)]
#[command(name = "vvsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "VVSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print JSON instead of human readable output
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate, check and convert share codes
    Share(ShareArgs),

    /// Print the budget id for a password and share code
    Identity(CredentialArgs),

    /// Create or inspect the encrypted vault
    Vault(VaultArgs),

    /// Read and change vault entries
    Entry(EntryArgs),

    /// Run one sync pass against the configured remote directory
    Sync(SyncArgs),

    /// Acquire, release, break or inspect edit locks
    Lock(LockArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Password and share code, from flags, environment or a prompt
#[derive(Args, Clone, Default)]
pub struct CredentialArgs {
    /// Vault password
    #[arg(long, global = true, env = "VVSYNC_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Four-word share code
    #[arg(long, global = true, env = "VVSYNC_SHARE_CODE", hide_env_values = true)]
    pub share_code: Option<String>,
}

impl std::fmt::Debug for CredentialArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("CredentialArgs")
            .field("password", &redact(&self.password))
            .field("share_code", &redact(&self.share_code))
            .finish()
    }
}

#[derive(Parser, Debug)]
pub struct ShareArgs {
    #[command(subcommand)]
    pub action: ShareAction,
}

#[derive(Subcommand, Debug)]
pub enum ShareAction {
    /// Generate a new random share code
    Generate,

    /// Check that a share code is well formed
    Validate {
        /// Share code, quoted
        code: String,
    },

    /// Encode a share code for transfer (VV-SHARE text, or QR JSON with --name/--color)
    Encode {
        /// Share code, quoted
        code: String,

        /// Creator name to embed
        #[arg(long)]
        name: Option<String>,

        /// Creator color to embed
        #[arg(long)]
        color: Option<String>,
    },

    /// Decode a VV-SHARE string or QR JSON payload
    Decode {
        /// Encoded payload
        payload: String,
    },
}

#[derive(Parser, Debug)]
pub struct VaultArgs {
    #[command(subcommand)]
    pub action: VaultAction,

    #[command(flatten)]
    pub credentials: CredentialArgs,
}

#[derive(Subcommand, Debug)]
pub enum VaultAction {
    /// Unlock the vault, creating it if missing
    Init {
        /// Display name for this device's user
        #[arg(long)]
        name: Option<String>,
    },

    /// Print vault metadata and budget totals
    Show,

    /// Print sync markers and pending changes
    Status,
}

#[derive(Parser, Debug)]
pub struct EntryArgs {
    #[command(subcommand)]
    pub action: EntryAction,

    #[command(flatten)]
    pub credentials: CredentialArgs,
}

#[derive(Subcommand, Debug)]
pub enum EntryAction {
    /// List live entries
    List {
        /// Only keys starting with this prefix (e.g. "envelopes:")
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Print one entry
    Get { key: String },

    /// Insert or replace an entry with a JSON value
    Set { key: String, value: String },

    /// Merge a JSON patch into an existing entry
    Patch { key: String, patch: String },

    /// Delete an entry
    Rm { key: String },
}

#[derive(Parser, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub credentials: CredentialArgs,
}

#[derive(Parser, Debug)]
pub struct LockArgs {
    #[command(subcommand)]
    pub action: LockAction,

    #[command(flatten)]
    pub credentials: CredentialArgs,
}

/// Record a lock applies to
#[derive(Args, Debug, Clone)]
pub struct LockTarget {
    /// Record type, e.g. envelope
    pub record_type: String,

    /// Record id
    pub record_id: String,
}

#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// Take or extend the lock on a record
    Acquire(LockTarget),

    /// Release a lock this device holds
    Release(LockTarget),

    /// Remove an expired lock held by anyone
    Break {
        #[command(flatten)]
        target: LockTarget,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Show who may edit a record
    Show(LockTarget),
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Print the config file path
    Path,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Set a value (e.g. storage.remote_dir /mnt/shared/vvsync)
    Set { key: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_share_validate() {
        let cli = Cli::try_parse_from(["vvsync", "share", "validate", "ripple canyon violin budget"])
            .unwrap();
        match cli.command {
            Commands::Share(ShareArgs {
                action: ShareAction::Validate { code },
            }) => assert_eq!(code, "ripple canyon violin budget"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cli_parses_entry_set_with_credentials() {
        let cli = Cli::try_parse_from([
            "vvsync",
            "entry",
            "--password",
            "hunter2",
            "--share-code",
            "ripple canyon violin budget",
            "set",
            "envelopes:rent",
            "{\"balance\":800}",
        ])
        .unwrap();
        match cli.command {
            Commands::Entry(args) => {
                assert_eq!(args.credentials.password.as_deref(), Some("hunter2"));
                assert!(matches!(args.action, EntryAction::Set { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cli_parses_lock_break() {
        let cli = Cli::try_parse_from(["vvsync", "lock", "break", "envelope", "rent", "--yes"]).unwrap();
        match cli.command {
            Commands::Lock(LockArgs {
                action: LockAction::Break { target, yes },
                ..
            }) => {
                assert_eq!(target.record_type, "envelope");
                assert_eq!(target.record_id, "rent");
                assert!(yes);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cli_parses_config_set() {
        let cli = Cli::try_parse_from(["vvsync", "config", "set", "lock.ttl_secs", "90"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigArgs {
                action: Some(ConfigAction::Set { .. })
            })
        ));
    }

    #[test]
    fn cli_verbose_and_json_are_global() {
        let cli = Cli::try_parse_from(["vvsync", "share", "generate", "-vv", "--json"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.json);
    }

    #[test]
    fn cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["vvsync"]).is_err());
    }
}
