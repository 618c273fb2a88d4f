//! Integration tests for vvsync

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const PASSWORD: &str = "correct horse";
    const CODE: &str = "ripple canyon violin budget";

    /// One device: its own home, config file and vault directory, and an
    /// optional shared remote directory
    struct Device {
        home: TempDir,
        config: PathBuf,
    }

    impl Device {
        fn new(remote: Option<&Path>) -> Self {
            let home = TempDir::new().unwrap();
            let config = home.path().join("config.toml");
            let data_dir = home.path().join("vault");

            let mut content = format!(
                "[general]\naudit_log = false\n\n\
                 [kdf]\nmemory_kib = 64\niterations = 1\nparallelism = 1\n\n\
                 [sync]\ncold_start_delay_ms = 0\nbackoff_base_ms = 10\nmax_attempts = 2\n\n\
                 [storage]\ndata_dir = {:?}\n",
                data_dir.display().to_string()
            );
            if let Some(remote) = remote {
                content.push_str(&format!("remote_dir = {:?}\n", remote.display().to_string()));
            }
            std::fs::write(&config, content).unwrap();

            Self { home, config }
        }

        fn cmd(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("vvsync");
            cmd.env("HOME", self.home.path())
                .env("XDG_CONFIG_HOME", self.home.path().join(".config"))
                .env("XDG_STATE_HOME", self.home.path().join(".state"))
                .env("VVSYNC_CONFIG", &self.config)
                .env_remove("VVSYNC_PASSWORD")
                .env_remove("VVSYNC_SHARE_CODE");
            cmd
        }

        /// Command with credentials supplied through the environment
        fn unlocked(&self) -> Command {
            let mut cmd = self.cmd();
            cmd.env("VVSYNC_PASSWORD", PASSWORD)
                .env("VVSYNC_SHARE_CODE", CODE);
            cmd
        }
    }

    fn stdout_json(cmd: &mut Command) -> serde_json::Value {
        let output = cmd.output().unwrap();
        assert!(
            output.status.success(),
            "command failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("vvsync")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("budget vault with encrypted storage"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("vvsync")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("vvsync"));
    }

    #[test]
    fn share_generate_prints_valid_code() {
        let device = Device::new(None);
        let value = stdout_json(device.cmd().args(["share", "generate", "--json"]));
        let code = value["shareCode"].as_str().unwrap().to_string();
        assert_eq!(code.split(' ').count(), 4);

        device
            .cmd()
            .args(["share", "validate", &code])
            .assert()
            .success()
            .stdout(predicate::str::contains("Valid share code"));
    }

    #[test]
    fn share_validate_rejects_bad_code() {
        Device::new(None)
            .cmd()
            .args(["share", "validate", "not a real code"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid share code"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn share_encode_decode() {
        let device = Device::new(None);
        device
            .cmd()
            .args(["share", "encode", CODE])
            .assert()
            .success()
            .stdout(predicate::str::starts_with("VV-SHARE-ripple-canyon-violin-budget"));

        let encoded = stdout_json(device.cmd().args([
            "share", "encode", CODE, "--name", "Alex", "--color", "#aa00ff", "--json",
        ]));
        let payload = encoded["payload"].as_str().unwrap().to_string();

        let decoded = stdout_json(device.cmd().args(["share", "decode", &payload, "--json"]));
        assert_eq!(decoded["shareCode"], CODE);
        assert_eq!(decoded["createdBy"], "Alex");
    }

    #[test]
    fn identity_is_stable() {
        let device = Device::new(None);
        let first = stdout_json(device.unlocked().args(["identity", "--json"]));
        let second = stdout_json(device.unlocked().args(["identity", "--json"]));
        let id = first["budgetId"].as_str().unwrap();
        assert!(id.starts_with("budget_"));
        assert_eq!(first, second);
    }

    #[test]
    fn identity_without_credentials_fails() {
        Device::new(None)
            .cmd()
            .arg("identity")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Password is required"));
    }

    #[test]
    fn vault_init_and_show() {
        let device = Device::new(None);
        device
            .unlocked()
            .args(["vault", "init", "--name", "Alex"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Vault ready"));

        let shown = stdout_json(device.unlocked().args(["vault", "show", "--json"]));
        assert_eq!(shown["userName"], "Alex");
        assert_eq!(shown["entries"], 0);
        assert!(device.home.path().join("vault").join("envelopeBudgetData.json").exists());
    }

    #[test]
    fn wrong_password_is_rejected() {
        let device = Device::new(None);
        device.unlocked().args(["vault", "init"]).assert().success();

        device
            .unlocked()
            .env("VVSYNC_PASSWORD", "wrong horse")
            .args(["vault", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid credentials"));
    }

    #[test]
    fn entry_set_get_rm() {
        let device = Device::new(None);
        device
            .unlocked()
            .args(["entry", "set", "envelopes:rent", r#"{"balance":800}"#])
            .assert()
            .success();
        device
            .unlocked()
            .args(["entry", "patch", "envelopes:rent", r#"{"spent":120}"#])
            .assert()
            .success();

        let entry = stdout_json(device.unlocked().args(["entry", "get", "envelopes:rent", "--json"]));
        assert_eq!(entry["value"]["balance"], 800);
        assert_eq!(entry["value"]["spent"], 120);

        device
            .unlocked()
            .args(["entry", "rm", "envelopes:rent"])
            .assert()
            .success();
        device
            .unlocked()
            .args(["entry", "get", "envelopes:rent"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No entry named envelopes:rent"));

        let status = stdout_json(device.unlocked().args(["vault", "status", "--json"]));
        assert_eq!(status["pending"], 1);
    }

    #[test]
    fn sync_requires_remote_dir() {
        Device::new(None)
            .unlocked()
            .arg("sync")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Remote directory not configured"));
    }

    #[test]
    fn sync_between_two_devices() {
        let remote = TempDir::new().unwrap();
        let alex = Device::new(Some(remote.path()));
        let sam = Device::new(Some(remote.path()));

        alex.unlocked()
            .args(["entry", "set", "bills:power", r#"{"amount":60}"#])
            .assert()
            .success();
        let pushed = stdout_json(alex.unlocked().args(["sync", "--json"]));
        // The loop's first pass may finish before the forced one joins it
        assert_eq!(pushed["outcome"], "completed");

        let pulled = stdout_json(sam.unlocked().args(["sync", "--json"]));
        assert_eq!(pulled["outcome"], "completed");

        let entry = stdout_json(sam.unlocked().args(["entry", "get", "bills:power", "--json"]));
        assert_eq!(entry["value"]["amount"], 60);

        let status = stdout_json(alex.unlocked().args(["vault", "status", "--json"]));
        assert_eq!(status["pending"], 0);
        assert!(status["lastSyncedAt"].is_i64());
    }

    #[test]
    fn lock_contention_between_devices() {
        let remote = TempDir::new().unwrap();
        let alex = Device::new(Some(remote.path()));
        let sam = Device::new(Some(remote.path()));

        alex.unlocked()
            .args(["vault", "init", "--name", "Alex"])
            .assert()
            .success();
        alex.unlocked()
            .args(["lock", "acquire", "envelope", "rent"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Locked envelope rent"));

        let status = stdout_json(sam.unlocked().args(["lock", "show", "envelope", "rent", "--json"]));
        assert_eq!(status["canEdit"], false);
        assert_eq!(status["lockedBy"], "Alex");

        sam.unlocked()
            .args(["lock", "acquire", "envelope", "rent"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("being edited by Alex"));

        sam.unlocked()
            .args(["lock", "break", "envelope", "rent", "--yes"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("has not expired"));

        alex.unlocked()
            .args(["lock", "release", "envelope", "rent"])
            .assert()
            .success();
        let status = stdout_json(sam.unlocked().args(["lock", "show", "envelope", "rent", "--json"]));
        assert_eq!(status["canEdit"], true);
    }

    #[test]
    fn config_path_and_set() {
        let device = Device::new(None);
        device
            .cmd()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));

        device
            .cmd()
            .args(["config", "set", "lock.ttl_secs", "90"])
            .assert()
            .success();

        let config = std::fs::read_to_string(&device.config).unwrap();
        assert!(config.contains("ttl_secs = 90"));
        // Values from the original file survive the rewrite
        assert!(config.contains("memory_kib = 64"));
    }

    #[test]
    fn config_rejects_unknown_key() {
        Device::new(None)
            .cmd()
            .args(["config", "set", "vm.name", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn config_show() {
        Device::new(None)
            .cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"));
    }
}
