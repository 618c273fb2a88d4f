//! Terminal output for the CLI
//!
//! Uses `cliclack` for prompts and spinners, falling back to plain lines in
//! CI or when output is piped. Commands that support `--json` print machine
//! readable output instead and skip decoration entirely.

mod context;
mod output;
mod progress;
mod prompts;
mod theme;

pub use context::UiContext;
pub use output::{
    intro, json, key_value, key_value_status, outro_success, remark, section, step_ok,
    step_warn, step_warn_hint,
};
pub use progress::TaskSpinner;
pub use prompts::{confirm, password, share_code};
pub use theme::{init_theme, VaultTheme};
