//! Output mode detection

use std::io::IsTerminal;

const CI_VARS: [&str; 8] = [
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "TRAVIS",
    "JENKINS_URL",
    "BUILDKITE",
    "TEAMCITY_VERSION",
    "TF_BUILD",
];

/// How the current command should talk to the user
#[derive(Debug, Clone)]
pub struct UiContext {
    interactive: bool,
    json: bool,
}

impl UiContext {
    /// Detect from the terminal and environment
    pub fn detect() -> Self {
        Self {
            interactive: Self::detect_interactive(),
            json: false,
        }
    }

    /// Plain output and no prompts
    pub fn non_interactive() -> Self {
        Self {
            interactive: false,
            json: false,
        }
    }

    /// Switch to JSON output. JSON mode never prompts.
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        if json {
            self.interactive = false;
        }
        self
    }

    /// Prompts are allowed
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    /// Spinners and colored log lines
    pub fn use_fancy_output(&self) -> bool {
        self.interactive && !self.json
    }

    /// Human readable lines (anything but JSON)
    pub fn is_human(&self) -> bool {
        !self.json
    }

    fn detect_interactive() -> bool {
        if !std::io::stdout().is_terminal() || !std::io::stdin().is_terminal() {
            return false;
        }
        if std::env::var("CI").is_ok() {
            return false;
        }
        !CI_VARS.iter().any(|var| std::env::var(var).is_ok())
    }
}
