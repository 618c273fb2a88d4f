//! Prompts for credentials, refused outside a terminal

use super::context::UiContext;
use crate::error::{VaultError, VaultResult};
use crate::share;

/// Read the vault password
pub async fn password(ctx: &UiContext, message: &str) -> VaultResult<String> {
    if !ctx.is_interactive() {
        return Err(VaultError::EmptyPassword);
    }

    let message = message.to_string();
    let value = tokio::task::spawn_blocking(move || {
        cliclack::password(&message)
            .mask('•')
            .validate(|input: &String| {
                if input.is_empty() {
                    Err("Password is required")
                } else {
                    Ok(())
                }
            })
            .interact()
    })
    .await
    .map_err(|e| VaultError::User(format!("Prompt task failed: {}", e)))?;

    value.map_err(|e| VaultError::User(format!("Prompt failed: {}", e)))
}

/// Read a share code, validating it as the user types
pub async fn share_code(ctx: &UiContext, message: &str) -> VaultResult<String> {
    if !ctx.is_interactive() {
        return Err(VaultError::InvalidShareCode(
            "no share code given".to_string(),
        ));
    }

    let message = message.to_string();
    let value: Result<String, std::io::Error> = tokio::task::spawn_blocking(move || {
        cliclack::input(&message)
            .placeholder("four words from your invite")
            .validate(|input: &String| {
                if share::validate(input) {
                    Ok(())
                } else {
                    Err("Expected 4 words from the word list")
                }
            })
            .interact()
    })
    .await
    .map_err(|e| VaultError::User(format!("Prompt task failed: {}", e)))?;

    value.map_err(|e| VaultError::User(format!("Prompt failed: {}", e)))
}

/// Yes/no question; non-interactive runs get `default`
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> VaultResult<bool> {
    if !ctx.is_interactive() {
        return Ok(default);
    }

    let message = message.to_string();
    let result = tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message).initial_value(default).interact()
    })
    .await
    .map_err(|e| VaultError::User(format!("Prompt task failed: {}", e)))?;

    result.map_err(|e| VaultError::User(format!("Prompt failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn confirm_non_interactive_default() {
        let ctx = UiContext::non_interactive();
        assert!(confirm(&ctx, "Break lock?", true).await.unwrap());
        assert!(!confirm(&ctx, "Break lock?", false).await.unwrap());
    }

    #[tokio::test]
    async fn credentials_are_not_prompted_without_terminal() {
        let ctx = UiContext::non_interactive();
        assert!(matches!(
            password(&ctx, "Password").await,
            Err(VaultError::EmptyPassword)
        ));
        assert!(matches!(
            share_code(&ctx, "Share code").await,
            Err(VaultError::InvalidShareCode(_))
        ));
    }
}
