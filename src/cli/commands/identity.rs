//! Identity command - print the budget id for a set of credentials

use crate::cli::args::CredentialArgs;
use crate::cli::commands::unlock;
use crate::config::Config;
use crate::error::VaultResult;
use crate::identity::generate_budget_id;
use crate::ui::{self, UiContext};
use serde_json::json;

/// The id is a pure function of the inputs, so no key is derived here
pub async fn execute(args: CredentialArgs, _config: &Config, ctx: &UiContext) -> VaultResult<()> {
    let credentials = unlock::credentials(ctx, &args, None).await?;
    let budget_id = generate_budget_id(credentials.password(), credentials.share_code())?;

    if ctx.is_json() {
        return ui::json(&json!({
            "budgetId": budget_id.as_str(),
            "short": budget_id.short(),
        }));
    }
    println!("{}", budget_id);
    Ok(())
}
