//! Share command - generate and convert share codes

use crate::cli::args::{ShareAction, ShareArgs};
use crate::error::{VaultError, VaultResult};
use crate::share::{self, CreatorInfo, ShareCode};
use crate::ui::{self, UiContext};
use serde_json::json;

pub async fn execute(args: ShareArgs, ctx: &UiContext) -> VaultResult<()> {
    match args.action {
        ShareAction::Generate => generate(ctx),
        ShareAction::Validate { code } => validate(ctx, &code),
        ShareAction::Encode { code, name, color } => encode(ctx, &code, name, color),
        ShareAction::Decode { payload } => decode(ctx, &payload),
    }
}

fn generate(ctx: &UiContext) -> VaultResult<()> {
    let code = ShareCode::generate();
    if ctx.is_json() {
        return ui::json(&json!({
            "shareCode": code.as_str(),
            "display": code.display_form(),
        }));
    }

    println!("{}", code);
    ui::remark(
        ctx,
        "Anyone with this code and the password can open the budget",
    );
    Ok(())
}

fn validate(ctx: &UiContext, code: &str) -> VaultResult<()> {
    let parsed = ShareCode::parse(code);
    if ctx.is_json() {
        ui::json(&json!({
            "valid": parsed.is_ok(),
            "normalized": parsed.as_ref().ok().map(|c| c.as_str()),
        }))?;
    }

    match parsed {
        Ok(code) => {
            ui::step_ok(ctx, &format!("Valid share code: {}", code.display_form()));
            Ok(())
        }
        Err(VaultError::InvalidFormat { reason }) => Err(VaultError::InvalidShareCode(reason)),
        Err(e) => Err(e),
    }
}

fn encode(
    ctx: &UiContext,
    code: &str,
    name: Option<String>,
    color: Option<String>,
) -> VaultResult<()> {
    let code = ShareCode::parse(code)?;
    let encoded = match (name, color) {
        (None, None) => share::encode(&code),
        (name, color) => share::encode_qr(
            &code,
            Some(&CreatorInfo {
                user_name: name.unwrap_or_default(),
                user_color: color,
            }),
        )?,
    };

    if ctx.is_json() {
        return ui::json(&json!({ "payload": encoded }));
    }
    println!("{}", encoded);
    Ok(())
}

fn decode(ctx: &UiContext, payload: &str) -> VaultResult<()> {
    let decoded = share::decode(payload)?;
    let code = decoded.share_code();

    if ctx.is_json() {
        return ui::json(&json!({
            "shareCode": code.as_str(),
            "createdBy": decoded.created_by,
            "creatorColor": decoded.creator_color,
            "createdAt": decoded.created_at,
            "version": decoded.version,
        }));
    }

    ui::key_value(ctx, "Share code", code.as_str());
    ui::key_value(ctx, "Version", &decoded.version);
    if let Some(by) = &decoded.created_by {
        ui::key_value(ctx, "Created by", by);
    }
    if let Some(color) = &decoded.creator_color {
        ui::key_value(ctx, "Color", color);
    }
    if let Some(at) = decoded.created_at {
        ui::key_value(ctx, "Created", &crate::clock::from_ms(at).to_rfc3339());
    }
    Ok(())
}
