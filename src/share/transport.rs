//! Transport forms of a share code.
//!
//! Two shapes exist in the wild:
//!
//! - legacy: `VV-SHARE-word-word-word-word`
//! - JSON (QR payload): `{"type":"violetVault_share","shareCode":"...","version":"2.0", ...}`
//!
//! [`decode`] accepts both. Creator metadata is for display only and never
//! feeds key derivation.

use super::code::ShareCode;
use crate::error::{VaultError, VaultResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};

const LEGACY_PREFIX: &str = "VV-SHARE-";
const PAYLOAD_TYPE: &str = "violetVault_share";
const LEGACY_VERSION: &str = "1.0";
const CURRENT_VERSION: &str = "2.0";

/// Who created a share code, shown to the person joining
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatorInfo {
    pub user_name: String,
    pub user_color: Option<String>,
}

/// Decoded share payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharePayload {
    share_code: ShareCode,
    pub created_by: Option<String>,
    pub creator_color: Option<String>,
    /// Creation time in epoch milliseconds
    pub created_at: Option<i64>,
    pub version: String,
}

impl SharePayload {
    /// The only part of a payload that may be used to derive an identity
    pub fn share_code(&self) -> &ShareCode {
        &self.share_code
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QrDocument {
    #[serde(rename = "type")]
    kind: String,
    share_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    creator_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<i64>,
    #[serde(default)]
    version: Option<String>,
}

/// Legacy transport string, e.g. `VV-SHARE-ripple-canyon-violin-budget`
pub fn encode(code: &ShareCode) -> String {
    let joined: Vec<&str> = code.words().collect();
    format!("{}{}", LEGACY_PREFIX, joined.join("-"))
}

/// JSON payload for QR codes
pub fn encode_qr(code: &ShareCode, creator: Option<&CreatorInfo>) -> VaultResult<String> {
    let doc = QrDocument {
        kind: PAYLOAD_TYPE.to_string(),
        share_code: code.as_str().to_string(),
        created_by: creator.map(|c| c.user_name.clone()),
        creator_color: creator.and_then(|c| c.user_color.clone()),
        created_at: creator.map(|_| Utc::now().timestamp_millis()),
        version: Some(CURRENT_VERSION.to_string()),
    };
    Ok(serde_json::to_string(&doc)?)
}

/// Decode either transport form
pub fn decode(payload: &str) -> VaultResult<SharePayload> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(VaultError::invalid_format("empty payload"));
    }

    if let Some(rest) = payload.strip_prefix(LEGACY_PREFIX) {
        let share_code = ShareCode::parse(&rest.replace('-', " "))?;
        return Ok(SharePayload {
            share_code,
            created_by: None,
            creator_color: None,
            created_at: None,
            version: LEGACY_VERSION.to_string(),
        });
    }

    let doc: QrDocument = serde_json::from_str(payload)
        .map_err(|_| VaultError::invalid_format("not a share payload"))?;
    if doc.kind != PAYLOAD_TYPE {
        return Err(VaultError::invalid_format(format!(
            "unexpected payload type '{}'",
            doc.kind
        )));
    }

    Ok(SharePayload {
        share_code: ShareCode::parse(&doc.share_code)?,
        created_by: doc.created_by,
        creator_color: doc.creator_color,
        created_at: doc.created_at,
        version: doc.version.unwrap_or_else(|| CURRENT_VERSION.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> ShareCode {
        ShareCode::parse("abandon ability able about").unwrap()
    }

    #[test]
    fn legacy_encode_decode() {
        let encoded = encode(&code());
        assert_eq!(encoded, "VV-SHARE-abandon-ability-able-about");

        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.share_code(), &code());
        assert_eq!(decoded.version, "1.0");
        assert!(decoded.created_by.is_none());
    }

    #[test]
    fn qr_without_creator_omits_metadata() {
        let json = encode_qr(&code(), None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "violetVault_share");
        assert_eq!(value["shareCode"], "abandon ability able about");
        assert_eq!(value["version"], "2.0");
        assert!(value.get("createdBy").is_none());
    }

    #[test]
    fn qr_with_creator() {
        let creator = CreatorInfo {
            user_name: "TestUser".to_string(),
            user_color: Some("#FF0000".to_string()),
        };
        let decoded = decode(&encode_qr(&code(), Some(&creator)).unwrap()).unwrap();
        assert_eq!(decoded.created_by.as_deref(), Some("TestUser"));
        assert_eq!(decoded.creator_color.as_deref(), Some("#FF0000"));
        assert!(decoded.created_at.unwrap() > 0);
        assert_eq!(decoded.version, "2.0");
    }

    #[test]
    fn decode_normalizes_code() {
        let json = r#"{"type":"violetVault_share","shareCode":"  Abandon  Ability  Able  About  ","version":"2.0"}"#;
        assert_eq!(
            decode(json).unwrap().share_code().as_str(),
            "abandon ability able about"
        );
    }

    #[test]
    fn decode_rejects_bad_payloads() {
        assert!(decode("").is_err());
        assert!(decode("not valid json").is_err());
        assert!(decode(r#"{"type":"wrong_type","shareCode":"abandon ability able about"}"#).is_err());
        assert!(decode(r#"{"type":"violetVault_share","version":"2.0"}"#).is_err());
        assert!(decode(r#"{"type":"violetVault_share","shareCode":"invalid code"}"#).is_err());
        assert!(decode("VV-SHARE-abandon-ability").is_err());
    }
}
