//! Request/response protocol between the extension pages and the background
//!
//! Messages are JSON objects tagged by `action`; every reply carries
//! `success` and, on failure, an `error` payload.

use serde::{Deserialize, Serialize};

use crate::error::BlockerError;
use crate::types::{RuleEdit, Site};

fn default_true() -> bool {
    true
}

/// A request from the popup, options or blocked page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Action {
    #[serde(rename_all = "camelCase")]
    BlockUrl {
        url: String,
        #[serde(default = "default_true")]
        block_domain: bool,
    },
    #[serde(rename_all = "camelCase")]
    DeleteRule { delete_rule_id: u32 },
    DeleteAll,
    GetRules,
    #[serde(rename_all = "camelCase")]
    UpdateRules { updated_rules: Vec<RuleEdit> },
    GetCurrentUrl,
    SetStrictMode { enabled: bool },
    GetStrictMode,
    GetDisableQuota,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Added,
    Duplicate,
    Deleted,
    DeletedRule,
    GetRules,
    Updated,
    CurrUrl,
    StrictMode,
    DisableQuota,
}

/// Failure category, so pages can word their message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidInput,
    Host,
    QuotaExceeded,
    RuleLimit,
    UnknownRule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&BlockerError> for ErrorPayload {
    fn from(err: &BlockerError) -> Self {
        let kind = match err {
            BlockerError::InvalidInput(_) => ErrorKind::InvalidInput,
            BlockerError::Host(_) => ErrorKind::Host,
            BlockerError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            BlockerError::RuleLimitReached { .. } => ErrorKind::RuleLimit,
            BlockerError::UnknownRule(_) => ErrorKind::UnknownRule,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// Reply to an [`Action`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Site>>,
    /// Added rule id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Ids whose edits were dropped by an update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropped: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_mode: Option<bool>,
    /// Deactivations left today
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl Response {
    pub fn ok(status: Status, msg: impl Into<String>) -> Self {
        Self {
            success: true,
            status: Some(status),
            msg: Some(msg.into()),
            ..Self::default()
        }
    }

    pub fn failure(err: &BlockerError) -> Self {
        Self {
            success: false,
            msg: Some(err.to_string()),
            error: Some(ErrorPayload::from(err)),
            ..Self::default()
        }
    }

    pub fn with_rules(mut self, rules: Vec<Site>) -> Self {
        self.rules = Some(rules);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvalidUrl;
    use serde_json::json;

    #[test]
    fn test_parse_actions() {
        let action: Action =
            serde_json::from_value(json!({"action": "blockUrl", "url": "example.com", "blockDomain": false})).unwrap();
        assert_eq!(
            action,
            Action::BlockUrl {
                url: "example.com".to_string(),
                block_domain: false
            }
        );

        let action: Action = serde_json::from_value(json!({"action": "blockUrl", "url": "example.com"})).unwrap();
        assert!(matches!(action, Action::BlockUrl { block_domain: true, .. }));

        let action: Action = serde_json::from_value(json!({"action": "deleteRule", "deleteRuleId": 12})).unwrap();
        assert_eq!(action, Action::DeleteRule { delete_rule_id: 12 });

        let action: Action = serde_json::from_value(json!({"action": "deleteAll"})).unwrap();
        assert_eq!(action, Action::DeleteAll);

        let action: Action = serde_json::from_value(json!({
            "action": "updateRules",
            "updatedRules": [{"id": 3, "url": "a.com", "blockDomain": true, "isActive": false}]
        }))
        .unwrap();
        assert!(matches!(action, Action::UpdateRules { ref updated_rules } if updated_rules.len() == 1));
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert!(serde_json::from_value::<Action>(json!({"action": "format"})).is_err());
    }

    #[test]
    fn test_response_shape() {
        let res = Response::ok(Status::Duplicate, "URL is already blocked");
        assert_eq!(
            serde_json::to_value(&res).unwrap(),
            json!({"success": true, "status": "duplicate", "msg": "URL is already blocked"})
        );

        let err = BlockerError::InvalidInput(InvalidUrl::TooShort { min: 4 });
        let res = Response::failure(&err);
        let value = serde_json::to_value(&res).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["error"]["kind"], json!("invalidInput"));
    }
}
