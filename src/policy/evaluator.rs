use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use super::config::ProxyConfig;
use crate::pii::{distinct_types, PiiMatch};

/// What the proxy does with a request after scanning it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Forward unmodified (clean request, or audit-only mode).
    Pass,
    /// Mask matched spans before forwarding.
    Redact,
    /// Reject without contacting the upstream.
    Block,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Pass => "pass",
            Action::Redact => "redact",
            Action::Block => "block",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(Action::Pass),
            "redact" => Some(Action::Redact),
            "block" => Some(Action::Block),
            _ => None,
        }
    }
}

/// JSON body returned to the caller when a request is blocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionBody {
    pub error: String,
    pub pii_types: Vec<String>,
}

/// Status and body of a block response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub body: RejectionBody,
}

/// Result of a policy decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,
    pub rejection: Option<Rejection>,
}

/// Decide the action for a request given its findings.
///
/// Block wins over redact when both are configured. With neither set the
/// request passes and the findings are only recorded.
pub fn decide(matches: &[PiiMatch], config: &ProxyConfig) -> Decision {
    if matches.is_empty() {
        return Decision {
            action: Action::Pass,
            rejection: None,
        };
    }

    if config.block_mode {
        return Decision {
            action: Action::Block,
            rejection: Some(Rejection {
                status: StatusCode::BAD_REQUEST,
                body: RejectionBody {
                    error: "PII detected".to_string(),
                    pii_types: distinct_types(matches),
                },
            }),
        };
    }

    let action = if config.redact_mode {
        Action::Redact
    } else {
        Action::Pass
    };
    Decision {
        action,
        rejection: None,
    }
}
