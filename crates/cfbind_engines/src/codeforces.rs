#![forbid(unsafe_code)]

use std::env;
use std::time::Duration;

use cfbind_contracts::binding::{ExternalHandle, ProfileLookupOutcome};
use serde::Deserialize;

use crate::bounded_detail;

pub const CODEFORCES_BASE_URL_DEFAULT: &str = "https://codeforces.com/api";
pub const CODEFORCES_TIMEOUT_MS_DEFAULT: u64 = 5_000;

/// Read-only query against an external profile service.
///
/// Implementations issue exactly one request per call and never retry.
pub trait ProfileLookup: Send + Sync {
    fn lookup(&self, handle: &ExternalHandle) -> ProfileLookupOutcome;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeforcesConfigError {
    #[error("timeout must be > 0")]
    ZeroTimeout,
    #[error("base url must start with http:// or https://")]
    InvalidBaseUrl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeforcesClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl CodeforcesClientConfig {
    pub fn mvp_v1() -> Self {
        Self {
            base_url: CODEFORCES_BASE_URL_DEFAULT.to_string(),
            timeout_ms: CODEFORCES_TIMEOUT_MS_DEFAULT,
            user_agent: format!("cfbind/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn from_env() -> Self {
        let mut cfg = Self::mvp_v1();
        if let Some(base_url) = env::var("CFBIND_CODEFORCES_BASE_URL")
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
        {
            cfg.base_url = base_url;
        }
        if let Some(timeout_ms) = env::var("CFBIND_CODEFORCES_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| (100..=60_000).contains(v))
        {
            cfg.timeout_ms = timeout_ms;
        }
        cfg
    }

    fn validate(&self) -> Result<(), CodeforcesConfigError> {
        if self.timeout_ms == 0 {
            return Err(CodeforcesConfigError::ZeroTimeout);
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(CodeforcesConfigError::InvalidBaseUrl);
        }
        Ok(())
    }
}

/// Looks up `user.info` and exposes the profile's "First name" as the comparable field.
#[derive(Debug, Clone)]
pub struct CodeforcesProfileClient {
    agent: ureq::Agent,
    user_info_url: String,
}

impl CodeforcesProfileClient {
    pub fn new(config: &CodeforcesClientConfig) -> Result<Self, CodeforcesConfigError> {
        config.validate()?;
        let timeout = Duration::from_millis(config.timeout_ms);
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(&config.user_agent)
            .build();
        Ok(Self {
            agent,
            user_info_url: format!("{}/user.info", config.base_url.trim_end_matches('/')),
        })
    }
}

impl ProfileLookup for CodeforcesProfileClient {
    fn lookup(&self, handle: &ExternalHandle) -> ProfileLookupOutcome {
        let res = self
            .agent
            .get(&self.user_info_url)
            .query("handles", handle.as_str())
            .call();
        let body = match res {
            Ok(resp) => resp.into_string(),
            // Unknown handles come back as HTTP 400 with a FAILED envelope.
            Err(ureq::Error::Status(_, resp)) => resp.into_string(),
            Err(ureq::Error::Transport(transport)) => {
                let kind = classify_transport_error_kind(&format!(
                    "{:?} {}",
                    transport.kind(),
                    transport
                ));
                tracing::warn!(handle = handle.as_str(), kind, "codeforces lookup transport failure");
                return ProfileLookupOutcome::TransientFailure {
                    detail: format!("transport:{kind}"),
                };
            }
        };
        match body {
            Ok(body) => classify_user_info_body(&body, handle),
            Err(err) => ProfileLookupOutcome::TransientFailure {
                detail: bounded_detail(format!("body read failed: {err}")),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserInfoEnvelope {
    status: String,
    comment: Option<String>,
    result: Option<Vec<UserInfoRow>>,
}

#[derive(Debug, Deserialize)]
struct UserInfoRow {
    handle: Option<String>,
    #[serde(rename = "firstName")]
    first_name: Option<String>,
}

/// Maps a `user.info` response body onto the lookup outcome.
///
/// An `OK` body only counts when it holds exactly one row whose handle is the claimed one
/// (case-insensitive, as Codeforces resolves it).
pub fn classify_user_info_body(body: &str, claimed: &ExternalHandle) -> ProfileLookupOutcome {
    let envelope: UserInfoEnvelope = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => {
            return ProfileLookupOutcome::TransientFailure {
                detail: "json_parse".to_string(),
            }
        }
    };
    match envelope.status.as_str() {
        "OK" => {
            let mut rows = envelope.result.unwrap_or_default();
            if rows.len() != 1 {
                return ProfileLookupOutcome::NotFound;
            }
            let row = rows.remove(0);
            match row.handle {
                Some(h) if h.eq_ignore_ascii_case(claimed.as_str()) => {
                    ProfileLookupOutcome::Profile {
                        field_value: row.first_name,
                    }
                }
                _ => ProfileLookupOutcome::NotFound,
            }
        }
        "FAILED" => {
            let comment = envelope.comment.unwrap_or_default();
            if comment.to_ascii_lowercase().contains("not found") {
                ProfileLookupOutcome::NotFound
            } else {
                ProfileLookupOutcome::TransientFailure {
                    detail: bounded_detail(format!("failed:{comment}")),
                }
            }
        }
        other => ProfileLookupOutcome::TransientFailure {
            detail: bounded_detail(format!("unexpected_status:{other}")),
        },
    }
}

fn classify_transport_error_kind(raw: &str) -> &'static str {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("tls") || lower.contains("ssl") {
        "tls"
    } else if lower.contains("dns") {
        "dns"
    } else if lower.contains("connection") || lower.contains("connect") {
        "connection"
    } else {
        "transport"
    }
}
