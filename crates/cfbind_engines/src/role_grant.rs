#![forbid(unsafe_code)]

use std::env;
use std::time::Duration;

use cfbind_contracts::binding::PlatformUserId;

use crate::bounded_detail;

pub const DISCORD_API_BASE_DEFAULT: &str = "https://discord.com/api/v10";
pub const DISCORD_TIMEOUT_MS_DEFAULT: u64 = 5_000;

/// Grants the elevated capability once a binding has been committed.
pub trait CapabilityGrant: Send + Sync {
    fn grant(&self, user_id: &PlatformUserId) -> Result<(), CapabilityGrantError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityGrantError {
    #[error("role grant not configured")]
    NotConfigured,
    #[error("role grant rejected with http status {status}")]
    HttpStatus { status: u16 },
    #[error("role grant transport error: {detail}")]
    Transport { detail: String },
}

/// Used when no role bridge is configured, so the partial-success path is still reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCapabilityGrant;

impl CapabilityGrant for DisabledCapabilityGrant {
    fn grant(&self, _user_id: &PlatformUserId) -> Result<(), CapabilityGrantError> {
        Err(CapabilityGrantError::NotConfigured)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct DiscordRoleGrantConfig {
    pub api_base: String,
    pub bot_token: String,
    pub guild_id: String,
    pub role_id: String,
    pub timeout_ms: u64,
}

impl std::fmt::Debug for DiscordRoleGrantConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordRoleGrantConfig")
            .field("api_base", &self.api_base)
            .field("bot_token", &"<redacted>")
            .field("guild_id", &self.guild_id)
            .field("role_id", &self.role_id)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl DiscordRoleGrantConfig {
    /// `None` unless token, guild and role are all present.
    pub fn from_env() -> Option<Self> {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    fn from_env_var_map(var: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let non_empty = |key: &str| {
            var(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let bot_token = non_empty("CFBIND_DISCORD_BOT_TOKEN")?;
        let guild_id = non_empty("CFBIND_DISCORD_GUILD_ID")?;
        let role_id = non_empty("CFBIND_DISCORD_VERIFIED_ROLE_ID")?;
        let api_base = non_empty("CFBIND_DISCORD_API_BASE")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DISCORD_API_BASE_DEFAULT.to_string());
        let timeout_ms = non_empty("CFBIND_DISCORD_TIMEOUT_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| (100..=60_000).contains(v))
            .unwrap_or(DISCORD_TIMEOUT_MS_DEFAULT);
        Some(Self {
            api_base,
            bot_token,
            guild_id,
            role_id,
            timeout_ms,
        })
    }

    fn member_role_url(&self, user_id: &PlatformUserId) -> String {
        format!(
            "{}/guilds/{}/members/{}/roles/{}",
            self.api_base,
            self.guild_id,
            user_id.as_str(),
            self.role_id
        )
    }
}

/// Adds the configured role to a guild member through the Discord REST API.
#[derive(Debug, Clone)]
pub struct DiscordRoleGrant {
    config: DiscordRoleGrantConfig,
    agent: ureq::Agent,
}

impl DiscordRoleGrant {
    pub fn new(config: DiscordRoleGrantConfig) -> Self {
        let timeout = Duration::from_millis(config.timeout_ms.max(100));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self { config, agent }
    }
}

impl CapabilityGrant for DiscordRoleGrant {
    fn grant(&self, user_id: &PlatformUserId) -> Result<(), CapabilityGrantError> {
        let res = self
            .agent
            .put(&self.config.member_role_url(user_id))
            .set("Authorization", &format!("Bot {}", self.config.bot_token))
            .set("X-Audit-Log-Reason", "codeforces handle verified")
            .send_bytes(&[]);
        match res {
            Ok(resp) if (200..=299).contains(&resp.status()) => Ok(()),
            Ok(resp) => Err(CapabilityGrantError::HttpStatus {
                status: resp.status(),
            }),
            Err(ureq::Error::Status(status, _)) => Err(CapabilityGrantError::HttpStatus { status }),
            Err(ureq::Error::Transport(transport)) => Err(CapabilityGrantError::Transport {
                detail: bounded_detail(transport.to_string()),
            }),
        }
    }
}
