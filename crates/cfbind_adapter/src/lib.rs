#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use cfbind_contracts::binding::{PlatformUserId, SweepResult};
use cfbind_contracts::UnixTimeMs;
use cfbind_engines::codeforces::{
    CodeforcesClientConfig, CodeforcesConfigError, CodeforcesProfileClient,
};
use cfbind_engines::role_grant::{
    CapabilityGrant, DisabledCapabilityGrant, DiscordRoleGrant, DiscordRoleGrantConfig,
};
use cfbind_engines::token::OsRngTokenSource;
use cfbind_os::commands::{CommandDispatcher, VerifyCommand};
use cfbind_os::verification::VerificationRuntime;
use cfbind_storage::bindings::{InMemoryBindingStore, SqliteBindingStore};
use cfbind_storage::pending::PendingChallengeRegistry;
use cfbind_storage::repo::VerifiedBindingRepo;
use cfbind_storage::StorageError;

pub const DB_PATH_DEFAULT: &str = "cfbind.sqlite3";
pub const DB_PATH_IN_MEMORY: &str = ":memory:";
pub const HTTP_BIND_DEFAULT: &str = "127.0.0.1:8080";
pub const SWEEP_WORKER_INTERVAL_MS_DEFAULT: u64 = 3_600_000;
pub const SWEEP_MAX_AGE_DAYS_DEFAULT: u32 = 7;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("storage setup failed: {0}")]
    Storage(#[from] StorageError),
    #[error("codeforces client setup failed: {0}")]
    Codeforces(#[from] CodeforcesConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub http_bind: String,
    pub db_path: String,
    pub codeforces: CodeforcesClientConfig,
    pub discord: Option<DiscordRoleGrantConfig>,
    pub sweep_worker_enabled: bool,
    pub sweep_worker_interval_ms: u64,
    pub sweep_max_age_days: u32,
}

impl AdapterConfig {
    pub fn from_env() -> Self {
        Self::from_env_var_map(|key| env::var(key).ok())
            .with_codeforces(CodeforcesClientConfig::from_env())
            .with_discord(DiscordRoleGrantConfig::from_env())
    }

    fn from_env_var_map(var: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            var(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            http_bind: non_empty("CFBIND_HTTP_BIND")
                .unwrap_or_else(|| HTTP_BIND_DEFAULT.to_string()),
            db_path: non_empty("CFBIND_DB_PATH").unwrap_or_else(|| DB_PATH_DEFAULT.to_string()),
            codeforces: CodeforcesClientConfig::mvp_v1(),
            discord: None,
            sweep_worker_enabled: non_empty("CFBIND_SWEEP_WORKER_ENABLED")
                .map(|v| {
                    matches!(
                        v.to_ascii_lowercase().as_str(),
                        "1" | "true" | "on" | "yes"
                    )
                })
                .unwrap_or(false),
            sweep_worker_interval_ms: non_empty("CFBIND_SWEEP_WORKER_INTERVAL_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| (1_000..=86_400_000).contains(v))
                .unwrap_or(SWEEP_WORKER_INTERVAL_MS_DEFAULT),
            sweep_max_age_days: non_empty("CFBIND_SWEEP_MAX_AGE_DAYS")
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|v| *v <= 3_650)
                .unwrap_or(SWEEP_MAX_AGE_DAYS_DEFAULT),
        }
    }

    fn with_codeforces(mut self, codeforces: CodeforcesClientConfig) -> Self {
        self.codeforces = codeforces;
        self
    }

    fn with_discord(mut self, discord: Option<DiscordRoleGrantConfig>) -> Self {
        self.discord = discord;
        self
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CommandAdapterRequest {
    pub user_id: String,
    pub command: String,
    pub username: Option<String>,
    pub days: Option<i64>,
    pub requester_is_privileged: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommandAdapterResponse {
    pub status: String,
    pub outcome: String,
    pub content: String,
    pub ephemeral: bool,
}

impl CommandAdapterResponse {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            outcome: "REJECTED".to_string(),
            content: reason.into(),
            ephemeral: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub verified_count: u64,
    pub pending_count: u64,
}

pub fn parse_command(request: &CommandAdapterRequest) -> Result<VerifyCommand, String> {
    match request.command.trim().to_ascii_lowercase().as_str() {
        "start" => Ok(VerifyCommand::Start),
        "check" => {
            let username = request
                .username
                .as_ref()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| "check requires username".to_string())?;
            Ok(VerifyCommand::Check { username })
        }
        "whoami" => Ok(VerifyCommand::WhoAmI),
        "cleanup" => {
            let days = request
                .days
                .ok_or_else(|| "cleanup requires days".to_string())?;
            Ok(VerifyCommand::Cleanup {
                days,
                requester_is_privileged: request.requester_is_privileged.unwrap_or(false),
            })
        }
        other => Err(format!("unknown command '{other}'")),
    }
}

pub fn now_unix_ms() -> UnixTimeMs {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    UnixTimeMs(ms)
}

pub struct AdapterRuntime {
    dispatcher: CommandDispatcher,
}

impl AdapterRuntime {
    pub fn new(runtime: VerificationRuntime) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(Arc::new(runtime)),
        }
    }

    pub fn from_config(config: &AdapterConfig) -> Result<Self, AdapterError> {
        let bindings: Arc<dyn VerifiedBindingRepo> = if config.db_path == DB_PATH_IN_MEMORY {
            tracing::warn!("using in-memory binding store; verified users are lost on restart");
            Arc::new(InMemoryBindingStore::new())
        } else {
            Arc::new(SqliteBindingStore::open(&config.db_path)?)
        };
        let lookup = Arc::new(CodeforcesProfileClient::new(&config.codeforces)?);
        let grant: Arc<dyn CapabilityGrant> = match config.discord.clone() {
            Some(discord) => Arc::new(DiscordRoleGrant::new(discord)),
            None => {
                tracing::warn!("discord role grant not configured; verified users get no role");
                Arc::new(DisabledCapabilityGrant)
            }
        };
        Ok(Self::new(VerificationRuntime::new(
            bindings,
            Arc::new(PendingChallengeRegistry::new()),
            lookup,
            grant,
            Arc::new(OsRngTokenSource),
        )))
    }

    pub fn run_command(
        &self,
        request: CommandAdapterRequest,
    ) -> Result<CommandAdapterResponse, String> {
        self.run_command_at(now_unix_ms(), request)
    }

    pub fn run_command_at(
        &self,
        now: UnixTimeMs,
        request: CommandAdapterRequest,
    ) -> Result<CommandAdapterResponse, String> {
        let user_id = PlatformUserId::new(request.user_id.trim())
            .map_err(|err| format!("invalid user_id: {err}"))?;
        let command = parse_command(&request)?;
        let reply = self.dispatcher.dispatch(now, &user_id, &command);
        Ok(CommandAdapterResponse {
            status: if reply.is_failure() { "error" } else { "ok" }.to_string(),
            outcome: reply.outcome.to_string(),
            content: reply.content,
            ephemeral: reply.ephemeral,
        })
    }

    pub fn health_report(&self) -> Result<AdapterHealthResponse, String> {
        let runtime = self.dispatcher.runtime();
        let verified_count = runtime
            .bindings()
            .count()
            .map_err(|err| format!("binding store unavailable: {err}"))?;
        Ok(AdapterHealthResponse {
            status: "ok".to_string(),
            outcome: "HEALTHY".to_string(),
            reason: None,
            verified_count,
            pending_count: runtime.pending().len() as u64,
        })
    }

    pub fn run_sweep_worker_pass(&self, now: UnixTimeMs, max_age_days: u32) -> SweepResult {
        self.dispatcher.runtime().sweep(now, max_age_days)
    }
}
