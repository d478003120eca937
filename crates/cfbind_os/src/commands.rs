#![forbid(unsafe_code)]

use std::sync::Arc;

use cfbind_contracts::binding::{
    AttemptOutcome, BeginOutcome, InspectOutcome, PlatformUserId, RoleGrantStatus,
};
use cfbind_contracts::UnixTimeMs;
use serde::Serialize;
use serde_json::{json, Value};

use crate::verification::{VerificationError, VerificationRuntime};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyCommand {
    Start,
    Check {
        username: String,
    },
    WhoAmI,
    Cleanup {
        days: i64,
        requester_is_privileged: bool,
    },
}

impl VerifyCommand {
    pub fn name(&self) -> &'static str {
        match self {
            VerifyCommand::Start => "start",
            VerifyCommand::Check { .. } => "check",
            VerifyCommand::WhoAmI => "whoami",
            VerifyCommand::Cleanup { .. } => "cleanup",
        }
    }
}

/// One reply per invocation, visible to the invoking user only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReply {
    pub outcome: &'static str,
    pub content: String,
    pub ephemeral: bool,
}

impl CommandReply {
    fn private(outcome: &'static str, content: impl Into<String>) -> Self {
        Self {
            outcome,
            content: content.into(),
            ephemeral: true,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.outcome == "FAILED"
    }
}

/// Renders untrusted text as one inline code span: backticks and control characters are
/// dropped and the result is bounded, so it cannot open markdown or mention syntax.
fn code_span(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != '`' && !c.is_control())
        .take(64)
        .collect();
    if cleaned.trim().is_empty() {
        "(empty)".to_string()
    } else {
        format!("`{cleaned}`")
    }
}

/// Discord timestamp markup, rendered in the reader's locale.
fn discord_timestamp(t: UnixTimeMs) -> String {
    format!("<t:{}:F>", t.as_unix_secs())
}

pub struct CommandDispatcher {
    runtime: Arc<VerificationRuntime>,
}

impl CommandDispatcher {
    pub fn new(runtime: Arc<VerificationRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<VerificationRuntime> {
        &self.runtime
    }

    pub fn dispatch(
        &self,
        now: UnixTimeMs,
        user_id: &PlatformUserId,
        command: &VerifyCommand,
    ) -> CommandReply {
        let res = match command {
            VerifyCommand::Start => self.start(now, user_id),
            VerifyCommand::Check { username } => self.check(now, user_id, username),
            VerifyCommand::WhoAmI => self.whoami(user_id),
            VerifyCommand::Cleanup {
                days,
                requester_is_privileged,
            } => Ok(self.cleanup(now, *days, *requester_is_privileged)),
        };
        res.unwrap_or_else(|err| {
            tracing::error!(
                user_id = user_id.as_str(),
                command = command.name(),
                error = %err,
                "command failed"
            );
            CommandReply::private(
                "FAILED",
                "Something went wrong on our side. Please try again later or contact an operator.",
            )
        })
    }

    fn start(
        &self,
        now: UnixTimeMs,
        user_id: &PlatformUserId,
    ) -> Result<CommandReply, VerificationError> {
        Ok(match self.runtime.begin(now, user_id)? {
            BeginOutcome::AlreadyBound { binding } => CommandReply::private(
                "ALREADY_BOUND",
                format!(
                    "You have already bound the Codeforces account **{}**.\nNo need to bind again.",
                    binding.handle.as_str()
                ),
            ),
            BeginOutcome::ChallengeIssued { challenge } => CommandReply::private(
                "CHALLENGE_ISSUED",
                format!(
                    "Set the **First name** in your **Codeforces** profile to: `{}`\nThen run `/check <your Codeforces handle>` to verify.",
                    challenge.token.as_str()
                ),
            ),
        })
    }

    fn check(
        &self,
        now: UnixTimeMs,
        user_id: &PlatformUserId,
        username: &str,
    ) -> Result<CommandReply, VerificationError> {
        Ok(match self.runtime.attempt(now, user_id, username)? {
            AttemptOutcome::AlreadyBound { binding } => CommandReply::private(
                "ALREADY_BOUND",
                format!(
                    "You have already bound the Codeforces account **{}**; no need to verify again.",
                    binding.handle.as_str()
                ),
            ),
            AttemptOutcome::NotStarted => CommandReply::private(
                "NOT_STARTED",
                "You have not requested a verification string yet. Run `/start` first.",
            ),
            AttemptOutcome::UnknownExternalIdentity { handle } => CommandReply::private(
                "UNKNOWN_EXTERNAL_IDENTITY",
                format!(
                    "Could not find the Codeforces user {}. Please check the spelling.",
                    code_span(&handle)
                ),
            ),
            AttemptOutcome::TryAgainLater => CommandReply::private(
                "TRY_AGAIN_LATER",
                "Could not reach the Codeforces API. Please try again later.",
            ),
            AttemptOutcome::FieldUnset => CommandReply::private(
                "FIELD_UNSET",
                "You have not set a \"First name\" on Codeforces yet. Fill it in with the string the bot gave you, then try again.",
            ),
            AttemptOutcome::Mismatch { found, expected } => CommandReply::private(
                "MISMATCH",
                format!(
                    "Verification failed! Your First name {} does not match `{}`. Please double-check and try again.",
                    code_span(&found),
                    expected.as_str()
                ),
            ),
            AttemptOutcome::Verified {
                binding,
                role_grant: RoleGrantStatus::Granted,
            } => CommandReply::private(
                "VERIFIED",
                format!(
                    "Verification succeeded! Bound Codeforces account **{}**.",
                    binding.handle.as_str()
                ),
            ),
            AttemptOutcome::Verified {
                binding,
                role_grant: RoleGrantStatus::Failed { .. },
            } => CommandReply::private(
                "VERIFIED_ROLE_GRANT_FAILED",
                format!(
                    "Verification succeeded! Bound Codeforces account **{}**, but role assignment failed. Please contact an operator.",
                    binding.handle.as_str()
                ),
            ),
        })
    }

    fn whoami(&self, user_id: &PlatformUserId) -> Result<CommandReply, VerificationError> {
        Ok(match self.runtime.inspect(user_id)? {
            InspectOutcome::Verified { binding } => CommandReply::private(
                "STATUS_VERIFIED",
                format!(
                    "You are verified!\n**Bound CF account**: `{}`\n**Verified at**: {}",
                    binding.handle.as_str(),
                    discord_timestamp(binding.verified_at)
                ),
            ),
            InspectOutcome::Pending { challenge } => CommandReply::private(
                "STATUS_PENDING",
                format!(
                    "You have not finished verification.\n**Verification string**: `{}`\n**Started at**: {}\nSet your CF First name and run `/check` soon.",
                    challenge.token.as_str(),
                    discord_timestamp(challenge.started_at)
                ),
            ),
            InspectOutcome::NotStarted => CommandReply::private(
                "STATUS_NOT_STARTED",
                "You have not started verification yet. Run `/start` first.",
            ),
        })
    }

    fn cleanup(&self, now: UnixTimeMs, days: i64, requester_is_privileged: bool) -> CommandReply {
        if !requester_is_privileged {
            return CommandReply::private(
                "PERMISSION_DENIED",
                "You do not have permission to use this command (Manage Guild required).",
            );
        }
        if days < 0 {
            return CommandReply::private("INVALID_INPUT", "`days` must not be negative.");
        }
        // Anything past u32 days reaches back before the epoch either way.
        let max_age_days = u32::try_from(days).unwrap_or(u32::MAX);
        let res = self.runtime.sweep(now, max_age_days);
        CommandReply::private(
            "CLEANUP_DONE",
            format!(
                "Removed **{}** pending users that stayed unverified for more than **{days}** days.",
                res.removed
            ),
        )
    }
}

/// Slash-command definitions for an external registrar.
pub fn command_manifest() -> Value {
    json!([
        {
            "name": "start",
            "description": "Start binding and get a random verification string",
            "options": []
        },
        {
            "name": "check",
            "description": "Verify your Codeforces handle",
            "options": [{
                "type": 3,
                "name": "username",
                "description": "Your Codeforces handle",
                "required": true
            }]
        },
        {
            "name": "whoami",
            "description": "Show your binding status with this bot",
            "options": []
        },
        {
            "name": "cleanup",
            "description": "Drop pending verifications older than the given days (admins only)",
            "options": [{
                "type": 4,
                "name": "days",
                "description": "Remove pending verifications started more than this many days ago",
                "required": true
            }]
        }
    ])
}
