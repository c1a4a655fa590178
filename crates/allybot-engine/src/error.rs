use thiserror::Error;

use allybot_types::commands::CommandError;

use crate::platform::PlatformError;

/// Every way a command or reaction can fail. The first four classes are the
/// caller's problem and get a specific reply; the last two mean the bot and
/// the platform may disagree and an administrator has to look.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("missing permission role `{required_role}`")]
    Unauthorized { required_role: String },

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Conflict(#[from] Conflict),

    /// The store change is committed but a dependent platform call failed.
    #[error("{committed}, but {effect} failed: {source}")]
    PartialSuccess {
        committed: String,
        effect: String,
        source: PlatformError,
    },

    #[error("external service failure: {0}")]
    External(String),
}

/// Uniqueness and staleness violations, each with its own explanation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Conflict {
    #[error("You already have a pending application for {alliance}. Wait for a leader to review it.")]
    AlreadyPending { alliance: String },

    #[error(
        "Your earlier application in this server was rejected. You can no longer apply to any alliance here."
    )]
    RejectedBlocked,

    #[error("You are already an approved member of {alliance}.")]
    AlreadyApproved { alliance: String },

    #[error("The username `{username}` already belongs to an approved member of this server.")]
    DuplicateUsername { username: String },

    #[error("`{username}` now requests {requested}, not {alliance}. Nothing was changed.")]
    StaleRequest {
        username: String,
        requested: String,
        alliance: String,
    },
}

impl EngineError {
    /// Text shown to the member who ran the command.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(reason) => format!("Invalid input: {}", reason),
            Self::Unauthorized { required_role } => {
                format!("You need the `{}` role to do that.", required_role)
            }
            Self::NotFound(what) => what.clone(),
            Self::Conflict(conflict) => conflict.to_string(),
            Self::PartialSuccess { .. } | Self::External(_) => {
                "The command failed. An administrator has been notified.".to_string()
            }
        }
    }

    /// Partial successes and external failures are routed to the admin contact.
    pub fn needs_admin(&self) -> bool {
        matches!(self, Self::PartialSuccess { .. } | Self::External(_))
    }
}

impl From<PlatformError> for EngineError {
    fn from(e: PlatformError) -> Self {
        Self::External(e.to_string())
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        Self::External(format!("store: {:#}", e))
    }
}

impl From<CommandError> for EngineError {
    fn from(e: CommandError) -> Self {
        Self::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_keep_their_explanation() {
        let err = EngineError::from(Conflict::RejectedBlocked);
        assert!(err.user_message().contains("rejected"));
        assert!(!err.needs_admin());

        let err = EngineError::Unauthorized { required_role: "LEADER-NONA".into() };
        assert_eq!(err.user_message(), "You need the `LEADER-NONA` role to do that.");
    }

    #[test]
    fn infrastructure_errors_are_generic_for_the_caller() {
        let err = EngineError::PartialSuccess {
            committed: "bob approved into NONA".into(),
            effect: "role grant".into(),
            source: PlatformError::NotFound("role NONA".into()),
        };
        assert!(err.needs_admin());
        assert!(err.user_message().contains("administrator"));
        assert_eq!(
            err.to_string(),
            "bob approved into NONA, but role grant failed: role NONA not found"
        );

        let err = EngineError::from(PlatformError::Unavailable("timeout".into()));
        assert!(matches!(err, EngineError::External(_)));
    }

    #[test]
    fn command_errors_become_validation() {
        let err = EngineError::from(CommandError::MissingOption("alliance"));
        assert_eq!(err.user_message(), "Invalid input: missing option `alliance`");
    }
}
