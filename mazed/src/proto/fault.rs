use super::line::Violation;

/// Why a game connection is being terminated.
///
/// The `Display` text is what the client receives after `OVER`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error(transparent)]
    Syntax(#[from] Violation),

    #[error("The communication must start with the USER command.")]
    UserExpected,

    #[error("This user does not exist.")]
    UnknownUser,

    #[error("The second command must be LEVL.")]
    LevelExpected,

    #[error("A level code may only contain lowercase letters and digits.")]
    LevelBadChars,

    #[error("A connection for another level is already running. Two levels cannot be solved at once.")]
    LevelMismatch,

    #[error("No level with this code exists.")]
    LevelUnknown,

    #[error("You are opening more concurrent connections than the current level allows.")]
    TooManyConnections,

    #[error("The time for solving this level has run out.")]
    Timeout,

    #[error("This command expects a single character as its parameter.")]
    CharExpected,

    #[error("This command expects two non-negative numbers as its parameters.")]
    TwoIntsExpected,

    #[error("This command takes no parameter.")]
    ExtraParam,

    #[error("The whole maze is not available in this level. Use the WHAT command.")]
    MazeUnavailable,

    #[error("Unknown command.")]
    UnknownCommand,

    /// Unable to reply; the connection is already unusable.
    #[error("The connection could not be served.")]
    Unserviceable,
}
