// Chat error taxonomy
//
// Every core operation surfaces exactly one of these; nothing is retried
// internally. The display strings double as the user-facing messages the
// REPL prints.

use crate::broker::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    // Session state
    #[error("Already logged in")]
    AlreadyLoggedIn,

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("No blank destinatary given")]
    EmptyDestination,

    #[error("Given destinatary cannot be yourself")]
    SelfDestination,

    #[error("No destinatary has been specified")]
    NoDestination,

    // Directory
    #[error("Given user does not exist")]
    UnknownUser,

    #[error("Given group does not exist")]
    UnknownGroup,

    #[error("Given group already exists")]
    GroupAlreadyExists,

    // Operation failures, worded for the user
    #[error("Could not log in")]
    LoginFailed,

    #[error("Could not create group")]
    GroupCreateFailed,

    #[error("Could not delete group")]
    GroupDeleteFailed,

    #[error("Could not add user to group")]
    AddMemberFailed,

    #[error("Could not remove user from group")]
    RemoveMemberFailed,

    #[error("Could not leave group")]
    LeaveGroupFailed,

    #[error("Could not send message")]
    SendFailed,

    // File sends
    #[error("Could not find the file")]
    FileNotFound,

    #[error("Path is not a regular file")]
    NotRegularFile,

    #[error("Could not probe content type")]
    ProbeFailed,

    // Admin directory queries
    #[error("Fail to retrieve data from server")]
    DirectoryQuery,

    #[error("Time limit to retrieve data exceeded")]
    Timeout,

    // Codec
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(#[from] bincode::Error),

    #[error("Broker transport error: {0}")]
    Transport(#[from] TransportError),
}
