//! Error types for the simulation kernel.
//!
//! Programming errors (off-thread access, double-queue linking, events from
//! the past) are asserts, not `Result`s. The types here cover the errors a
//! correct embedding can still encounter: failing event callbacks, a starved
//! kernel loop, and bad configuration input.

use motesim_common::MoteId;
use thiserror::Error;

/// Error raised by an event callback.
#[derive(Debug, Error)]
pub enum EventError {
    /// A collaborator (e.g. an emulator breakpoint) asked for a graceful
    /// stop. The kernel loop exits without treating this as a failure.
    #[error("requested simulation stop: {0}")]
    RequestedStop(String),

    /// The callback failed. The kernel loop ends and reports the failure.
    #[error("{0}")]
    Execution(String),
}

impl EventError {
    /// Graceful-stop request with a reason shown in the stop log line.
    pub fn stop(reason: impl Into<String>) -> Self {
        EventError::RequestedStop(reason.into())
    }

    /// Wrap any displayable error as an execution failure.
    pub fn failure(err: impl std::fmt::Display) -> Self {
        EventError::Execution(err.to_string())
    }
}

/// Terminal outcome of the kernel loop, retrievable from the handle after
/// the simulation stops.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// The queue ran dry. The kernel presumes at least the speed governor or
    /// a user event is always pending, so this is a setup error.
    #[error("event queue starved: nothing left to dispatch")]
    StarvedLoop,

    /// An event callback failed. `mote` carries the mote context when the
    /// failing event belonged to one.
    #[error("event '{label}' failed: {message}")]
    EventFailed {
        label: String,
        mote: Option<MoteId>,
        message: String,
    },
}

/// Error aborting a configuration load or save.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed config XML: {0}")]
    Xml(String),

    #[error("invalid value '{value}' for element '{element}'")]
    InvalidValue { element: String, value: String },

    #[error("unknown type tag '{0}'")]
    UnknownType(String),

    #[error("mote entry is missing a motetype_identifier")]
    MissingMoteType,

    #[error("no mote type '{0}' registered in this simulation")]
    NoSuchMoteType(String),

    /// The mote type resolver vetoed the load.
    #[error("load aborted")]
    LoadAborted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid_value(element: &str, value: &str) -> Self {
        ConfigError::InvalidValue {
            element: element.to_string(),
            value: value.to_string(),
        }
    }
}

impl From<quick_xml::Error> for ConfigError {
    fn from(err: quick_xml::Error) -> Self {
        ConfigError::Xml(err.to_string())
    }
}
