//! An embedded SRT endpoint library.
//!
//! Two endpoints wrap one SRT socket and one worker thread each: [`Server`]
//! listens, admits connections by stream id through an embedder callback
//! and multiplexes them over a single poll loop; [`Client`] keeps one
//! outbound sender-mode connection fed from a bounded, back-pressured
//! queue. [`startup`] must run once per process before either is created,
//! matched by [`cleanup`] after the last one stopped.

mod client;
mod router;
mod server;
mod srt;
mod stats;

pub use self::{
    client::{Client, ClientHandler, ClientOptions},
    router::{ConnectionEvent, EventRouter, ServerEvent},
    server::{Server, ServerHandler, ServerOptions, REJECT_CODE_DENIED, REJECT_CODE_TIMEOUT},
    stats::SocketStats,
};

use std::env;

use thiserror::Error as ThisError;

use crate::srt::SRT_LOG_LEVEL;

/// An accepted connection is identified by its SRT socket handle.
pub type ConnectionId = i32;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Address parsing, socket creation, option or bind/connect setup
    /// failures inside `run`.
    #[error("invalid endpoint configuration: {0}")]
    Config(String),
    /// The server turned the stream down; the code is the application
    /// offset above SRT's reserved reject range (403 denied, 504 admission
    /// timeout).
    #[error("stream rejected by server, code={0}")]
    StreamRejected(i32),
    /// The endpoint has been stopped or its worker already failed.
    #[error("endpoint is not active")]
    NotActive,
    /// Stats or close for a connection id that is not in the active set.
    #[error("unknown connection")]
    NotFound,
    /// Any other SRT library error, carrying the library's reason text.
    #[error("{0}")]
    Transport(String),
}

/// Starts the SRT runtime: once per process, before any endpoint is
/// created. The `SRT_LOG_LEVEL` environment variable (`debug`, `notice`,
/// `warning`, `error`, `fatal`) picks the library's log verbosity, `error`
/// when absent or unrecognized; the library's output is routed into the
/// `log` facade under the `srt` target.
pub fn startup() -> bool {
    srt::startup(log_level_from(env::var("SRT_LOG_LEVEL").ok().as_deref()))
}

/// Tears the SRT runtime down, once, after every endpoint has stopped.
pub fn cleanup() {
    srt::cleanup()
}

fn log_level_from(value: Option<&str>) -> SRT_LOG_LEVEL {
    match value {
        Some("debug") => SRT_LOG_LEVEL::LOG_DEBUG,
        Some("notice") => SRT_LOG_LEVEL::LOG_NOTICE,
        Some("warning") => SRT_LOG_LEVEL::LOG_WARNING,
        Some("error") => SRT_LOG_LEVEL::LOG_ERR,
        Some("fatal") => SRT_LOG_LEVEL::LOG_CRIT,
        _ => SRT_LOG_LEVEL::LOG_ERR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_parses_the_documented_values() {
        assert_eq!(log_level_from(Some("debug")), SRT_LOG_LEVEL::LOG_DEBUG);
        assert_eq!(log_level_from(Some("notice")), SRT_LOG_LEVEL::LOG_NOTICE);
        assert_eq!(log_level_from(Some("warning")), SRT_LOG_LEVEL::LOG_WARNING);
        assert_eq!(log_level_from(Some("error")), SRT_LOG_LEVEL::LOG_ERR);
        assert_eq!(log_level_from(Some("fatal")), SRT_LOG_LEVEL::LOG_CRIT);
    }

    #[test]
    fn log_level_defaults_to_error() {
        assert_eq!(log_level_from(None), SRT_LOG_LEVEL::LOG_ERR);
        assert_eq!(log_level_from(Some("verbose")), SRT_LOG_LEVEL::LOG_ERR);
    }

    #[test]
    fn reject_codes_normalize_against_the_reserved_range() {
        // what a client observes for each admission outcome
        assert_eq!(
            (srt::SRT_REJC_PREDEFINED + REJECT_CODE_DENIED) - srt::SRT_REJC_PREDEFINED,
            403
        );
        assert_eq!(
            (srt::SRT_REJC_PREDEFINED + REJECT_CODE_TIMEOUT) - srt::SRT_REJC_PREDEFINED,
            504
        );
    }
}
