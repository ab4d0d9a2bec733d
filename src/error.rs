use std::io;
use thiserror::Error;

/// Failures surfaced by the daemon's components.
///
/// Only `Bind` and `NoHostIdentity` are fatal; everything else stays scoped
/// to the connection or channel that produced it.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("malformed key: {0}")]
    KeyParse(String),

    #[error("authorization denied for {user:?}")]
    AuthorizationDenied { user: String },

    #[error("malformed {request} request: {reason}")]
    ChannelProtocol {
        request: &'static str,
        reason: String,
    },

    #[error("process error: {0}")]
    Process(#[from] io::Error),

    #[error("cannot reach {target}: {source}")]
    ForwardDial {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("no usable host identity")]
    NoHostIdentity,

    #[error("lifecycle: {0}")]
    Lifecycle(String),
}

impl ServerError {
    pub fn denied(user: &str) -> Self {
        ServerError::AuthorizationDenied {
            user: user.to_string(),
        }
    }

    pub fn protocol(request: &'static str, reason: impl Into<String>) -> Self {
        ServerError::ChannelProtocol {
            request,
            reason: reason.into(),
        }
    }
}
