use thiserror::Error;

/// Failure classes of the relay pipeline.
///
/// `Decode` and `MalformedMessage` are always recovered locally: the offending
/// fragment or message is dropped and the stream continues. `Connection` and
/// `DeviceAccess` stop the active session.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("bad audio fragment: {0}")]
    Decode(String),

    #[error("unparseable control message: {0}")]
    MalformedMessage(String),

    #[error("audio device unavailable: {0}")]
    DeviceAccess(String),
}
