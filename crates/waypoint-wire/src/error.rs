#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The buffer does not yet hold a complete frame; callers reading off a
    /// socket should read more bytes and retry.
    #[error("need more data to decode a complete frame")]
    NeedMoreData,

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("snappy decompression failed: {0}")]
    Snappy(#[from] snap::Error),
}

impl Error {
    pub(crate) fn protocol(msg: impl Into<String>) -> Error {
        Error::ProtocolError(msg.into())
    }
}
