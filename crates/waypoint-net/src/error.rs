#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] waypoint_wire::Error),

    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("sasl error: {0}")]
    Sasl(#[from] rsasl::prelude::SASLError),

    #[error("no SASL mechanism offered by the server is supported by this client")]
    NoCommonMechanism,

    #[error("authentication failed: {0:?}")]
    AuthenticationFailed(waypoint_wire::Status),

    #[error("server rejected HELLO negotiation")]
    NegotiationFailed,

    #[error("session is not ready (state = {0:?})")]
    NotReady(crate::SessionState),

    #[error("request timed out waiting for a response")]
    Timeout,

    #[error("session closed while request was in flight")]
    Cancelled,

    #[error("collection {scope}.{collection} does not exist")]
    CollectionNotFound { scope: String, collection: String },

    #[error("malformed GET_COLLECTION_ID response")]
    MalformedCollectionResponse,
}
