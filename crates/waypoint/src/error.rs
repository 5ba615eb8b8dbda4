/// Flat error enum aggregating every sub-crate's error type behind one
/// `#[from]`-derived surface instead of a bespoke wrapper per call site.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] waypoint_topology::Error),

    #[error(transparent)]
    Session(#[from] waypoint_net::Error),

    #[error(transparent)]
    Http(#[from] waypoint_http::Error),

    #[error(transparent)]
    Wire(#[from] waypoint_wire::Error),

    #[error(transparent)]
    Transaction(#[from] waypoint_txn::TransactionError),

    #[error("request exceeded its deadline: {0:?}")]
    TimedOut(waypoint_retry::TimeoutKind),

    #[error("no healthy node offers the {0:?} service")]
    NoHealthyEndpoint(waypoint_topology::ServiceType),

    #[error("bucket {0:?} is not open")]
    BucketNotOpen(String),

    #[error("malformed cluster configuration: {0}")]
    MalformedClusterConfig(String),

    #[error("server returned status {0:?}")]
    UnexpectedStatus(waypoint_wire::Status),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl<E> From<waypoint_retry::RetryOutcome<E>> for Error
where
    Error: From<E>,
{
    fn from(outcome: waypoint_retry::RetryOutcome<E>) -> Self {
        match outcome {
            waypoint_retry::RetryOutcome::Failed(err) => Error::from(err),
            waypoint_retry::RetryOutcome::TimedOut(kind) => Error::TimedOut(kind),
        }
    }
}
