/// Why a failed attempt might be worth retrying. Observable so strategies and
/// telemetry can both inspect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RetryReason {
    DoNotRetry,
    Unknown,
    SocketNotAvailable,
    ServiceNotAvailable,
    NodeNotAvailable,
    KeyValueNotMyVbucket,
    KeyValueCollectionOutdated,
    KeyValueErrorMapRetryIndicated,
    KeyValueLocked,
    KeyValueTemporaryFailure,
    KeyValueSyncWriteInProgress,
    KeyValueSyncWriteReCommitInProgress,
    ServiceResponseCodeIndicated,
    SocketClosedWhileInFlight,
    CircuitBreakerOpen,
    QueryPreparedStatementFailure,
    QueryIndexNotFound,
    AnalyticsTemporaryFailure,
    SearchTooManyRequests,
    ViewsTemporaryFailure,
    ViewsNoActivePartition,
}

impl RetryReason {
    /// Non-idempotent requests may only be retried on reasons that do not
    /// themselves imply the server might already have applied the mutation.
    pub fn allows_non_idempotent_retry(self) -> bool {
        !matches!(
            self,
            RetryReason::SocketClosedWhileInFlight
                | RetryReason::KeyValueSyncWriteInProgress
                | RetryReason::KeyValueSyncWriteReCommitInProgress
        )
    }

    /// Whether exhausting retries on this reason proves the operation never
    /// reached (or was never applied by) the server, i.e. it is safe to
    /// report an unambiguous rather than ambiguous timeout.
    pub fn proves_non_application(self) -> bool {
        !matches!(
            self,
            RetryReason::SocketClosedWhileInFlight
                | RetryReason::KeyValueSyncWriteInProgress
                | RetryReason::KeyValueSyncWriteReCommitInProgress
                | RetryReason::Unknown
        )
    }

    /// Whether a different endpoint should be preferred on the next attempt,
    /// rather than retrying the same one.
    pub fn prefers_different_endpoint(self) -> bool {
        matches!(
            self,
            RetryReason::CircuitBreakerOpen
                | RetryReason::NodeNotAvailable
                | RetryReason::ServiceNotAvailable
        )
    }
}
