//! Per-node binary-protocol sessions: TLS dial, SASL authentication, HELLO
//! feature negotiation, opcode pipelining, server-push handling, and the
//! collections-id resolver layered on top of a session.

mod auth;
mod collections;
mod error;
mod hello;
mod negotiate;
mod session;
mod transport;

pub use auth::Credentials;
pub use collections::CollectionsResolver;
pub use error::Error;
pub use hello::{Feature, NegotiatedFeatures, ADVERTISED_FEATURES};
pub use negotiate::{ErrorMap, ErrorMapEntry, ErrorMapRetry};
pub use session::{OrphanHandler, OrphanedResponseInfo, PushEvent, Session, SessionState};
pub use transport::{connect, default_tls_config, Connection};
