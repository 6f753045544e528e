//! The collaboration core: the per-diagram `Session` actor, the `Hub`
//! registry that owns one per diagram, and the pure `AuthorityPolicy` /
//! `OperationApplier` / `PersistenceCoordinator` components they're built
//! from. Everything here is transport-agnostic — the only things it asks of
//! the outside world are a `ParticipantSink` per participant and the two
//! collaborator traits, `AuthorizationResolver` and `DiagramStore`.

mod authority;
mod collaborators;
mod config;
mod error;
mod hub;
mod operation_applier;
mod persistence;
mod session;
mod sink;
mod util;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use authority::Decision;
pub use authority::SenderContext;
pub use collaborators::AuthorizationResolver;
pub use collaborators::CasConflict;
pub use collaborators::DiagramStore;
pub use collaborators::StoreError;
pub use config::Config;
pub use config::CreateSessionPolicy;
pub use error::Error;
pub use error::ErrorKind;
pub use error::Result;
pub use hub::Hub;
pub use operation_applier::ApplyError;
pub use operation_applier::ApplyOutcome;
pub use session::Phase;
pub use session::SessionHandle;
pub use session::SessionSnapshot;
pub use sink::DisconnectReason;
pub use sink::ParticipantSink;
pub use sink::SendError;
