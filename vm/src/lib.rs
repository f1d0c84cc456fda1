mod events;
mod execution;
pub mod natives;
mod params;
mod permissions;
mod state;

pub use {
  events::{CallEvent, EventLog, EventSink, NullSink},
  execution::{
    apply_transaction,
    CallEnv,
    CallFrame,
    Ed25519Verifier,
    Environment,
    Error,
    Exception,
    Interpreter,
    SignatureVerifier,
  },
  params::Params,
  permissions::{authorized, resolve, Resolved},
  state::{
    InMemoryStateStore,
    NameEntry,
    ScopeHandle,
    State,
    StateCache,
    StateDiff,
  },
};
