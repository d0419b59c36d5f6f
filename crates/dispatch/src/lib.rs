//! Request dispatch: the retry loop for buffered operations and the
//! fail-over stream machine for streaming chat.

pub mod credits;
pub mod dispatcher;
pub mod stream;

pub use {
    credits::{CreditSchedule, estimate_tokens},
    dispatcher::{
        AdapterSource, AttemptGuard, DispatchError, DispatchSuccess, OperationKind,
        RetryDispatcher,
    },
    stream::{FinalizationHandle, MachineStream, StreamMachine, StreamOutcome},
};
