//! Security and execution pipeline for proposed actions: policy
//! validation, approval gating and the shell/filesystem executor.

pub mod approval;
pub mod executor;
pub mod interrupt;
pub mod policy;
pub mod validator;
pub mod whitelist;

pub use approval::{
    ApprovalReceiver, ApprovalRequest, ApprovalSender, Gate, UserResponse, approval_channel, decide,
    request_approval,
};
pub use executor::{Executor, OutputSink, StreamKind};
pub use interrupt::{Armed, Interrupt};
pub use policy::{ExecutionPolicy, PolicyError};
pub use validator::validate;
pub use whitelist::Whitelist;
