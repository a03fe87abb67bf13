//! Session orchestration: asks the model for actions and drives each one
//! through validation, approval and execution.

mod events;
pub mod prompt_builder;
pub mod proposer;
mod session;
mod state;

pub use events::{EventReceiver, EventSender, SessionEvent, event_channel};
pub use proposer::{LlmProposer, Proposal, ProposalRequest, Proposer};
pub use session::{PromptSource, Session, SessionOptions, TurnOutcome};
pub use state::{SessionState, TurnRecord};
