//! Orchestrator — issues signed room-join grants and translates telephony
//! webhooks into room dial-ins.

pub mod server;
pub mod token;
pub mod webhook;

pub use server::{start_orchestrator, OrchestratorState};
pub use token::TokenIssuer;
