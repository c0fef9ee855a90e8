//! The tether agent core — session routing, context-window management,
//! tool orchestration, pulse scheduling, and the realtime session
//! manager, composed behind [`state::AgentCore`].

pub mod cli;
pub mod commands;
pub mod compact;
pub mod context;
pub mod pulse;
pub mod realtime;
pub mod router;
pub mod state;
pub mod tasks;
pub mod turn;

pub use router::{handle_message, TurnRequest};
pub use state::AgentCore;
