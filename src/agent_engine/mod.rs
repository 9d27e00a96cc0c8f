pub mod session;
pub mod state;

pub use session::{AgentSession, Observation, PreparedAction, SessionDeps, TargetRef};
pub use state::{parse_tool_call_to_action, AgentAction, TargetSpec};
