pub mod accessibility;
pub mod agent_engine;
pub mod config;
pub mod errors;
pub mod llm;
pub mod locator;
pub mod perception;
pub mod resolver;
pub mod strategy;
pub mod window;

pub use agent_engine::{AgentAction, AgentSession, PreparedAction, SessionDeps};
pub use errors::{PinpointError, PinpointResult};

/// Installs the global `tracing` subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_logging(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("pinpoint={default_level}")));
    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
