pub mod oracle;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod tools;
pub mod types;

pub use oracle::{parse_selection_index, LlmOracle, ReasoningModel};
pub use provider::LlmProvider;
pub use registry::{ProviderRegistry, Role};
