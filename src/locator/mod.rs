pub mod search_text;
pub mod target_locator;
pub mod vision;

pub use search_text::extract_search_texts;
pub use target_locator::{LocateMethod, LocationResult, TargetLocator};
