pub mod candidate;
pub mod deterministic;
pub mod focus;
pub mod platform;

pub use candidate::{is_system_window, WindowCandidate, WindowEnumerator, WindowHandle};
pub use focus::{DirectStrategy, FocusOutcome, FocusState, WindowFocusResolver};
pub use platform::{DesktopPlatform, WindowPlatform};
