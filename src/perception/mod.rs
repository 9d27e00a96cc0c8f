pub mod ocr;
pub mod pointer;
pub mod screenshot;
pub mod types;

pub use ocr::{OcrEngine, TesseractOcr};
pub use pointer::{EnigoPointer, PointerSource};
pub use screenshot::{PrimaryMonitor, ScreenSource, Screenshot};
pub use types::{BoundingBox, OcrWord, ScreenshotMeta};
