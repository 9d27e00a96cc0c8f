use std::io::Cursor;

use async_trait::async_trait;
use base64::Engine as _;
use image::RgbaImage;

use crate::errors::{PinpointError, PinpointResult};
use crate::perception::types::ScreenshotMeta;

#[derive(Debug, Clone)]
pub struct Screenshot {
    pub image: RgbaImage,
    pub meta: ScreenshotMeta,
}

impl Screenshot {
    /// Wraps an in-memory image as a 1:1 scaled capture.
    pub fn from_image(image: RgbaImage) -> Self {
        let (w, h) = image.dimensions();
        Self {
            image,
            meta: ScreenshotMeta {
                monitor_index: 0,
                scale_factor: 1.0,
                physical_width: w,
                physical_height: h,
                logical_width: w,
                logical_height: h,
            },
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn png_bytes(&self) -> PinpointResult<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        self.image.write_to(&mut buf, image::ImageFormat::Png)?;
        Ok(buf.into_inner())
    }

    pub fn png_base64(&self) -> PinpointResult<String> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.png_bytes()?))
    }
}

/// Source of full-screen captures.
#[async_trait]
pub trait ScreenSource: Send + Sync {
    async fn capture(&self) -> PinpointResult<Screenshot>;
}

/// Captures the primary monitor with `xcap`.
pub struct PrimaryMonitor;

#[async_trait]
impl ScreenSource for PrimaryMonitor {
    async fn capture(&self) -> PinpointResult<Screenshot> {
        tokio::task::spawn_blocking(capture_primary_sync)
            .await
            .map_err(|e| PinpointError::Perception(format!("join: {e}")))?
    }
}

fn capture_primary_sync() -> PinpointResult<Screenshot> {
    let monitors = xcap::Monitor::all()
        .map_err(|e| PinpointError::Perception(format!("Failed to get monitors: {e}")))?;

    let mut primary = None;
    for (index, monitor) in monitors.into_iter().enumerate() {
        if monitor.is_primary().unwrap_or(false) {
            primary = Some((index as u32, monitor));
            break;
        }
    }
    let (monitor_index, monitor) = primary
        .ok_or_else(|| PinpointError::Perception("Could not find primary monitor".into()))?;

    let scale_factor = monitor.scale_factor().unwrap_or(1.0) as f64;
    let image = monitor
        .capture_image()
        .map_err(|e| PinpointError::Perception(format!("Failed to capture screen: {e}")))?;

    let (w, h) = image.dimensions();
    let meta = ScreenshotMeta {
        monitor_index,
        scale_factor,
        physical_width: w,
        physical_height: h,
        logical_width: (w as f64 / scale_factor).round() as u32,
        logical_height: (h as f64 / scale_factor).round() as u32,
    };
    tracing::debug!(width = w, height = h, scale_factor, "primary monitor captured");
    Ok(Screenshot { image, meta })
}
