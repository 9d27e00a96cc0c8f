use async_trait::async_trait;
use enigo::{Enigo, Mouse, Settings};

use crate::errors::{PinpointError, PinpointResult};

/// Current mouse pointer position, used as the last-resort coarse location.
#[async_trait]
pub trait PointerSource: Send + Sync {
    async fn position(&self) -> PinpointResult<(i32, i32)>;
}

pub struct EnigoPointer;

#[async_trait]
impl PointerSource for EnigoPointer {
    async fn position(&self) -> PinpointResult<(i32, i32)> {
        tokio::task::spawn_blocking(|| {
            let enigo = Enigo::new(&Settings::default())
                .map_err(|e| PinpointError::BackendUnavailable(format!("enigo: {e}")))?;
            enigo
                .location()
                .map_err(|e| PinpointError::Perception(format!("pointer location: {e}")))
        })
        .await
        .map_err(|e| PinpointError::Perception(format!("join: {e}")))?
    }
}
