//! Make sure the requested image exists locally, pulling it if needed.

use crate::config::{ImageRef, ProgressSink};
use crate::error::{ProvisionError, Result, RuntimeError};
use crate::runtime::ContainerRuntime;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Ensure `image` is available, pulling it on a "not found" inspect result.
///
/// Any other inspect error is returned without attempting a pull. A failed
/// pull is not retried.
pub async fn ensure_image<R>(runtime: &R, image: &ImageRef, progress: &mut ProgressSink) -> Result<()>
where
    R: ContainerRuntime + ?Sized,
{
    match runtime.inspect_image(image).await {
        Ok(()) => {
            debug!(%image, "Image already present");
            return Ok(());
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(resolution_error(image, e)),
    }

    info!(%image, "Pulling image");
    pull(runtime, image, progress)
        .await
        .map_err(|e| resolution_error(image, e))?;
    info!(%image, "Image pulled");
    Ok(())
}

async fn pull<R>(runtime: &R, image: &ImageRef, progress: &mut ProgressSink) -> std::result::Result<(), RuntimeError>
where
    R: ContainerRuntime + ?Sized,
{
    let mut stream = runtime.pull_image(image);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        progress
            .write_all(&chunk)
            .await
            .map_err(|e| RuntimeError::other(format!("writing pull progress: {}", e)))?;
    }
    progress
        .flush()
        .await
        .map_err(|e| RuntimeError::other(format!("flushing pull progress: {}", e)))?;
    Ok(())
}

fn resolution_error(image: &ImageRef, source: RuntimeError) -> ProvisionError {
    ProvisionError::ImageResolution {
        image: image.to_string(),
        source,
    }
}
