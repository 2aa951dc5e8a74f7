//! Resolving stored image files for `GET /images/{image_id}`.

use std::path::PathBuf;

use labelizer_core::images::image_file_name;

use crate::config::Config;
use crate::error::{LabelError, Result};

/// Path of an item's image under `storage.images_dir`.
///
/// Ids are file name stems; anything that could step outside the images
/// directory is rejected.
pub fn image_path(config: &Config, image_id: &str, canonical: bool) -> Result<PathBuf> {
    if image_id.is_empty()
        || image_id.contains(['/', '\\', '\0'])
        || image_id.starts_with('.')
    {
        return Err(LabelError::InvalidInput(format!(
            "invalid image id '{}'",
            image_id
        )));
    }
    let name = image_file_name(image_id, canonical, &config.images.extension);
    Ok(config.storage.images_dir.join(name))
}

/// Read an image, mapping a missing file to [`LabelError::NotFound`].
pub async fn read_image(config: &Config, image_id: &str, canonical: bool) -> Result<Vec<u8>> {
    let path = image_path(config, image_id, canonical)?;
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(LabelError::NotFound(format!(
            "Image {} not found",
            image_id
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Content type for the configured extension.
pub fn content_type(extension: &str) -> &'static str {
    let last = extension.rsplit('.').next().unwrap_or_default();
    match last.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}
