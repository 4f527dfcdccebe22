pub mod distribution;

use crate::error::Result;
use image::Rgb32FImage;
use std::path::Path;

/// Decodes an HDR/EXR (or any format `image` understands) to linear f32 RGB.
pub fn load_hdr(path: impl AsRef<Path>) -> Result<Rgb32FImage> {
    let path = path.as_ref();
    log::debug!("Loading environment map: {}...", path.display());

    let image = image::open(path)?.into_rgb32f();
    log::debug!(
        "Environment map is {}x{}",
        image.width(),
        image.height()
    );

    Ok(image)
}
