//! Screenshot post-processing: viewport detection and external image tools.
//!
//! Mobile emulation renders the page inside a device frame on a larger
//! canvas, so captures must be cropped back to the emulated viewport. When
//! the job doesn't pin the viewport, it is detected by walking away from the
//! background pixel at (10,10) until the content edge is found.
//!
//! Pixel work happens in-process; format normalization, JPEG re-encoding,
//! and the crop itself are delegated to ImageMagick's `mogrify`/`convert`,
//! which must be on `PATH`.

use std::path::Path;

use image::RgbImage;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::CropPercent;

/// Per-channel and summed color-delta threshold for background matching.
const COLOR_THRESHOLD: i32 = 15;

/// Where the background probe starts.
const PROBE_ORIGIN: (u32, u32) = (10, 10);

/// Whether two pixels are close enough in color to both be background.
///
/// Similar means every channel is within the threshold and the summed delta
/// is within it too.
pub fn colors_similar(a: [u8; 3], b: [u8; 3], threshold: i32) -> bool {
    let mut delta_sum = 0;
    for channel in 0..3 {
        let delta = (i32::from(a[channel]) - i32::from(b[channel])).abs();
        delta_sum += delta;
        if delta > threshold {
            return false;
        }
    }
    delta_sum <= threshold
}

/// Detect the emulated viewport inside a raw capture.
///
/// Job-pinned dimensions win when the capture is at least that large.
/// Otherwise walk rightward from the probe origin until a non-background
/// column, then downward until a non-background row; either walk falling off
/// the image falls back to the full dimension.
pub fn detect_viewport(image: &RgbImage, job_dims: Option<(u32, u32)>) -> (u32, u32) {
    let (width, height) = image.dimensions();
    if let Some((job_width, job_height)) = job_dims {
        if width >= job_width && height > job_height {
            return (job_width, job_height);
        }
    }
    let (x0, y0) = PROBE_ORIGIN;
    if width <= x0 || height <= y0 {
        return (width, height);
    }
    let background = image.get_pixel(x0, y0).0;

    let mut viewport_width = None;
    let mut x = x0;
    while viewport_width.is_none() && x < width {
        if colors_similar(background, image.get_pixel(x, y0).0, COLOR_THRESHOLD) {
            x += 1;
        } else {
            viewport_width = Some(x);
        }
    }

    let mut viewport_height = None;
    let mut y = y0;
    while viewport_height.is_none() && y < height {
        if colors_similar(background, image.get_pixel(x0, y).0, COLOR_THRESHOLD) {
            y += 1;
        } else {
            viewport_height = Some(y);
        }
    }

    (
        viewport_width.unwrap_or(width),
        viewport_height.unwrap_or(height),
    )
}

/// ImageMagick geometry string for a top-left anchored crop.
pub fn viewport_geometry(width: u32, height: u32) -> String {
    format!("{width}x{height}+0+0")
}

/// Crop percentages relative to the raw capture, when they differ.
pub fn crop_percentages(raw: (u32, u32), viewport: (u32, u32)) -> Option<CropPercent> {
    let (raw_width, raw_height) = raw;
    let (viewport_width, viewport_height) = viewport;
    if raw_width == 0 || raw_height == 0 {
        return None;
    }
    if raw_width == viewport_width && raw_height == viewport_height {
        return None;
    }
    Some(CropPercent {
        width: viewport_width * 100 / raw_width,
        height: viewport_height * 100 / raw_height,
    })
}

async fn run_tool(program: &str, args: &[&str]) {
    debug!(program, ?args, "Running image tool");
    match Command::new(program).args(args).status().await {
        Ok(status) if !status.success() => {
            warn!(program, %status, "Image tool reported failure");
        }
        Ok(_) => {}
        Err(e) => warn!(program, error = %e, "Failed to run image tool"),
    }
}

/// Normalize a PNG capture in place (8-bit RGB color type), optionally
/// resizing to fit `resize`×`resize`.
pub async fn normalize_png(path: &Path, resize: Option<u32>) {
    let path = path.display().to_string();
    let resize_arg;
    let mut args = vec!["-format", "png", "-define", "png:color-type=2", "-depth", "8"];
    if let Some(resize) = resize {
        resize_arg = format!("{resize}x{resize}");
        args.extend_from_slice(&["-resize", &resize_arg]);
    }
    args.push(&path);
    run_tool("mogrify", &args).await;
}

/// Re-encode a PNG as JPEG at the given quality, optionally resizing.
pub async fn convert_to_jpeg(src: &Path, dst: &Path, quality: u8, resize: Option<u32>) {
    let src = src.display().to_string();
    let dst = dst.display().to_string();
    let quality = quality.to_string();
    let resize_arg;
    let mut args = vec![src.as_str()];
    if let Some(resize) = resize {
        resize_arg = format!("{resize}x{resize}");
        args.extend_from_slice(&["-resize", &resize_arg]);
    }
    args.extend_from_slice(&["-quality", &quality, &dst]);
    run_tool("convert", &args).await;
}

/// Crop an image in place to the given geometry.
pub async fn crop_to_geometry(path: &Path, geometry: &str) {
    let path = path.display().to_string();
    run_tool("mogrify", &["-crop", geometry, &path]).await;
}
