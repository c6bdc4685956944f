use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use sdgen_contracts::models::ControlMode;

use crate::backend::ImageArtifact;

pub const CONTROL_MAX_SIDE: u32 = 1024;

const EDGE_THRESHOLD: f32 = 100.0;

/// Prepare a user-supplied control image for conditioning.
///
/// All modes load and clamp to the working resolution; canny additionally
/// replaces the content with a binary edge map.
pub fn prepare_control_image(mode: ControlMode, path: &Path) -> Result<ImageArtifact> {
    let img = image::open(path)
        .with_context(|| format!("failed to open control image {}", path.display()))?;
    let img = clamp_dimensions(img, CONTROL_MAX_SIDE);
    let rgb = match mode {
        ControlMode::Canny => edge_map(&img.to_luma8()),
        ControlMode::Pose | ControlMode::Depth => img.to_rgb8(),
    };
    ImageArtifact::from_rgb(rgb)
}

fn clamp_dimensions(img: DynamicImage, max_side: u32) -> DynamicImage {
    if img.width() <= max_side && img.height() <= max_side {
        return img;
    }
    img.resize(max_side, max_side, FilterType::Lanczos3)
}

/// Sobel-magnitude edge map, thresholded to a binary conditioning input.
fn edge_map(gray: &GrayImage) -> RgbImage {
    let (width, height) = gray.dimensions();
    let mut out = RgbImage::new(width, height);
    let sample = |x: i64, y: i64| -> f32 {
        let x = x.clamp(0, width as i64 - 1) as u32;
        let y = y.clamp(0, height as i64 - 1) as u32;
        f32::from(gray.get_pixel(x, y)[0])
    };
    for y in 0..i64::from(height) {
        for x in 0..i64::from(width) {
            let gx = sample(x + 1, y - 1) + 2.0 * sample(x + 1, y) + sample(x + 1, y + 1)
                - sample(x - 1, y - 1)
                - 2.0 * sample(x - 1, y)
                - sample(x - 1, y + 1);
            let gy = sample(x - 1, y + 1) + 2.0 * sample(x, y + 1) + sample(x + 1, y + 1)
                - sample(x - 1, y - 1)
                - 2.0 * sample(x, y - 1)
                - sample(x + 1, y - 1);
            let magnitude = (gx * gx + gy * gy).sqrt();
            let value = if magnitude >= EDGE_THRESHOLD { 255 } else { 0 };
            out.put_pixel(x as u32, y as u32, Rgb([value, value, value]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma, RgbImage};
    use sdgen_contracts::models::ControlMode;

    use super::{clamp_dimensions, edge_map, prepare_control_image, CONTROL_MAX_SIDE};

    #[test]
    fn edge_map_marks_the_boundary_only() {
        let mut gray = GrayImage::new(8, 8);
        for (x, _, pixel) in gray.enumerate_pixels_mut() {
            *pixel = Luma([if x < 4 { 0 } else { 255 }]);
        }
        let edges = edge_map(&gray);

        assert_eq!(edges.get_pixel(3, 4)[0], 255);
        assert_eq!(edges.get_pixel(4, 4)[0], 255);
        assert_eq!(edges.get_pixel(0, 4)[0], 0);
        assert_eq!(edges.get_pixel(7, 4)[0], 0);
    }

    #[test]
    fn large_inputs_are_clamped_preserving_aspect() {
        let img = image::DynamicImage::ImageRgb8(RgbImage::new(2048, 1024));
        let clamped = clamp_dimensions(img, CONTROL_MAX_SIDE);
        assert_eq!(clamped.width(), CONTROL_MAX_SIDE);
        assert_eq!(clamped.height(), CONTROL_MAX_SIDE / 2);

        let small = image::DynamicImage::ImageRgb8(RgbImage::new(64, 64));
        let untouched = clamp_dimensions(small, CONTROL_MAX_SIDE);
        assert_eq!(untouched.width(), 64);
    }

    #[test]
    fn prepare_round_trips_through_png() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("pose.png");
        RgbImage::new(32, 16).save(&path)?;

        let artifact = prepare_control_image(ControlMode::Pose, &path)?;
        assert_eq!(artifact.format, "png");
        assert_eq!((artifact.width, artifact.height), (32, 16));
        assert_eq!(artifact.decode()?.width(), 32);
        Ok(())
    }

    #[test]
    fn missing_control_image_is_an_error() {
        let result = prepare_control_image(ControlMode::Canny, std::path::Path::new("/nonexistent/x.png"));
        assert!(result.is_err());
    }
}
