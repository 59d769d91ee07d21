use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::classify::is_profile_pixel;

/// Topmost profile row found in one image column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelSample {
    pub x: u32,
    pub y: u32,
}

/// Record the first foreground row of every column, left to right.
///
/// Columns without a foreground pixel repeat the previous sample's row.
/// Leading empty columns have nothing to carry forward and are skipped, so
/// the result can be shorter than the image width.
pub fn scan_columns(img: &RgbaImage) -> Vec<PixelSample> {
    let (width, height) = img.dimensions();
    let mut samples: Vec<PixelSample> = Vec::with_capacity(width as usize);
    for x in 0..width {
        let hit = (0..height).find(|&y| is_profile_pixel(*img.get_pixel(x, y)));
        match hit {
            Some(y) => samples.push(PixelSample { x, y }),
            None => {
                if let Some(prev) = samples.last().copied() {
                    samples.push(PixelSample { x, y: prev.y });
                }
            }
        }
    }
    samples
}
