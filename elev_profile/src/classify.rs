//! Pixel classification tuned to the route chart palette.
//!
//! The cascade is ordered and first match wins. Anything no rule claims is
//! treated as profile signal.

use image::Rgba;

const ALPHA_MIN: u8 = 100;
const GRID_WHITE_MIN: u8 = 240;
const STROKE_DARK_MAX: u8 = 100;
const GREEN_FILL_MIN: u8 = 150;
const TAN_RED_MIN: u8 = 180;
const TAN_GREEN_MIN: u8 = 150;
const TAN_BLUE_MAX: u8 = 180;
const GRAY_SPREAD_MAX: i16 = 20;
const GRAY_RED_MIN: u8 = 150;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelClass {
    Foreground,
    Background,
}

pub fn classify_pixel(pixel: Rgba<u8>) -> PixelClass {
    let [r, g, b, a] = pixel.0;

    if a < ALPHA_MIN {
        return PixelClass::Background;
    }
    // grid lines
    if r > GRID_WHITE_MIN && g > GRID_WHITE_MIN && b > GRID_WHITE_MIN {
        return PixelClass::Background;
    }
    // profile stroke
    if r < STROKE_DARK_MAX && g < STROKE_DARK_MAX && b < STROKE_DARK_MAX {
        return PixelClass::Foreground;
    }
    // green fill, around (139, 232, 125)
    if g > GREEN_FILL_MIN && g > r && g > b {
        return PixelClass::Foreground;
    }
    // tan fill, around (237, 199, 114)
    if r > TAN_RED_MIN && g > TAN_GREEN_MIN && b < TAN_BLUE_MAX && r > b {
        return PixelClass::Foreground;
    }
    // dotted gridlines
    let (ri, gi, bi) = (r as i16, g as i16, b as i16);
    if (ri - gi).abs() < GRAY_SPREAD_MAX && (gi - bi).abs() < GRAY_SPREAD_MAX && r > GRAY_RED_MIN {
        return PixelClass::Background;
    }
    PixelClass::Foreground
}

pub fn is_profile_pixel(pixel: Rgba<u8>) -> bool {
    classify_pixel(pixel) == PixelClass::Foreground
}
