use std::fmt::Display;
use std::path::PathBuf;

use image::imageops::grayscale;
use image::{GrayImage, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::edges::canny;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::point::Point;
use log::{debug, info};
use logging_timer::time;

use crate::config::{SheetConfig, ThresholdMethod};
use crate::geometry::{
    approximate_quadrilateral, distance_from_point_to_point, order_corners, polygon_area,
};
use crate::image_utils::{
    adaptive_threshold_inv, blur, close_elliptical, dilate_disk, otsu_threshold_inv,
    size_image_to_height,
};
use crate::types::{BinaryImage, ImageInput};
use crate::verdict::GradingStatus;

#[derive(Debug)]
pub enum LoadError {
    /// The path could not be read.
    Missing(PathBuf),
    /// No bytes to decode.
    Empty,
    /// The bytes are not a supported image.
    Decode(String),
    ZeroDimensions,
}

impl LoadError {
    pub fn status(&self) -> GradingStatus {
        match self {
            LoadError::Missing(_) | LoadError::Empty => GradingStatus::NoImage,
            LoadError::Decode(_) | LoadError::ZeroDimensions => GradingStatus::InvalidImage,
        }
    }
}

impl Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Missing(path) => write!(f, "unable to read image at {}", path.display()),
            LoadError::Empty => write!(f, "image is empty"),
            LoadError::Decode(reason) => write!(f, "unable to decode image: {}", reason),
            LoadError::ZeroDimensions => write!(f, "image has no pixels"),
        }
    }
}

/// A sheet after perspective correction.
#[derive(Debug, Clone)]
pub struct WarpedSheet {
    pub color: RgbImage,
    pub gray: GrayImage,
    /// Sheet outline in the uncorrected image, when one was found.
    pub corners: Option<[Point<f32>; 4]>,
}

fn decode(bytes: &[u8]) -> Result<RgbImage, LoadError> {
    if bytes.is_empty() {
        return Err(LoadError::Empty);
    }
    image::load_from_memory(bytes)
        .map(|image| image.to_rgb8())
        .map_err(|e| LoadError::Decode(e.to_string()))
}

/// Decodes an image from any supported input.
#[time]
pub fn load_image(input: &ImageInput) -> Result<RgbImage, LoadError> {
    let image = match input {
        ImageInput::Path(path) => {
            let bytes = std::fs::read(path).map_err(|_| LoadError::Missing(path.clone()))?;
            decode(&bytes)?
        }
        ImageInput::Bytes(bytes) => decode(bytes)?,
        ImageInput::Decoded(image) => image.to_rgb8(),
    };

    if image.width() == 0 || image.height() == 0 {
        return Err(LoadError::ZeroDimensions);
    }
    Ok(image)
}

/// Decodes a full sheet and scales it to the working height.
pub fn load_sheet(input: &ImageInput, config: &SheetConfig) -> Result<RgbImage, LoadError> {
    let image = load_image(input)?;
    let sized = size_image_to_height(&image, config.working_height);
    debug!(
        "loaded sheet {}x{}, working size {}x{}",
        image.width(),
        image.height(),
        sized.width(),
        sized.height()
    );
    Ok(sized)
}

/// Finds the largest quadrilateral outline covering enough of the frame to
/// be the sheet itself.
#[time]
pub fn find_sheet_corners(gray: &GrayImage, config: &SheetConfig) -> Option<[Point<f32>; 4]> {
    let edges = canny(&blur(gray, 5), config.canny_low, config.canny_high);
    let edges = dilate_disk(&edges, 1.0);
    let min_area = config.min_sheet_area_ratio * gray.width() as f32 * gray.height() as f32;

    find_contours::<i32>(&edges)
        .iter()
        .filter(|contour| contour.border_type == BorderType::Outer)
        .filter_map(|contour| approximate_quadrilateral(&contour.points))
        .map(|quad| (polygon_area(&quad), quad))
        .filter(|(area, _)| *area >= min_area)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, quad)| order_corners(&quad))
}

/// Maps the quadrilateral with the given corners (top-left, top-right,
/// bottom-right, bottom-left) onto an upright rectangle.
pub fn warp_to_corners(img: &RgbImage, corners: &[Point<f32>; 4]) -> Option<RgbImage> {
    let [top_left, top_right, bottom_right, bottom_left] = *corners;
    let width = distance_from_point_to_point(&bottom_right, &bottom_left)
        .max(distance_from_point_to_point(&top_right, &top_left))
        .round() as u32;
    let height = distance_from_point_to_point(&top_right, &bottom_right)
        .max(distance_from_point_to_point(&top_left, &bottom_left))
        .round() as u32;
    if width < 2 || height < 2 {
        return None;
    }

    let (right, bottom) = ((width - 1) as f32, (height - 1) as f32);
    let projection = Projection::from_control_points(
        [
            (top_left.x, top_left.y),
            (top_right.x, top_right.y),
            (bottom_right.x, bottom_right.y),
            (bottom_left.x, bottom_left.y),
        ],
        [(0.0, 0.0), (right, 0.0), (right, bottom), (0.0, bottom)],
    )?;

    let mut out = RgbImage::new(width, height);
    warp_into(img, &projection, Interpolation::Bilinear, Rgb([255, 255, 255]), &mut out);
    Some(out)
}

/// Produces a bird's-eye view of the sheet. Images with no detectable sheet
/// outline are taken to be flat already and pass through unchanged.
#[time]
pub fn correct_perspective(sheet: &RgbImage, config: &SheetConfig) -> WarpedSheet {
    let corners = find_sheet_corners(&grayscale(sheet), config);
    let warped = corners.and_then(|corners| warp_to_corners(sheet, &corners));

    match (corners, warped) {
        (Some(corners), Some(color)) => {
            info!(
                "sheet outline found at {:?}, corrected to {}x{}",
                corners,
                color.width(),
                color.height()
            );
            let gray = grayscale(&color);
            WarpedSheet {
                color,
                gray,
                corners: Some(corners),
            }
        }
        _ => {
            debug!("no sheet outline found, treating image as already flat");
            WarpedSheet {
                color: sheet.clone(),
                gray: grayscale(sheet),
                corners: None,
            }
        }
    }
}

/// Splits a grayscale image into ink (white) and paper (black), then closes
/// small gaps so broken outlines become solid blobs.
#[time]
pub fn binarize(gray: &GrayImage, method: &ThresholdMethod, close_kernel: u32) -> BinaryImage {
    let thresholded = match *method {
        ThresholdMethod::Adaptive {
            blur_kernel,
            block_size,
            offset,
        } => adaptive_threshold_inv(&blur(gray, blur_kernel), block_size, offset),
        ThresholdMethod::Otsu { blur_kernel } => otsu_threshold_inv(&blur(gray, blur_kernel)),
    };
    close_elliptical(&thresholded, close_kernel)
}
