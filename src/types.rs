use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, RgbImage};
use imageproc::point::Point;
use imageproc::rect::Rect;

use crate::geometry::center_of_rect;

/// Ink is white, paper is black.
pub type BinaryImage = GrayImage;

/// Where an image to grade comes from.
#[derive(Debug, Clone)]
pub enum ImageInput {
    Path(PathBuf),
    Bytes(Vec<u8>),
    Decoded(DynamicImage),
}

impl ImageInput {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ImageInput::Path(path) => Some(path),
            _ => None,
        }
    }
}

impl From<&Path> for ImageInput {
    fn from(path: &Path) -> Self {
        ImageInput::Path(path.to_path_buf())
    }
}

impl From<Vec<u8>> for ImageInput {
    fn from(bytes: Vec<u8>) -> Self {
        ImageInput::Bytes(bytes)
    }
}

impl From<DynamicImage> for ImageInput {
    fn from(image: DynamicImage) -> Self {
        ImageInput::Decoded(image)
    }
}

impl From<RgbImage> for ImageInput {
    fn from(image: RgbImage) -> Self {
        ImageInput::Decoded(DynamicImage::ImageRgb8(image))
    }
}

/// A rectangular region of the sheet holding one grid of bubbles.
#[derive(Debug, Clone)]
pub struct AnswerBlock {
    /// Position in left-to-right order.
    pub index: usize,
    /// Location in the perspective-corrected sheet.
    pub bounds: Rect,
    /// Color crop of `bounds`.
    pub image: RgbImage,
}

/// One fillable choice: the convex hull of every contour fragment merged
/// into it.
#[derive(Debug, Clone, PartialEq)]
pub struct Bubble {
    pub hull: Vec<Point<i32>>,
    pub bounds: Rect,
}

impl Bubble {
    pub fn center(&self) -> Point<f32> {
        center_of_rect(&self.bounds)
    }

    /// Half the larger side of the bounding box.
    pub fn radius(&self) -> f32 {
        self.bounds.width().max(self.bounds.height()) as f32 / 2.0
    }
}
