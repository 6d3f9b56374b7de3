use std::fmt::Display;

use image::imageops::crop_imm;
use image::RgbImage;
use imageproc::contours::find_contours;
use imageproc::rect::Rect;
use log::{info, warn};
use logging_timer::time;

use crate::config::DetectionPreset;
use crate::geometry::{approximate_quadrilateral, get_contour_bounding_rect, group_rectangles};
use crate::preprocess::{binarize, WarpedSheet};
use crate::types::{AnswerBlock, BinaryImage};

#[derive(Debug)]
pub enum DetectError {
    /// Every preset came up empty.
    NotFound { attempts: usize },
}

impl Display for DetectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectError::NotFound { attempts } => {
                write!(f, "no answer blocks found after {} attempts", attempts)
            }
        }
    }
}

/// Answer blocks found on a sheet, with the binarization that found them.
#[derive(Debug, Clone)]
pub struct BlockDetection {
    pub blocks: Vec<AnswerBlock>,
    /// Index of the preset that succeeded.
    pub preset: usize,
    pub binary: BinaryImage,
}

/// Determines whether a rect could be an answer block based on its size.
pub fn rect_could_be_block(rect: &Rect, min_size: u32, max_size: u32) -> bool {
    min_size < rect.width()
        && rect.width() < max_size
        && min_size < rect.height()
        && rect.height() < max_size
}

/// Finds the bounds of every quadrilateral contour of plausible size.
#[time]
pub fn find_block_rects(binary: &BinaryImage, min_size: u32, max_size: u32) -> Vec<Rect> {
    find_contours::<i32>(binary)
        .iter()
        .filter_map(|contour| {
            let quad = approximate_quadrilateral(&contour.points)?;
            let bounds = get_contour_bounding_rect(&quad)?;
            rect_could_be_block(&bounds, min_size, max_size).then_some(bounds)
        })
        .collect()
}

/// Collapses repeated detections of the same block and orders the result
/// left to right.
pub fn group_block_rects(rects: &[Rect], group_threshold: i32, eps: f32) -> Vec<Rect> {
    let mut grouped = group_rectangles(rects, group_threshold, eps);
    grouped.sort_by_key(|rect| rect.left());
    grouped
}

/// Crops each rect from the color sheet. Rects are clipped to the image;
/// those falling entirely outside it are skipped.
pub fn crop_blocks(color: &RgbImage, rects: &[Rect]) -> Vec<AnswerBlock> {
    let image_rect = Rect::at(0, 0).of_size(color.width(), color.height());
    rects
        .iter()
        .filter_map(|rect| rect.intersect(image_rect))
        .enumerate()
        .map(|(index, bounds)| AnswerBlock {
            index,
            bounds,
            image: crop_imm(
                color,
                bounds.left() as u32,
                bounds.top() as u32,
                bounds.width(),
                bounds.height(),
            )
            .to_image(),
        })
        .collect()
}

/// Tries each preset in order until one yields at least one block.
#[time]
pub fn detect_answer_blocks(
    sheet: &WarpedSheet,
    presets: &[DetectionPreset],
) -> Result<BlockDetection, DetectError> {
    for (index, preset) in presets.iter().enumerate() {
        let binary = binarize(&sheet.gray, &preset.threshold, preset.close_kernel);
        let rects = find_block_rects(&binary, preset.min_size, preset.max_size);
        let grouped = group_block_rects(&rects, preset.group_threshold, preset.group_eps);

        if grouped.is_empty() {
            warn!(
                "preset {} ({:?}) found no answer blocks among {} candidates",
                index,
                preset.threshold,
                rects.len()
            );
            continue;
        }

        info!(
            "preset {} found {} answer blocks from {} candidates",
            index,
            grouped.len(),
            rects.len()
        );
        return Ok(BlockDetection {
            blocks: crop_blocks(&sheet.color, &grouped),
            preset: index,
            binary,
        });
    }

    Err(DetectError::NotFound {
        attempts: presets.len(),
    })
}
