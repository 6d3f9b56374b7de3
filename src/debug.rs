use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;
use log::{debug, warn};

use crate::answer_key::AnswerKey;
use crate::bubbles::BlockAnalysis;
use crate::image_utils::{BLUE, GREEN, PINK, RAINBOW, RED};

/// Creates a path for a debug image.
pub fn debug_image_path(base: &Path, label: &str) -> PathBuf {
    let mut result = PathBuf::from(base);
    result.set_file_name(format!(
        "{}_debug_{}.png",
        base.file_stem().unwrap_or_default().to_string_lossy(),
        label
    ));
    result
}

/// Writes annotated copies of an image next to the file it came from. A
/// disabled writer does nothing.
#[derive(Debug, Clone)]
pub struct ImageDebugWriter {
    input_path: Option<PathBuf>,
    input_image: Option<RgbImage>,
}

impl ImageDebugWriter {
    pub fn new(input_path: PathBuf, input_image: RgbImage) -> Self {
        Self {
            input_path: Some(input_path),
            input_image: Some(input_image),
        }
    }

    pub fn disabled() -> Self {
        Self {
            input_path: None,
            input_image: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.input_path.is_some()
    }

    /// Draws on a copy of the input image and saves it under `label`.
    pub fn write(&self, label: &str, draw: impl FnOnce(&mut RgbImage)) {
        if let (Some(path), Some(image)) = (&self.input_path, &self.input_image) {
            let mut canvas = image.clone();
            draw(&mut canvas);
            save(&debug_image_path(path, label), DynamicImage::ImageRgb8(canvas));
        }
    }

    /// Saves a different image, optionally annotated, under `label`.
    pub fn write_rgb(&self, label: &str, image: &RgbImage, draw: impl FnOnce(&mut RgbImage)) {
        if let Some(path) = &self.input_path {
            let mut canvas = image.clone();
            draw(&mut canvas);
            save(&debug_image_path(path, label), DynamicImage::ImageRgb8(canvas));
        }
    }

    pub fn write_gray(&self, label: &str, image: &GrayImage) {
        if let Some(path) = &self.input_path {
            save(&debug_image_path(path, label), DynamicImage::ImageLuma8(image.clone()));
        }
    }
}

fn save(path: &Path, image: DynamicImage) {
    match image.save(path) {
        Ok(()) => debug!("wrote debug image {}", path.display()),
        Err(e) => warn!("unable to write debug image {}: {}", path.display(), e),
    }
}

/// Outlines each detected answer block in its own color.
pub fn draw_answer_blocks_debug_image_mut(canvas: &mut RgbImage, blocks: &[Rect]) {
    for (i, rect) in blocks.iter().enumerate() {
        let color = RAINBOW[i % RAINBOW.len()];
        draw_hollow_rect_mut(canvas, *rect, color);
        if rect.width() > 4 && rect.height() > 4 {
            draw_hollow_rect_mut(
                canvas,
                Rect::at(rect.left() + 2, rect.top() + 2).of_size(rect.width() - 4, rect.height() - 4),
                color,
            );
        }
    }
}

/// Draws the sheet outline found before perspective correction.
pub fn draw_sheet_outline_debug_image_mut(canvas: &mut RgbImage, corners: &[Point<f32>; 4]) {
    for (i, start) in corners.iter().enumerate() {
        let end = corners[(i + 1) % corners.len()];
        draw_line_segment_mut(canvas, (start.x, start.y), (end.x, end.y), PINK);
    }
}

/// Outlines every bubble hull and circles each question's correct choice,
/// green when it was the marked choice and red otherwise.
pub fn draw_bubbles_debug_image_mut(
    canvas: &mut RgbImage,
    analysis: &BlockAnalysis,
    key: &AnswerKey,
) {
    for (question, row) in analysis.questions.iter().enumerate() {
        for bubble in row {
            for (i, start) in bubble.hull.iter().enumerate() {
                let end = bubble.hull[(i + 1) % bubble.hull.len()];
                draw_line_segment_mut(
                    canvas,
                    (start.x as f32, start.y as f32),
                    (end.x as f32, end.y as f32),
                    BLUE,
                );
            }
        }

        let correct = match key.correct_choice(question) {
            Some(correct) => correct,
            None => continue,
        };
        if let Some(bubble) = row.get(correct) {
            let marked = analysis.marks.get(question).copied().flatten();
            let color = if marked == Some(correct) { GREEN } else { RED };
            let center = bubble.center();
            draw_hollow_circle_mut(
                canvas,
                (center.x.round() as i32, center.y.round() as i32),
                analysis.median_radius as i32,
                color,
            );
        }
    }
}
