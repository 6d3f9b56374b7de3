//! Renders synthetic answer sheets for tests.

use image::imageops::crop_imm;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_hollow_rect_mut, Canvas};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::rect::Rect;

const PAPER: Rgb<u8> = Rgb([255, 255, 255]);
const PRINT: Rgb<u8> = Rgb([0, 0, 0]);
const PENCIL_GAP: Rgb<u8> = Rgb([210, 210, 210]);
const TABLE: Rgb<u8> = Rgb([60, 55, 50]);

const BUBBLE_RADIUS: i32 = 14;
const FRAME_THICKNESS: u32 = 4;

/// Draws a rectangular frame whose outer edge is `rect`.
pub(crate) fn draw_frame_mut<C>(canvas: &mut C, rect: Rect, thickness: u32, color: C::Pixel)
where
    C: Canvas,
    C::Pixel: 'static,
{
    for t in 0..thickness {
        draw_hollow_rect_mut(
            canvas,
            Rect::at(rect.left() + t as i32, rect.top() + t as i32)
                .of_size(rect.width() - 2 * t, rect.height() - 2 * t),
            color,
        );
    }
}

/// Fills a disk with horizontal pencil strokes.
fn draw_pencil_mark_mut(img: &mut RgbImage, (cx, cy): (i32, i32), radius: i32) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let (x, y) = (cx + dx, cy + dy);
            if dx * dx + dy * dy > radius * radius
                || x < 0
                || y < 0
                || x >= img.width() as i32
                || y >= img.height() as i32
            {
                continue;
            }
            let color = if y.rem_euclid(6) < 3 { PRINT } else { PENCIL_GAP };
            img.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// One framed grid of bubbles, 400x720 pixels.
#[derive(Debug, Clone)]
pub(crate) struct SyntheticBlock {
    pub left: i32,
    pub top: i32,
    pub questions: usize,
    pub alternatives: usize,
    /// Filled choices for each question.
    pub marks: Vec<Vec<usize>>,
    /// (question, choice) pairs whose bubble is not printed.
    pub missing: Vec<(usize, usize)>,
}

impl SyntheticBlock {
    pub const WIDTH: u32 = 400;
    pub const HEIGHT: u32 = 720;

    pub fn at(left: i32, top: i32) -> Self {
        Self {
            left,
            top,
            questions: 10,
            alternatives: 4,
            marks: vec![vec![]; 10],
            missing: vec![],
        }
    }

    /// Fills exactly one bubble per question.
    pub fn answered(mut self, answers: &[usize]) -> Self {
        self.marks = answers.iter().map(|choice| vec![*choice]).collect();
        self.marks.resize(self.questions, vec![]);
        self
    }

    pub fn with_mark(mut self, question: usize, choice: usize) -> Self {
        self.marks[question].push(choice);
        self
    }

    pub fn without_bubble(mut self, question: usize, choice: usize) -> Self {
        self.missing.push((question, choice));
        self
    }

    pub fn bubble_center(&self, question: usize, choice: usize) -> (i32, i32) {
        (
            self.left + 80 + 80 * choice as i32,
            self.top + 50 + 68 * question as i32,
        )
    }

    pub fn draw_mut(&self, img: &mut RgbImage) {
        draw_frame_mut(
            img,
            Rect::at(self.left, self.top).of_size(Self::WIDTH, Self::HEIGHT),
            FRAME_THICKNESS,
            PRINT,
        );
        for question in 0..self.questions {
            for choice in 0..self.alternatives {
                if self.missing.contains(&(question, choice)) {
                    continue;
                }
                let center = self.bubble_center(question, choice);
                if self.marks[question].contains(&choice) {
                    draw_pencil_mark_mut(img, center, BUBBLE_RADIUS - 1);
                }
                draw_hollow_circle_mut(img, center, BUBBLE_RADIUS, PRINT);
            }
        }
    }

    /// The block as block detection would crop it from a sheet.
    pub fn render_cropped(&self) -> RgbImage {
        let origin = Self {
            left: 0,
            top: 0,
            ..self.clone()
        };
        let mut img = RgbImage::from_pixel(Self::WIDTH, Self::HEIGHT, PAPER);
        origin.draw_mut(&mut img);
        crop_imm(&img, 2, 2, Self::WIDTH - 4, Self::HEIGHT - 4).to_image()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SyntheticSheet {
    pub width: u32,
    pub height: u32,
    pub blocks: Vec<SyntheticBlock>,
}

impl SyntheticSheet {
    /// Two blank blocks side by side on a 1000x1000 sheet.
    pub fn two_blocks() -> Self {
        Self {
            width: 1000,
            height: 1000,
            blocks: vec![SyntheticBlock::at(60, 140), SyntheticBlock::at(540, 140)],
        }
    }

    pub fn answered(first: &[usize], second: &[usize]) -> Self {
        let mut sheet = Self::two_blocks();
        sheet.blocks[0] = sheet.blocks[0].clone().answered(first);
        sheet.blocks[1] = sheet.blocks[1].clone().answered(second);
        sheet
    }

    pub fn render(&self) -> RgbImage {
        let mut img = RgbImage::from_pixel(self.width, self.height, PAPER);
        for block in &self.blocks {
            block.draw_mut(&mut img);
        }
        img
    }

    pub fn render_png(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(self.render())
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    /// Renders the sheet lying on a dark table, with its corners at
    /// `corners` (top-left, top-right, bottom-right, bottom-left).
    pub fn photograph(&self, width: u32, height: u32, corners: [(f32, f32); 4]) -> RgbImage {
        let (right, bottom) = ((self.width - 1) as f32, (self.height - 1) as f32);
        let projection = Projection::from_control_points(
            [(0.0, 0.0), (right, 0.0), (right, bottom), (0.0, bottom)],
            corners,
        )
        .unwrap();
        let mut photo = RgbImage::new(width, height);
        warp_into(&self.render(), &projection, Interpolation::Bilinear, TABLE, &mut photo);
        photo
    }
}

pub(crate) const FIRST_KEY: [usize; 10] = [0, 1, 2, 3, 0, 1, 2, 3, 0, 1];
pub(crate) const SECOND_KEY: [usize; 10] = [3, 2, 1, 0, 3, 2, 1, 0, 3, 2];
