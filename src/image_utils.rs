use image::imageops::{resize, FilterType};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::euclidean_squared_distance_transform;
use imageproc::drawing::draw_polygon_mut;
use imageproc::filter::gaussian_blur_f32;
use imageproc::point::Point;
use imageproc::rect::Rect;

use crate::geometry::get_contour_bounding_rect;

pub const WHITE: Luma<u8> = Luma([u8::MAX]);
pub const BLACK: Luma<u8> = Luma([u8::MIN]);

/// Foreground value in binarized images.
pub const INK: Luma<u8> = WHITE;

pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const PINK: Rgb<u8> = Rgb([255, 0, 255]);
pub const RAINBOW: [Rgb<u8>; 6] = [
    Rgb([255, 0, 0]),
    Rgb([255, 127, 0]),
    Rgb([255, 255, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 0, 255]),
    Rgb([139, 0, 255]),
];

/// Resizes an image to the given height, preserving its aspect ratio.
/// Images already at that height are returned as-is.
pub fn size_image_to_height(img: &RgbImage, height: u32) -> RgbImage {
    if img.height() == height || height == 0 {
        return img.clone();
    }
    let width = ((img.width() as f64 * height as f64 / img.height() as f64).round() as u32).max(1);
    resize(img, width, height, FilterType::Triangle)
}

/// Resizes an image to exactly the given dimensions.
pub fn size_image_to(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    resize(img, width, height, FilterType::Triangle)
}

/// Standard deviation of the Gaussian kernel of the given odd size, using
/// the same rule common vision libraries use when no sigma is given.
pub fn kernel_sigma(kernel_size: u32) -> f32 {
    0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Blurs with a Gaussian equivalent to a `kernel_size` window. Kernels of
/// size 1 or less leave the image untouched.
pub fn blur(img: &GrayImage, kernel_size: u32) -> GrayImage {
    if kernel_size <= 1 {
        return img.clone();
    }
    gaussian_blur_f32(img, kernel_sigma(kernel_size))
}

/// Marks pixels darker than their Gaussian-weighted neighborhood mean (less
/// `offset`) as ink. Ink is white in the output.
pub fn adaptive_threshold_inv(img: &GrayImage, block_size: u32, offset: i32) -> GrayImage {
    let local_mean = blur(img, block_size.max(3));
    let mut out = GrayImage::new(img.width(), img.height());
    for (x, y, pixel) in img.enumerate_pixels() {
        let mean = local_mean.get_pixel(x, y).0[0] as i32;
        if (pixel.0[0] as i32) <= mean - offset {
            out.put_pixel(x, y, INK);
        }
    }
    out
}

/// Marks pixels at or below the Otsu level as ink.
pub fn otsu_threshold_inv(img: &GrayImage) -> GrayImage {
    let level = otsu_level(img);
    let mut out = GrayImage::new(img.width(), img.height());
    for (x, y, pixel) in img.enumerate_pixels() {
        if pixel.0[0] <= level {
            out.put_pixel(x, y, INK);
        }
    }
    out
}

/// Grows ink by a disk of the given radius.
pub fn dilate_disk(img: &GrayImage, radius: f64) -> GrayImage {
    let limit = radius * radius;
    let distances = euclidean_squared_distance_transform(img);
    let mut out = GrayImage::new(img.width(), img.height());
    for (x, y, distance) in distances.enumerate_pixels() {
        if distance.0[0] <= limit {
            out.put_pixel(x, y, INK);
        }
    }
    out
}

/// Shrinks ink by a disk of the given radius. Pixels beyond the image edge
/// do not erode.
pub fn erode_disk(img: &GrayImage, radius: f64) -> GrayImage {
    invert(&dilate_disk(&invert(img), radius))
}

/// Morphological closing with an elliptical (disk) structuring element
/// spanning `kernel_size` pixels.
pub fn close_elliptical(img: &GrayImage, kernel_size: u32) -> GrayImage {
    if kernel_size <= 1 {
        return img.clone();
    }
    let radius = (kernel_size as f64 - 1.0) / 2.0;
    erode_disk(&dilate_disk(img, radius), radius)
}

pub fn invert(img: &GrayImage) -> GrayImage {
    let mut out = img.clone();
    image::imageops::invert(&mut out);
    out
}

/// Counts ink pixels of `binary` inside the filled polygon.
pub fn count_ink_in_polygon(binary: &GrayImage, polygon: &[Point<i32>]) -> u32 {
    // the polygon drawer rejects an explicitly closed outline
    let polygon = match polygon {
        [first, .., last] if first == last => &polygon[..polygon.len() - 1],
        _ => polygon,
    };
    if polygon.len() < 3 {
        return 0;
    }
    let bounds = match get_contour_bounding_rect(polygon) {
        Some(bounds) => bounds,
        None => return 0,
    };
    let image_rect = Rect::at(0, 0).of_size(binary.width(), binary.height());
    let visible = match bounds.intersect(image_rect) {
        Some(visible) => visible,
        None => return 0,
    };

    let mut mask = GrayImage::new(bounds.width(), bounds.height());
    let local = polygon
        .iter()
        .map(|p| Point::new(p.x - bounds.left(), p.y - bounds.top()))
        .collect::<Vec<Point<i32>>>();
    draw_polygon_mut(&mut mask, &local, WHITE);

    let mut count = 0;
    for y in visible.top()..=visible.bottom() {
        for x in visible.left()..=visible.right() {
            let inside = mask
                .get_pixel((x - bounds.left()) as u32, (y - bounds.top()) as u32)
                .0[0]
                == WHITE.0[0];
            if inside && *binary.get_pixel(x as u32, y as u32) == INK {
                count += 1;
            }
        }
    }
    count
}
