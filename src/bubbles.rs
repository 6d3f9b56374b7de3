use image::imageops::grayscale;
use image::RgbImage;
use imageproc::contours::find_contours;
use imageproc::geometry::convex_hull;
use imageproc::point::Point;
use imageproc::rect::Rect;
use log::{debug, info, warn};
use logging_timer::time;

use crate::answer_key::AnswerKey;
use crate::config::{BubbleConfig, GradingConfig, MarkThresholds};
use crate::geometry::{
    center_of_rect, distance_from_point_to_point, get_contour_bounding_rect, polygon_area,
    union_of_rects,
};
use crate::image_utils::{count_ink_in_polygon, size_image_to};
use crate::preprocess::binarize;
use crate::types::{BinaryImage, Bubble};
use crate::verdict::{BlockResult, BlockStatus, QuestionResult};

/// Radius reported when a block has no bubbles to measure.
pub const DEFAULT_BUBBLE_RADIUS: u32 = 20;

/// A contour that passed the size and shape filters.
#[derive(Debug, Clone)]
pub struct BubbleFragment {
    pub points: Vec<Point<i32>>,
    pub bounds: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BubbleScore {
    pub choice: usize,
    pub ink_pixels: u32,
    pub area: f32,
    pub fill_ratio: f32,
}

/// Everything learned about one block's bubbles, independent of any answer
/// key.
#[derive(Debug, Clone)]
pub struct BlockAnalysis {
    /// The block at bubble working size.
    pub image: RgbImage,
    pub binary: BinaryImage,
    /// Bubbles grouped by question, each row ordered left to right.
    pub questions: Vec<Vec<Bubble>>,
    pub scores: Vec<Vec<BubbleScore>>,
    /// The confidently marked choice of each question.
    pub marks: Vec<Option<usize>>,
    pub bubble_count: usize,
    pub median_radius: u32,
}

#[derive(Debug, Clone)]
pub struct GradedBlock {
    pub result: BlockResult,
    pub analysis: BlockAnalysis,
}

/// Scales a block to the working size and separates ink from paper.
pub fn binarize_block(image: &RgbImage, config: &BubbleConfig) -> (RgbImage, BinaryImage) {
    let sized = size_image_to(image, config.working_width, config.working_height);
    let binary = binarize(&grayscale(&sized), &config.threshold(), config.close_kernel);
    (sized, binary)
}

fn fragment_is_plausible(bounds: &Rect, config: &BubbleConfig) -> bool {
    let aspect = bounds.width() as f32 / bounds.height() as f32;
    bounds.width() >= config.min_width
        && bounds.height() >= config.min_height
        && (config.min_aspect..=config.max_aspect).contains(&aspect)
}

/// Finds contours large enough and round enough to be part of a bubble.
pub fn find_bubble_fragments(binary: &BinaryImage, config: &BubbleConfig) -> Vec<BubbleFragment> {
    find_contours::<i32>(binary)
        .into_iter()
        .filter_map(|contour| {
            let bounds = get_contour_bounding_rect(&contour.points)?;
            fragment_is_plausible(&bounds, config).then_some(BubbleFragment {
                points: contour.points,
                bounds,
            })
        })
        .collect()
}

/// Merges fragments into bubbles. Each unmerged fragment starts a bubble
/// that absorbs every later fragment whose center lies within `proximity`
/// of the bubble's growing bounds; the bubble's shape is the convex hull of
/// everything absorbed.
pub fn merge_bubble_fragments(fragments: &[BubbleFragment], proximity: f32) -> Vec<Bubble> {
    let mut merged = vec![false; fragments.len()];
    let mut bubbles = Vec::new();

    for (i, fragment) in fragments.iter().enumerate() {
        if merged[i] {
            continue;
        }
        merged[i] = true;

        let mut bounds = fragment.bounds;
        let mut points = fragment.points.clone();
        for (j, other) in fragments.iter().enumerate().skip(i + 1) {
            if merged[j] {
                continue;
            }
            let distance = distance_from_point_to_point(
                &center_of_rect(&bounds),
                &center_of_rect(&other.bounds),
            );
            if distance < proximity {
                bounds = union_of_rects(&bounds, &other.bounds);
                points.extend_from_slice(&other.points);
                merged[j] = true;
            }
        }

        let hull = if points.len() >= 3 {
            convex_hull(&points)
        } else {
            points
        };
        bubbles.push(Bubble {
            bounds: get_contour_bounding_rect(&hull).unwrap_or(bounds),
            hull,
        });
    }

    bubbles
}

/// Median of each bubble's half-largest-side, truncated.
pub fn median_radius(bubbles: &[Bubble]) -> u32 {
    let mut radii = bubbles.iter().map(Bubble::radius).collect::<Vec<f32>>();
    if radii.is_empty() {
        return DEFAULT_BUBBLE_RADIUS;
    }
    radii.sort_by(f32::total_cmp);
    let mid = radii.len() / 2;
    let median = if radii.len() % 2 == 0 {
        (radii[mid - 1] + radii[mid]) / 2.0
    } else {
        radii[mid]
    };
    median as u32
}

/// Sorts bubbles top to bottom, cuts them into rows of `alternatives`, and
/// orders each row left to right. A trailing short row is kept as-is.
pub fn order_bubbles(bubbles: &[Bubble], alternatives: usize) -> Vec<Vec<Bubble>> {
    if alternatives == 0 {
        return vec![];
    }
    let mut sorted = bubbles.to_vec();
    sorted.sort_by_key(|bubble| bubble.bounds.top());
    sorted
        .chunks(alternatives)
        .map(|row| {
            let mut row = row.to_vec();
            row.sort_by_key(|bubble| bubble.bounds.left());
            row
        })
        .collect()
}

/// Fraction of the bubble's hull area that is ink.
pub fn score_bubble(binary: &BinaryImage, bubble: &Bubble, choice: usize) -> BubbleScore {
    let area = polygon_area(&bubble.hull);
    let ink_pixels = count_ink_in_polygon(binary, &bubble.hull);
    let fill_ratio = if area > 0.0 {
        ink_pixels as f32 / area
    } else {
        0.0
    };
    BubbleScore {
        choice,
        ink_pixels,
        area,
        fill_ratio,
    }
}

/// Picks the marked choice from a row of fill ratios, or `None` when the
/// row is blank or the darkest bubble does not stand out clearly.
pub fn decide_mark(fill_ratios: &[f32], thresholds: &MarkThresholds) -> Option<usize> {
    if fill_ratios.len() < 2 {
        return None;
    }

    let mut ranked = fill_ratios.iter().copied().enumerate().collect::<Vec<(usize, f32)>>();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let (choice, top) = ranked[0];
    let second = ranked[1].1;
    if top <= 0.0 {
        return None;
    }

    let diff_ratio = (top - second) / top;
    (top > thresholds.min_fill && diff_ratio > thresholds.min_diff).then_some(choice)
}

/// Finds, orders, and scores every bubble in an answer block.
#[time]
pub fn analyze_block(image: &RgbImage, config: &GradingConfig) -> BlockAnalysis {
    let (image, binary) = binarize_block(image, &config.bubbles);
    let fragments = find_bubble_fragments(&binary, &config.bubbles);
    let bubbles = merge_bubble_fragments(&fragments, config.bubbles.proximity);
    debug!(
        "merged {} fragments into {} bubbles",
        fragments.len(),
        bubbles.len()
    );

    let questions = order_bubbles(&bubbles, config.alternatives);
    let scores = questions
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(choice, bubble)| score_bubble(&binary, bubble, choice))
                .collect::<Vec<BubbleScore>>()
        })
        .collect::<Vec<Vec<BubbleScore>>>();

    let marks = scores
        .iter()
        .enumerate()
        .map(|(question, row)| {
            let ratios = row.iter().map(|score| score.fill_ratio).collect::<Vec<f32>>();
            let mark = decide_mark(&ratios, &config.marks);
            debug!("question {}: fill ratios {:?} -> {:?}", question, ratios, mark);
            mark
        })
        .collect();

    BlockAnalysis {
        image,
        binary,
        median_radius: median_radius(&bubbles),
        bubble_count: bubbles.len(),
        questions,
        scores,
        marks,
    }
}

/// Grades one answer block against its key. `area` is the zero-based block
/// index; the result numbers blocks, questions and choices from one.
///
/// The block is complete only when it holds exactly one bubble per choice
/// of every keyed question. Answers are reported for complete blocks only,
/// since rows of an incomplete block cannot be trusted to line up with the
/// key.
pub fn grade_block(
    area: usize,
    image: &RgbImage,
    key: &AnswerKey,
    config: &GradingConfig,
) -> GradedBlock {
    let analysis = analyze_block(image, config);
    let expected = key.expected_bubbles(config.alternatives);
    let complete = analysis.bubble_count == expected;

    let answers = if complete {
        (0..key.len())
            .filter_map(|question| {
                let correct = key.correct_choice(question)?;
                let marked = analysis.marks.get(question).copied().flatten();
                Some(QuestionResult {
                    question: question + 1,
                    marked: marked.map(|choice| choice + 1),
                    correct: correct + 1,
                    is_correct: marked == Some(correct),
                })
            })
            .collect::<Vec<QuestionResult>>()
    } else {
        warn!(
            "block {}: found {} bubbles, expected {}",
            area, analysis.bubble_count, expected
        );
        vec![]
    };

    let correct_answers = answers.iter().filter(|answer| answer.is_correct).count();
    let score = if key.is_empty() {
        0.0
    } else {
        correct_answers as f32 / key.len() as f32 * 100.0
    };

    info!(
        "block {}: {} bubbles, {}/{} correct",
        area,
        analysis.bubble_count,
        correct_answers,
        key.len()
    );

    GradedBlock {
        result: BlockResult {
            area: area + 1,
            status: if complete {
                BlockStatus::Complete
            } else {
                BlockStatus::Incomplete
            },
            message: None,
            rectangle_detected: true,
            bubbles_detected: analysis.bubble_count,
            bubbles_expected: expected,
            all_bubbles_detected: complete,
            correct_answers,
            score,
            answers,
        },
        analysis,
    }
}
