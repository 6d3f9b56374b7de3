use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use image::RgbImage;
use log::{debug, info, warn};
use logging_timer::time;

use crate::answer_key::AnswerKey;
use crate::blocks::{detect_answer_blocks, BlockDetection};
use crate::bubbles::grade_block;
use crate::config::GradingConfig;
use crate::debug::{
    draw_answer_blocks_debug_image_mut, draw_bubbles_debug_image_mut,
    draw_sheet_outline_debug_image_mut, ImageDebugWriter,
};
use crate::preprocess::{correct_perspective, load_image, load_sheet, WarpedSheet};
use crate::types::{AnswerBlock, ImageInput};
use crate::verdict::{BlockResult, BlockStatus, GradingStatus, Verdict};

pub const SUCCESS_MESSAGE: &str = "grading completed successfully";
pub const MISSING_BUBBLES_MESSAGE: &str = "not every expected bubble was detected";
pub const LOW_CONFIDENCE_MESSAGE: &str = "make sure every answer is filled in clearly";
pub const NO_KEYED_BLOCKS_MESSAGE: &str = "no answer block had an answer key to grade against";

/// Where a grading run stands. Runs only move forward and stop at the first
/// terminal state they reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradingState {
    Loaded,
    BlocksDetected,
    BlocksInvalid,
    BubblesDetected,
    BubblesIncomplete,
    BubblesLowConfidence,
    Graded,
}

impl GradingState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GradingState::BlocksInvalid
                | GradingState::BubblesIncomplete
                | GradingState::BubblesLowConfidence
                | GradingState::Graded
        )
    }

    pub fn can_advance_to(self, next: GradingState) -> bool {
        use GradingState::*;
        matches!(
            (self, next),
            (Loaded, BlocksDetected)
                | (BlocksDetected, BlocksInvalid)
                | (BlocksDetected, BubblesDetected)
                | (BubblesDetected, BubblesIncomplete)
                | (BubblesDetected, BubblesLowConfidence)
                | (BubblesDetected, Graded)
        )
    }

    fn advance(self, next: GradingState) -> GradingState {
        debug_assert!(self.can_advance_to(next), "{:?} -> {:?}", self, next);
        debug!("grading state {:?} -> {:?}", self, next);
        next
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Runs `f`, turning a panic into an error message.
fn isolate<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|panic| panic_message(&*panic))
}

fn debug_writer(input: &ImageInput, config: &GradingConfig, image: &RgbImage) -> ImageDebugWriter {
    match input.path() {
        Some(path) if config.debug => ImageDebugWriter::new(path.to_path_buf(), image.clone()),
        _ => ImageDebugWriter::disabled(),
    }
}

/// Grades one block, reporting a panic as a failed block rather than
/// aborting the rest of the sheet.
fn grade_block_isolated(
    block: &AnswerBlock,
    key: &AnswerKey,
    config: &GradingConfig,
    debug: &ImageDebugWriter,
) -> BlockResult {
    let expected = key.expected_bubbles(config.alternatives);
    isolate_block(block.index, expected, || {
        let graded = grade_block(block.index, &block.image, key, config);
        debug.write_rgb(
            &format!("block_{}_bubbles", block.index),
            &graded.analysis.image,
            |canvas| draw_bubbles_debug_image_mut(canvas, &graded.analysis, key),
        );
        graded.result
    })
}

fn isolate_block(index: usize, expected: usize, f: impl FnOnce() -> BlockResult) -> BlockResult {
    isolate(f).unwrap_or_else(|message| {
        warn!("block {}: grading failed: {}", index, message);
        let area = index + 1;
        BlockResult::failed(area, expected, format!("unable to grade answer block {}", area))
    })
}

/// Applies the acceptance rules to graded blocks.
fn conclude(state: GradingState, results: Vec<BlockResult>) -> Verdict {
    let state = state.advance(GradingState::BubblesDetected);

    if results.is_empty() {
        state.advance(GradingState::BubblesIncomplete);
        return Verdict::new(GradingStatus::IncompleteDetection, NO_KEYED_BLOCKS_MESSAGE);
    }

    if results.iter().any(|result| result.status != BlockStatus::Complete) {
        state.advance(GradingState::BubblesIncomplete);
        return Verdict::new(GradingStatus::IncompleteDetection, MISSING_BUBBLES_MESSAGE)
            .with_results(results);
    }

    if results.iter().any(BlockResult::has_unmarked_answers) {
        state.advance(GradingState::BubblesLowConfidence);
        return Verdict::new(GradingStatus::IncompleteDetection, LOW_CONFIDENCE_MESSAGE)
            .with_results(results);
    }

    state.advance(GradingState::Graded);
    Verdict::new(GradingStatus::Success, SUCCESS_MESSAGE).with_results(results)
}

fn detect(sheet: &RgbImage, config: &GradingConfig) -> (WarpedSheet, Option<BlockDetection>) {
    let warped = correct_perspective(sheet, &config.sheet);
    match detect_answer_blocks(&warped, &config.detection_presets) {
        Ok(detection) => (warped, Some(detection)),
        Err(e) => {
            warn!("{}", e);
            (warped, None)
        }
    }
}

fn grade_sheet(input: &ImageInput, keys: &[AnswerKey], config: &GradingConfig) -> Verdict {
    let sheet = match load_sheet(input, &config.sheet) {
        Ok(sheet) => sheet,
        Err(e) => {
            warn!("{}", e);
            return Verdict::new(e.status(), e.to_string());
        }
    };
    let state = GradingState::Loaded;
    let debug = debug_writer(input, config, &sheet);

    let (warped, detection) = match isolate(|| detect(&sheet, config)) {
        Ok(detected) => detected,
        Err(message) => {
            warn!("answer block detection failed: {}", message);
            return Verdict::new(
                GradingStatus::DetectionError,
                format!("answer block detection failed: {}", message),
            );
        }
    };

    if debug.is_enabled() {
        if let Some(corners) = &warped.corners {
            debug.write("sheet", |canvas| draw_sheet_outline_debug_image_mut(canvas, corners));
        }
        if let Some(detection) = &detection {
            debug!("writing debug images for detection preset {}", detection.preset);
            debug.write_gray("binary", &detection.binary);
            let rects = detection.blocks.iter().map(|block| block.bounds).collect::<Vec<_>>();
            debug.write_rgb("blocks", &warped.color, |canvas| {
                draw_answer_blocks_debug_image_mut(canvas, &rects)
            });
        }
    }

    let blocks = detection.map(|detection| detection.blocks).unwrap_or_default();
    let state = state.advance(GradingState::BlocksDetected);
    if blocks.len() != config.expected_blocks {
        state.advance(GradingState::BlocksInvalid);
        return Verdict::new(
            GradingStatus::InvalidRectangles,
            format!(
                "wrong number of answer blocks: expected {}, found {}",
                config.expected_blocks,
                blocks.len()
            ),
        );
    }

    if keys.len() < blocks.len() {
        warn!(
            "{} answer blocks but only {} answer keys; skipping the rest",
            blocks.len(),
            keys.len()
        );
    }

    let results = blocks
        .iter()
        .zip(keys)
        .map(|(block, key)| grade_block_isolated(block, key, config, &debug))
        .collect::<Vec<BlockResult>>();
    conclude(state, results)
}

/// Grades a photographed or scanned answer sheet against one key per answer
/// block, matched left to right. Always produces a verdict.
#[time]
pub fn grade_submission(input: &ImageInput, keys: &[AnswerKey], config: &GradingConfig) -> Verdict {
    let verdict = isolate(|| grade_sheet(input, keys, config)).unwrap_or_else(|message| {
        Verdict::new(
            GradingStatus::UnexpectedError,
            format!("unexpected error: {}", message),
        )
    });
    info!("verdict: {:?} ({})", verdict.status, verdict.message);
    verdict
}

/// Grades an image that is already cropped to a single answer block,
/// skipping perspective correction and block detection.
#[time]
pub fn grade_block_image(input: &ImageInput, key: &AnswerKey, config: &GradingConfig) -> Verdict {
    let verdict = isolate(|| {
        let image = match load_image(input) {
            Ok(image) => image,
            Err(e) => {
                warn!("{}", e);
                return Verdict::new(e.status(), e.to_string());
            }
        };
        let debug = debug_writer(input, config, &image);
        let block = AnswerBlock {
            index: 0,
            bounds: imageproc::rect::Rect::at(0, 0).of_size(image.width(), image.height()),
            image,
        };

        let state = GradingState::Loaded.advance(GradingState::BlocksDetected);
        let result = grade_block_isolated(&block, key, config, &debug);
        conclude(state, vec![result])
    })
    .unwrap_or_else(|message| {
        Verdict::new(
            GradingStatus::UnexpectedError,
            format!("unexpected error: {}", message),
        )
    });
    info!("verdict: {:?} ({})", verdict.status, verdict.message);
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::debug_image_path;
    use crate::test_utils::{SyntheticBlock, SyntheticSheet, FIRST_KEY, SECOND_KEY};
    use std::path::PathBuf;

    fn keys() -> Vec<AnswerKey> {
        vec![
            AnswerKey::new(FIRST_KEY.to_vec()),
            AnswerKey::new(SECOND_KEY.to_vec()),
        ]
    }

    fn grade(sheet: &SyntheticSheet, keys: &[AnswerKey]) -> Verdict {
        grade_submission(
            &ImageInput::from(sheet.render()),
            keys,
            &GradingConfig::default(),
        )
    }

    #[test]
    fn fully_correct_sheet_succeeds() {
        let verdict = grade(&SyntheticSheet::answered(&FIRST_KEY, &SECOND_KEY), &keys());

        assert_eq!(verdict.status, GradingStatus::Success, "{:?}", verdict);
        assert_eq!(verdict.message, SUCCESS_MESSAGE);
        assert_eq!(verdict.results.len(), 2);
        for (i, result) in verdict.results.iter().enumerate() {
            assert_eq!(result.area, i + 1);
            assert_eq!(result.status, BlockStatus::Complete);
            assert_eq!(result.bubbles_detected, 40);
            assert_eq!(result.score, 100.0);
            assert!(result.answers.iter().all(|answer| answer.is_correct));
        }
    }

    #[test]
    fn photographed_sheet_is_straightened_and_graded() {
        let photo = SyntheticSheet::answered(&FIRST_KEY, &SECOND_KEY).photograph(
            1200,
            1240,
            [(110.0, 130.0), (1100.0, 100.0), (1120.0, 1110.0), (90.0, 1130.0)],
        );
        let mut config = GradingConfig::default();
        config.sheet.working_height = 1240;

        let warped = correct_perspective(&photo, &config.sheet);
        assert!(warped.corners.is_some());

        let verdict = grade_submission(&ImageInput::from(photo), &keys(), &config);
        assert_eq!(verdict.status, GradingStatus::Success, "{:?}", verdict);
        assert_eq!(verdict.results.len(), 2);
        for result in &verdict.results {
            assert_eq!(result.bubbles_detected, 40);
            assert_eq!(result.score, 100.0);
        }
    }

    #[test]
    fn wrong_answers_lower_the_score() {
        let mut answers = SECOND_KEY;
        answers[0] = 0;
        answers[9] = 0;
        let verdict = grade(&SyntheticSheet::answered(&FIRST_KEY, &answers), &keys());

        assert_eq!(verdict.status, GradingStatus::Success);
        assert_eq!(verdict.results[1].correct_answers, 8);
        assert_eq!(verdict.results[1].answers[0].question, 1);
        assert_eq!(verdict.results[1].answers[0].marked, Some(1));
        assert_eq!(verdict.results[1].answers[0].correct, 4);
        assert!(!verdict.results[1].answers[0].is_correct);
    }

    #[test]
    fn missing_bubble_fails_the_sheet() {
        let mut sheet = SyntheticSheet::answered(&FIRST_KEY, &SECOND_KEY);
        sheet.blocks[1] = sheet.blocks[1].clone().without_bubble(4, 0);
        let verdict = grade(&sheet, &keys());

        assert_eq!(verdict.status, GradingStatus::IncompleteDetection);
        assert_eq!(verdict.message, MISSING_BUBBLES_MESSAGE);
        assert_eq!(verdict.results[0].status, BlockStatus::Complete);
        assert_eq!(verdict.results[1].status, BlockStatus::Incomplete);
        assert_eq!(verdict.results[1].bubbles_detected, 39);
        assert_eq!(verdict.results[1].bubbles_expected, 40);
        assert!(verdict.results[1].answers.is_empty());
    }

    #[test]
    fn over_eager_merging_fails_the_sheet() {
        let mut config = GradingConfig::default();
        config.bubbles.proximity = 90.0;
        let verdict = grade_submission(
            &ImageInput::from(SyntheticSheet::answered(&FIRST_KEY, &SECOND_KEY).render()),
            &keys(),
            &config,
        );

        assert_eq!(verdict.status, GradingStatus::IncompleteDetection);
        assert!(verdict.results.iter().all(|r| r.bubbles_detected < r.bubbles_expected));
    }

    #[test]
    fn unreadable_input_is_reported() {
        let config = GradingConfig::default();
        let empty = grade_submission(&ImageInput::Bytes(vec![]), &keys(), &config);
        assert_eq!(empty.status, GradingStatus::NoImage);

        let missing = grade_submission(
            &ImageInput::Path(PathBuf::from("/nonexistent/sheet.jpg")),
            &keys(),
            &config,
        );
        assert_eq!(missing.status, GradingStatus::NoImage);

        let corrupt = grade_submission(
            &ImageInput::Bytes(vec![0x89, b'P', b'N', b'G', 0, 1]),
            &keys(),
            &config,
        );
        assert_eq!(corrupt.status, GradingStatus::InvalidImage);
        assert!(corrupt.results.is_empty());
    }

    #[test]
    fn unkeyed_blocks_are_skipped() {
        let verdict = grade(
            &SyntheticSheet::answered(&FIRST_KEY, &SECOND_KEY),
            &keys()[..1],
        );

        assert_eq!(verdict.status, GradingStatus::Success);
        assert_eq!(verdict.results.len(), 1);
        assert_eq!(verdict.results[0].area, 1);
        assert_eq!(verdict.results[0].correct_answers, 10);
    }

    #[test]
    fn no_keys_means_nothing_was_graded() {
        let verdict = grade(&SyntheticSheet::answered(&FIRST_KEY, &SECOND_KEY), &[]);
        assert_eq!(verdict.status, GradingStatus::IncompleteDetection);
        assert_eq!(verdict.message, NO_KEYED_BLOCKS_MESSAGE);
        assert!(verdict.results.is_empty());
    }

    #[test]
    fn ambiguous_mark_asks_for_clearer_marks() {
        let mut sheet = SyntheticSheet::answered(&FIRST_KEY, &SECOND_KEY);
        sheet.blocks[0] = sheet.blocks[0].clone().with_mark(2, 0);
        let verdict = grade(&sheet, &keys());

        assert_eq!(verdict.status, GradingStatus::IncompleteDetection);
        assert_eq!(verdict.message, LOW_CONFIDENCE_MESSAGE);
        assert_eq!(verdict.results[0].answers[2].marked, None);
        assert_eq!(verdict.results[0].status, BlockStatus::Complete);
    }

    #[test]
    fn blank_page_has_no_answer_blocks() {
        let blank = RgbImage::from_pixel(700, 1000, image::Rgb([255, 255, 255]));
        let verdict = grade_submission(&ImageInput::from(blank), &keys(), &GradingConfig::default());
        assert_eq!(verdict.status, GradingStatus::InvalidRectangles);
        assert!(verdict.message.ends_with("found 0"), "{}", verdict.message);
    }

    #[test]
    fn one_block_is_not_enough() {
        let sheet = SyntheticSheet {
            blocks: vec![SyntheticBlock::at(300, 140).answered(&FIRST_KEY)],
            ..SyntheticSheet::two_blocks()
        };
        let verdict = grade(&sheet, &keys());
        assert_eq!(verdict.status, GradingStatus::InvalidRectangles);
        assert!(verdict.message.ends_with("found 1"), "{}", verdict.message);
    }

    #[test]
    fn grading_is_repeatable() {
        let sheet = ImageInput::Bytes(SyntheticSheet::answered(&FIRST_KEY, &SECOND_KEY).render_png());
        let first = grade_submission(&sheet, &keys(), &GradingConfig::default());
        let second = grade_submission(&sheet, &keys(), &GradingConfig::default());
        assert_eq!(first, second);
    }

    #[test]
    fn debug_images_are_written_next_to_the_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.png");
        SyntheticSheet::answered(&FIRST_KEY, &SECOND_KEY).render().save(&path).unwrap();
        let config = GradingConfig {
            debug: true,
            ..GradingConfig::default()
        };

        let verdict = grade_submission(&ImageInput::Path(path.clone()), &keys(), &config);
        assert_eq!(verdict.status, GradingStatus::Success);
        for label in ["binary", "blocks", "block_0_bubbles", "block_1_bubbles"] {
            assert!(debug_image_path(&path, label).exists(), "{}", label);
        }
    }

    #[test]
    fn pre_cropped_block_is_graded_directly() {
        let key = AnswerKey::new(SECOND_KEY.to_vec());
        let block = SyntheticBlock::at(0, 0).answered(&SECOND_KEY).render_cropped();
        let verdict = grade_block_image(&ImageInput::from(block), &key, &GradingConfig::default());
        assert_eq!(verdict.status, GradingStatus::Success);
        assert_eq!(verdict.results[0].score, 100.0);

        let incomplete = SyntheticBlock::at(0, 0)
            .answered(&SECOND_KEY)
            .without_bubble(0, 0)
            .render_cropped();
        let verdict = grade_block_image(&ImageInput::from(incomplete), &key, &GradingConfig::default());
        assert_eq!(verdict.status, GradingStatus::IncompleteDetection);

        let verdict = grade_block_image(&ImageInput::Bytes(vec![]), &key, &GradingConfig::default());
        assert_eq!(verdict.status, GradingStatus::NoImage);
    }

    #[test]
    fn panicking_block_is_reported_as_an_error() {
        let result = isolate_block(1, 40, || panic!("contour exploded"));
        assert_eq!(result.status, BlockStatus::Error);
        assert_eq!(result.area, 2);
        assert_eq!(result.message.as_deref(), Some("unable to grade answer block 2"));
        assert_eq!(result.bubbles_expected, 40);

        let verdict = conclude(GradingState::BlocksDetected, vec![result]);
        assert_eq!(verdict.status, GradingStatus::IncompleteDetection);
        assert_eq!(verdict.message, MISSING_BUBBLES_MESSAGE);
    }

    #[test]
    fn panic_messages_are_recovered() {
        assert_eq!(isolate::<()>(|| panic!("static")).unwrap_err(), "static");
        assert_eq!(
            isolate::<()>(|| panic!("{} {}", "formatted", 1)).unwrap_err(),
            "formatted 1"
        );
        assert_eq!(isolate(|| 7).unwrap(), 7);
    }

    #[test]
    fn states_only_move_forward() {
        use GradingState::*;
        assert!(Loaded.can_advance_to(BlocksDetected));
        assert!(BlocksDetected.can_advance_to(BlocksInvalid));
        assert!(BubblesDetected.can_advance_to(BubblesLowConfidence));
        assert!(!Graded.can_advance_to(Loaded));
        assert!(!BlocksInvalid.can_advance_to(BubblesDetected));
        assert!(!Loaded.can_advance_to(Graded));
        for terminal in [BlocksInvalid, BubblesIncomplete, BubblesLowConfidence, Graded] {
            assert!(terminal.is_terminal());
        }
        assert!(!BubblesDetected.is_terminal());
    }
}
