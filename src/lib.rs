pub mod answer_key;
pub mod blocks;
pub mod bubbles;
pub mod config;
pub mod debug;
pub mod geometry;
pub mod grade;
pub mod image_utils;
pub mod preprocess;
pub mod types;
pub mod verdict;

#[cfg(test)]
mod test_utils;

pub use answer_key::{load_answer_keys, parse_answer_keys, AnswerKey, AnswerKeyError};
pub use config::{load_config, ConfigError, GradingConfig};
pub use grade::{grade_block_image, grade_submission};
pub use types::ImageInput;
pub use verdict::{BlockResult, BlockStatus, GradingStatus, QuestionResult, Verdict};
