use serde::{Deserialize, Serialize};

/// Overall outcome reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingStatus {
    Success,
    InvalidRectangles,
    IncompleteDetection,
    DetectionError,
    InvalidImage,
    NoImage,
    UnexpectedError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    /// Every expected bubble was found.
    Complete,
    /// The bubble count differs from what the answer key implies.
    Incomplete,
    /// Grading this block failed outright.
    Error,
}

/// One graded question. Questions and choices are numbered from one, as
/// printed on the sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question: usize,
    /// `None` when nothing is marked or two marks are too close to call.
    pub marked: Option<usize>,
    pub correct: usize,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockResult {
    /// One-based position of the block, counting from the left.
    pub area: usize,
    pub status: BlockStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
    pub rectangle_detected: bool,
    pub bubbles_detected: usize,
    pub bubbles_expected: usize,
    pub all_bubbles_detected: bool,
    pub correct_answers: usize,
    pub score: f32,
    pub answers: Vec<QuestionResult>,
}

impl BlockResult {
    pub fn failed(area: usize, bubbles_expected: usize, message: String) -> Self {
        Self {
            area,
            status: BlockStatus::Error,
            message: Some(message),
            rectangle_detected: true,
            bubbles_detected: 0,
            bubbles_expected,
            all_bubbles_detected: false,
            correct_answers: 0,
            score: 0.0,
            answers: vec![],
        }
    }

    /// Whether any reported question resolved to no mark.
    pub fn has_unmarked_answers(&self) -> bool {
        self.answers.iter().any(|answer| answer.marked.is_none())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: GradingStatus,
    pub message: String,
    pub results: Vec<BlockResult>,
}

impl Verdict {
    pub fn new(status: GradingStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            results: vec![],
        }
    }

    pub fn with_results(mut self, results: Vec<BlockResult>) -> Self {
        self.results = results;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == GradingStatus::Success
    }
}
