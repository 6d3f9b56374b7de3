use std::fmt::Display;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Everything that tunes a grading run. Every field has a default so that a
/// partial JSON file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GradingConfig {
    /// Number of answer blocks the sheet layout contains.
    pub expected_blocks: usize,
    /// Number of choices per question.
    pub alternatives: usize,
    pub sheet: SheetConfig,
    /// Tried in order until one finds at least one answer block.
    pub detection_presets: Vec<DetectionPreset>,
    pub bubbles: BubbleConfig,
    pub marks: MarkThresholds,
    /// Write annotated images next to path inputs.
    pub debug: bool,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            expected_blocks: 2,
            alternatives: 4,
            sheet: SheetConfig::default(),
            detection_presets: default_detection_presets(),
            bubbles: BubbleConfig::default(),
            marks: MarkThresholds::default(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SheetConfig {
    /// Height the sheet is resized to before any analysis.
    pub working_height: u32,
    /// Fraction of the frame a quadrilateral must cover to be taken as the
    /// sheet outline.
    pub min_sheet_area_ratio: f32,
    pub canny_low: f32,
    pub canny_high: f32,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            working_height: 1000,
            min_sheet_area_ratio: 0.5,
            canny_low: 75.0,
            canny_high: 200.0,
        }
    }
}

/// How a grayscale image is split into ink and paper.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "method")]
pub enum ThresholdMethod {
    /// Compare each pixel with its Gaussian-weighted neighborhood.
    #[serde(rename_all = "camelCase", rename = "adaptive")]
    Adaptive {
        blur_kernel: u32,
        block_size: u32,
        offset: i32,
    },

    /// A single global level chosen by Otsu's method.
    #[serde(rename_all = "camelCase", rename = "otsu")]
    Otsu { blur_kernel: u32 },
}

/// One attempt at finding answer blocks on the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionPreset {
    pub threshold: ThresholdMethod,
    pub close_kernel: u32,
    pub min_size: u32,
    pub max_size: u32,
    pub group_threshold: i32,
    pub group_eps: f32,
}

impl DetectionPreset {
    pub fn adaptive(blur_kernel: u32, block_size: u32, offset: i32, close_kernel: u32, min_size: u32) -> Self {
        Self {
            threshold: ThresholdMethod::Adaptive {
                blur_kernel,
                block_size,
                offset,
            },
            close_kernel,
            min_size,
            max_size: 800,
            group_threshold: 1,
            group_eps: 0.2,
        }
    }

    pub fn otsu(blur_kernel: u32, close_kernel: u32, min_size: u32) -> Self {
        Self {
            threshold: ThresholdMethod::Otsu { blur_kernel },
            close_kernel,
            min_size,
            max_size: 800,
            group_threshold: 1,
            group_eps: 0.2,
        }
    }
}

pub fn default_detection_presets() -> Vec<DetectionPreset> {
    vec![
        DetectionPreset::adaptive(3, 5, 3, 4, 100),
        DetectionPreset::adaptive(3, 5, 3, 4, 50),
        DetectionPreset::adaptive(5, 11, 5, 5, 50),
        DetectionPreset::otsu(5, 5, 50),
    ]
}

/// Parameters for finding bubbles inside one answer block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BubbleConfig {
    pub working_width: u32,
    pub working_height: u32,
    pub blur_kernel: u32,
    pub block_size: u32,
    pub offset: i32,
    pub close_kernel: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub min_aspect: f32,
    pub max_aspect: f32,
    /// Fragments whose centers are closer than this are one bubble.
    pub proximity: f32,
}

impl Default for BubbleConfig {
    fn default() -> Self {
        Self {
            working_width: 400,
            working_height: 800,
            blur_kernel: 5,
            block_size: 11,
            offset: 5,
            close_kernel: 9,
            min_width: 25,
            min_height: 25,
            min_aspect: 0.8,
            max_aspect: 1.5,
            proximity: 20.0,
        }
    }
}

impl BubbleConfig {
    pub fn threshold(&self) -> ThresholdMethod {
        ThresholdMethod::Adaptive {
            blur_kernel: self.blur_kernel,
            block_size: self.block_size,
            offset: self.offset,
        }
    }
}

/// Confidence rule for deciding which bubble of a question is marked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarkThresholds {
    /// The darkest bubble must be filled more than this.
    pub min_fill: f32,
    /// The darkest bubble must beat the runner-up by more than this fraction
    /// of its own fill.
    pub min_diff: f32,
}

impl Default for MarkThresholds {
    fn default() -> Self {
        Self {
            min_fill: 0.3,
            min_diff: 0.3,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, serde_json::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "unable to read {}: {}", path.display(), e),
            ConfigError::Parse(path, e) => write!(f, "invalid config {}: {}", path.display(), e),
        }
    }
}

pub fn load_config(path: &Path) -> Result<GradingConfig, ConfigError> {
    let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    serde_json::from_str(&json).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
}
