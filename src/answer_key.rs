use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The correct choice for every question of one answer block. Questions and
/// choices are both zero-based; questions run contiguously from 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<usize, usize>", into = "BTreeMap<usize, usize>")]
pub struct AnswerKey {
    choices: Vec<usize>,
}

impl AnswerKey {
    pub fn new(choices: Vec<usize>) -> Self {
        Self { choices }
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    pub fn correct_choice(&self, question: usize) -> Option<usize> {
        self.choices.get(question).copied()
    }

    /// Number of bubbles a block graded with this key must contain.
    pub fn expected_bubbles(&self, alternatives: usize) -> usize {
        self.choices.len() * alternatives
    }

    /// Checks every choice names one of `alternatives` bubbles.
    pub fn validate(&self, alternatives: usize) -> Result<(), AnswerKeyError> {
        match self
            .choices
            .iter()
            .enumerate()
            .find(|(_, choice)| **choice >= alternatives)
        {
            Some((question, choice)) => Err(AnswerKeyError::ChoiceOutOfRange {
                question,
                choice: *choice,
                alternatives,
            }),
            None => Ok(()),
        }
    }
}

impl TryFrom<BTreeMap<usize, usize>> for AnswerKey {
    type Error = AnswerKeyError;

    fn try_from(map: BTreeMap<usize, usize>) -> Result<Self, Self::Error> {
        let mut choices = Vec::with_capacity(map.len());
        for (expected, (question, choice)) in map.into_iter().enumerate() {
            if question != expected {
                return Err(AnswerKeyError::MissingQuestion(expected));
            }
            choices.push(choice);
        }
        Ok(Self { choices })
    }
}

impl From<AnswerKey> for BTreeMap<usize, usize> {
    fn from(key: AnswerKey) -> Self {
        key.choices.into_iter().enumerate().collect()
    }
}

#[derive(Debug)]
pub enum AnswerKeyError {
    Io(PathBuf, std::io::Error),
    Parse(serde_json::Error),
    MissingQuestion(usize),
    ChoiceOutOfRange {
        question: usize,
        choice: usize,
        alternatives: usize,
    },
}

impl Display for AnswerKeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnswerKeyError::Io(path, e) => write!(f, "unable to read {}: {}", path.display(), e),
            AnswerKeyError::Parse(e) => write!(f, "invalid answer keys: {}", e),
            AnswerKeyError::MissingQuestion(question) => {
                write!(f, "answer key has no entry for question {}", question)
            }
            AnswerKeyError::ChoiceOutOfRange {
                question,
                choice,
                alternatives,
            } => write!(
                f,
                "question {} expects choice {} but only {} alternatives exist",
                question, choice, alternatives
            ),
        }
    }
}

/// Parses a JSON array of answer keys, one per block in left-to-right order.
pub fn parse_answer_keys(json: &str) -> Result<Vec<AnswerKey>, AnswerKeyError> {
    serde_json::from_str(json).map_err(AnswerKeyError::Parse)
}

pub fn load_answer_keys(path: &Path) -> Result<Vec<AnswerKey>, AnswerKeyError> {
    let json =
        std::fs::read_to_string(path).map_err(|e| AnswerKeyError::Io(path.to_path_buf(), e))?;
    parse_answer_keys(&json)
}
