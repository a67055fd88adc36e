//! Parsing the grader's Markdown response.
//!
//! We ask the model for three sections:
//!
//! ```text
//! ## Scores
//! {"relevance": 15, "structure": 16, "expertise": 14, "critique": 13, "language": 17}
//!
//! ## Feedback
//! ...
//!
//! ## Suggested Answer
//! ...
//! ```
//!
//! Models are not always tidy about this, so headings are matched loosely.
//! Scores are not: a missing or out-of-range score is an error, and we never
//! fill one in with zero.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::{Dimension, Grade, Scores};
use crate::prelude::*;

/// The first flat JSON object in the response.
static SCORE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{[^{}]*\}").expect("failed to compile regex"));

/// A fenced code block wrapped around the score block.
static FENCED_SCORE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[a-zA-Z]*\s*\{[^{}]*\}\s*```").expect("failed to compile regex")
});

/// A Markdown heading (or a bold line used as one). Capture 1 is the title.
/// Only some of these start a [`Section`].
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:#{1,6}[ \t]*|\*\*)([^\n*#]+?)[ \t]*(?:\*\*)?:?[ \t]*$")
        .expect("failed to compile regex")
});

/// Why a response could not be parsed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("no JSON score block found")]
    NoScoreBlock,

    #[error("score block is not valid JSON: {0}")]
    InvalidScoreJson(String),

    #[error("missing score for {0}")]
    MissingScore(Dimension),

    #[error("score for {dimension} is not a whole number: {value}")]
    NotAWholeNumber { dimension: Dimension, value: String },

    #[error("score for {dimension} is {value}, but the maximum is {max}")]
    ScoreOutOfRange {
        dimension: Dimension,
        value: u64,
        max: u32,
    },

    #[error("missing \"{0}\" section")]
    MissingSection(&'static str),
}

/// Parse a complete response into a [`Grade`]. Each score must be an integer
/// in `0..=max_score`.
pub fn parse_grade(response: &str, max_score: u32) -> Result<Grade, ParseError> {
    let scores = parse_scores(response, max_score)?;
    let sections = split_sections(response);
    let find = |wanted: Section| sections.iter().find(|section| section.kind == wanted);

    let suggested_answer = find(Section::SuggestedAnswer)
        .map(|section| section.body.trim().to_owned())
        .filter(|body| !body.is_empty())
        .ok_or(ParseError::MissingSection("Suggested Answer"))?;

    let feedback = match find(Section::Feedback) {
        Some(section) => strip_score_block(section.body),
        None => {
            // No feedback heading, so take everything that isn't scores or
            // the suggested answer.
            let end = find(Section::SuggestedAnswer)
                .map(|section| section.heading_start)
                .unwrap_or(response.len());
            strip_score_block(&strip_section_headings(&response[..end]))
        }
    };
    if feedback.is_empty() {
        return Err(ParseError::MissingSection("Feedback"));
    }

    Ok(Grade {
        scores,
        max_score,
        feedback,
        suggested_answer,
    })
}

/// Find the score block and check every dimension.
fn parse_scores(response: &str, max_score: u32) -> Result<Scores, ParseError> {
    let block = SCORE_BLOCK_RE
        .find(response)
        .ok_or(ParseError::NoScoreBlock)?
        .as_str();
    let object = serde_json::from_str::<serde_json::Map<String, Value>>(block)
        .map_err(|err| ParseError::InvalidScoreJson(err.to_string()))?;

    let mut scores = Scores::default();
    for dimension in Dimension::ALL {
        let value = object
            .get(dimension.key())
            .ok_or(ParseError::MissingScore(dimension))?;
        let score = whole_number(value).ok_or_else(|| ParseError::NotAWholeNumber {
            dimension,
            value: value.to_string(),
        })?;
        if score > u64::from(max_score) {
            return Err(ParseError::ScoreOutOfRange {
                dimension,
                value: score,
                max: max_score,
            });
        }
        // Checked against `max_score` above, so this fits.
        scores.set(dimension, score as u32);
    }
    Ok(scores)
}

/// Accept `15`, `15.0` and `"15"`, but not `15.5` or `-1`.
fn whole_number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u32::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

/// The top-level sections we ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section {
    Scores,
    Feedback,
    SuggestedAnswer,
}

impl Section {
    /// Which section does a heading title start, if any?
    fn from_title(title: &str) -> Option<Section> {
        let title = title.trim().to_lowercase();
        let answer = title.contains("answer");
        if answer
            && (title.contains("suggested")
                || title.contains("model")
                || title.contains("improved"))
        {
            Some(Section::SuggestedAnswer)
        } else if title.contains("feedback") || title.contains("comments") {
            Some(Section::Feedback)
        } else if title.contains("score") {
            Some(Section::Scores)
        } else {
            None
        }
    }
}

/// One top-level section of a response.
struct SectionSpan<'a> {
    kind: Section,
    body: &'a str,
    heading_start: usize,
}

/// Split a response at the first heading of each [`Section`]. Any other
/// heading, including a repeat of one we've already seen, stays in the body
/// of the section around it.
fn split_sections(response: &str) -> Vec<SectionSpan<'_>> {
    let mut starts: Vec<(Section, usize, usize)> = vec![];
    for caps in HEADING_RE.captures_iter(response) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let Some(kind) = Section::from_title(&caps[1]) else {
            continue;
        };
        if starts.iter().all(|(seen, _, _)| *seen != kind) {
            starts.push((kind, whole.start(), whole.end()));
        }
    }
    starts
        .iter()
        .enumerate()
        .map(|(idx, &(kind, heading_start, body_start))| {
            let body_end = starts
                .get(idx + 1)
                .map(|&(_, next_start, _)| next_start)
                .unwrap_or(response.len());
            SectionSpan {
                kind,
                body: &response[body_start..body_end],
                heading_start,
            }
        })
        .collect()
}

/// Remove our own section headings from a piece of text, leaving any others.
fn strip_section_headings(text: &str) -> String {
    HEADING_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            if Section::from_title(&caps[1]).is_some() {
                String::new()
            } else {
                caps[0].to_owned()
            }
        })
        .into_owned()
}

/// Remove the score block (fenced or bare) from a piece of text.
fn strip_score_block(text: &str) -> String {
    let text = FENCED_SCORE_BLOCK_RE.replace_all(text, "");
    SCORE_BLOCK_RE.replace_all(&text, "").trim().to_owned()
}
