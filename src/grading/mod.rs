//! Grading essays with an LLM.
//!
//! The [`GradingClient`] renders a [`GradingPrompt`], streams the model's
//! answer back chunk by chunk, and finally parses it into a [`Grade`].

use std::fmt;

use schemars::JsonSchema;

use crate::prelude::*;

pub mod client;
pub mod parse;
pub mod prompt;
pub mod topics;

pub use self::{
    client::{GradingClient, GradingEvent, GradingStream},
    parse::{ParseError, parse_grade},
    prompt::GradingPrompt,
    topics::{Topic, builtin_topics, find_topic},
};

/// Default maximum score for each dimension.
pub const DEFAULT_MAX_SCORE: u32 = 20;

/// One of the five things we grade an essay on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dimension {
    Relevance,
    Structure,
    Expertise,
    Critique,
    Language,
}

impl Dimension {
    /// All dimensions, in display order.
    pub const ALL: [Dimension; 5] = [
        Dimension::Relevance,
        Dimension::Structure,
        Dimension::Expertise,
        Dimension::Critique,
        Dimension::Language,
    ];

    /// The JSON key the model uses for this dimension.
    pub fn key(self) -> &'static str {
        match self {
            Dimension::Relevance => "relevance",
            Dimension::Structure => "structure",
            Dimension::Expertise => "expertise",
            Dimension::Critique => "critique",
            Dimension::Language => "language",
        }
    }

    /// A short human-readable name.
    pub fn label(self) -> &'static str {
        match self {
            Dimension::Relevance => "Relevance",
            Dimension::Structure => "Structure & Logic",
            Dimension::Expertise => "Policy Expertise",
            Dimension::Critique => "Critique & Proposals",
            Dimension::Language => "Language",
        }
    }

    /// What the grader should look for.
    pub fn criterion(self) -> &'static str {
        match self {
            Dimension::Relevance => {
                "Does the answer address what the question asks, without drifting off topic?"
            }
            Dimension::Structure => {
                "Is the answer clearly organized, with arguments that follow logically?"
            }
            Dimension::Expertise => {
                "How well does the answer know and apply administrative law and social welfare policy?"
            }
            Dimension::Critique => {
                "Does the answer offer concrete, well-developed critique and recommendations?"
            }
            Dimension::Language => "Is the language precise, fluent and easy to follow?",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Scores for all five dimensions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, JsonSchema, Serialize)]
pub struct Scores {
    pub relevance: u32,
    pub structure: u32,
    pub expertise: u32,
    pub critique: u32,
    pub language: u32,
}

impl Scores {
    /// Get the score for one dimension.
    pub fn get(&self, dimension: Dimension) -> u32 {
        match dimension {
            Dimension::Relevance => self.relevance,
            Dimension::Structure => self.structure,
            Dimension::Expertise => self.expertise,
            Dimension::Critique => self.critique,
            Dimension::Language => self.language,
        }
    }

    /// Set the score for one dimension.
    pub fn set(&mut self, dimension: Dimension, value: u32) {
        match dimension {
            Dimension::Relevance => self.relevance = value,
            Dimension::Structure => self.structure = value,
            Dimension::Expertise => self.expertise = value,
            Dimension::Critique => self.critique = value,
            Dimension::Language => self.language = value,
        }
    }

    /// Iterate over `(dimension, score)` pairs in display order.
    pub fn iter(&self) -> impl Iterator<Item = (Dimension, u32)> + '_ {
        Dimension::ALL.into_iter().map(|d| (d, self.get(d)))
    }

    /// The sum of all five scores.
    pub fn total(&self) -> u32 {
        self.iter().map(|(_, score)| score).sum()
    }
}

/// A parsed grade.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, JsonSchema, Serialize)]
pub struct Grade {
    /// The five dimension scores.
    pub scores: Scores,

    /// The maximum score for each dimension.
    pub max_score: u32,

    /// Comments on the answer's strengths and weaknesses, in Markdown.
    pub feedback: String,

    /// An improved version of the answer, in Markdown.
    pub suggested_answer: String,
}

impl Grade {
    /// The maximum possible total.
    pub fn max_total(&self) -> u32 {
        self.max_score * Dimension::ALL.len() as u32
    }
}
