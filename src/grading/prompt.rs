//! The grading prompt.

use handlebars::Handlebars;

use super::Dimension;
use crate::prelude::*;

/// The built-in grading prompt template.
const DEFAULT_TEMPLATE: &str = include_str!("prompt/grading_prompt.hbs");

/// The system message sent with every grading request.
pub const SYSTEM_MESSAGE: &str = "You are a rigorous, fair and encouraging examiner \
    specializing in administrative law and social welfare policy. You grade essay \
    answers for civil service and professional exams.";

/// A Handlebars template for the grading request.
///
/// Templates are rendered with `question`, `answer`, `max_score`, `total` and
/// `dimensions` (a list of `{key, label, criterion, example}`). HTML escaping
/// is off, since this is Markdown.
#[derive(Clone, Debug)]
pub struct GradingPrompt {
    template: String,
}

impl Default for GradingPrompt {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_owned(),
        }
    }
}

impl GradingPrompt {
    /// Use a custom template. We render it once with placeholder values, so
    /// that syntax errors show up at startup instead of on the first request.
    pub fn from_template(template: impl Into<String>) -> Result<Self> {
        let prompt = Self {
            template: template.into(),
        };
        prompt
            .render("question", "answer", super::DEFAULT_MAX_SCORE)
            .context("invalid grading prompt template")?;
        Ok(prompt)
    }

    /// Load a custom template from a file.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read prompt template {}", path.display()))?;
        Self::from_template(template)
            .with_context(|| format!("in prompt template {}", path.display()))
    }

    /// Render the user message for one answer.
    pub fn render(&self, question: &str, answer: &str, max_score: u32) -> Result<String> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);

        let dimensions = Dimension::ALL
            .iter()
            .enumerate()
            .map(|(idx, dimension)| {
                json!({
                    "key": dimension.key(),
                    "label": dimension.label(),
                    "criterion": dimension.criterion(),
                    "example": example_score(max_score, idx),
                })
            })
            .collect::<Vec<_>>();
        let bindings = json!({
            "question": question.trim(),
            "answer": answer.trim(),
            "max_score": max_score,
            "total": max_score * Dimension::ALL.len() as u32,
            "dimensions": dimensions,
        });
        Ok(handlebars.render_template(&self.template, &bindings)?)
    }
}

/// A plausible-looking score for the format example. These vary so the model
/// doesn't just copy them.
fn example_score(max_score: u32, idx: usize) -> u32 {
    const OFFSETS: [u32; 5] = [4, 6, 3, 5, 8];
    let base = max_score.saturating_mul(9) / 10;
    base.saturating_sub(OFFSETS[idx % OFFSETS.len()] * max_score / 20)
}
