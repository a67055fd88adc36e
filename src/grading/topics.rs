//! Built-in essay questions.

use std::sync::LazyLock;

use schemars::JsonSchema;

use crate::prelude::*;

/// Our built-in topics, as JSON.
const TOPICS_JSON: &str = include_str!("topics/topics.json");

static TOPICS: LazyLock<Vec<Topic>> = LazyLock::new(|| {
    serde_json::from_str(TOPICS_JSON).expect("failed to parse built-in topics")
});

/// An essay question the user can pick instead of typing one.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Topic {
    /// A short, stable identifier.
    pub id: String,

    /// A title for menus.
    pub title: String,

    /// The full question.
    pub question: String,
}

/// All built-in topics, in menu order.
pub fn builtin_topics() -> &'static [Topic] {
    &TOPICS
}

/// Look up a built-in topic by ID.
pub fn find_topic(id: &str) -> Option<&'static Topic> {
    builtin_topics().iter().find(|topic| topic.id == id)
}
