//! The `grade` subcommand.

use clap::{ArgGroup, Args};
use futures::StreamExt as _;
use schemars::JsonSchema;
use tokio::io::AsyncWriteExt as _;

use crate::{
    async_utils::io::{read_input_bytes, read_input_text, write_json_output, write_text_output},
    config::AppConfig,
    controller::{AnswerSource, Controller, SessionEvent, Submission},
    grading::{Grade, builtin_topics, find_topic},
    prelude::*,
    record::GradingRecord,
    ui::{ProgressConfig, Ui},
};

/// Grade command line arguments.
#[derive(Debug, Args)]
#[clap(group(ArgGroup::new("question_source").required(true).args(["question", "topic"])))]
#[clap(group(ArgGroup::new("answer_source").required(true).args(["answer", "answer_file", "image"])))]
pub struct GradeOpts {
    /// The essay question.
    #[clap(long)]
    pub question: Option<String>,

    /// Use a built-in question, by ID.
    #[clap(long, value_name = "ID")]
    pub topic: Option<String>,

    /// The answer text.
    #[clap(long)]
    pub answer: Option<String>,

    /// Read the answer from a text file, or `-` for standard input.
    #[clap(long, value_name = "PATH")]
    pub answer_file: Option<PathBuf>,

    /// OCR the answer from a photo or scan.
    #[clap(long, value_name = "PATH")]
    pub image: Option<PathBuf>,

    /// Save the grade to this user's history.
    #[clap(long)]
    pub save: bool,

    /// The user to save as.
    #[clap(long, env = "GRADER_USER")]
    pub user: Option<String>,

    /// Print the grade as JSON instead of streaming the grader's response.
    #[clap(long)]
    pub json: bool,

    /// Write output here instead of standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub config: AppConfig,
}

/// The JSON output of `grade --json`.
#[derive(Debug, JsonSchema, Serialize)]
pub struct GradeOutput {
    /// The grade.
    pub grade: Grade,
    /// The sum of all scores.
    pub total: u32,
    /// The highest possible total.
    pub max_total: u32,
    /// The text we graded, if it came from OCR.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    /// The saved record, with `--save`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<GradingRecord>,
}

/// The `grade` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_grade(ui: Ui, opts: &GradeOpts) -> Result<()> {
    let question = match (&opts.question, &opts.topic) {
        (Some(question), _) => question.clone(),
        (None, Some(id)) => find_topic(id)
            .ok_or_else(|| {
                let known = builtin_topics()
                    .iter()
                    .map(|topic| topic.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                anyhow!("unknown topic {id:?} (known topics: {known})")
            })?
            .question
            .clone(),
        (None, None) => return Err(anyhow!("need --question or --topic")),
    };
    let answer = if let Some(answer) = &opts.answer {
        AnswerSource::Text(answer.clone())
    } else if let Some(path) = &opts.answer_file {
        AnswerSource::Text(read_input_text(path).await?)
    } else if let Some(path) = &opts.image {
        AnswerSource::Image(read_input_bytes(path).await?)
    } else {
        return Err(anyhow!("need --answer, --answer-file or --image"));
    };

    let controller = Controller::from_config(&opts.config).await?;
    let mut events = controller.submit(Submission {
        user_id: opts.user.clone(),
        question,
        answer,
        save: opts.save,
    })?;

    // Stream the response live only when a person is probably watching.
    let stream_live = !opts.json && opts.output_path.is_none();
    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "📝",
        msg: "Grading",
        done_msg: "Graded",
    });
    let mut stdout = tokio::io::stdout();
    let mut response = String::new();
    let mut extracted_text = None;
    let mut graded = None;
    let mut record = None;
    while let Some(event) = events.next().await {
        match event? {
            SessionEvent::Extracted { text } => {
                info!(chars = text.len(), "Extracted answer from image");
                extracted_text = Some(text);
            }
            SessionEvent::Chunk { text } => {
                if stream_live {
                    stdout
                        .write_all(text.as_bytes())
                        .await
                        .context("Failed to write output")?;
                    stdout.flush().await.context("Failed to flush output")?;
                }
                response.push_str(&text);
            }
            SessionEvent::Graded {
                grade,
                total,
                max_total,
                ..
            } => graded = Some((grade, total, max_total)),
            SessionEvent::Saved { record: saved } => {
                info!(id = %saved.id, "Saved to history");
                record = Some(saved);
            }
        }
    }
    spinner.finish_and_clear();
    let (grade, total, max_total) =
        graded.ok_or_else(|| anyhow!("grading finished without a grade"))?;

    if opts.json {
        let output = GradeOutput {
            grade,
            total,
            max_total,
            extracted_text,
            record,
        };
        write_json_output(opts.output_path.as_deref(), &output).await
    } else if stream_live {
        write_text_output(None, &format!("\n{}", score_summary(&grade, total, max_total))).await
    } else {
        let text = format!(
            "{}\n\n{}",
            response.trim_end(),
            score_summary(&grade, total, max_total)
        );
        write_text_output(opts.output_path.as_deref(), &text).await
    }
}

/// A plain-text score table.
fn score_summary(grade: &Grade, total: u32, max_total: u32) -> String {
    let mut out = String::from("Scores:\n");
    for (dimension, score) in grade.scores.iter() {
        out.push_str(&format!(
            "  {:<22} {:>3}/{}\n",
            dimension.label(),
            score,
            grade.max_score
        ));
    }
    out.push_str(&format!("  {:<22} {:>3}/{}\n", "Total", total, max_total));
    out
}
