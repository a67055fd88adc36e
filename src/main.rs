use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod aws;
mod chart;
mod cmd;
mod config;
mod controller;
mod data_url;
mod drivers;
mod error;
mod grading;
mod history;
mod llm_client;
mod normalize;
mod ocr;
mod prelude;
mod record;
mod retry;
mod ui;
mod web;

/// Grade essay answers with an LLM.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - OPENAI_API_BASE (optional): Override the server URL.
  - OPENAI_API_KEY: The OpenAI key to use.
  - GRADER_MODEL (optional): The grading model.
  - OCR_MODEL (optional): The vision model for `--ocr-engine=llm`.
  - SUPABASE_URL, SUPABASE_KEY: Needed for `--store=supabase`.
  - GRADER_USER (optional): The user for `grade --save` and `history`.

  Standard AWS environment variables and credential files
  are used for `--ocr-engine=textract`.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Serve the grading web app.
    Serve(cmd::serve::ServeOpts),
    /// Grade one answer from the command line.
    Grade(Box<cmd::grade::GradeOpts>),
    /// List or delete saved grades.
    History(cmd::history::HistoryOpts),
    /// Print schemas for our JSON formats.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Serve(_) => false,
            Cmd::Grade(opts) => opts.output_path.is_none(),
            Cmd::History(opts) => opts.cmd.using_stdout_for_output(),
            Cmd::Schema(opts) => opts.output_path.is_none(),
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();
    init_tracing(&ui);
    real_main(ui).await
}

/// Log to stderr at `info` unless `RUST_LOG` says otherwise, without
/// scribbling over the spinner.
fn init_tracing(ui: &Ui) {
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);
    tracing_subscriber::registry().with(fmt_layer).init();
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Hide the spinner if we're using stdout for output.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    match &opts.subcmd {
        Cmd::Serve(opts) => cmd::serve::cmd_serve(opts).await,
        Cmd::Grade(opts) => cmd::grade::cmd_grade(ui, opts).await,
        Cmd::History(opts) => cmd::history::cmd_history(opts).await,
        Cmd::Schema(opts) => cmd::schema::cmd_schema(opts).await,
    }
}
