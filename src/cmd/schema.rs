//! The `schema` subcommand.

use clap::{Args, ValueEnum};
use schemars::schema_for;

use crate::{
    async_utils::io::write_json_output,
    cmd::grade::GradeOutput,
    controller::SessionEvent,
    error::ErrorReport,
    grading::{Grade, Topic},
    prelude::*,
    record::GradingRecord,
};

/// The different schema types we support.
///
/// We parse these as PascalCase, because they represent type names.
#[derive(Debug, Clone, Copy, ValueEnum)]
#[clap(rename_all = "PascalCase")]
pub enum SchemaType {
    /// A saved grading record, as returned by the history API.
    GradingRecord,
    /// A grade.
    Grade,
    /// A built-in topic.
    Topic,
    /// Output of `grade --json`.
    GradeOutput,
    /// One event in a grading stream.
    SessionEvent,
    /// An error reported by the web API.
    ErrorReport,
}

/// Schema command line arguments.
#[derive(Debug, Args)]
pub struct SchemaOpts {
    /// The schema type to generate.
    #[clap(value_enum, value_name = "TYPE")]
    pub schema_type: SchemaType,

    /// The output path to write the schema to.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `schema` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_schema(schema_opts: &SchemaOpts) -> Result<()> {
    let schema = match schema_opts.schema_type {
        SchemaType::GradingRecord => schema_for!(GradingRecord),
        SchemaType::Grade => schema_for!(Grade),
        SchemaType::Topic => schema_for!(Topic),
        SchemaType::GradeOutput => schema_for!(GradeOutput),
        SchemaType::SessionEvent => schema_for!(SessionEvent),
        SchemaType::ErrorReport => schema_for!(ErrorReport),
    };
    write_json_output(schema_opts.output_path.as_deref(), &schema).await
}
