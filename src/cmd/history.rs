//! The `history` subcommand.

use clap::{Args, Subcommand};
use uuid::Uuid;

use crate::{
    async_utils::io::write_json_output,
    history::{DEFAULT_HISTORY_LIMIT, StoreOpts, StoreType, clamp_history_limit},
    prelude::*,
};

/// History command line arguments.
#[derive(Debug, Args)]
pub struct HistoryOpts {
    #[clap(subcommand)]
    pub cmd: HistoryCmd,
}

/// What to do with the history.
#[derive(Debug, Subcommand)]
pub enum HistoryCmd {
    /// List saved grades as JSON, newest first.
    List(ListOpts),
    /// Delete a saved grade.
    Delete(DeleteOpts),
}

impl HistoryCmd {
    /// Are we using stdout for output?
    pub fn using_stdout_for_output(&self) -> bool {
        match self {
            HistoryCmd::List(opts) => opts.output_path.is_none(),
            HistoryCmd::Delete(_) => false,
        }
    }
}

/// Arguments for `history list`.
#[derive(Debug, Args)]
pub struct ListOpts {
    /// Whose history to list.
    #[clap(long, env = "GRADER_USER")]
    pub user: String,

    /// How many records to list, at most 100.
    #[clap(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
    pub limit: usize,

    /// Write the records here instead of standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub store: StoreOpts,
}

/// Arguments for `history delete`.
#[derive(Debug, Args)]
pub struct DeleteOpts {
    /// Whose history to delete from.
    #[clap(long, env = "GRADER_USER")]
    pub user: String,

    /// The ID of the record to delete.
    #[clap(value_name = "ID")]
    pub id: Uuid,

    #[clap(flatten)]
    pub store: StoreOpts,
}

/// The `history` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_history(opts: &HistoryOpts) -> Result<()> {
    match &opts.cmd {
        HistoryCmd::List(opts) => {
            warn_if_ephemeral(&opts.store);
            let store = opts.store.create_store()?;
            let records = store.list(&opts.user, clamp_history_limit(opts.limit)).await?;
            info!(count = records.len(), "Listed history");
            write_json_output(opts.output_path.as_deref(), &records).await
        }
        HistoryCmd::Delete(opts) => {
            warn_if_ephemeral(&opts.store);
            let store = opts.store.create_store()?;
            store.delete(&opts.user, opts.id).await?;
            info!(id = %opts.id, "Deleted grading record");
            Ok(())
        }
    }
}

/// A fresh memory store is always empty, which is rarely what anyone wants
/// from the command line.
fn warn_if_ephemeral(store: &StoreOpts) {
    if store.store == StoreType::Memory {
        warn!("Using the in-memory store, which starts empty; try --store=supabase");
    }
}
