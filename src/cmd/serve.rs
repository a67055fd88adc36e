//! The `serve` subcommand.

use std::net::SocketAddr;

use clap::Args;

use crate::{config::AppConfig, controller::Controller, prelude::*, web};

/// Extra room for request bodies beyond the largest image we accept, so
/// oversized images get a helpful error instead of a bare 413.
const BODY_LIMIT_SLACK: usize = 1024 * 1024;

/// Serve command line arguments.
#[derive(Debug, Args)]
pub struct ServeOpts {
    /// The address to listen on.
    #[clap(long, env = "GRADER_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    #[clap(flatten)]
    pub config: AppConfig,
}

/// The `serve` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_serve(opts: &ServeOpts) -> Result<()> {
    let controller = Controller::from_config(&opts.config).await?;
    let body_limit = opts.config.ocr.normalize.max_image_bytes + BODY_LIMIT_SLACK;
    web::serve(opts.bind, web::router(controller, body_limit)).await
}
