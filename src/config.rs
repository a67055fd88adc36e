//! Application configuration, built once at startup.

use clap::Args;

use crate::{
    controller::Controller,
    drivers::LlmOpts,
    grading::{DEFAULT_MAX_SCORE, GradingClient, GradingPrompt},
    history::StoreOpts,
    ocr::{OcrOpts, TextExtractor},
    prelude::*,
};

/// Everything needed to build a [`Controller`].
#[derive(Args, Clone, Debug)]
pub struct AppConfig {
    #[clap(flatten)]
    pub llm: LlmOpts,

    #[clap(flatten)]
    pub ocr: OcrOpts,

    #[clap(flatten)]
    pub store: StoreOpts,

    /// A Handlebars template to use instead of the built-in grading prompt.
    #[clap(long)]
    pub prompt: Option<PathBuf>,

    /// The maximum score for each dimension.
    #[clap(long, default_value_t = DEFAULT_MAX_SCORE, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub max_score: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmOpts::default(),
            ocr: OcrOpts::default(),
            store: StoreOpts::default(),
            prompt: None,
            max_score: DEFAULT_MAX_SCORE,
        }
    }
}

impl Controller {
    /// Build a controller, connecting to the configured services.
    #[instrument(level = "debug", skip_all)]
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let prompt = match &config.prompt {
            Some(path) => GradingPrompt::from_path(path).await?,
            None => GradingPrompt::default(),
        };

        let driver = config.llm.driver.create_driver(&config.llm).await?;
        let engine = config
            .ocr
            .engine
            .create_engine(&config.ocr, driver.clone(), &config.llm)
            .await
            .context("could not set up OCR")?;
        let store = config
            .store
            .create_store()
            .context("could not set up history store")?;
        debug!(
            driver = ?config.llm.driver,
            ocr = ?config.ocr.engine,
            store = ?config.store.store,
            "Configured services"
        );

        let extractor = TextExtractor::new(engine, config.ocr.normalize.clone());
        let grader = GradingClient::new(driver, prompt, config.llm.clone(), config.max_score);
        Ok(Controller::new(extractor, grader, store))
    }
}
