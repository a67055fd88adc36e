//! Extracting text from photos of answers.
//!
//! A [`TextExtractor`] normalizes the image, then hands it to an
//! [`OcrEngine`]. Engines are remote services (a vision LLM or AWS Textract)
//! or the local `tesseract` CLI.

use std::{fmt, sync::Arc};

use clap::{Args, ValueEnum};

use crate::{
    drivers::{Driver, LlmOpts},
    error::{GradeError, GradeResult, Service},
    normalize::{NormalizeOpts, NormalizedImage, normalize_image_async},
    prelude::*,
    retry::{SimpleRetryResult, with_backoff},
};

pub mod llm;
pub mod tesseract;
pub mod textract;

/// Interface to an OCR engine.
#[async_trait]
pub trait OcrEngine: fmt::Debug + Send + Sync + 'static {
    /// OCR a single image.
    ///
    /// Returns `None` if the engine is sure the image contains no text. An
    /// empty string means the same thing.
    async fn ocr_image(&self, image: &NormalizedImage) -> SimpleRetryResult<Option<String>>;
}

/// Our OCR engines.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum OcrEngineType {
    /// Ask a vision-capable LLM to transcribe the image.
    #[default]
    Llm,
    /// AWS Textract.
    Textract,
    /// The local `tesseract` command.
    Tesseract,
}

/// OCR options.
#[derive(Args, Clone, Debug)]
pub struct OcrOpts {
    /// Which OCR engine to use.
    #[clap(long = "ocr-engine", value_enum, default_value_t = OcrEngineType::default())]
    pub engine: OcrEngineType,

    /// The vision model for `--ocr-engine=llm`. Defaults to `--model`.
    #[clap(long, env = "OCR_MODEL")]
    pub ocr_model: Option<String>,

    /// The AWS region for `--ocr-engine=textract`. Defaults to the standard
    /// AWS configuration.
    #[clap(long)]
    pub aws_region: Option<String>,

    /// Language codes for `--ocr-engine=tesseract`, such as `eng` or
    /// `chi_tra+eng`.
    #[clap(long, default_value = "eng")]
    pub tesseract_lang: String,

    #[clap(flatten)]
    pub normalize: NormalizeOpts,
}

impl Default for OcrOpts {
    fn default() -> Self {
        Self {
            engine: OcrEngineType::default(),
            ocr_model: None,
            aws_region: None,
            tesseract_lang: "eng".to_owned(),
            normalize: NormalizeOpts::default(),
        }
    }
}

impl OcrEngineType {
    /// Create an OCR engine. The LLM engine shares the grading driver.
    pub async fn create_engine(
        &self,
        ocr_opts: &OcrOpts,
        driver: Arc<dyn Driver>,
        llm_opts: &LlmOpts,
    ) -> Result<Arc<dyn OcrEngine>> {
        match self {
            OcrEngineType::Llm => {
                let model = ocr_opts
                    .ocr_model
                    .clone()
                    .unwrap_or_else(|| llm_opts.model.clone());
                Ok(Arc::new(llm::LlmOcrEngine::new(
                    driver,
                    model,
                    llm_opts.clone(),
                )))
            }
            OcrEngineType::Textract => Ok(Arc::new(
                textract::TextractOcrEngine::new(ocr_opts.aws_region.as_deref()).await?,
            )),
            OcrEngineType::Tesseract => Ok(Arc::new(tesseract::TesseractOcrEngine::new(
                &ocr_opts.tesseract_lang,
            ))),
        }
    }
}

/// Turns uploaded image bytes into text.
#[derive(Clone, Debug)]
pub struct TextExtractor {
    engine: Arc<dyn OcrEngine>,
    normalize_opts: NormalizeOpts,
}

impl TextExtractor {
    /// Create a new text extractor.
    pub fn new(engine: Arc<dyn OcrEngine>, normalize_opts: NormalizeOpts) -> Self {
        Self {
            engine,
            normalize_opts,
        }
    }

    /// Extract text from an uploaded image.
    ///
    /// Bad images fail with a validation error before we call the engine.
    /// An image without text is [`GradeError::NoTextDetected`], which is not
    /// the same as the engine failing.
    #[instrument(level = "debug", skip_all, fields(bytes = image.len()))]
    pub async fn extract(&self, image: Vec<u8>) -> GradeResult<String> {
        let image = normalize_image_async(image, self.normalize_opts.clone()).await?;
        let text = with_backoff("OCR request", || self.engine.ocr_image(&image))
            .await
            .map_err(|err| GradeError::upstream(Service::Ocr, format!("{err:#}")))?;

        match text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                debug!(chars = text.len(), "Extracted text");
                Ok(text.to_owned())
            }
            _ => Err(GradeError::NoTextDetected),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        error::ErrorKind,
        normalize::tests::png_bytes,
        retry::{retry_result_fatal, retry_result_ok},
    };

    /// An OCR engine with a fixed answer.
    #[derive(Debug)]
    pub(crate) struct FixedOcrEngine {
        pub(crate) text: Option<String>,
        pub(crate) calls: AtomicUsize,
    }

    impl FixedOcrEngine {
        pub(crate) fn new(text: Option<&str>) -> Self {
            Self {
                text: text.map(ToOwned::to_owned),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OcrEngine for FixedOcrEngine {
        async fn ocr_image(
            &self,
            _image: &NormalizedImage,
        ) -> SimpleRetryResult<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            retry_result_ok(self.text.clone())
        }
    }

    #[derive(Debug)]
    struct BrokenOcrEngine;

    #[async_trait]
    impl OcrEngine for BrokenOcrEngine {
        async fn ocr_image(
            &self,
            _image: &NormalizedImage,
        ) -> SimpleRetryResult<Option<String>> {
            retry_result_fatal(anyhow!("access denied"))
        }
    }

    fn extractor(engine: Arc<dyn OcrEngine>) -> TextExtractor {
        TextExtractor::new(engine, NormalizeOpts::default())
    }

    #[tokio::test]
    async fn returns_trimmed_text() {
        let engine = Arc::new(FixedOcrEngine::new(Some("  The policy addresses X.\n")));
        let text = extractor(engine.clone())
            .extract(png_bytes(32, 32))
            .await
            .unwrap();
        assert_eq!(text, "The policy addresses X.");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_output_is_no_text_detected() {
        for text in [None, Some(""), Some(" \n\t")] {
            let engine = Arc::new(FixedOcrEngine::new(text));
            let err = extractor(engine).extract(png_bytes(32, 32)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NoTextDetected);
        }
    }

    #[tokio::test]
    async fn engine_failure_is_upstream() {
        let err = extractor(Arc::new(BrokenOcrEngine))
            .extract(png_bytes(32, 32))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert!(err.user_message().contains("text recognition"));
    }

    #[tokio::test]
    async fn bad_images_never_reach_the_engine() {
        let engine = Arc::new(FixedOcrEngine::new(Some("text")));
        let err = extractor(engine.clone())
            .extract(b"not an image".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }
}
