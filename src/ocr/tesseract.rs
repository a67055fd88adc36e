//! Tesseract OCR engine.

use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure,
    normalize::NormalizedImage,
    prelude::*,
    retry::{SimpleRetryResult, retry_result_ok, try_fatal},
};

use super::OcrEngine;

/// OCR engine wrapping the `tesseract` CLI tool.
///
/// Tesseract is local, so its failures are never transient.
#[derive(Debug)]
pub struct TesseractOcrEngine {
    /// Tesseract language codes, joined with `+`.
    lang: String,
}

impl TesseractOcrEngine {
    /// Create a new `tesseract` engine.
    pub fn new(lang: &str) -> Self {
        Self {
            lang: lang.to_owned(),
        }
    }

    /// Run tesseract on an image.
    async fn run(&self, image: &NormalizedImage) -> Result<String> {
        let extension = mime_guess::get_mime_extensions_str(image.mime_type)
            .and_then(|exts| exts.first())
            .ok_or_else(|| anyhow!("cannot determine extension for {}", image.mime_type))?;

        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join(format!("input.{extension}"));
        tokio::fs::write(&input_path, &image.data)
            .await
            .context("cannot write tesseract input file")?;

        // Run tesseract, sending the text to stdout.
        let output = Command::new("tesseract")
            .arg(&input_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.lang)
            .output()
            .await
            .context("cannot run tesseract (is it installed?)")?;
        check_for_command_failure("tesseract", &output, None)?;
        String::from_utf8(output.stdout).context("tesseract output is not UTF-8")
    }
}

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    #[instrument(level = "debug", skip_all, fields(lang = %self.lang))]
    async fn ocr_image(&self, image: &NormalizedImage) -> SimpleRetryResult<Option<String>> {
        let text = try_fatal!(self.run(image).await);
        retry_result_ok(Some(text))
    }
}
