//! OCR using AWS Textract.

use aws_sdk_textract::{
    error::SdkError,
    operation::detect_document_text::{DetectDocumentTextError, DetectDocumentTextOutput},
    primitives::Blob,
    types::{BlockType, Document},
};

use crate::{
    aws::load_aws_config,
    normalize::NormalizedImage,
    prelude::*,
    retry::{IsKnownTransient, SimpleRetryResult, retry_result_ok, try_potentially_transient},
};

use super::OcrEngine;

/// OCR engine wrapping the AWS Textract `DetectDocumentText` API.
///
/// Textract only accepts JPEG and PNG, which is all the normalizer produces.
#[derive(Debug)]
pub struct TextractOcrEngine {
    /// AWS Textract client.
    client: aws_sdk_textract::Client,
}

impl TextractOcrEngine {
    /// Create a new `textract` engine.
    pub async fn new(region: Option<&str>) -> Result<Self> {
        let config = load_aws_config(region).await?;
        let client = aws_sdk_textract::Client::new(&config);
        Ok(Self { client })
    }
}

#[async_trait]
impl OcrEngine for TextractOcrEngine {
    #[instrument(level = "debug", skip_all, fields(width = image.width, height = image.height))]
    async fn ocr_image(&self, image: &NormalizedImage) -> SimpleRetryResult<Option<String>> {
        let document = Document::builder()
            .bytes(Blob::new(image.data.clone()))
            .build();
        let output = try_potentially_transient!(
            self.client
                .detect_document_text()
                .document(document)
                .send()
                .await
        );
        trace!("Document response: {output:#?}");
        let text = lines_from_output(&output);
        retry_result_ok((!text.is_empty()).then_some(text))
    }
}

/// Join the `LINE` blocks, which Textract returns in reading order.
fn lines_from_output(output: &DetectDocumentTextOutput) -> String {
    output
        .blocks()
        .iter()
        .filter(|block| block.block_type() == Some(&BlockType::Line))
        .filter_map(|block| block.text())
        .collect::<Vec<_>>()
        .join("\n")
}

impl<R> IsKnownTransient for SdkError<DetectDocumentTextError, R> {
    fn is_known_transient(&self) -> bool {
        match self {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => true,
            SdkError::ServiceError(err) => matches!(
                err.err(),
                DetectDocumentTextError::ThrottlingException(_)
                    | DetectDocumentTextError::ProvisionedThroughputExceededException(_)
                    | DetectDocumentTextError::InternalServerError(_)
            ),
            _ => false,
        }
    }
}
