//! I/O utilities for the command line.
//!
//! Inputs and outputs may be files or `-`/omitted for standard input and
//! output. Everything here is async, so it can share a runtime with network
//! calls.

use tokio::{
    fs::File,
    io::{AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _, BufWriter},
};

use crate::prelude::*;

/// Is this path a request to use standard input or output?
fn is_stdio(path: &Path) -> bool {
    path == Path::new("-")
}

/// Read an entire file as bytes. `-` reads standard input.
pub async fn read_input_bytes(path: &Path) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    if is_stdio(path) {
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("Failed to read standard input")?;
    } else {
        File::open(path)
            .await
            .with_context(|| format!("Failed to open file at path: {:?}", path))?
            .read_to_end(&mut buf)
            .await
            .with_context(|| format!("Failed to read file at path: {:?}", path))?;
    }
    Ok(buf)
}

/// Read an entire file as UTF-8 text. `-` reads standard input.
pub async fn read_input_text(path: &Path) -> Result<String> {
    let bytes = read_input_bytes(path).await?;
    String::from_utf8(bytes).with_context(|| format!("{:?} is not valid UTF-8", path))
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) if !is_stdio(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        _ => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write a value as pretty-printed JSON to either standard output or a file.
pub async fn write_json_output<T: Serialize>(path: Option<&Path>, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    write_text_output(path, &json).await
}

/// Write text, plus a trailing newline, to either standard output or a file.
pub async fn write_text_output(path: Option<&Path>, text: &str) -> Result<()> {
    let mut writer = BufWriter::new(create_writer(path).await?);
    writer
        .write_all(text.as_bytes())
        .await
        .context("Failed to write output")?;
    if !text.ends_with('\n') {
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline to output")?;
    }
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}
