//! Where export bytes come from.

use std::future::Future;
use std::path::PathBuf;

use crate::error::CertifyError;
use crate::retry::retry_transient;

/// A place an external export can be read from.
pub trait ExportSource {
    /// Human-readable description for logs and errors.
    fn describe(&self) -> String;

    /// Read the export once.
    fn fetch(&self) -> impl Future<Output = Result<Vec<u8>, CertifyError>> + Send;
}

/// Bytes already uploaded by the caller.
#[derive(Debug, Clone)]
pub struct InlineSource {
    bytes: Vec<u8>,
}

impl InlineSource {
    /// Wrap uploaded bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl ExportSource for InlineSource {
    fn describe(&self) -> String {
        format!("inline upload ({} bytes)", self.bytes.len())
    }

    fn fetch(&self) -> impl Future<Output = Result<Vec<u8>, CertifyError>> + Send {
        let bytes = self.bytes.clone();
        async move { Ok(bytes) }
    }
}

/// A file on a local or mounted filesystem, such as a TMS drop folder.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Read from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ExportSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn fetch(&self) -> impl Future<Output = Result<Vec<u8>, CertifyError>> + Send {
        let path = self.path.clone();
        async move {
            tokio::fs::read(&path).await.map_err(|e| {
                use std::io::ErrorKind;
                let transient = matches!(
                    e.kind(),
                    ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock
                );
                CertifyError::Fetch {
                    source_name: path.display().to_string(),
                    message: e.to_string(),
                    transient,
                }
            })
        }
    }
}

/// Fetch `source`, retrying transient failures with backoff.
pub async fn fetch_export<S: ExportSource>(source: &S) -> Result<Vec<u8>, CertifyError> {
    let label = format!("export fetch from {}", source.describe());
    let bytes = retry_transient(&label, || source.fetch()).await?;
    tracing::info!(source = %source.describe(), bytes = bytes.len(), "export fetched");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inline_source_returns_its_bytes() {
        let bytes = fetch_export(&InlineSource::new(b"abc".to_vec())).await.unwrap();
        assert_eq!(bytes, b"abc");
    }

    #[tokio::test]
    async fn missing_file_fails_without_retrying() {
        let dir = std::env::temp_dir().join("cashlock-certify-missing-export");
        let source = FileSource::new(dir.join("nope.csv"));
        let started = std::time::Instant::now();
        let err = fetch_export(&source).await.unwrap_err();
        assert!(matches!(err, CertifyError::Fetch { transient: false, .. }));
        assert!(started.elapsed() < std::time::Duration::from_millis(200));
    }
}
