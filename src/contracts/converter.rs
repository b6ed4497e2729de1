use std::future::Future;

use bytes::Bytes;

use crate::contracts::error::ConversionError;

/// A filled document waiting to be converted.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// File name including extension, as sent to the conversion service
    pub filename: String,
    pub content_type: String,
    pub body: Bytes,
}

/// Converts filled documents to PDF through an external service.
///
/// Implementations may be slow (polling a remote job); callers run them
/// off the request path.
pub trait DocumentConverter: Send + Sync {
    /// Converts the document and returns the PDF bytes.
    fn convert(
        &self,
        source: SourceDocument,
    ) -> impl Future<Output = Result<Bytes, ConversionError>> + Send;

    /// Short converter identifier for logs.
    fn name(&self) -> &'static str;

    /// Returns false when conversion is switched off.
    fn is_enabled(&self) -> bool {
        true
    }
}
