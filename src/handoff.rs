//! Collaborator contracts and the stock implementations shipped with the CLI.
//!
//! The core is stateless between jobs: everything durable lives behind these
//! three seams. Each is an object-safe async trait so the job runner can wire
//! in whatever backend it runs against (HTTP APIs and S3-like stores in
//! production, in-memory fakes in tests, the local filesystem for the CLI).
//!
//! Hand-off calls get exactly one bounded attempt from the core; retry and
//! redelivery policy belong to the caller (§ idempotency contract in
//! [`crate::process`]).

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::InvoiceRecord;

/// A single hand-off attempt failed.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HandoffFailure(pub String);

/// The original PDF resolved from an attachment id.
#[derive(Debug, Clone)]
pub struct FetchedAttachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Job source: resolves the idempotency key to the original PDF bytes.
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    async fn fetch(&self, attachment_id: i64) -> Result<FetchedAttachment, HandoffFailure>;
}

/// Object storage: accepts a named byte blob, overwrite semantics.
///
/// Implementations must overwrite (or no-op) on repeated keys; deterministic
/// names plus overwriting writes are what make redelivered jobs idempotent.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str)
        -> Result<(), HandoffFailure>;
}

/// Record-creation API: accepts one structured record plus the storage keys
/// of its artifact pair.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn create(
        &self,
        record: &InvoiceRecord,
        pdf_key: &str,
        json_key: &str,
    ) -> Result<(), HandoffFailure>;
}

// ── HTTP attachment fetcher ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AttachmentEnvelope {
    #[serde(default)]
    success: bool,
    data: Option<AttachmentMeta>,
}

#[derive(Debug, Deserialize)]
struct AttachmentMeta {
    #[serde(rename = "fileUrl")]
    file_url: String,
    #[serde(default)]
    filename: Option<String>,
}

/// Fetches attachment metadata from the processor API, then downloads the
/// referenced PDF.
///
/// Endpoint: `GET {base}/api/v1/processor/attachments/{id}` returning
/// `{ "success": true, "data": { "fileUrl": …, "filename": … } }`.
pub struct HttpAttachmentFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAttachmentFetcher {
    pub fn new(base_url: impl Into<String>) -> Result<Self, HandoffFailure> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| HandoffFailure(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AttachmentFetcher for HttpAttachmentFetcher {
    async fn fetch(&self, attachment_id: i64) -> Result<FetchedAttachment, HandoffFailure> {
        let url = format!(
            "{}/api/v1/processor/attachments/{attachment_id}",
            self.base_url
        );
        debug!(%url, "fetching attachment metadata");

        let envelope: AttachmentEnvelope = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| HandoffFailure(format!("metadata request failed: {e}")))?
            .json()
            .await
            .map_err(|e| HandoffFailure(format!("metadata response malformed: {e}")))?;

        if !envelope.success {
            return Err(HandoffFailure("API returned success=false".into()));
        }
        let meta = envelope
            .data
            .ok_or_else(|| HandoffFailure("metadata missing data payload".into()))?;

        let response = self
            .client
            .get(&meta.file_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| HandoffFailure(format!("document download failed: {e}")))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| HandoffFailure(format!("document download failed: {e}")))?
            .to_vec();

        info!(attachment_id, bytes = bytes.len(), "downloaded source PDF");

        Ok(FetchedAttachment {
            filename: meta
                .filename
                .unwrap_or_else(|| format!("attachment_{attachment_id}.pdf")),
            bytes,
        })
    }
}

// ── HTTP record sink ──────────────────────────────────────────────────────

/// Creates invoice records via `POST {base}/api/v1/processor/invoices`.
///
/// The payload is the flattened record plus the artifact keys, matching what
/// the downstream payables system ingests.
pub struct HttpRecordSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRecordSink {
    pub fn new(base_url: impl Into<String>) -> Result<Self, HandoffFailure> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| HandoffFailure(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RecordSink for HttpRecordSink {
    async fn create(
        &self,
        record: &InvoiceRecord,
        pdf_key: &str,
        json_key: &str,
    ) -> Result<(), HandoffFailure> {
        let mut payload = serde_json::to_value(record)
            .map_err(|e| HandoffFailure(format!("record serialisation failed: {e}")))?;
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("pdf_key".into(), pdf_key.into());
            obj.insert("json_key".into(), json_key.into());
        }

        let url = format!("{}/api/v1/processor/invoices", self.base_url);
        self.client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| HandoffFailure(format!("record creation failed: {e}")))?;

        debug!(
            attachment_id = record.attachment_id,
            pdf_key, "created invoice record"
        );
        Ok(())
    }
}

// ── Local filesystem store ────────────────────────────────────────────────

/// [`ObjectStore`] over a local directory; keys become relative paths.
///
/// Used by the CLI and by local debugging runs. Writes are plain overwrites,
/// which satisfies the idempotency contract by construction.
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for LocalDirStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<(), HandoffFailure> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HandoffFailure(format!("mkdir {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| HandoffFailure(format!("write {}: {e}", path.display())))?;
        debug!(path = %path.display(), bytes = bytes.len(), "stored artifact");
        Ok(())
    }
}

// ── Null record sink ──────────────────────────────────────────────────────

/// A [`RecordSink`] that logs and succeeds. For local runs where no
/// record-creation API exists; the JSON artifact in the store remains the
/// durable copy.
pub struct NullRecordSink;

#[async_trait]
impl RecordSink for NullRecordSink {
    async fn create(
        &self,
        record: &InvoiceRecord,
        pdf_key: &str,
        _json_key: &str,
    ) -> Result<(), HandoffFailure> {
        warn!(
            attachment_id = record.attachment_id,
            pdf_key, "no record sink configured; record not forwarded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExtractedInvoice, ExtractionStatus};

    #[tokio::test]
    async fn local_store_writes_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(dir.path());

        store.put("7/a_invoice_1.pdf", b"first", "application/pdf").await.unwrap();
        store.put("7/a_invoice_1.pdf", b"second", "application/pdf").await.unwrap();

        let written = std::fs::read(dir.path().join("7/a_invoice_1.pdf")).unwrap();
        assert_eq!(written, b"second");
    }

    #[tokio::test]
    async fn null_sink_accepts_records() {
        let record = InvoiceRecord {
            attachment_id: 1,
            status: ExtractionStatus::Extracted,
            pages: vec![1],
            invoice: ExtractedInvoice::default(),
            error: None,
        };
        NullRecordSink.create(&record, "a.pdf", "a.json").await.unwrap();
    }
}
