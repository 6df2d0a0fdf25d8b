//! Chunked attachment upload.

use tracing::{debug, info, warn};

use super::{MailApi, UploadSession};

/// Graph requires chunks in multiples of 320 KiB.
pub const CHUNK_SIZE: usize = 320 * 1024;

/// One byte range of an upload. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub start: usize,
    pub end: usize,
    pub total: usize,
}

impl ChunkRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// `Content-Range` header value (inclusive end).
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end - 1, self.total)
    }
}

/// Split `total` bytes into `ceil(total / CHUNK_SIZE)` consecutive ranges.
pub fn plan(total: usize) -> Vec<ChunkRange> {
    (0..total.div_ceil(CHUNK_SIZE))
        .map(|i| {
            let start = i * CHUNK_SIZE;
            ChunkRange {
                start,
                end: (start + CHUNK_SIZE).min(total),
                total,
            }
        })
        .collect()
}

/// Outcome of one attachment upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub chunks: usize,
    pub failed: usize,
}

/// PUT `data` to the session one chunk at a time.
///
/// A failed chunk is logged and the remaining chunks are still sent.
pub async fn upload_attachment(
    api: &dyn MailApi,
    session: &UploadSession,
    name: &str,
    data: &[u8],
) -> UploadReport {
    let ranges = plan(data.len());
    let mut report = UploadReport {
        chunks: ranges.len(),
        failed: 0,
    };
    debug!(attachment = name, size = data.len(), chunks = ranges.len(), "Starting upload");

    for (idx, range) in ranges.into_iter().enumerate() {
        let chunk = data[range.start..range.end].to_vec();
        match api.upload_chunk(session, range, chunk).await {
            Ok(()) => debug!(
                attachment = name,
                chunk = idx + 1,
                of = report.chunks,
                range = %range.content_range(),
                "Chunk uploaded"
            ),
            Err(e) => {
                report.failed += 1;
                warn!(
                    attachment = name,
                    chunk = idx + 1,
                    of = report.chunks,
                    error = %e,
                    "Chunk upload failed"
                );
            }
        }
    }

    if report.failed == 0 {
        info!(attachment = name, chunks = report.chunks, "Attachment uploaded");
    }
    report
}
