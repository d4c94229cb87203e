//! Retry-tolerant document reader.
//!
//! A file may still be mid-write when the watcher sees it. The reader reads
//! and parses it from scratch on every attempt, sleeping a fixed delay
//! between attempts, and treats I/O and parse failures alike. After the
//! last attempt it reports the final underlying error. A document nested
//! beyond the parser's depth bound fails at once; rereading cannot fix it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ReadError, ReadFailure};
use crate::models::ParsedDocument;
use crate::traits::DocumentParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(500),
        }
    }
}

#[derive(Clone)]
pub struct Reader {
    parser: Arc<dyn DocumentParser>,
    policy: RetryPolicy,
}

impl Reader {
    pub fn new(parser: Arc<dyn DocumentParser>, policy: RetryPolicy) -> Self {
        Self { parser, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn read(&self, path: &Path) -> Result<ParsedDocument, ReadFailure> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.try_read(path).await {
                Ok(doc) => {
                    if attempt > 1 {
                        tracing::debug!(path = %path.display(), attempt, "read succeeded after retry");
                    }
                    return Ok(doc);
                }
                Err(err) if attempt < attempts && err.is_retriable() => {
                    tracing::debug!(
                        path = %path.display(),
                        attempt,
                        error = %err,
                        "document not ready; retrying"
                    );
                    tokio::time::sleep(self.policy.delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(ReadFailure {
                        path: path.to_path_buf(),
                        attempts: attempt,
                        last: err,
                    });
                }
            }
        }
    }

    async fn try_read(&self, path: &Path) -> Result<ParsedDocument, ReadError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(self.parser.parse(&bytes)?)
    }
}
