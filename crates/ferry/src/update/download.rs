//! Artifact download with progress reporting.

use std::path::Path;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::UpdateError;

/// Tracks download progress as a monotone percentage.
///
/// Progress only ever moves forward: chunk sizes that round to an
/// already-reported percentage yield nothing, and a body that overruns
/// the advertised length clamps at 100. With no advertised length there
/// is nothing to compute and every call yields `None`.
#[derive(Debug)]
pub struct ProgressTracker {
    total: Option<u64>,
    received: u64,
    last_percent: Option<u8>,
}

impl ProgressTracker {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total,
            received: 0,
            last_percent: None,
        }
    }

    /// Records `bytes` more received bytes. Returns the percentage to
    /// report, or `None` when there is nothing new to say.
    pub fn advance(&mut self, bytes: u64) -> Option<u8> {
        self.received = self.received.saturating_add(bytes);
        let total = self.total?;
        if total == 0 {
            return None;
        }

        let percent = (self.received.min(total) * 100 / total) as u8;
        match self.last_percent {
            Some(last) if percent <= last => None,
            _ => {
                self.last_percent = Some(percent);
                Some(percent)
            }
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }
}

/// Downloads `url` into `dest`, reporting progress through `on_progress`.
///
/// Cancellation is polled between chunks; a chunk read that is already in
/// flight always runs to completion. Progress callbacks happen only when
/// the server advertises a Content-Length.
pub async fn fetch_artifact<F>(
    http: &reqwest::Client,
    url: &str,
    dest: &Path,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<u64, UpdateError>
where
    F: FnMut(u8),
{
    info!(url, dest = %dest.display(), "downloading update artifact");

    let mut response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(UpdateError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let mut tracker = ProgressTracker::new(response.content_length());
    let mut file = tokio::fs::File::create(dest).await?;

    while let Some(chunk) = response.chunk().await? {
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        file.write_all(&chunk).await?;
        if let Some(percent) = tracker.advance(chunk.len() as u64) {
            debug!(percent, "download progress");
            on_progress(percent);
        }
    }
    // The staged bytes must be durable before they replace a binary.
    file.sync_all().await?;

    if let Some(expected) = tracker.total() {
        if tracker.received() < expected {
            return Err(UpdateError::Incomplete {
                received: tracker.received(),
                expected,
            });
        }
    }

    info!(bytes = tracker.received(), "download complete");
    Ok(tracker.received())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_with_known_total() {
        let mut tracker = ProgressTracker::new(Some(100));

        assert_eq!(tracker.advance(30), Some(30));
        assert_eq!(tracker.advance(30), Some(60));
        assert_eq!(tracker.advance(40), Some(100));
        assert_eq!(tracker.received(), 100);
    }

    #[test]
    fn test_progress_is_monotone() {
        let mut tracker = ProgressTracker::new(Some(1000));

        assert_eq!(tracker.advance(10), Some(1));
        // Same rounded percentage: nothing new to report.
        assert_eq!(tracker.advance(1), None);
        assert_eq!(tracker.advance(1), None);
        assert_eq!(tracker.advance(100), Some(11));
    }

    #[test]
    fn test_progress_without_total_reports_nothing() {
        let mut tracker = ProgressTracker::new(None);

        assert_eq!(tracker.advance(1024), None);
        assert_eq!(tracker.advance(u64::MAX), None);
        assert_eq!(tracker.total(), None);
    }

    #[test]
    fn test_progress_overrun_clamps_at_hundred() {
        let mut tracker = ProgressTracker::new(Some(10));

        assert_eq!(tracker.advance(10), Some(100));
        assert_eq!(tracker.advance(5), None);
        assert_eq!(tracker.received(), 15);
    }

    #[test]
    fn test_progress_zero_total_reports_nothing() {
        let mut tracker = ProgressTracker::new(Some(0));
        assert_eq!(tracker.advance(1), None);
    }

    #[test]
    fn test_progress_zero_percent_is_reported_once() {
        let mut tracker = ProgressTracker::new(Some(10_000));

        assert_eq!(tracker.advance(1), Some(0));
        assert_eq!(tracker.advance(1), None);
    }
}
