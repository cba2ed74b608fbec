//! Progress stream returned by the streaming execution mode.

use crate::core::{ProgressEvent, StageProgress};
use crate::models::ProcessingResult;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// A finite, non-restartable stream of [`ProgressEvent`]s for one run.
///
/// Yields one stage event per stage in execution order, then a terminal
/// [`ProgressEvent::Completed`]. Dropping the stream abandons the run.
pub struct ProgressStream {
    study_id: String,
    inner: BoxStream<'static, ProgressEvent>,
}

impl ProgressStream {
    pub(crate) fn new(study_id: impl Into<String>, inner: BoxStream<'static, ProgressEvent>) -> Self {
        Self {
            study_id: study_id.into(),
            inner,
        }
    }

    /// Study being processed.
    #[must_use]
    pub fn study_id(&self) -> &str {
        &self.study_id
    }

    /// Drains the stream and returns the terminal result.
    ///
    /// Returns `None` only if the stream was already drained.
    pub async fn into_result(mut self) -> Option<ProcessingResult> {
        while let Some(event) = self.inner.next().await {
            if let Some(result) = event.into_result() {
                return Some(result);
            }
        }
        None
    }

    /// Drains the stream, returning stage events and the terminal result.
    pub async fn collect_all(mut self) -> (Vec<StageProgress>, Option<ProcessingResult>) {
        let mut stages = Vec::new();
        while let Some(event) = self.inner.next().await {
            match event {
                ProgressEvent::Stage(progress) => stages.push(progress),
                ProgressEvent::Completed(result) => return (stages, Some(*result)),
            }
        }
        (stages, None)
    }
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl std::fmt::Debug for ProgressStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStream")
            .field("study_id", &self.study_id)
            .finish_non_exhaustive()
    }
}
