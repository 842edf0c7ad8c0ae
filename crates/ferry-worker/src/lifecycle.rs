//! Background execution of accepted work, with progress and outcome reporting.
//!
//! # Design
//! - The work body runs on its own task and yields `Ok(reason)` or `Err(reason)`;
//!   the runner turns that into exactly one terminal report.
//! - Progress flows through a `watch` channel so slow subscribers only see the
//!   latest value.
//! - A cancelled work item reports nothing further; the runner only records the
//!   cancellation in events and metrics.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use ferry_core::{Expectation, Reason, WorkInProgress};
use ferry_events::{Event, EventBus};
use ferry_telemetry::Metrics;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What a work body hands back: the completion summary or the failure.
pub(crate) type WorkResult = Result<Reason, Reason>;

/// Progress and cancellation as seen from inside a work body.
#[derive(Clone)]
pub(crate) struct WorkControl {
    progress: Arc<watch::Sender<f64>>,
    cancel: CancellationToken,
}

impl WorkControl {
    pub(crate) fn report_progress(&self, fraction: f64) {
        self.progress.send_replace(fraction);
    }

    pub(crate) const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Start `body` in the background and return its handle.
pub(crate) fn launch<F, Fut>(
    expectation: &Expectation,
    events: &EventBus,
    metrics: Option<&Metrics>,
    body: F,
) -> WorkInProgress
where
    F: FnOnce(WorkControl) -> Fut + Send + 'static,
    Fut: Future<Output = WorkResult> + Send + 'static,
{
    let (work, reporter) = WorkInProgress::new(expectation.id.clone());
    let work_id = work.id();
    let expectation_id = expectation.id.clone();
    let expectation_type = expectation.type_name();
    if let Some(metrics) = metrics {
        metrics.inc_work_started(expectation_type);
    }
    events.publish(Event::WorkStarted {
        work_id,
        expectation_id: expectation_id.clone(),
        expectation_type: expectation_type.to_string(),
    });
    info!(%work_id, expectation_id = %expectation_id, expectation_type, "work started");

    let events = events.clone();
    let metrics = metrics.cloned();
    tokio::spawn(async move {
        let (progress, mut updates) = watch::channel(0.0_f64);
        let control = WorkControl {
            progress: Arc::new(progress),
            cancel: reporter.cancellation_token(),
        };
        let body = body(control);
        tokio::pin!(body);

        let result = loop {
            tokio::select! {
                result = &mut body => break result,
                Ok(()) = updates.changed() => {
                    let fraction = *updates.borrow_and_update();
                    reporter.report_progress(fraction);
                    if !reporter.is_cancelled() {
                        events.publish(Event::WorkProgress {
                            work_id,
                            expectation_id: expectation_id.clone(),
                            progress: fraction,
                        });
                    }
                }
            }
        };

        if reporter.is_cancelled() {
            info!(%work_id, expectation_id = %expectation_id, "work cancelled");
            if let Some(metrics) = &metrics {
                metrics.inc_work_cancelled();
            }
            events.publish(Event::WorkCancelled {
                work_id,
                expectation_id,
            });
            return;
        }

        match result {
            Ok(reason) => {
                let duration_ms = u64::try_from(reporter.elapsed().as_millis()).unwrap_or(u64::MAX);
                let summary = reason.user.clone();
                if reporter.report_complete(reason) {
                    info!(%work_id, expectation_id = %expectation_id, duration_ms, "work completed");
                    if let Some(metrics) = &metrics {
                        metrics.inc_work_completed();
                    }
                    events.publish(Event::WorkCompleted {
                        work_id,
                        expectation_id,
                        reason: summary,
                        duration_ms,
                    });
                }
            }
            Err(reason) => {
                warn!(
                    %work_id,
                    expectation_id = %expectation_id,
                    reason = %reason.tech,
                    "work failed"
                );
                let summary = reason.user.clone();
                if reporter.report_error(reason) {
                    if let Some(metrics) = &metrics {
                        metrics.inc_work_failed();
                    }
                    events.publish(Event::WorkFailed {
                        work_id,
                        expectation_id,
                        reason: summary,
                    });
                }
            }
        }
    });
    work
}

/// Seconds with one decimal, as used in completion summaries.
pub(crate) fn seconds(elapsed: std::time::Duration) -> String {
    format!("{:.1}s", elapsed.as_secs_f64())
}

/// Reader that reports the fraction of `total` bytes read so far.
pub(crate) struct ProgressReader<R> {
    inner: R,
    read: u64,
    total: Option<u64>,
    control: WorkControl,
}

impl<R> ProgressReader<R> {
    pub(crate) const fn new(inner: R, total: Option<u64>, control: WorkControl) -> Self {
        Self {
            inner,
            read: 0,
            total,
            control,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let polled = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &polled {
            let added = (buf.filled().len() - before) as u64;
            if added > 0 {
                self.read += added;
                if let Some(total) = self.total.filter(|total| *total > 0) {
                    #[allow(clippy::cast_precision_loss)]
                    let fraction = self.read as f64 / total as f64;
                    self.control.report_progress(fraction.min(1.0));
                }
            }
        }
        polled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{
        ExpectationSpec, FileContent, FileTargetRequirement, FileVersion, MediaFileCopy,
        SourceRequirement, StatusReport, WorkOptions, WorkOutcome,
    };
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn expectation() -> Expectation {
        Expectation {
            id: "copy-1".into(),
            status_report: StatusReport::default(),
            depends_on_fullfilled_ids: Vec::new(),
            trigger_by_fullfilled_ids: Vec::new(),
            work_options: WorkOptions::default(),
            spec: ExpectationSpec::MediaFileCopy(MediaFileCopy {
                start_requirement: SourceRequirement::default(),
                end_requirement: FileTargetRequirement {
                    targets: Vec::new(),
                    content: FileContent::new("report.mov"),
                    version: FileVersion::default(),
                },
            }),
        }
    }

    #[tokio::test]
    async fn completion_is_published_and_counted() -> anyhow::Result<()> {
        let events = EventBus::new();
        let mut stream = events.subscribe(None);
        let metrics = Metrics::new()?;
        let work = launch(&expectation(), &events, Some(&metrics), |_| async {
            Ok(Reason::plain("Copy completed"))
        });

        assert!(matches!(work.outcome().await, WorkOutcome::Completed { .. }));
        let mut kinds = Vec::new();
        while kinds.len() < 2 {
            let envelope = tokio::time::timeout(Duration::from_secs(1), stream.next()).await?;
            kinds.extend(envelope.map(|envelope| envelope.event.kind()));
        }
        assert_eq!(kinds, vec!["work_started", "work_completed"]);
        assert_eq!(metrics.snapshot().work_completed_total, 1);
        Ok(())
    }

    #[tokio::test]
    async fn failure_is_reported_once() {
        let work = launch(&expectation(), &EventBus::new(), None, |_| async {
            Err(Reason::new("Not able to read file", "EIO"))
        });
        assert!(matches!(
            work.outcome().await,
            WorkOutcome::Failed { reason } if reason.tech == "EIO"
        ));
    }

    #[tokio::test]
    async fn cancelled_work_reports_nothing_else() -> anyhow::Result<()> {
        let metrics = Metrics::new()?;
        let work = launch(&expectation(), &EventBus::new(), Some(&metrics), |control| async move {
            control.cancellation().cancelled().await;
            Err(Reason::plain("stopped"))
        });
        assert!(work.cancel());
        assert!(matches!(work.outcome().await, WorkOutcome::Cancelled));
        tokio::time::timeout(Duration::from_secs(1), async {
            while metrics.snapshot().work_cancelled_total == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await?;
        assert_eq!(metrics.snapshot().work_failed_total, 0);
        Ok(())
    }

    #[tokio::test]
    async fn progress_reader_reports_fraction_read() -> anyhow::Result<()> {
        let (progress, updates) = watch::channel(0.0_f64);
        let control = WorkControl {
            progress: Arc::new(progress),
            cancel: CancellationToken::new(),
        };
        let mut reader = ProgressReader::new(&[1_u8; 64][..], Some(128), control);
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).await?;
        assert_eq!(sink.len(), 64);
        assert!((*updates.borrow() - 0.5).abs() < f64::EPSILON);
        Ok(())
    }
}
