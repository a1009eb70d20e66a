//! Upload running on its own task, with a handle to cancel and wait for it.

use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactGroup;
use crate::target::RemoteTarget;
use crate::upload::{self, Outcome, Settings, Summary};

/// Final state of a job, set once when its task ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Finished(Summary),
    Interrupted,
    Failed(String),
}

#[derive(Debug)]
pub struct JobHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<JobStatus>,
}

impl JobHandle {
    /// Requests cancellation; observed at the next pass boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that cancels this job, for watchers running on other tasks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> JobStatus {
        match self.task.await {
            Ok(status) => status,
            Err(error) => JobStatus::Failed(format!("upload task failed: {error}")),
        }
    }
}

#[derive(Debug)]
pub struct UploadJob;

impl UploadJob {
    /// Starts the upload on a new task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S>(
        shell: S,
        target: RemoteTarget,
        groups: Vec<ArtifactGroup>,
        settings: Settings,
    ) -> JobHandle
    where
        S: remote::transport::RemoteShell + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                match upload::upload(&shell, &target, &groups, &settings, &cancel).await {
                    Ok(Outcome::Completed(summary)) => JobStatus::Finished(summary),
                    Ok(Outcome::Cancelled(_)) => JobStatus::Interrupted,
                    Err(error) => {
                        tracing::debug!("upload to {} failed: {:#}", target.host_port(), error);
                        JobStatus::Failed(format!("{error:#}"))
                    }
                }
            }
        });
        JobHandle { cancel, task }
    }
}

/// Cancels `cancel` on the first interrupt, then waits for a second one.
///
/// Returns `true` when the second interrupt arrived; the caller should abort
/// without waiting for the job. `interrupt` resolves once per signal, e.g.
/// `tokio::signal::ctrl_c`.
pub async fn watch_interrupts<F, Fut>(cancel: CancellationToken, interrupt: F) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = std::io::Result<()>>,
{
    if let Err(error) = interrupt().await {
        tracing::warn!("cannot listen for interrupts: {}", error);
        return false;
    }
    tracing::warn!("interrupted, stopping after the current pass (interrupt again to abort)");
    cancel.cancel();
    interrupt().await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote::protocol::FileMapping;
    use remote::testutils::{MockShell, Reply};

    fn target(base: &str) -> RemoteTarget {
        RemoteTarget::parse(&format!("ci@agent:{base}"), None, None)
            .unwrap()
    }

    #[tokio::test]
    async fn finished_job_reports_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("report.xml");
        tokio::fs::write(&file, "<ok/>").await.unwrap();
        let groups = vec![ArtifactGroup {
            label: "report.xml".to_string(),
            mappings: vec![FileMapping::new(file, "reports/report.xml")],
        }];
        let shell = MockShell::new();
        let handle = UploadJob::spawn(
            shell.clone(),
            target("/builds/42"),
            groups,
            Settings::default(),
        );
        let JobStatus::Finished(summary) = handle.wait().await else {
            panic!("expected the job to finish");
        };
        assert_eq!(summary.files_uploaded, 1);
        assert_eq!(shell.commands(), vec!["scp -rt .", "scp -rt /builds/42"]);
    }

    #[tokio::test]
    async fn cancelled_job_is_interrupted() {
        let shell = MockShell::new();
        // the current-thread test runtime does not start the task before the first await
        let handle = UploadJob::spawn(shell.clone(), target("/srv"), vec![], Settings::default());
        handle.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(handle.wait().await, JobStatus::Interrupted);
        assert!(shell.commands().is_empty());
    }

    #[tokio::test]
    async fn cancel_between_passes_is_interrupted() {
        let shell = MockShell::new();
        let token = std::sync::Arc::new(std::sync::Mutex::new(None::<CancellationToken>));
        let shell = shell.on_exec({
            let token = token.clone();
            move |session, _| {
                if let (0, Some(cancel)) = (session, token.lock().unwrap().as_ref()) {
                    cancel.cancel();
                }
            }
        });
        let job = UploadJob::spawn(shell.clone(), target("/srv"), vec![], Settings::default());
        *token.lock().unwrap() = Some(job.cancel.clone());
        assert_eq!(job.wait().await, JobStatus::Interrupted);
        assert_eq!(shell.commands(), vec!["scp -rt ."]);
    }

    #[tokio::test]
    async fn failed_job_carries_message() {
        let shell = MockShell::new()
            .reply_at(0, 0, Reply::Fatal("scp: not allowed".to_string()));
        let handle = UploadJob::spawn(shell, target(""), vec![], Settings::default());
        let JobStatus::Failed(message) = handle.wait().await else {
            panic!("expected the job to fail");
        };
        assert!(message.contains("scp: not allowed"), "{message}");
    }

    #[tokio::test]
    async fn is_finished_after_wait_point() {
        let handle = UploadJob::spawn(MockShell::new(), target(""), vec![], Settings::default());
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }
        assert!(matches!(handle.wait().await, JobStatus::Finished(_)));
    }

    type Interrupt =
        std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + Send>>;

    /// Interrupt source that fires once per `notify_one` on the returned handle.
    fn scripted_interrupts() -> (
        std::sync::Arc<tokio::sync::Notify>,
        impl Fn() -> Interrupt + Send + 'static,
    ) {
        let notify = std::sync::Arc::new(tokio::sync::Notify::new());
        let interrupt = {
            let notify = notify.clone();
            move || -> Interrupt {
                let notify = notify.clone();
                Box::pin(async move {
                    notify.notified().await;
                    Ok::<_, std::io::Error>(())
                })
            }
        };
        (notify, interrupt)
    }

    #[tokio::test]
    async fn first_interrupt_only_cancels() {
        let (notify, interrupt) = scripted_interrupts();
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch_interrupts(cancel.clone(), interrupt));
        notify.notify_one();
        cancel.cancelled().await;
        tokio::task::yield_now().await;
        assert!(!watcher.is_finished());
        watcher.abort();
    }

    #[tokio::test]
    async fn second_interrupt_requests_abort() {
        let (notify, interrupt) = scripted_interrupts();
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch_interrupts(cancel.clone(), interrupt));
        notify.notify_one();
        cancel.cancelled().await;
        notify.notify_one();
        assert!(watcher.await.unwrap());
    }

    #[tokio::test]
    async fn unavailable_signal_leaves_job_running() {
        let cancel = CancellationToken::new();
        let aborted = watch_interrupts(cancel.clone(), || async {
            Err::<(), _>(std::io::Error::other("no signal handler"))
        })
        .await;
        assert!(!aborted);
        assert!(!cancel.is_cancelled());
    }
}
