//! Worker wrapper: runs one job body and turns whatever it does into an outcome.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::error::JobError;
use crate::job::{JobBody, JobContext, JobOutput};

/// How a job body ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    Completed(JobOutput),
    Failed(String),
    Stopped,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::Stopped => "stopped",
        }
    }
}

/// Run the body on the current (blocking) thread.
///
/// A successful return always wins, even if a cancel raced in after the body
/// finished its work. Errors seen once cancellation was requested count as a
/// stop, and the body's cleanup runs before the outcome is reported. A body
/// that reports `Cancelled` with no cancel requested has failed.
pub(crate) fn execute(mut body: Box<dyn JobBody>, ctx: JobContext) -> Outcome {
    if ctx.is_cancelled() {
        cleanup(body.as_mut(), &ctx);
        return Outcome::Stopped;
    }

    match catch_unwind(AssertUnwindSafe(|| body.run(&ctx))) {
        Ok(Ok(output)) => Outcome::Completed(output),
        Ok(Err(err)) if ctx.is_cancelled() => {
            debug!(task_id = %ctx.task_id(), error = %err, "Job body failed after cancellation");
            cleanup(body.as_mut(), &ctx);
            Outcome::Stopped
        }
        Ok(Err(err)) => Outcome::Failed(err.to_string()),
        Err(payload) => Outcome::Failed(format!(
            "job body panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

fn cleanup(body: &mut dyn JobBody, ctx: &JobContext) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| body.on_cancelled(ctx))) {
        warn!(
            task_id = %ctx.task_id(),
            panic = %panic_message(payload.as_ref()),
            "Cancellation cleanup panicked"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use jobrun_core::{ExecutionClass, Task, TaskKind};
    use tokio_util::sync::CancellationToken;

    fn context() -> (JobContext, CancellationToken) {
        let task = Task::new(TaskKind::Backup, ExecutionClass::Async);
        let token = CancellationToken::new();
        (JobContext::new(&task, token.clone()), token)
    }

    struct Recorder {
        result: Option<Result<JobOutput, JobError>>,
        cleaned: Arc<AtomicBool>,
        /// Cancelled from inside `run`, as a concurrent cancel would be.
        trip: Option<CancellationToken>,
    }

    impl JobBody for Recorder {
        fn run(&mut self, _ctx: &JobContext) -> Result<JobOutput, JobError> {
            if let Some(token) = self.trip.take() {
                token.cancel();
            }
            self.result.take().unwrap_or(Ok(JobOutput::empty()))
        }

        fn on_cancelled(&mut self, _ctx: &JobContext) {
            self.cleaned.store(true, Ordering::SeqCst);
        }
    }

    fn recorder(result: Result<JobOutput, JobError>) -> (Box<dyn JobBody>, Arc<AtomicBool>) {
        let cleaned = Arc::new(AtomicBool::new(false));
        let body = Recorder {
            result: Some(result),
            cleaned: cleaned.clone(),
            trip: None,
        };
        (Box::new(body), cleaned)
    }

    #[test]
    fn test_success_completes() {
        let (ctx, _) = context();
        let (body, cleaned) = recorder(Ok(JobOutput::single("/tmp/out.tif")));
        match execute(body, ctx) {
            Outcome::Completed(output) => assert_eq!(output.artifacts().len(), 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!cleaned.load(Ordering::SeqCst));
    }

    #[test]
    fn test_error_fails_with_message() {
        let (ctx, _) = context();
        let (body, _) = recorder(Err(JobError::failed("source directory missing")));
        match execute(body, ctx) {
            Outcome::Failed(msg) => assert_eq!(msg, "source directory missing"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_runs_cleanup() {
        let (ctx, token) = context();
        let cleaned = Arc::new(AtomicBool::new(false));
        let body = Recorder {
            result: Some(Err(JobError::Cancelled)),
            cleaned: cleaned.clone(),
            trip: Some(token),
        };
        assert!(matches!(execute(Box::new(body), ctx), Outcome::Stopped));
        assert!(cleaned.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancelled_without_request_fails() {
        let (ctx, token) = context();
        let (body, cleaned) = recorder(Err(JobError::Cancelled));
        match execute(body, ctx) {
            Outcome::Failed(msg) => assert_eq!(msg, JobError::Cancelled.to_string()),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!token.is_cancelled());
        assert!(!cleaned.load(Ordering::SeqCst));
    }

    #[test]
    fn test_error_after_cancel_is_a_stop() {
        let (ctx, token) = context();
        let (body, cleaned) = recorder(Err(JobError::failed("interrupted copy")));
        token.cancel();
        assert!(matches!(execute(body, ctx), Outcome::Stopped));
        assert!(cleaned.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancelled_before_start_never_runs() {
        let (ctx, token) = context();
        token.cancel();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let body = move |_ctx: &JobContext| -> Result<JobOutput, JobError> {
            flag.store(true, Ordering::SeqCst);
            Ok(JobOutput::empty())
        };
        assert!(matches!(execute(Box::new(body), ctx), Outcome::Stopped));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_panic_is_contained() {
        let (ctx, _) = context();
        let body = |_ctx: &JobContext| -> Result<JobOutput, JobError> { panic!("tile index out of range") };
        match execute(Box::new(body), ctx) {
            Outcome::Failed(msg) => assert!(msg.contains("tile index out of range")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
