use crate::peer::decorated::DecoratedMetaState;
use crate::peer::rpc_api::MetaStateError;
use std::future::Future;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::thread;
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce(&mut DecoratedMetaState) + Send>;

/// Handle to the state context: a dedicated thread that owns the `DecoratedMetaState` and runs
/// submitted jobs one at a time, in submission order. Disk IO and application code run there,
/// never on the control context.
#[derive(Clone)]
pub(crate) struct StateInvoker {
    sender: mpsc::UnboundedSender<Job>,
}

impl StateInvoker {
    pub(crate) fn spawn(logger: slog::Logger, mut state: DecoratedMetaState) -> io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        thread::Builder::new().name("meta-state".to_string()).spawn(move || {
            while let Some(job) = receiver.blocking_recv() {
                // The state may be half way through a change. Nothing can safely use it again.
                if panic::catch_unwind(AssertUnwindSafe(|| job(&mut state))).is_err() {
                    slog::crit!(logger, "State context panicked, aborting");
                    process::abort();
                }
            }
            slog::info!(logger, "State context exited");
        })?;

        Ok(StateInvoker { sender })
    }

    /// Queues `job` behind everything submitted before this call returns. The returned future
    /// only observes the result; dropping it doesn't cancel the job.
    pub(crate) fn invoke<R, F>(&self, job: F) -> impl Future<Output = Result<R, MetaStateError>> + Send + 'static
    where
        F: FnOnce(&mut DecoratedMetaState) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |state| {
            let _ = tx.send(job(state));
        });
        let _ = self.sender.send(job);

        async move { rx.await.map_err(|_| MetaStateError::ActorExited) }
    }

    /// Like `invoke`, for jobs that can fail themselves.
    pub(crate) fn try_invoke<R, F>(&self, job: F) -> impl Future<Output = Result<R, MetaStateError>> + Send + 'static
    where
        F: FnOnce(&mut DecoratedMetaState) -> Result<R, MetaStateError> + Send + 'static,
        R: Send + 'static,
    {
        let result = self.invoke(job);
        async move { result.await? }
    }
}
