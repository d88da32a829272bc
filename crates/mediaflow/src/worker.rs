//! The per-session worker thread.
//!
//! One thread owns the codec for a session's lifetime. It pops tasks from the session's
//! [`JobQueue`] strictly in submission order and hands each one to a [`Processor`].

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use mediaflow_core::{
    metrics::SessionMetrics,
    queue::{JobQueue, RecvOutcome, SendOutcome},
};
use tracing::{debug, error, info_span, trace, warn};

use crate::{
    delivery::{Delivery, Event, PendingFlush, Sink},
    error::SessionError,
};

/// Codec-specific half of a session, run exclusively on the worker thread.
///
/// Dropping the processor releases the codec and any hardware contexts it owns.
pub(crate) trait Processor: Send + 'static {
    type Job: Send + 'static;
    type Output: Send + 'static;

    /// Handle one job. Results go through `sink`; a returned error is reported for this job only.
    fn process(
        &mut self,
        job: Self::Job,
        sink: &mut Sink<'_, Self::Output>,
    ) -> Result<(), SessionError>;

    /// Drain everything the codec still buffers and make it ready for a new stream.
    fn flush(&mut self, sink: &mut Sink<'_, Self::Output>) -> Result<(), SessionError>;

    /// Drop buffered reference and lookahead state.
    fn reset(&mut self) -> Result<(), SessionError>;
}

pub(crate) enum Task<J> {
    Job(J),
    Flush(PendingFlush),
    /// Queued by `reset` after discarding everything else. Carries the discarded flushes, which
    /// the worker aborts once the in-flight job's results are queued.
    Reset(Vec<PendingFlush>),
}

/// Caller-side handle on a running worker thread.
pub(crate) struct Worker<J, O> {
    queue: Arc<JobQueue<Task<J>>>,
    delivery: Arc<Delivery<O>>,
    metrics: Arc<SessionMetrics>,
    handle: Option<JoinHandle<()>>,
}

impl<J: Send + 'static, O: Send + 'static> Worker<J, O> {
    /// Spawn the worker thread. On failure the processor is dropped along with the closure.
    pub(crate) fn spawn<P>(
        processor: P,
        thread_name: String,
        kind: &'static str,
        implementation: String,
        delivery: Arc<Delivery<O>>,
        metrics: Arc<SessionMetrics>,
    ) -> Result<Self, SessionError>
    where
        P: Processor<Job = J, Output = O>,
    {
        let queue = Arc::new(JobQueue::new());
        let handle = {
            let queue = queue.clone();
            let delivery = delivery.clone();
            let metrics = metrics.clone();
            thread::Builder::new()
                .name(thread_name)
                .spawn(move || {
                    let span = info_span!("session", kind, implementation = %implementation);
                    let _enter = span.enter();
                    run(processor, &queue, &delivery, &metrics);
                })
                .map_err(|e| SessionError::Allocation(format!("failed to spawn worker: {e}")))?
        };
        Ok(Self {
            queue,
            delivery,
            metrics,
            handle: Some(handle),
        })
    }
}

impl<J, O> Worker<J, O> {
    pub(crate) fn submit(&self, job: J) -> Result<(), Task<J>> {
        self.push(Task::Job(job))
    }

    pub(crate) fn flush(&self, pending: PendingFlush) -> Result<(), Task<J>> {
        self.push(Task::Flush(pending))
    }

    fn push(&self, task: Task<J>) -> Result<(), Task<J>> {
        // Only the owning session stops the queue, so this check cannot race a stop.
        if !self.queue.is_running() {
            return Err(task);
        }
        match self.queue.push(task) {
            SendOutcome::Ok => {
                self.metrics.submitted.incr();
                Ok(())
            }
            SendOutcome::Closed => Ok(()),
        }
    }

    /// Discard queued tasks and schedule a codec reset behind the in-flight job.
    pub(crate) fn reset(&self) {
        let metrics = &self.metrics;
        let outcome = self.queue.replace_all(|discarded| {
            let mut flushes = Vec::new();
            for task in discarded {
                match task {
                    Task::Job(_) => metrics.discarded.incr(),
                    Task::Flush(pending) => flushes.push(pending),
                    Task::Reset(earlier) => flushes.extend(earlier),
                }
            }
            debug!(aborted_flushes = flushes.len(), "reset");
            Task::Reset(flushes)
        });
        if outcome == SendOutcome::Closed {
            debug!("reset after stop ignored");
        }
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Only called once the worker thread is gone, so aborts cannot overtake its results.
    fn discard(&self, tasks: Vec<Task<J>>) {
        for task in tasks {
            match task {
                Task::Job(_) => self.metrics.discarded.incr(),
                Task::Flush(pending) => pending.abort(&self.delivery),
                Task::Reset(flushes) => {
                    for pending in flushes {
                        pending.abort(&self.delivery);
                    }
                }
            }
        }
    }

    /// Stop the queue, wait for the in-flight job, then discard what remains.
    pub(crate) fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.queue.stop();
        self.delivery.close();
        if handle.join().is_err() {
            warn!("session worker panicked");
        }
        let remaining = self.queue.drain();
        debug!(discarded = remaining.len(), "worker stopped");
        self.discard(remaining);
    }
}

impl<J, O> Drop for Worker<J, O> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<P: Processor>(
    mut processor: P,
    queue: &JobQueue<Task<P::Job>>,
    delivery: &Delivery<P::Output>,
    metrics: &SessionMetrics,
) {
    loop {
        match queue.pop_blocking() {
            RecvOutcome::Data(Task::Job(job)) => {
                trace!("job");
                let mut sink = Sink::blocking(delivery);
                if let Err(err) = processor.process(job, &mut sink) {
                    error!(error = %err, "job failed");
                    metrics.errors.incr();
                    sink.error(err);
                }
                metrics.completed.incr();
            }
            RecvOutcome::Data(Task::Flush(pending)) => {
                debug!("flush");
                let mut sink = Sink::nonblocking(delivery);
                if let Err(err) = processor.flush(&mut sink) {
                    error!(error = %err, "flush failed");
                    metrics.errors.incr();
                    sink.error(err);
                }
                metrics.completed.incr();
                delivery.push_nonblocking(Event::FlushComplete {
                    on_complete: pending.on_complete,
                    result: Ok(()),
                });
                pending.ticket.complete();
            }
            RecvOutcome::Data(Task::Reset(flushes)) => {
                debug!("codec reset");
                if let Err(err) = processor.reset() {
                    error!(error = %err, "reset failed");
                    metrics.errors.incr();
                    delivery.push_nonblocking(Event::Error(err));
                }
                for pending in flushes {
                    pending.abort(delivery);
                }
            }
            RecvOutcome::Closed => break,
        }
    }
    trace!("worker exiting");
    drop(processor);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{Callbacks, FlushTicket};
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Echoes jobs back; `u32::MAX` fails.
    struct Echo {
        buffered: Vec<u32>,
        resets: Arc<Mutex<u32>>,
    }

    impl Processor for Echo {
        type Job = u32;
        type Output = u32;

        fn process(&mut self, job: u32, sink: &mut Sink<'_, u32>) -> Result<(), SessionError> {
            if job == u32::MAX {
                return Err(SessionError::Processing("bad job".into()));
            }
            self.buffered.push(job);
            if self.buffered.len() > 1 {
                sink.emit(self.buffered.remove(0));
            }
            Ok(())
        }

        fn flush(&mut self, sink: &mut Sink<'_, u32>) -> Result<(), SessionError> {
            for v in self.buffered.drain(..) {
                sink.emit(v);
            }
            Ok(())
        }

        fn reset(&mut self) -> Result<(), SessionError> {
            self.buffered.clear();
            *self.resets.lock() += 1;
            Ok(())
        }
    }

    fn spawn_echo() -> (Worker<u32, u32>, Arc<Delivery<u32>>, Arc<Mutex<u32>>) {
        let metrics = Arc::new(SessionMetrics::default());
        let delivery = Arc::new(Delivery::new(Some(4), metrics.clone()));
        let resets = Arc::new(Mutex::new(0));
        let worker = Worker::spawn(
            Echo {
                buffered: Vec::new(),
                resets: resets.clone(),
            },
            "mediaflow-test".into(),
            "test",
            "echo".into(),
            delivery.clone(),
            metrics,
        )
        .unwrap();
        (worker, delivery, resets)
    }

    #[test]
    fn flush_drains_and_completes_in_order() {
        let (mut worker, delivery, _) = spawn_echo();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (log.clone(), log.clone());
        let mut callbacks = Callbacks::new(
            move |v: u32| a.lock().push(v.to_string()),
            move |e| b.lock().push(format!("{e}")),
        );
        for v in [1, u32::MAX, 2, 3] {
            assert!(worker.submit(v).is_ok());
        }
        let ticket = FlushTicket::pending();
        let c = log.clone();
        assert!(
            worker
                .flush(PendingFlush {
                    ticket: ticket.clone(),
                    on_complete: Box::new(move |_| c.lock().push("done".into())),
                })
                .is_ok()
        );
        assert_eq!(ticket.wait_timeout(Duration::from_secs(2)), Some(Ok(())));
        delivery.pump(&mut callbacks);
        assert_eq!(
            *log.lock(),
            vec!["processing error: bad job", "1", "2", "3", "done"]
        );
        worker.shutdown();
        assert!(worker.submit(4).is_err());
    }

    #[test]
    fn shutdown_is_idempotent_and_rejects_work() {
        let (mut worker, delivery, resets) = spawn_echo();
        worker.reset();
        worker.shutdown();
        worker.shutdown();
        let ticket = FlushTicket::pending();
        let rejected = worker.flush(PendingFlush {
            ticket: ticket.clone(),
            on_complete: Box::new(|_| {}),
        });
        assert!(rejected.is_err());
        assert!(!ticket.is_complete());
        assert!(*resets.lock() <= 1);
        assert_eq!(delivery.len(), 0);
    }
}
