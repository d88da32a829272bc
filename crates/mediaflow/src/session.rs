//! State machine and host surface shared by every session kind.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use mediaflow_codec::selector::HwAccel;
use mediaflow_core::metrics::{MetricsSnapshot, SessionMetrics};
use tracing::{debug, info};

use crate::{
    delivery::{Callbacks, Delivery, FlushTicket, PendingFlush},
    error::{SessionError, SessionState},
    tunables::session_tunables,
    worker::{Processor, Task, Worker},
};

const PUMP_SLICE: Duration = Duration::from_millis(10);

/// The codec implementation a session opened.
///
/// # Example
/// ```rust
/// use mediaflow::prelude::*;
///
/// let imp = Implementation { name: "libx264".into(), accel: HwAccel::None, fallback: true };
/// assert_eq!(imp.to_string(), "libx264 (Software, fallback)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Implementation {
    pub name: String,
    pub accel: HwAccel,
    /// Opened in software after the selected hardware implementation failed to open.
    pub fallback: bool,
}

impl fmt::Display for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}", self.name, self.accel.display_name())?;
        if self.fallback {
            f.write_str(", fallback")?;
        }
        f.write_str(")")
    }
}

pub(crate) struct SessionCore<J, O> {
    // Declared first: dropping the worker joins the thread before anything else goes.
    worker: Option<Worker<J, O>>,
    kind: &'static str,
    state: SessionState,
    implementation: Option<Implementation>,
    delivery: Arc<Delivery<O>>,
    callbacks: Callbacks<O>,
    metrics: Arc<SessionMetrics>,
}

impl<J: Send + 'static, O: Send + 'static> SessionCore<J, O> {
    pub(crate) fn new(kind: &'static str, callbacks: Callbacks<O>) -> Self {
        let metrics = Arc::new(SessionMetrics::default());
        let capacity = session_tunables().delivery_capacity;
        Self {
            worker: None,
            kind,
            state: SessionState::Unconfigured,
            implementation: None,
            delivery: Arc::new(Delivery::new(capacity, metrics.clone())),
            callbacks,
            metrics,
        }
    }

    /// `configure` is only valid once, from `Unconfigured`.
    pub(crate) fn ensure_unconfigured(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Unconfigured => Ok(()),
            SessionState::Configured => Err(SessionError::Configuration(format!(
                "{} is already configured",
                self.kind
            ))),
            SessionState::Closed => {
                Err(SessionError::Configuration(format!("{} is closed", self.kind)))
            }
        }
    }

    pub(crate) fn ensure_configured(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Configured => Ok(()),
            other => Err(SessionError::NotConfigured(other)),
        }
    }

    /// Hand an opened processor to a new worker and enter `Configured`.
    pub(crate) fn start<P>(
        &mut self,
        processor: P,
        implementation: Implementation,
    ) -> Result<(), SessionError>
    where
        P: Processor<Job = J, Output = O>,
    {
        let tunables = session_tunables();
        let worker = Worker::spawn(
            processor,
            format!("{}-{}", tunables.thread_name_prefix, self.kind),
            self.kind,
            implementation.name.clone(),
            self.delivery.clone(),
            self.metrics.clone(),
        )?;
        info!(
            kind = self.kind,
            implementation = %implementation.name,
            accel = %implementation.accel,
            fallback = implementation.fallback,
            "session configured"
        );
        self.worker = Some(worker);
        self.implementation = Some(implementation);
        self.state = SessionState::Configured;
        Ok(())
    }

    pub(crate) fn submit(&mut self, job: J) -> Result<(), SessionError> {
        self.ensure_configured()?;
        let Some(worker) = self.worker.as_ref() else {
            return Err(SessionError::NotConfigured(self.state));
        };
        worker
            .submit(job)
            .map_err(|_| SessionError::NotConfigured(SessionState::Closed))
    }

    pub(crate) fn flush(
        &mut self,
        on_complete: impl FnOnce(Result<(), SessionError>) + Send + 'static,
    ) -> FlushTicket {
        let Some(worker) = self.worker.as_ref().filter(|_| self.state == SessionState::Configured)
        else {
            debug!(kind = self.kind, state = %self.state, "flush with nothing to drain");
            on_complete(Ok(()));
            return FlushTicket::completed();
        };
        let ticket = FlushTicket::pending();
        let pending = PendingFlush {
            ticket: ticket.clone(),
            on_complete: Box::new(on_complete),
        };
        if let Err(Task::Flush(pending)) = worker.flush(pending) {
            pending.abort(&self.delivery);
        }
        debug!(kind = self.kind, "flush queued");
        ticket
    }

    pub(crate) fn reset(&mut self) -> Result<(), SessionError> {
        self.ensure_configured()?;
        if let Some(worker) = self.worker.as_ref() {
            worker.reset();
        }
        Ok(())
    }

    /// Stop and join the worker. Safe to call in any state, any number of times.
    pub(crate) fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
            debug!(kind = self.kind, "session closed");
        }
        self.state = SessionState::Closed;
    }

    pub(crate) fn pump(&mut self) -> usize {
        self.delivery.pump(&mut self.callbacks)
    }

    pub(crate) fn pump_timeout(&mut self, timeout: Duration) -> usize {
        self.delivery.pump_timeout(&mut self.callbacks, timeout)
    }

    /// Pump until `ticket` resolves and its completion has been dispatched.
    pub(crate) fn pump_until(
        &mut self,
        ticket: &FlushTicket,
        timeout: Duration,
    ) -> Option<Result<(), SessionError>> {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            if let Some(outcome) = ticket.wait_timeout(Duration::ZERO) {
                self.pump();
                return Some(outcome);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.pump_timeout((deadline - now).min(PUMP_SLICE));
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn implementation(&self) -> Option<&Implementation> {
        self.implementation.as_ref()
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.worker.as_ref().map_or(0, Worker::queue_len)
    }

    pub(crate) fn pending_results(&self) -> usize {
        self.delivery.len()
    }

    pub(crate) fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Host surface shared by the four session types.
macro_rules! session_surface {
    () => {
        /// Queue a flush barrier. `on_complete` runs from `pump` after every earlier result.
        pub fn flush(
            &mut self,
            on_complete: impl FnOnce(Result<(), SessionError>) + Send + 'static,
        ) -> FlushTicket {
            self.core.flush(on_complete)
        }

        /// Discard queued jobs and drop codec lookahead; the in-flight job still completes.
        pub fn reset(&mut self) -> Result<(), SessionError> {
            self.core.reset()
        }

        /// Stop the worker, wait for the in-flight job and release the codec. Idempotent.
        pub fn close(&mut self) {
            self.core.close();
        }

        /// Run callbacks for every result queued so far.
        pub fn pump(&mut self) -> usize {
            self.core.pump()
        }

        /// Wait up to `timeout` for a result, then pump.
        pub fn pump_timeout(&mut self, timeout: std::time::Duration) -> usize {
            self.core.pump_timeout(timeout)
        }

        /// Pump until `ticket` resolves; `None` on timeout.
        pub fn pump_until(
            &mut self,
            ticket: &FlushTicket,
            timeout: std::time::Duration,
        ) -> Option<Result<(), SessionError>> {
            self.core.pump_until(ticket, timeout)
        }

        pub fn state(&self) -> SessionState {
            self.core.state()
        }

        pub fn implementation(&self) -> Option<&Implementation> {
            self.core.implementation()
        }

        /// Jobs waiting for the worker.
        pub fn queue_len(&self) -> usize {
            self.core.queue_len()
        }

        /// Results produced by the worker and not yet pumped.
        pub fn pending_results(&self) -> usize {
            self.core.pending_results()
        }

        pub fn metrics(&self) -> mediaflow_core::metrics::MetricsSnapshot {
            self.core.metrics()
        }
    };
}

pub(crate) use session_surface;
