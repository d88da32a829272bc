//! Result delivery between a session worker and the caller's context.
//!
//! The worker pushes events into an ordered queue; the caller drains it with
//! [`pump`](crate::VideoEncoder::pump). The queue is unbounded unless a capacity is set through
//! [`SessionTunables`](crate::tunables::SessionTunables). With a capacity, per-job results use
//! the blocking path and the worker waits for the caller to drain once `capacity` events are
//! pending. Flush results and completions never wait.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use mediaflow_core::metrics::SessionMetrics;
use parking_lot::{Condvar, Mutex};

use crate::error::SessionError;

/// Completion callback passed to `flush`.
pub type FlushCallback = Box<dyn FnOnce(Result<(), SessionError>) + Send>;

/// Output and error callbacks a session is constructed with.
///
/// Both run on the caller's context, inside `pump`.
pub struct Callbacks<O> {
    pub on_output: Box<dyn FnMut(O) + Send>,
    pub on_error: Box<dyn FnMut(SessionError) + Send>,
}

impl<O> Callbacks<O> {
    pub fn new(
        on_output: impl FnMut(O) + Send + 'static,
        on_error: impl FnMut(SessionError) + Send + 'static,
    ) -> Self {
        Self {
            on_output: Box::new(on_output),
            on_error: Box::new(on_error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TicketState {
    Pending,
    Completed,
    Aborted,
}

struct TicketInner {
    state: Mutex<TicketState>,
    cv: Condvar,
}

/// Handle on one flush request.
///
/// Completes once the worker has queued every flush result and the completion event. The
/// completion callback itself runs later, when the caller pumps.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use mediaflow::prelude::*;
///
/// let mut encoder = VideoEncoder::new(LoopbackToolkit::new(), Callbacks::new(|_| {}, |_| {}));
/// // Nothing to flush on an unconfigured session: the ticket is already done.
/// let ticket = encoder.flush(|res| assert!(res.is_ok()));
/// assert!(ticket.is_complete());
/// assert_eq!(ticket.wait_timeout(Duration::from_millis(10)), Some(Ok(())));
/// ```
#[derive(Clone)]
pub struct FlushTicket {
    inner: Arc<TicketInner>,
}

impl FlushTicket {
    pub(crate) fn pending() -> Self {
        Self {
            inner: Arc::new(TicketInner {
                state: Mutex::new(TicketState::Pending),
                cv: Condvar::new(),
            }),
        }
    }

    pub(crate) fn completed() -> Self {
        let ticket = Self::pending();
        ticket.resolve(TicketState::Completed);
        ticket
    }

    fn resolve(&self, state: TicketState) {
        let mut guard = self.inner.state.lock();
        if *guard == TicketState::Pending {
            *guard = state;
        }
        drop(guard);
        self.inner.cv.notify_all();
    }

    pub(crate) fn complete(&self) {
        self.resolve(TicketState::Completed);
    }

    pub(crate) fn abort(&self) {
        self.resolve(TicketState::Aborted);
    }

    /// True once the flush finished or was aborted.
    pub fn is_complete(&self) -> bool {
        *self.inner.state.lock() != TicketState::Pending
    }

    fn outcome(state: TicketState) -> Option<Result<(), SessionError>> {
        match state {
            TicketState::Pending => None,
            TicketState::Completed => Some(Ok(())),
            TicketState::Aborted => Some(Err(SessionError::Aborted)),
        }
    }

    /// Block until the flush resolves.
    ///
    /// With the default unbounded delivery this never needs the caller to pump. A session
    /// created with a bounded `delivery_capacity` parks its worker once that many results are
    /// undelivered, so such callers must keep pumping (see `pump_until`) instead.
    pub fn wait(&self) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(outcome) = Self::outcome(*state) {
                return outcome;
            }
            self.inner.cv.wait(&mut state);
        }
    }

    /// Like [`FlushTicket::wait`]; `None` if still pending after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), SessionError>> {
        let mut state = self.inner.state.lock();
        if let Some(outcome) = Self::outcome(*state) {
            return Some(outcome);
        }
        let _ = self.inner.cv.wait_for(&mut state, timeout);
        Self::outcome(*state)
    }
}

/// A flush request travelling through the job queue.
pub(crate) struct PendingFlush {
    pub(crate) ticket: FlushTicket,
    pub(crate) on_complete: FlushCallback,
}

impl PendingFlush {
    /// Resolve the ticket as aborted and queue the callback for the caller.
    pub(crate) fn abort<O>(self, delivery: &Delivery<O>) {
        self.ticket.abort();
        delivery.push_nonblocking(Event::FlushComplete {
            on_complete: self.on_complete,
            result: Err(SessionError::Aborted),
        });
    }
}

pub(crate) enum Event<O> {
    Output(O),
    Error(SessionError),
    FlushComplete {
        on_complete: FlushCallback,
        result: Result<(), SessionError>,
    },
}

struct Pending<O> {
    events: VecDeque<Event<O>>,
    closed: bool,
}

/// Ordered event queue shared by one worker and one caller.
pub(crate) struct Delivery<O> {
    pending: Mutex<Pending<O>>,
    /// Signalled when the caller frees space.
    space: Condvar,
    /// Signalled when an event is queued.
    ready: Condvar,
    /// `None` never applies backpressure.
    capacity: Option<usize>,
    metrics: Arc<SessionMetrics>,
}

impl<O> Delivery<O> {
    pub(crate) fn new(capacity: Option<usize>, metrics: Arc<SessionMetrics>) -> Self {
        Self {
            pending: Mutex::new(Pending {
                events: VecDeque::new(),
                closed: false,
            }),
            space: Condvar::new(),
            ready: Condvar::new(),
            capacity: capacity.map(|c| c.max(1)),
            metrics,
        }
    }

    /// Queue `event`, waiting while `capacity` events are undelivered.
    ///
    /// Without a capacity, or after [`Delivery::close`], the event is queued immediately.
    pub(crate) fn push_blocking(&self, event: Event<O>) {
        let mut pending = self.pending.lock();
        if let Some(capacity) = self.capacity
            && pending.events.len() >= capacity
            && !pending.closed
        {
            self.metrics.backpressure.incr();
            while pending.events.len() >= capacity && !pending.closed {
                self.space.wait(&mut pending);
            }
        }
        pending.events.push_back(event);
        drop(pending);
        self.ready.notify_one();
    }

    /// Queue `event` without waiting for space.
    pub(crate) fn push_nonblocking(&self, event: Event<O>) {
        self.pending.lock().events.push_back(event);
        self.ready.notify_one();
    }

    /// Release a worker parked in [`Delivery::push_blocking`] and stop applying backpressure.
    /// Queued events stay available to the caller.
    pub(crate) fn close(&self) {
        self.pending.lock().closed = true;
        self.space.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().events.len()
    }

    fn pop(&self) -> Option<Event<O>> {
        let event = self.pending.lock().events.pop_front();
        if event.is_some() {
            self.space.notify_one();
        }
        event
    }

    /// Wait up to `timeout` until at least one event is queued.
    fn wait_ready(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        if pending.events.is_empty() {
            let _ = self.ready.wait_for(&mut pending, timeout);
        }
        !pending.events.is_empty()
    }

    /// Dispatch every queued event, in order, to `callbacks`. Returns the number dispatched.
    ///
    /// Events are popped one at a time and no lock is held while a callback runs.
    pub(crate) fn pump(&self, callbacks: &mut Callbacks<O>) -> usize {
        let mut dispatched = 0;
        while let Some(event) = self.pop() {
            dispatched += 1;
            match event {
                Event::Output(out) => {
                    self.metrics.delivered.incr();
                    (callbacks.on_output)(out);
                }
                Event::Error(err) => (callbacks.on_error)(err),
                Event::FlushComplete {
                    on_complete,
                    result,
                } => on_complete(result),
            }
        }
        dispatched
    }

    pub(crate) fn pump_timeout(&self, callbacks: &mut Callbacks<O>, timeout: Duration) -> usize {
        if !self.wait_ready(timeout) {
            return 0;
        }
        self.pump(callbacks)
    }
}

/// Worker-side handle that emits results with one delivery discipline.
pub(crate) struct Sink<'a, O> {
    delivery: &'a Delivery<O>,
    blocking: bool,
}

impl<'a, O> Sink<'a, O> {
    pub(crate) fn blocking(delivery: &'a Delivery<O>) -> Self {
        Self {
            delivery,
            blocking: true,
        }
    }

    pub(crate) fn nonblocking(delivery: &'a Delivery<O>) -> Self {
        Self {
            delivery,
            blocking: false,
        }
    }

    pub(crate) fn emit(&mut self, output: O) {
        self.push(Event::Output(output));
    }

    pub(crate) fn error(&mut self, err: SessionError) {
        self.push(Event::Error(err));
    }

    fn push(&mut self, event: Event<O>) {
        if self.blocking {
            self.delivery.push_blocking(event);
        } else {
            self.delivery.push_nonblocking(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Instant,
    };

    fn collecting() -> (Callbacks<u32>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (log.clone(), log.clone());
        let callbacks = Callbacks::new(
            move |v: u32| a.lock().push(format!("out:{v}")),
            move |e: SessionError| b.lock().push(format!("err:{e}")),
        );
        (callbacks, log)
    }

    #[test]
    fn pump_preserves_queue_order() {
        let delivery = Delivery::new(None, Arc::new(SessionMetrics::default()));
        let (mut callbacks, log) = collecting();
        delivery.push_blocking(Event::Output(1));
        delivery.push_blocking(Event::Error(SessionError::Processing("x".into())));
        let done = Arc::new(AtomicUsize::new(0));
        let seen = done.clone();
        delivery.push_nonblocking(Event::FlushComplete {
            on_complete: Box::new(move |r| {
                assert!(r.is_ok());
                seen.fetch_add(1, Ordering::SeqCst);
            }),
            result: Ok(()),
        });
        delivery.push_blocking(Event::Output(2));
        assert_eq!(delivery.pump(&mut callbacks), 4);
        assert_eq!(
            *log.lock(),
            vec!["out:1", "err:processing error: x", "out:2"]
        );
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn blocking_push_waits_for_the_caller() {
        let metrics = Arc::new(SessionMetrics::default());
        let delivery = Arc::new(Delivery::new(Some(1), metrics.clone()));
        delivery.push_blocking(Event::Output(0));
        let worker = {
            let delivery = delivery.clone();
            thread::spawn(move || delivery.push_blocking(Event::Output(1)))
        };
        let deadline = Instant::now() + Duration::from_secs(2);
        while metrics.backpressure.get() == 0 && Instant::now() < deadline {
            thread::yield_now();
        }
        assert_eq!(metrics.backpressure.get(), 1);
        let (mut callbacks, log) = collecting();
        while log.lock().len() < 2 && Instant::now() < deadline {
            delivery.pump_timeout(&mut callbacks, Duration::from_millis(20));
        }
        worker.join().unwrap();
        assert_eq!(*log.lock(), vec!["out:0", "out:1"]);
    }

    #[test]
    fn unbounded_delivery_never_parks_the_worker() {
        let metrics = Arc::new(SessionMetrics::default());
        let delivery = Arc::new(Delivery::new(None, metrics.clone()));
        let worker = {
            let delivery = delivery.clone();
            thread::spawn(move || {
                for v in 0..100 {
                    delivery.push_blocking(Event::Output(v));
                }
            })
        };
        worker.join().unwrap();
        assert_eq!(delivery.len(), 100);
        assert_eq!(metrics.backpressure.get(), 0);
    }

    #[test]
    fn nonblocking_push_ignores_capacity() {
        let delivery = Delivery::new(Some(1), Arc::new(SessionMetrics::default()));
        for v in 0..4 {
            delivery.push_nonblocking(Event::Output(v));
        }
        assert_eq!(delivery.len(), 4);
    }

    #[test]
    fn close_releases_a_parked_worker() {
        let delivery = Arc::new(Delivery::new(Some(1), Arc::new(SessionMetrics::default())));
        delivery.push_blocking(Event::Output(0));
        let worker = {
            let delivery = delivery.clone();
            thread::spawn(move || delivery.push_blocking(Event::Output(1)))
        };
        thread::sleep(Duration::from_millis(20));
        delivery.close();
        worker.join().unwrap();
        assert_eq!(delivery.len(), 2);
    }

    #[test]
    fn ticket_resolves_once() {
        let ticket = FlushTicket::pending();
        assert_eq!(ticket.wait_timeout(Duration::from_millis(5)), None);
        ticket.abort();
        ticket.complete();
        assert_eq!(ticket.wait(), Err(SessionError::Aborted));
    }
}
