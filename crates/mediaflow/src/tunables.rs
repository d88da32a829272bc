use std::sync::OnceLock;

use parking_lot::Mutex;

/// Default worker thread name prefix.
pub const DEFAULT_THREAD_PREFIX: &str = "mediaflow";

/// Engine tunables shared by every session created after they are set.
///
/// `delivery_capacity` bounds the undelivered results a worker may hold before it waits for
/// the caller to pump. The default `None` never waits, so `FlushTicket::wait` works without
/// pumping.
///
/// # Example
/// ```rust
/// use mediaflow::prelude::*;
///
/// set_session_tunables(SessionTunables {
///     delivery_capacity: Some(32),
///     ..SessionTunables::default()
/// });
/// assert_eq!(session_tunables().delivery_capacity, Some(32));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct SessionTunables {
    pub delivery_capacity: Option<usize>,
    pub thread_name_prefix: String,
}

impl Default for SessionTunables {
    fn default() -> Self {
        Self {
            delivery_capacity: None,
            thread_name_prefix: DEFAULT_THREAD_PREFIX.to_string(),
        }
    }
}

impl SessionTunables {
    fn sanitized(self) -> Self {
        Self {
            delivery_capacity: self.delivery_capacity.map(|c| c.max(1)),
            thread_name_prefix: if self.thread_name_prefix.is_empty() {
                DEFAULT_THREAD_PREFIX.to_string()
            } else {
                self.thread_name_prefix
            },
        }
    }
}

static SESSION_TUNABLES: OnceLock<Mutex<SessionTunables>> = OnceLock::new();

/// Override session tunables process-wide.
pub fn set_session_tunables(tunables: SessionTunables) {
    let lock = SESSION_TUNABLES.get_or_init(|| Mutex::new(SessionTunables::default()));
    *lock.lock() = tunables.sanitized();
}

/// Current tunables (defaults unless overridden).
pub fn session_tunables() -> SessionTunables {
    SESSION_TUNABLES
        .get()
        .map(|t| t.lock().clone())
        .unwrap_or_default()
}
