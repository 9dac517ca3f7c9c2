//! Handle-based entry points.
//!
//! A [`Registry`] maps opaque [`Handle`]s to owned capture sessions. Every
//! entry point reports failure through its return value only; the reason
//! goes to the log.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::config::{CaptureConfig, DeviceQuery};
use crate::handoff::{FrameBuffer, FrameHandoff};
use crate::session::CaptureSession;
use crate::traits::{CameraBackend, CameraError, CaptureDimensions, ColorSpace, Result};

/// Opaque key for a session owned by a [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A session plus its hand-off, which is polled without the session lock.
struct Entry<B: CameraBackend> {
    session: Arc<Mutex<CaptureSession<B>>>,
    handoff: Arc<FrameHandoff>,
}

impl<B: CameraBackend> Clone for Entry<B> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            handoff: Arc::clone(&self.handoff),
        }
    }
}

/// Table of capture sessions keyed by handle.
pub struct Registry<B: CameraBackend + Clone> {
    backend: B,
    config: CaptureConfig,
    sessions: Mutex<HashMap<Handle, Entry<B>>>,
    next_id: AtomicU64,
}

impl<B: CameraBackend + Clone> fmt::Debug for Registry<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("sessions", &self.lock_sessions().len())
            .finish_non_exhaustive()
    }
}

impl<B: CameraBackend + Clone> Registry<B> {
    /// Create a registry whose sessions use `backend` and default settings.
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, CaptureConfig::default())
    }

    /// Create a registry whose sessions start from `config`.
    pub fn with_config(backend: B, config: CaptureConfig) -> Self {
        Self {
            backend,
            config,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new unopened session; `None` selects the first device.
    pub fn create(&self, query: Option<DeviceQuery>) -> Handle {
        let config = self
            .config
            .clone()
            .with_query(query.unwrap_or_default());
        let handle = Handle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = CaptureSession::new(self.backend.clone(), config);
        let entry = Entry {
            handoff: session.handoff(),
            session: Arc::new(Mutex::new(session)),
        };
        self.lock_sessions().insert(handle, entry);
        debug!(%handle, "session created");
        handle
    }

    /// Open the session and report its native dimensions.
    ///
    /// `None` uses the configured colour space. Returns `None` on any
    /// configuration failure; the session stays unopened.
    pub fn open(
        &self,
        handle: Handle,
        color_space: Option<ColorSpace>,
    ) -> Option<CaptureDimensions> {
        let result = self.with_session(handle, |session| {
            let color_space = color_space.unwrap_or_else(|| session.config().color_space());
            session.open(color_space)
        });
        report(handle, "open", result)
    }

    /// Begin streaming into `buffer`, sized `width * height * channels`.
    pub fn start(&self, handle: Handle, buffer: FrameBuffer) -> bool {
        let result = self.with_session(handle, |session| session.start(buffer));
        report(handle, "start", result).is_some()
    }

    /// Whether a converted frame is waiting. Unknown handles report `false`.
    ///
    /// Never waits on the session, even while another thread opens or starts it.
    pub fn is_available(&self, handle: Handle) -> bool {
        self.handoff(handle).is_some_and(|handoff| handoff.is_available())
    }

    /// Acknowledge the current frame.
    pub fn mark_consumed(&self, handle: Handle) {
        if let Some(handoff) = self.handoff(handle) {
            handoff.mark_consumed();
        }
    }

    /// Halt streaming; a later `start` resumes without renegotiating.
    pub fn stop(&self, handle: Handle) {
        let _ = self.with_session(handle, |session| {
            session.stop();
            Ok(())
        });
    }

    /// Release the session and invalidate `handle`.
    ///
    /// Returns `false` if the handle was unknown or already destroyed.
    pub fn destroy(&self, handle: Handle) -> bool {
        let Some(entry) = self.lock_sessions().remove(&handle) else {
            debug!(%handle, "destroy on unknown handle");
            return false;
        };
        entry
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release();
        debug!(%handle, "session destroyed");
        true
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.lock_sessions().is_empty()
    }

    fn with_session<T, F>(&self, handle: Handle, f: F) -> Result<T>
    where
        F: FnOnce(&mut CaptureSession<B>) -> Result<T>,
    {
        let session = self
            .lock_sessions()
            .get(&handle)
            .map(|entry| Arc::clone(&entry.session))
            .ok_or(CameraError::UnknownHandle(handle.0))?;
        let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut session)
    }

    fn handoff(&self, handle: Handle) -> Option<Arc<FrameHandoff>> {
        self.lock_sessions()
            .get(&handle)
            .map(|entry| Arc::clone(&entry.handoff))
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<Handle, Entry<B>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn report<T>(handle: Handle, operation: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(%handle, operation, %err, "capture operation failed");
            None
        }
    }
}
