//! Broadcast cancellation shared by every clock task.
//!
//! Each task takes one [`ShutdownListener`] and selects on [`ShutdownListener::wait`]
//! next to its periodic wait. Requesting shutdown wakes all of them at once.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::watch::{Receiver, Watch};

use crate::{Error, Result};

/// Maximum number of tasks that can listen for shutdown.
pub const MAX_LISTENERS: usize = 6;

/// Owner of the shutdown flag. Lives in a `static`.
pub struct Shutdown(Watch<CriticalSectionRawMutex, (), MAX_LISTENERS>);

impl Shutdown {
    #[must_use]
    pub const fn new() -> Self {
        Self(Watch::new())
    }

    /// Hand out a listener for one task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownListenersExhausted`] once [`MAX_LISTENERS`] are taken.
    pub fn listener(&self) -> Result<ShutdownListener<'_>> {
        self.0
            .receiver()
            .map(ShutdownListener)
            .ok_or(Error::ShutdownListenersExhausted)
    }

    /// Ask every listening task to stop.
    pub fn request(&self) {
        self.0.sender().send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// One task's view of the shutdown flag.
pub struct ShutdownListener<'a>(Receiver<'a, CriticalSectionRawMutex, (), MAX_LISTENERS>);

impl ShutdownListener<'_> {
    /// Resolve once shutdown has been requested, including requests made before the call.
    pub async fn wait(&mut self) {
        self.0.get().await;
    }

    /// Whether shutdown has already been requested.
    pub fn is_requested(&mut self) -> bool {
        self.0.try_get().is_some()
    }
}
