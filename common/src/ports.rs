//! Capabilities the control core needs from the platform.
//!
//! The ESP-IDF runtime and the host simulation each implement these; tests
//! use scripted fakes. Output lines are plain [`embedded_hal`] pins.

use std::time::Duration;

use chrono::{DateTime, FixedOffset};

use crate::error::TransportError;

/// Wall-clock source. `None` until the first time sync has completed.
pub trait ClockSource {
    fn now(&self) -> Option<DateTime<FixedOffset>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Blocking HTTP with a hard timeout ceiling. Calls cannot be cancelled
/// once started.
pub trait HttpTransport {
    fn get(&mut self, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError>;

    fn post(
        &mut self,
        url: &str,
        body: &[u8],
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}

/// Wireless network attachment.
pub trait NetworkLink {
    fn is_connected(&mut self) -> bool;

    /// Start a reconnect attempt. Must not block past the attempt itself.
    fn reconnect(&mut self);

    /// Reboot the device. On hardware this does not return.
    fn restart(&mut self);
}

/// Work that must get a slice of every loop iteration, e.g. an OTA agent.
pub trait BackgroundService {
    fn poll(&mut self);
}

impl BackgroundService for () {
    fn poll(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    Auth,
    Begin,
    Connect,
    Receive,
    End,
}

/// Progress hooks for a firmware update agent. The ESP runtime reports the
/// post-boot confirmation of a new image through it; a download agent would
/// drive the start and progress hooks.
pub trait UpdateObserver {
    fn on_start(&mut self);
    fn on_progress(&mut self, done: u64, total: u64);
    fn on_end(&mut self);
    fn on_error(&mut self, error: UpdateError);
}
