use log::{info, warn};

use crate::ports::{UpdateError, UpdateObserver};

/// Reports firmware update progress to the log, once per 10% step.
#[derive(Debug, Default)]
pub struct LogUpdateObserver {
    last_pct: Option<u8>,
}

impl LogUpdateObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn progress_pct(done: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    Some((done.saturating_mul(100) / total).min(100) as u8)
}

/// Closes out an update once the new image has run a full control tick.
/// Images that booted without a pending update are not reported.
pub fn report_image_confirmation<O: UpdateObserver>(
    observer: &mut O,
    was_pending: bool,
    confirmed: bool,
) {
    match (was_pending, confirmed) {
        (false, _) => {}
        (true, true) => observer.on_end(),
        (true, false) => observer.on_error(UpdateError::End),
    }
}

impl UpdateObserver for LogUpdateObserver {
    fn on_start(&mut self) {
        self.last_pct = None;
        info!("firmware update started");
    }

    fn on_progress(&mut self, done: u64, total: u64) {
        let Some(pct) = progress_pct(done, total) else {
            return;
        };
        let step = pct / 10 * 10;
        if self.last_pct.map(|last| step > last).unwrap_or(true) {
            self.last_pct = Some(step);
            info!("firmware update {pct}%");
        }
    }

    fn on_end(&mut self) {
        info!("firmware update finished");
    }

    fn on_error(&mut self, error: UpdateError) {
        let reason = match error {
            UpdateError::Auth => "authentication failed",
            UpdateError::Begin => "could not begin",
            UpdateError::Connect => "connection failed",
            UpdateError::Receive => "receive failed",
            UpdateError::End => "could not finalize",
        };
        warn!("firmware update error: {reason}");
    }
}
