use embedded_hal::digital::OutputPin;
use log::warn;

/// Status indicator blinking at a fixed period while the loop is alive.
#[derive(Debug)]
pub struct Heartbeat<P> {
    pin: P,
    interval_ms: u64,
    last_toggle_ms: Option<u64>,
    lit: bool,
}

impl<P: OutputPin> Heartbeat<P> {
    pub fn new(pin: P, interval_ms: u64) -> Self {
        Self {
            pin,
            interval_ms,
            last_toggle_ms: None,
            lit: false,
        }
    }

    pub fn is_lit(&self) -> bool {
        self.lit
    }

    /// Returns `true` when the indicator was toggled.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        if let Some(last) = self.last_toggle_ms {
            if now_ms.saturating_sub(last) < self.interval_ms {
                return false;
            }
        }
        self.last_toggle_ms = Some(now_ms);

        let desired = !self.lit;
        let result = if desired {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };

        match result {
            Ok(()) => {
                self.lit = desired;
                true
            }
            Err(err) => {
                warn!("failed to drive status LED: {err:?}");
                false
            }
        }
    }
}
