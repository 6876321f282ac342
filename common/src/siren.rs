use embedded_hal::digital::OutputPin;
use log::{info, warn};

use crate::{error::SirenError, types::TriggerSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SirenState {
    Inactive,
    Active { since_ms: u64, source: TriggerSource },
}

/// Sole owner of the siren output line.
///
/// Activation is idempotent: a trigger while already active neither
/// re-drives the line nor extends the timer. Every active period ends no
/// later than `max_duration_ms` after it began, whatever triggered it.
#[derive(Debug)]
pub struct Siren<P> {
    pin: P,
    active_high: bool,
    max_duration_ms: u64,
    state: SirenState,
}

impl<P: OutputPin> Siren<P> {
    pub fn new(pin: P, active_high: bool, max_duration_ms: u64) -> Result<Self, SirenError> {
        let mut siren = Self {
            pin,
            active_high,
            max_duration_ms,
            state: SirenState::Inactive,
        };
        siren.drive(false)?;
        Ok(siren)
    }

    pub fn state(&self) -> &SirenState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SirenState::Active { .. })
    }

    pub fn source(&self) -> Option<&TriggerSource> {
        match &self.state {
            SirenState::Active { source, .. } => Some(source),
            SirenState::Inactive => None,
        }
    }

    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        match self.state {
            SirenState::Active { since_ms, .. } => self
                .max_duration_ms
                .saturating_sub(now_ms.saturating_sub(since_ms)),
            SirenState::Inactive => 0,
        }
    }

    /// Returns `Ok(true)` when this call switched the siren on.
    pub fn activate(&mut self, source: TriggerSource, now_ms: u64) -> Result<bool, SirenError> {
        if self.is_active() {
            return Ok(false);
        }

        self.drive(true)?;
        info!("siren on (source: {source})");
        self.state = SirenState::Active {
            since_ms: now_ms,
            source,
        };
        Ok(true)
    }

    /// Safety cutoff; call every loop tick. Returns `Ok(true)` when the
    /// siren was switched off by this call.
    pub fn check_timeout(&mut self, now_ms: u64) -> Result<bool, SirenError> {
        let SirenState::Active { since_ms, .. } = self.state else {
            return Ok(false);
        };
        if now_ms.saturating_sub(since_ms) < self.max_duration_ms {
            return Ok(false);
        }

        // Stay Active on a failed write so the next tick retries the cutoff.
        self.drive(false)?;
        info!(
            "siren off after {} ms",
            now_ms.saturating_sub(since_ms)
        );
        self.state = SirenState::Inactive;
        Ok(true)
    }

    /// Drives the line inactive regardless of elapsed time.
    pub fn force_off(&mut self) -> Result<(), SirenError> {
        self.drive(false)?;
        if self.is_active() {
            info!("siren forced off");
        }
        self.state = SirenState::Inactive;
        Ok(())
    }

    fn drive(&mut self, on: bool) -> Result<(), SirenError> {
        let result = if on == self.active_high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };

        result.map_err(|err| {
            warn!("siren output write failed: {err:?}");
            SirenError::Output
        })
    }
}
