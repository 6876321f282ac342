//! Scripted fakes for the platform ports.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
    time::Duration,
};

use chrono::{DateTime, FixedOffset, TimeZone};
use embedded_hal::digital::{ErrorKind, ErrorType, OutputPin};

use crate::{
    error::TransportError,
    ports::{ClockSource, HttpResponse, HttpTransport, NetworkLink},
};

#[derive(Debug, Default)]
pub struct ScriptedTransport {
    routes: HashMap<String, Result<HttpResponse, TransportError>>,
    log: Vec<String>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&mut self, url: &str, status: u16, body: &str) {
        self.routes.insert(
            url.to_string(),
            Ok(HttpResponse {
                status,
                body: body.as_bytes().to_vec(),
            }),
        );
    }

    pub fn fail(&mut self, url: &str, message: &str) {
        self.routes
            .insert(url.to_string(), Err(TransportError::new(message)));
    }

    pub fn requests(&self) -> Vec<String> {
        self.log.clone()
    }

    pub fn gets_to(&self, url: &str) -> usize {
        self.count("GET", url)
    }

    pub fn posts_to(&self, url: &str) -> usize {
        self.count("POST", url)
    }

    fn count(&self, method: &str, url: &str) -> usize {
        let prefix = format!("{method} {url} ");
        self.log.iter().filter(|line| line.starts_with(&prefix)).count()
    }

    fn reply(&mut self, method: &str, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError> {
        self.log
            .push(format!("{method} {url} {}ms", timeout.as_millis()));
        self.routes
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(TransportError::new(format!("no route to {url}"))))
    }
}

impl HttpTransport for ScriptedTransport {
    fn get(&mut self, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError> {
        self.reply("GET", url, timeout)
    }

    fn post(
        &mut self,
        url: &str,
        _body: &[u8],
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.reply("POST", url, timeout)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Option<DateTime<FixedOffset>>,
}

impl ManualClock {
    pub fn unsynchronized() -> Self {
        Self { now: None }
    }

    pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Self {
        let mut clock = Self::unsynchronized();
        clock.set(year, month, day, hour, minute, second);
        clock
    }

    pub fn set(&mut self, year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) {
        self.now = FixedOffset::west_opt(3 * 3600)
            .and_then(|tz| tz.with_ymd_and_hms(year, month, day, hour, minute, second).single());
    }

    pub fn advance_secs(&mut self, secs: i64) {
        self.now = self.now.map(|now| now + chrono::Duration::seconds(secs));
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> Option<DateTime<FixedOffset>> {
        self.now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinFault;

impl embedded_hal::digital::Error for PinFault {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Output pin whose writes stay observable after it is moved into a driver.
#[derive(Debug, Clone, Default)]
pub struct RecordingPin {
    writes: Rc<RefCell<Vec<bool>>>,
    faulty: Rc<Cell<bool>>,
}

impl RecordingPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<bool> {
        self.writes.borrow().clone()
    }

    pub fn is_high(&self) -> bool {
        self.writes.borrow().last().copied().unwrap_or(false)
    }

    pub fn set_faulty(&self, faulty: bool) {
        self.faulty.set(faulty);
    }

    fn write(&mut self, level: bool) -> Result<(), PinFault> {
        if self.faulty.get() {
            return Err(PinFault);
        }
        self.writes.borrow_mut().push(level);
        Ok(())
    }
}

impl ErrorType for RecordingPin {
    type Error = PinFault;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedLink {
    pub connected: bool,
    pub reconnects: u32,
    pub restarts: u32,
}

impl ScriptedLink {
    pub fn up() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    pub fn down() -> Self {
        Self::default()
    }
}

impl NetworkLink for ScriptedLink {
    fn is_connected(&mut self) -> bool {
        self.connected
    }

    fn reconnect(&mut self) {
        self.reconnects += 1;
    }

    fn restart(&mut self) {
        self.restarts += 1;
    }
}
