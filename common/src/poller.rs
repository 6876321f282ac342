use std::time::Duration;

use log::debug;
use serde::de::DeserializeOwned;

use crate::{
    error::{PollError, TransportError},
    ports::HttpTransport,
};

const CONFIRM_BODY: &[u8] = b"{}";

/// Issues bounded GET/POST calls and decodes JSON replies.
///
/// Never retries; a failed call is reported to the caller, whose own
/// interval decides when to try again.
#[derive(Debug)]
pub struct RemotePoller<T> {
    transport: T,
}

impl<T: HttpTransport> RemotePoller<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn get<P: DeserializeOwned>(&mut self, url: &str, timeout_ms: u64) -> Result<P, PollError> {
        let response = self
            .transport
            .get(url, Duration::from_millis(timeout_ms))?;
        if response.status != 200 {
            return Err(PollError::HttpStatus(response.status));
        }

        debug!("GET {url} -> {} bytes", response.body.len());
        serde_json::from_slice(&response.body)
            .map_err(|err| TransportError::new(format!("invalid JSON from {url}: {err}")).into())
    }

    pub fn post(&mut self, url: &str, timeout_ms: u64) -> Result<(), PollError> {
        let response = self
            .transport
            .post(url, CONFIRM_BODY, Duration::from_millis(timeout_ms))?;
        if response.status != 200 {
            return Err(PollError::HttpStatus(response.status));
        }
        Ok(())
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
