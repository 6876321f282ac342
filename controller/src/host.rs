use std::{
    convert::Infallible,
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use chrono_tz::Tz;
use embedded_hal::digital::{ErrorType, OutputPin};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use siren_common::{
    ClockSource, Controller, HttpResponse, HttpTransport, NetworkLink, RuntimeConfig,
    TransportError,
};

use crate::mock_service;

const MAX_HTTP_BODY: usize = 4096;
const DEFAULT_MOCK_PORT: u16 = 8000;

pub fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut runtime = RuntimeConfig::default();
    if let Ok(timezone) = std::env::var("SIREN_TIMEZONE") {
        runtime.timezone = timezone;
    }
    runtime.sanitize();
    let timezone = parse_timezone(&runtime.timezone);

    match std::env::var("SIREN_BASE_URL") {
        Ok(base) => runtime.network.set_base_url(&base),
        Err(_) => {
            let port = std::env::var("SIREN_MOCK_PORT")
                .ok()
                .and_then(|value| value.parse::<u16>().ok())
                .unwrap_or(DEFAULT_MOCK_PORT);
            let addr = mock_service::spawn(port, timezone)?;
            runtime.network.set_base_url(&format!("http://{addr}"));
        }
    }
    apply_url_overrides(&mut runtime);
    runtime
        .network
        .validate()
        .context("invalid network configuration")?;

    info!(
        "siren controller (host) polling command=`{}` schedule=`{}`",
        runtime.network.command_url, runtime.network.schedule_url
    );

    let transport = ReqwestTransport::new()?;
    let mut controller = Controller::from_config(
        &runtime,
        SystemClock { timezone },
        transport,
        LoggingPin::new("siren"),
        LoggingPin::new("status-led"),
    )
    .map_err(|err| anyhow!("failed to initialize siren: {err}"))?;

    let mut link = HostLink;
    let loop_delay = Duration::from_millis(runtime.siren.loop_delay_ms);
    loop {
        controller.tick(monotonic_ms(), &mut link, &mut ());
        thread::sleep(loop_delay);
    }
}

fn apply_url_overrides(runtime: &mut RuntimeConfig) {
    if let Ok(url) = std::env::var("SIREN_SCHEDULE_URL") {
        runtime.network.schedule_url = url;
    }
    if let Ok(url) = std::env::var("SIREN_COMMAND_URL") {
        runtime.network.command_url = url;
    }
    if let Ok(url) = std::env::var("SIREN_CONFIRM_URL") {
        runtime.network.confirm_url = url;
    }
}

fn parse_timezone(timezone: &str) -> Tz {
    timezone.parse::<Tz>().unwrap_or_else(|err| {
        warn!("unknown timezone `{timezone}` ({err}); using UTC");
        Tz::UTC
    })
}

/// Host wall clock; always considered synchronized.
struct SystemClock {
    timezone: Tz,
}

impl ClockSource for SystemClock {
    fn now(&self) -> Option<DateTime<FixedOffset>> {
        let local = Utc::now().with_timezone(&self.timezone);
        Some(local.with_timezone(&local.offset().fix()))
    }
}

struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    fn new() -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("siren-controller/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }

    fn finish(
        request: reqwest::blocking::RequestBuilder,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let response = request.timeout(timeout).send().map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(transport_error)?;
        if body.len() > MAX_HTTP_BODY {
            return Err(TransportError::new("response body too large"));
        }
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&mut self, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError> {
        Self::finish(
            self.client.get(url).header("accept", "application/json"),
            timeout,
        )
    }

    fn post(
        &mut self,
        url: &str,
        body: &[u8],
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        Self::finish(
            self.client
                .post(url)
                .header("content-type", "application/json")
                .body(body.to_vec()),
            timeout,
        )
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    TransportError::new(err.to_string())
}

/// Stands in for a GPIO line by logging level changes.
struct LoggingPin {
    name: &'static str,
    high: Option<bool>,
}

impl LoggingPin {
    fn new(name: &'static str) -> Self {
        Self { name, high: None }
    }

    fn set(&mut self, high: bool) {
        if self.high == Some(high) {
            return;
        }
        self.high = Some(high);
        let level = if high { "HIGH" } else { "LOW" };
        if self.name == "siren" {
            info!("{} -> {level}", self.name);
        } else {
            debug!("{} -> {level}", self.name);
        }
    }
}

impl ErrorType for LoggingPin {
    type Error = Infallible;
}

impl OutputPin for LoggingPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set(true);
        Ok(())
    }
}

/// The host network is assumed up; a restart request ends the process.
struct HostLink;

impl NetworkLink for HostLink {
    fn is_connected(&mut self) -> bool {
        true
    }

    fn reconnect(&mut self) {}

    fn restart(&mut self) {
        warn!("restart requested; exiting");
        std::process::exit(1);
    }
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
