use core::convert::TryInto;
use std::{
    cell::Cell,
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use chrono_tz::Tz;
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::{Read, Write},
    ota::SlotState,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::gpio::{Output, PinDriver};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{gpio::AnyOutputPin, modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    ota::EspOta,
    sntp::{EspSntp, SyncStatus},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use siren_common::{
    config::MAX_TICK_NETWORK_MS, report_image_confirmation, BackgroundService, ClockSource,
    Controller, HttpResponse, HttpTransport, LogUpdateObserver, NetworkLink, RuntimeConfig,
    TransportError, UpdateObserver,
};

const MAX_HTTP_BODY: usize = 4096;
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const WIFI_CONNECT_ATTEMPTS: u32 = 3;
const WIFI_RETRY_DELAY_MS: u64 = 1_000;
const RESTART_GRACE_MS: u64 = 100;

// A tick blocked on the network must never starve the watchdog.
const _: () = assert!(MAX_TICK_NETWORK_MS < WATCHDOG_TIMEOUT_SEC as u64 * 1_000);

type OutputLine = PinDriver<'static, AnyOutputPin, Output>;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let mut runtime = RuntimeConfig::default();
    apply_build_overrides(&mut runtime);
    runtime.sanitize();
    runtime
        .network
        .validate()
        .context("invalid compiled-in network configuration")?;

    info!(
        "siren controller starting: ssid=`{}`, command=`{}`, schedule=`{}`",
        runtime.network.wifi_ssid, runtime.network.command_url, runtime.network.schedule_url,
    );

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, .. } = Peripherals::take()?;

    let siren_pin = init_output(runtime.hardware.siren_pin).context("siren output unavailable")?;
    let status_led =
        init_output(runtime.hardware.status_led_pin).context("status LED unavailable")?;

    let mut link = WifiLink::start(modem, sys_loop, nvs_partition, &runtime)
        .context("wifi startup failed")?;

    let sntp = EspSntp::new_default().context("failed to start SNTP")?;
    info!("SNTP initialized");
    let clock = SntpClock::new(sntp, &runtime.timezone);

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    if let Err(err) = add_current_task_to_watchdog() {
        warn!("failed to register control loop with watchdog: {err:#}");
    }

    let mut controller =
        Controller::from_config(&runtime, clock, EspHttpTransport, siren_pin, status_led)
            .map_err(|err| anyhow!("failed to initialize siren: {err}"))?;
    let mut ota: OtaSlotGuard = OtaSlotGuard::default();
    let loop_delay = Duration::from_millis(runtime.siren.loop_delay_ms);

    info!("entering control loop");
    loop {
        feed_watchdog();
        controller.tick(monotonic_ms(), &mut link, &mut ota);
        thread::sleep(loop_delay);
    }
}

fn apply_build_overrides(runtime: &mut RuntimeConfig) {
    if let Some(ssid) = option_env!("WIFI_SSID") {
        runtime.network.wifi_ssid = ssid.to_string();
    }
    if let Some(pass) = option_env!("WIFI_PASS") {
        runtime.network.wifi_pass = pass.to_string();
    }
    if let Some(base) = option_env!("SIREN_BASE_URL") {
        runtime.network.set_base_url(base);
    }
}

fn init_output(pin: i32) -> anyhow::Result<OutputLine> {
    let driver = unsafe { PinDriver::output(AnyOutputPin::new(pin)) }
        .with_context(|| format!("failed to configure GPIO{pin} as output"))?;
    Ok(driver)
}

struct WifiLink {
    wifi: BlockingWifi<EspWifi<'static>>,
}

impl WifiLink {
    fn start(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs_partition: EspDefaultNvsPartition,
        runtime: &RuntimeConfig,
    ) -> anyhow::Result<Self> {
        let network = &runtime.network;
        let esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
        let mut wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;

        let auth_method = if network.wifi_pass.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: network
                .wifi_ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi ssid too long"))?,
            password: network
                .wifi_pass
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi password too long"))?,
            auth_method,
            ..Default::default()
        }))?;

        wifi.start()?;
        info!("wifi started, connecting to `{}`", network.wifi_ssid);

        for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
            match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
                Ok(()) => {
                    info!("wifi connected on attempt {attempt}");
                    break;
                }
                Err(err) => {
                    warn!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS} failed: {err:#}");
                    if attempt < WIFI_CONNECT_ATTEMPTS {
                        let _ = wifi.disconnect();
                        thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
                    }
                }
            }
        }
        disable_wifi_power_save();

        // The control loop keeps retrying; an offline start is not fatal.
        Ok(Self { wifi })
    }
}

impl NetworkLink for WifiLink {
    fn is_connected(&mut self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    fn reconnect(&mut self) {
        let _ = self.wifi.wifi_mut().disconnect();
        if let Err(err) = self.wifi.wifi_mut().connect() {
            warn!("wifi reconnect request failed: {err:#}");
        }
    }

    fn restart(&mut self) {
        warn!("restarting device");
        thread::sleep(Duration::from_millis(RESTART_GRACE_MS));
        unsafe { esp_idf_svc::sys::esp_restart() };
    }
}

/// Local time in the configured zone, available once SNTP has synced.
struct SntpClock {
    sntp: EspSntp<'static>,
    timezone: Tz,
    synced: Cell<bool>,
}

impl SntpClock {
    fn new(sntp: EspSntp<'static>, timezone: &str) -> Self {
        let timezone = timezone.parse::<Tz>().unwrap_or_else(|err| {
            warn!("unknown timezone `{timezone}` ({err}); using UTC");
            Tz::UTC
        });
        Self {
            sntp,
            timezone,
            synced: Cell::new(false),
        }
    }
}

impl ClockSource for SntpClock {
    fn now(&self) -> Option<DateTime<FixedOffset>> {
        if !self.synced.get() {
            if self.sntp.get_sync_status() != SyncStatus::Completed {
                return None;
            }
            info!("time synchronized");
            self.synced.set(true);
        }

        let local = Utc::now().with_timezone(&self.timezone);
        Some(local.with_timezone(&local.offset().fix()))
    }
}

/// One connection per request so every call gets its own timeout.
struct EspHttpTransport;

impl EspHttpTransport {
    fn client(timeout: Duration) -> Result<HttpClient<EspHttpConnection>, TransportError> {
        let http_conf = HttpClientConfiguration {
            timeout: Some(timeout),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let connection = EspHttpConnection::new(&http_conf).map_err(transport_error)?;
        Ok(HttpClient::wrap(connection))
    }
}

impl HttpTransport for EspHttpTransport {
    fn get(&mut self, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError> {
        let mut client = Self::client(timeout)?;
        let request = client
            .request(Method::Get, url, &[("accept", "application/json")])
            .map_err(transport_error)?;
        let mut response = request.submit().map_err(transport_error)?;
        let status = response.status();
        let body = read_body(&mut response)?;
        Ok(HttpResponse { status, body })
    }

    fn post(
        &mut self,
        url: &str,
        body: &[u8],
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let mut client = Self::client(timeout)?;
        let content_length = body.len().to_string();
        let headers = [
            ("content-type", "application/json"),
            ("content-length", content_length.as_str()),
        ];
        let mut request = client
            .request(Method::Post, url, &headers)
            .map_err(transport_error)?;
        request.write_all(body).map_err(transport_error)?;
        request.flush().map_err(transport_error)?;
        let mut response = request.submit().map_err(transport_error)?;
        let status = response.status();
        let body = read_body(&mut response)?;
        Ok(HttpResponse { status, body })
    }
}

fn read_body<R: Read>(response: &mut R) -> Result<Vec<u8>, TransportError>
where
    R::Error: core::fmt::Debug,
{
    let mut body = Vec::new();
    let mut chunk = [0_u8; 512];
    loop {
        let read = response.read(&mut chunk).map_err(transport_error)?;
        if read == 0 {
            return Ok(body);
        }
        if body.len() + read > MAX_HTTP_BODY {
            return Err(TransportError::new("response body too large"));
        }
        body.extend_from_slice(&chunk[..read]);
    }
}

fn transport_error<E: core::fmt::Debug>(err: E) -> TransportError {
    TransportError::new(format!("{err:?}"))
}

/// Confirms a freshly flashed image once the control loop has completed a
/// full tick, so a broken build rolls back on the next boot.
#[derive(Default)]
struct OtaSlotGuard<O = LogUpdateObserver> {
    polls: u8,
    observer: O,
}

impl<O: UpdateObserver> OtaSlotGuard<O> {
    fn confirm_running_slot(&mut self) {
        let mut ota = match EspOta::new() {
            Ok(ota) => ota,
            Err(err) => {
                warn!("OTA unavailable: {err:?}");
                return;
            }
        };
        let was_pending = match ota.get_running_slot() {
            Ok(slot) => matches!(slot.state, SlotState::Unverified),
            Err(err) => {
                warn!("failed to read running OTA slot: {err:?}");
                false
            }
        };
        let confirmed = match ota.mark_running_slot_valid() {
            Ok(()) => {
                info!("running OTA slot marked valid");
                true
            }
            Err(err) => {
                warn!("failed to mark running OTA slot valid: {err:?}");
                false
            }
        };
        report_image_confirmation(&mut self.observer, was_pending, confirmed);
    }
}

impl<O: UpdateObserver> BackgroundService for OtaSlotGuard<O> {
    fn poll(&mut self) {
        if self.polls >= 2 {
            return;
        }
        self.polls += 1;
        if self.polls == 2 {
            self.confirm_running_slot();
        }
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
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
