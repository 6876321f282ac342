use serde::{Deserialize, Serialize};

use crate::{endpoints::Endpoints, error::ConfigError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SirenConfig {
    pub schedule_poll_interval_ms: u64,
    pub command_poll_interval_ms: u64,
    pub schedule_poll_timeout_ms: u64,
    pub command_poll_timeout_ms: u64,
    pub confirm_timeout_ms: u64,
    pub min_activation_ms: u64,
    pub max_activation_ms: u64,
    pub schedule_window_secs: u8,
    pub heartbeat_interval_ms: u64,
    pub reconnect_interval_ms: u64,
    pub reconnect_restart_threshold: u32,
    pub loop_delay_ms: u64,
}

impl Default for SirenConfig {
    fn default() -> Self {
        Self {
            schedule_poll_interval_ms: 1_000,
            command_poll_interval_ms: 1_000,
            schedule_poll_timeout_ms: 5_000,
            command_poll_timeout_ms: 2_000,
            confirm_timeout_ms: 2_000,
            min_activation_ms: 1_000,
            max_activation_ms: 5_000,
            schedule_window_secs: 5,
            heartbeat_interval_ms: 1_000,
            reconnect_interval_ms: 500,
            reconnect_restart_threshold: 10,
            loop_delay_ms: 10,
        }
    }
}

/// Ceiling on each network call; one tick makes at most three of them.
pub const MAX_NETWORK_TIMEOUT_MS: u64 = 8_000;

/// Worst-case time one tick can spend blocked on the network.
pub const MAX_TICK_NETWORK_MS: u64 = 3 * MAX_NETWORK_TIMEOUT_MS;

impl SirenConfig {
    pub fn sanitize(&mut self) {
        self.schedule_window_secs = self.schedule_window_secs.min(59);

        // Legacy matching only sees the seconds a poll lands on, so every
        // window must contain at least one poll.
        let window_span_ms = (u64::from(self.schedule_window_secs) + 1) * 1_000;
        self.schedule_poll_interval_ms = self.schedule_poll_interval_ms.clamp(100, window_span_ms);
        self.command_poll_interval_ms = self.command_poll_interval_ms.max(100);

        self.schedule_poll_timeout_ms = self
            .schedule_poll_timeout_ms
            .clamp(500, MAX_NETWORK_TIMEOUT_MS);
        // The command path must stay more responsive than the schedule path.
        self.command_poll_timeout_ms = self
            .command_poll_timeout_ms
            .clamp(250, self.schedule_poll_timeout_ms);
        self.confirm_timeout_ms = self
            .confirm_timeout_ms
            .clamp(250, MAX_NETWORK_TIMEOUT_MS);

        self.min_activation_ms = self.min_activation_ms.min(600_000);
        self.max_activation_ms = self
            .max_activation_ms
            .clamp(self.min_activation_ms.max(1), 600_000);

        self.heartbeat_interval_ms = self.heartbeat_interval_ms.max(50);
        self.reconnect_interval_ms = self.reconnect_interval_ms.max(50);
        self.reconnect_restart_threshold = self.reconnect_restart_threshold.max(1);
        self.loop_delay_ms = self.loop_delay_ms.min(1_000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub schedule_url: String,
    pub command_url: String,
    pub confirm_url: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let endpoints = Endpoints::from_base("http://192.168.1.100:8000");
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            schedule_url: endpoints.schedule,
            command_url: endpoints.command,
            confirm_url: endpoints.confirm,
        }
    }
}

impl NetworkConfig {
    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            schedule: self.schedule_url.clone(),
            command: self.command_url.clone(),
            confirm: self.confirm_url.clone(),
        }
    }

    pub fn set_base_url(&mut self, base: &str) {
        let endpoints = Endpoints::from_base(base);
        self.schedule_url = endpoints.schedule;
        self.command_url = endpoints.command;
        self.confirm_url = endpoints.confirm;
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let urls = [
            ("schedule url must be http(s)", &self.schedule_url),
            ("command url must be http(s)", &self.command_url),
            ("confirm url must be http(s)", &self.confirm_url),
        ];
        for (reason, url) in urls {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(reason));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HardwareConfig {
    pub siren_pin: i32,
    pub status_led_pin: i32,
    pub siren_active_high: bool,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            siren_pin: 5,
            status_led_pin: 2,
            siren_active_high: true,
        }
    }
}

impl HardwareConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        if self.siren_pin < 0 {
            self.siren_pin = defaults.siren_pin;
        }
        if self.status_led_pin < 0 || self.status_led_pin == self.siren_pin {
            self.status_led_pin = if self.siren_pin == defaults.status_led_pin {
                defaults.siren_pin
            } else {
                defaults.status_led_pin
            };
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub siren: SirenConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    pub timezone: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            siren: SirenConfig::default(),
            network: NetworkConfig::default(),
            hardware: HardwareConfig::default(),
            timezone: "America/Sao_Paulo".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.siren.sanitize();
        self.hardware.sanitize();
        if self.timezone.trim().is_empty() {
            self.timezone = "UTC".to_string();
        }
    }
}
