pub mod clock;
pub mod command;
pub mod config;
pub mod connectivity;
pub mod controller;
pub mod endpoints;
pub mod error;
pub mod heartbeat;
pub mod poller;
pub mod ports;
pub mod schedule;
pub mod scheduler;
pub mod siren;
pub mod types;
pub mod update;

#[cfg(test)]
mod testing;

pub use clock::{Clock, LocalTime};
pub use command::{AcceptedCommand, CommandChecker};
pub use config::{HardwareConfig, NetworkConfig, RuntimeConfig, SirenConfig};
pub use connectivity::{ConnectivitySupervisor, LinkCheck};
pub use controller::Controller;
pub use endpoints::Endpoints;
pub use error::{ConfigError, PollError, SirenError, TransportError};
pub use ports::{
    BackgroundService, ClockSource, HttpResponse, HttpTransport, NetworkLink, UpdateError,
    UpdateObserver,
};
pub use schedule::{DayOfWeek, ScheduleChecker, ScheduleEntry};
pub use siren::{Siren, SirenState};
pub use types::{ActivationDecision, ControllerStatus, ManualCommand, SchedulePayload, TriggerSource};
pub use update::{report_image_confirmation, LogUpdateObserver};
