//! The cooperative control loop.
//!
//! One [`Controller::tick`] runs, in a fixed order:
//!
//! ```text
//! background poll -> clock refresh -> connectivity -> siren timeout
//!     -> command check (if due) -> schedule check (if due) -> heartbeat
//! ```
//!
//! Network tasks are skipped while the link is down; the siren timeout is
//! evaluated every tick regardless. A slow poll delays everything after it
//! in the same tick.

use embedded_hal::digital::OutputPin;
use log::{debug, warn};

use crate::{
    clock::Clock,
    command::CommandChecker,
    config::{RuntimeConfig, SirenConfig},
    connectivity::{ConnectivitySupervisor, LinkCheck},
    endpoints::Endpoints,
    error::SirenError,
    heartbeat::Heartbeat,
    poller::RemotePoller,
    ports::{BackgroundService, ClockSource, HttpTransport, NetworkLink},
    schedule::ScheduleChecker,
    scheduler::PeriodicTask,
    siren::Siren,
    types::{ControllerStatus, TriggerSource},
};

pub struct Controller<C, T, S, L> {
    config: SirenConfig,
    endpoints: Endpoints,
    clock: Clock<C>,
    poller: RemotePoller<T>,
    siren: Siren<S>,
    heartbeat: Heartbeat<L>,
    connectivity: ConnectivitySupervisor,
    commands: CommandChecker,
    schedule: ScheduleChecker,
    command_task: PeriodicTask,
    schedule_task: PeriodicTask,
}

impl<C, T, S, L> Controller<C, T, S, L>
where
    C: ClockSource,
    T: HttpTransport,
    S: OutputPin,
    L: OutputPin,
{
    pub fn new(
        config: SirenConfig,
        endpoints: Endpoints,
        clock: C,
        transport: T,
        siren: Siren<S>,
        status_led: L,
    ) -> Self {
        Self {
            endpoints,
            clock: Clock::new(clock),
            poller: RemotePoller::new(transport),
            siren,
            heartbeat: Heartbeat::new(status_led, config.heartbeat_interval_ms),
            connectivity: ConnectivitySupervisor::new(
                config.reconnect_restart_threshold,
                config.reconnect_interval_ms,
            ),
            commands: CommandChecker::new(),
            schedule: ScheduleChecker::new(config.schedule_window_secs),
            command_task: PeriodicTask::new(config.command_poll_interval_ms),
            schedule_task: PeriodicTask::new(config.schedule_poll_interval_ms),
            config,
        }
    }

    /// Wires a controller from sanitized runtime configuration.
    pub fn from_config(
        config: &RuntimeConfig,
        clock: C,
        transport: T,
        siren_pin: S,
        status_led: L,
    ) -> Result<Self, SirenError> {
        let siren = Siren::new(
            siren_pin,
            config.hardware.siren_active_high,
            config.siren.max_activation_ms,
        )?;
        Ok(Self::new(
            config.siren.clone(),
            config.network.endpoints(),
            clock,
            transport,
            siren,
            status_led,
        ))
    }

    pub fn siren(&self) -> &Siren<S> {
        &self.siren
    }

    pub fn poller(&self) -> &RemotePoller<T> {
        &self.poller
    }

    pub fn poller_mut(&mut self) -> &mut RemotePoller<T> {
        &mut self.poller
    }

    pub fn clock_mut(&mut self) -> &mut Clock<C> {
        &mut self.clock
    }

    pub fn tick<N, B>(&mut self, now_ms: u64, link: &mut N, background: &mut B)
    where
        N: NetworkLink + ?Sized,
        B: BackgroundService + ?Sized,
    {
        background.poll();
        self.clock.refresh();

        let online = match self.connectivity.check(link, now_ms) {
            LinkCheck::Connected => true,
            LinkCheck::Disconnected => false,
            LinkCheck::RestartRequired => {
                if let Err(err) = self.siren.force_off() {
                    warn!("could not silence siren before restart: {err}");
                }
                link.restart();
                false
            }
        };

        if let Err(err) = self.siren.check_timeout(now_ms) {
            warn!("siren cutoff failed, retrying next tick: {err}");
        }

        if online {
            self.run_command_check(now_ms);
            self.run_schedule_check(now_ms);
        }

        if self.heartbeat.tick(now_ms) {
            debug!("status: {:?}", self.status(now_ms));
        }
    }

    pub fn status(&self, now_ms: u64) -> ControllerStatus {
        ControllerStatus {
            siren_active: self.siren.is_active(),
            activation_source: self.siren.source().map(ToString::to_string),
            active_remaining_ms: self.siren.remaining_ms(now_ms),
            time_synced: self.clock.is_synchronized(),
            wifi_connected: self.connectivity.is_connected(),
            reconnect_failures: self.connectivity.consecutive_failures(),
            last_command_id: self.commands.last_command_id().map(str::to_string),
            next_alarm: self.schedule.next_alarm().map(str::to_string),
        }
    }

    fn run_command_check(&mut self, now_ms: u64) {
        if !self.command_task.start_if_due(now_ms) {
            return;
        }

        let Some(accepted) = self.commands.poll(
            &mut self.poller,
            &self.endpoints.command,
            self.config.command_poll_timeout_ms,
        ) else {
            return;
        };

        // Unconfirmed and forgotten, so the service keeps it pending and the
        // next poll retries.
        if let Err(err) = self.trigger(accepted.source.clone(), now_ms) {
            warn!("manual command {} not executed: {err}", accepted.id);
            self.commands.forget(&accepted.id);
            return;
        }
        self.commands.confirm(
            &mut self.poller,
            &self.endpoints.confirm,
            self.config.confirm_timeout_ms,
            &accepted,
        );
    }

    fn run_schedule_check(&mut self, now_ms: u64) {
        if !self.schedule_task.start_if_due(now_ms) {
            return;
        }

        let now = self.clock.now();
        let trigger = self.schedule.poll(
            &mut self.poller,
            &self.endpoints.schedule,
            self.config.schedule_poll_timeout_ms,
            now.as_ref(),
            self.siren.is_active(),
        );

        if let Some(source) = trigger {
            if let Err(err) = self.trigger(source, now_ms) {
                warn!("scheduled activation not executed: {err}");
            }
        }
    }

    fn trigger(&mut self, source: TriggerSource, now_ms: u64) -> Result<(), SirenError> {
        if !self.siren.activate(source, now_ms)? {
            debug!("siren already active; trigger ignored");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::{ManualClock, RecordingPin, ScriptedLink, ScriptedTransport};

    const BASE: &str = "http://sirene.local";

    type TestController = Controller<ManualClock, ScriptedTransport, RecordingPin, RecordingPin>;

    struct Rig {
        controller: TestController,
        siren_pin: RecordingPin,
        link: ScriptedLink,
        endpoints: Endpoints,
    }

    fn rig_with(config: SirenConfig, clock: ManualClock) -> Rig {
        let endpoints = Endpoints::from_base(BASE);
        let siren_pin = RecordingPin::new();
        let siren = Siren::new(siren_pin.clone(), true, config.max_activation_ms).unwrap();
        let mut transport = ScriptedTransport::new();
        transport.respond(&endpoints.command, 200, r#"{"command":"desligar"}"#);
        transport.respond(&endpoints.schedule, 200, r#"{"should_activate":false}"#);
        transport.respond(&endpoints.confirm, 200, r#"{"status":"success"}"#);

        Rig {
            controller: Controller::new(
                config,
                endpoints.clone(),
                clock,
                transport,
                siren,
                RecordingPin::new(),
            ),
            siren_pin,
            link: ScriptedLink::up(),
            endpoints,
        }
    }

    fn rig() -> Rig {
        rig_with(SirenConfig::default(), ManualClock::at(2026, 3, 2, 7, 29, 50))
    }

    impl Rig {
        fn tick(&mut self, now_ms: u64) {
            self.controller.tick(now_ms, &mut self.link, &mut ());
        }

        fn transport(&mut self) -> &mut ScriptedTransport {
            self.controller.poller_mut().transport_mut()
        }
    }

    #[test]
    fn scheduled_decision_activates_siren() {
        let mut rig = rig();
        let url = rig.endpoints.schedule.clone();
        rig.transport()
            .respond(&url, 200, r#"{"should_activate":true,"is_scheduled":true}"#);

        rig.tick(0);

        assert!(rig.siren_pin.is_high());
        assert_eq!(
            rig.controller.status(0).activation_source.as_deref(),
            Some("agendamento")
        );
    }

    #[test]
    fn siren_cut_off_at_max_duration_regardless_of_polls() {
        let mut rig = rig();
        let url = rig.endpoints.schedule.clone();
        rig.transport()
            .respond(&url, 200, r#"{"should_activate":true,"is_scheduled":false}"#);

        rig.tick(1_000);
        assert!(rig.controller.siren().is_active());

        // Service keeps asking for activation; it must not extend the period.
        for now in (1_010..=5_990).step_by(10) {
            rig.tick(now);
            assert!(rig.controller.siren().is_active(), "inactive early at {now}");
        }
        rig.tick(5_999);
        assert!(rig.controller.siren().is_active());

        // The cutoff lands before the same tick's schedule poll, which then
        // starts a fresh period.
        rig.tick(6_001);
        assert_eq!(rig.siren_pin.writes(), vec![false, true, false, true]);
        assert_eq!(rig.controller.status(6_001).active_remaining_ms, 5_000);
    }

    #[test]
    fn duplicate_manual_command_activates_and_confirms_once() {
        let mut rig = rig();
        let command_url = rig.endpoints.command.clone();
        let confirm_url = rig.endpoints.confirm.clone();
        rig.transport()
            .respond(&command_url, 200, r#"{"command":"ligar","id":"42"}"#);

        rig.tick(0);
        assert!(rig.controller.siren().is_active());
        rig.tick(1_000);

        assert_eq!(rig.transport().gets_to(&command_url), 2);
        assert_eq!(rig.transport().posts_to(&confirm_url), 1);
        assert_eq!(rig.siren_pin.writes(), vec![false, true]);
    }

    #[test]
    fn failed_activation_is_neither_confirmed_nor_dropped() {
        let mut rig = rig();
        let command_url = rig.endpoints.command.clone();
        let confirm_url = rig.endpoints.confirm.clone();
        rig.transport()
            .respond(&command_url, 200, r#"{"command":"ligar","id":"42"}"#);

        rig.siren_pin.set_faulty(true);
        rig.tick(0);
        assert!(!rig.controller.siren().is_active());
        assert_eq!(rig.transport().posts_to(&confirm_url), 0);
        assert_eq!(rig.controller.status(0).last_command_id, None);

        rig.siren_pin.set_faulty(false);
        rig.tick(1_000);

        assert!(rig.controller.siren().is_active());
        assert_eq!(rig.transport().posts_to(&confirm_url), 1);
        assert_eq!(
            rig.controller.status(1_000).last_command_id.as_deref(),
            Some("42")
        );
    }

    #[test]
    fn command_checked_before_schedule() {
        let mut rig = rig();
        let command_url = rig.endpoints.command.clone();
        let schedule_url = rig.endpoints.schedule.clone();

        rig.tick(0);

        let requests = rig.transport().requests();
        assert_eq!(
            requests,
            vec![
                format!("GET {command_url} 2000ms"),
                format!("GET {schedule_url} 5000ms"),
            ]
        );
    }

    #[test]
    fn failed_poll_never_changes_siren_state() {
        let mut rig = rig();
        let command_url = rig.endpoints.command.clone();
        let schedule_url = rig.endpoints.schedule.clone();
        rig.transport().respond(&command_url, 404, "");
        rig.transport().fail(&schedule_url, "dns lookup failed");

        for now in (0..10_000).step_by(250) {
            rig.tick(now);
        }

        assert!(!rig.controller.siren().is_active());
        assert_eq!(rig.siren_pin.writes(), vec![false]);
        // Retries follow the task interval, never immediately.
        assert_eq!(rig.transport().gets_to(&schedule_url), 10);
    }

    #[test]
    fn network_tasks_skipped_while_offline_but_timeout_enforced() {
        let mut rig = rig();
        let command_url = rig.endpoints.command.clone();
        rig.transport()
            .respond(&command_url, 200, r#"{"command":"ligar","id":"1"}"#);
        rig.tick(0);
        assert!(rig.controller.siren().is_active());

        rig.link.connected = false;
        rig.tick(2_000);
        rig.tick(5_000);

        assert!(!rig.controller.siren().is_active());
        assert_eq!(rig.transport().gets_to(&command_url), 1);
        assert_eq!(rig.link.reconnects, 2);
    }

    #[test]
    fn exhausted_reconnects_silence_siren_and_restart_once() {
        let config = SirenConfig {
            max_activation_ms: 60_000,
            ..SirenConfig::default()
        };
        let mut rig = rig_with(config, ManualClock::at(2026, 3, 2, 7, 29, 50));
        let command_url = rig.endpoints.command.clone();
        rig.transport()
            .respond(&command_url, 200, r#"{"command":"ligar","id":"1"}"#);
        rig.tick(0);
        assert!(rig.siren_pin.is_high());

        rig.link.connected = false;
        for now in (500..=15_000).step_by(500) {
            rig.tick(now);
        }

        assert_eq!(rig.link.restarts, 1);
        assert_eq!(rig.link.reconnects, 10);
        assert!(!rig.siren_pin.is_high());
    }

    #[test]
    fn legacy_schedule_fires_once_per_minute() {
        let config = SirenConfig {
            max_activation_ms: 500,
            ..SirenConfig::default()
        };
        let mut rig = rig_with(config, ManualClock::at(2026, 3, 2, 7, 30, 0));
        let url = rig.endpoints.schedule.clone();
        rig.transport().respond(
            &url,
            200,
            r#"{"agendamentos":[{"time":"07:30","days_of_week":["SEG"]}]}"#,
        );

        let mut now_ms = 0;
        for _ in 0..5 {
            rig.tick(now_ms);
            rig.controller.clock_mut().source_mut().advance_secs(1);
            now_ms += 1_000;
        }

        // One activation then its cutoff; polls at seconds 1..4 were no-ops.
        assert_eq!(rig.siren_pin.writes(), vec![false, true, false]);
    }

    #[test]
    fn slow_schedule_poll_still_lands_in_legacy_window() {
        let mut config = SirenConfig {
            schedule_poll_interval_ms: 10_000,
            ..SirenConfig::default()
        };
        config.sanitize();
        let mut rig = rig_with(config, ManualClock::at(2026, 3, 2, 7, 29, 57));
        let url = rig.endpoints.schedule.clone();
        rig.transport().respond(
            &url,
            200,
            r#"{"agendamentos":[{"time":"07:30","days_of_week":["SEG"]}]}"#,
        );

        let mut now_ms = 0;
        for _ in 0..120 {
            rig.tick(now_ms);
            rig.controller.clock_mut().source_mut().advance_secs(1);
            now_ms += 1_000;
        }

        assert_eq!(rig.siren_pin.writes(), vec![false, true, false]);
    }

    #[test]
    fn scheduled_minute_during_manual_activation_merges_into_it() {
        let mut rig = rig_with(SirenConfig::default(), ManualClock::at(2026, 3, 2, 7, 29, 58));
        let command_url = rig.endpoints.command.clone();
        let schedule_url = rig.endpoints.schedule.clone();
        rig.transport().respond(
            &command_url,
            200,
            r#"{"command":"ligar","source":"painel","id":"7"}"#,
        );
        rig.transport().respond(
            &schedule_url,
            200,
            r#"{"agendamentos":[{"time":"07:30","days_of_week":["SEG"]}]}"#,
        );

        // Manual activation at 07:29:58, cut off at 07:30:03; the 07:30
        // entry falls inside it and is not replayed afterwards.
        let mut now_ms = 0;
        for _ in 0..10 {
            rig.tick(now_ms);
            rig.controller.clock_mut().source_mut().advance_secs(1);
            now_ms += 1_000;
        }

        assert_eq!(rig.siren_pin.writes(), vec![false, true, false]);
        assert!(!rig.controller.siren().is_active());
    }

    #[test]
    fn legacy_schedule_skipped_without_time_sync() {
        let mut rig = rig_with(SirenConfig::default(), ManualClock::unsynchronized());
        let url = rig.endpoints.schedule.clone();
        rig.transport().respond(
            &url,
            200,
            r#"{"agendamentos":[{"time":"07:30","days_of_week":[1]}]}"#,
        );

        rig.tick(0);

        assert!(!rig.controller.siren().is_active());
        assert!(!rig.controller.status(0).time_synced);
    }

    #[test]
    fn from_config_honours_polarity_and_endpoints() {
        let mut config = RuntimeConfig::default();
        config.hardware.siren_active_high = false;
        config.network.set_base_url(BASE);
        let siren_pin = RecordingPin::new();
        let mut transport = ScriptedTransport::new();
        transport.respond(
            &format!("{BASE}/check_command/"),
            200,
            r#"{"command":"ligar","id":"7","source":"painel"}"#,
        );

        let mut controller = Controller::from_config(
            &config,
            ManualClock::at(2026, 3, 2, 12, 0, 0),
            transport,
            siren_pin.clone(),
            RecordingPin::new(),
        )
        .unwrap();
        controller.tick(0, &mut ScriptedLink::up(), &mut ());

        assert_eq!(siren_pin.writes(), vec![true, false]);
        let status = controller.status(0);
        assert_eq!(status.activation_source.as_deref(), Some("manual(painel)"));
        assert_eq!(status.last_command_id.as_deref(), Some("7"));
    }

    #[test]
    fn background_service_polled_every_tick() {
        struct Counter(u32);
        impl BackgroundService for Counter {
            fn poll(&mut self) {
                self.0 += 1;
            }
        }

        let mut rig = rig();
        let mut counter = Counter(0);
        for now in 0..5 {
            rig.controller.tick(now, &mut rig.link, &mut counter);
        }

        assert_eq!(counter.0, 5);
    }
}
