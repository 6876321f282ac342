use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schedule::ScheduleEntry;

pub const COMMAND_ACTIVATE: &str = "ligar";
pub const DEFAULT_COMMAND_SOURCE: &str = "unknown";
pub const SERVER_SOURCE: &str = "servidor";

/// Why the siren was switched on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSource {
    Scheduled,
    Manual { source: String },
}

impl TriggerSource {
    pub fn manual(source: impl Into<String>) -> Self {
        Self::Manual {
            source: source.into(),
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => f.write_str("agendamento"),
            Self::Manual { source } => write!(f, "manual({source})"),
        }
    }
}

/// Verdict computed by the remote service against its own clock.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActivationDecision {
    pub should_activate: bool,
    #[serde(default)]
    pub is_scheduled: bool,
    #[serde(default)]
    pub next_alarm: Option<String>,
}

impl ActivationDecision {
    pub fn trigger_source(&self) -> TriggerSource {
        if self.is_scheduled {
            TriggerSource::Scheduled
        } else {
            TriggerSource::manual(SERVER_SOURCE)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SchedulePayload {
    Decision(ActivationDecision),
    Legacy { agendamentos: Vec<ScheduleEntry> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ManualCommand {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

impl ManualCommand {
    pub fn is_activate(&self) -> bool {
        self.command.as_deref().map(str::trim) == Some(COMMAND_ACTIVATE)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ControllerStatus {
    #[serde(rename = "sirenActive")]
    pub siren_active: bool,
    #[serde(rename = "activationSource")]
    pub activation_source: Option<String>,
    #[serde(rename = "activeRemainingMs")]
    pub active_remaining_ms: u64,
    #[serde(rename = "timeSynced")]
    pub time_synced: bool,
    #[serde(rename = "wifiConnected")]
    pub wifi_connected: bool,
    #[serde(rename = "reconnectFailures")]
    pub reconnect_failures: u32,
    #[serde(rename = "lastCommandId")]
    pub last_command_id: Option<String>,
    #[serde(rename = "nextAlarm")]
    pub next_alarm: Option<String>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::schedule::DayOfWeek;

    #[test]
    fn trigger_source_tags() {
        assert_eq!(TriggerSource::Scheduled.to_string(), "agendamento");
        assert_eq!(TriggerSource::manual("web").to_string(), "manual(web)");
    }

    #[test]
    fn decodes_decision_payload_from_service() {
        let raw = r#"{"current_time":"07:30","current_day":"SEG","should_activate":true,
            "is_scheduled":true,"sirene_status":false,"next_alarm":"09:40"}"#;
        let payload: SchedulePayload = serde_json::from_str(raw).unwrap();

        assert_eq!(
            payload,
            SchedulePayload::Decision(ActivationDecision {
                should_activate: true,
                is_scheduled: true,
                next_alarm: Some("09:40".to_string()),
            })
        );
    }

    #[test]
    fn decision_without_scheduled_flag_is_server_sourced() {
        let decision: ActivationDecision =
            serde_json::from_str(r#"{"should_activate":true,"next_alarm":null}"#).unwrap();

        assert!(!decision.is_scheduled);
        assert_eq!(decision.trigger_source(), TriggerSource::manual("servidor"));
    }

    #[test]
    fn decodes_legacy_schedule_list() {
        let raw = r#"{"agendamentos":[{"time":"07:00","days_of_week":["SEG","TER"]}]}"#;
        let payload: SchedulePayload = serde_json::from_str(raw).unwrap();

        let SchedulePayload::Legacy { agendamentos } = payload else {
            panic!("expected legacy payload");
        };
        assert_eq!(agendamentos.len(), 1);
        assert_eq!(
            agendamentos[0].days_of_week,
            vec![DayOfWeek::Mon, DayOfWeek::Tue]
        );
    }

    #[test]
    fn manual_command_recognizes_activate_only() {
        let on: ManualCommand =
            serde_json::from_str(r#"{"command":"ligar","source":"web","id":"1"}"#).unwrap();
        let off: ManualCommand = serde_json::from_str(r#"{"command":"desligar"}"#).unwrap();
        let empty: ManualCommand = serde_json::from_str("{}").unwrap();

        assert!(on.is_activate());
        assert!(!off.is_activate());
        assert!(!empty.is_activate());
        assert_eq!(empty, ManualCommand::default());
    }
}
