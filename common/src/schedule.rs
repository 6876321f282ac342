use chrono::{NaiveTime, Timelike, Weekday};
use log::{debug, info, warn};
use serde::{de::IgnoredAny, Deserialize, Deserializer};

use crate::{
    clock::LocalTime,
    error::PollError,
    poller::RemotePoller,
    ports::HttpTransport,
    types::{ActivationDecision, SchedulePayload, TriggerSource},
};

/// Weekday as reported by the clock facade; index 0 is Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DayOfWeek {
    Sun,
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
}

impl DayOfWeek {
    pub fn index(self) -> u8 {
        match self {
            Self::Sun => 0,
            Self::Mon => 1,
            Self::Tue => 2,
            Self::Wed => 3,
            Self::Thu => 4,
            Self::Fri => 5,
            Self::Sat => 6,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Sun),
            1 => Some(Self::Mon),
            2 => Some(Self::Tue),
            3 => Some(Self::Wed),
            4 => Some(Self::Thu),
            5 => Some(Self::Fri),
            6 => Some(Self::Sat),
            _ => None,
        }
    }

    pub fn from_chrono(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => Self::Mon,
            Weekday::Tue => Self::Tue,
            Weekday::Wed => Self::Wed,
            Weekday::Thu => Self::Thu,
            Weekday::Fri => Self::Fri,
            Weekday::Sat => Self::Sat,
            Weekday::Sun => Self::Sun,
        }
    }

    /// Abbreviation used by the remote service.
    pub fn abbreviation(self) -> &'static str {
        match self {
            Self::Sun => "DOM",
            Self::Mon => "SEG",
            Self::Tue => "TER",
            Self::Wed => "QUA",
            Self::Thu => "QUI",
            Self::Fri => "SEX",
            Self::Sat => "SAB",
        }
    }

    /// Accepts the service's Portuguese abbreviations and English ones.
    pub fn from_abbreviation(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "DOM" | "SUN" => Some(Self::Sun),
            "SEG" | "MON" => Some(Self::Mon),
            "TER" | "TUE" => Some(Self::Tue),
            "QUA" | "WED" => Some(Self::Wed),
            "QUI" | "THU" => Some(Self::Thu),
            "SEX" | "FRI" => Some(Self::Fri),
            "SAB" | "SÁB" | "SAT" => Some(Self::Sat),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DayRepr {
    Index(u8),
    Name(String),
    Other(IgnoredAny),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DaysRepr {
    List(Vec<DayRepr>),
    Joined(String),
}

fn deserialize_days<'de, D>(deserializer: D) -> Result<Vec<DayOfWeek>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match DaysRepr::deserialize(deserializer)? {
        DaysRepr::List(days) => days,
        DaysRepr::Joined(joined) => joined
            .split(',')
            .map(|day| DayRepr::Name(day.to_string()))
            .collect(),
    };

    let mut days = Vec::with_capacity(raw.len());
    for repr in raw {
        let day = match repr {
            DayRepr::Index(index) => DayOfWeek::from_index(index),
            DayRepr::Name(name) => DayOfWeek::from_abbreviation(&name),
            DayRepr::Other(_) => None,
        };
        match day {
            Some(day) if !days.contains(&day) => days.push(day),
            Some(_) => {}
            None => warn!("ignoring unrecognized schedule weekday"),
        }
    }
    Ok(days)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScheduleEntry {
    pub time: String,
    #[serde(deserialize_with = "deserialize_days")]
    pub days_of_week: Vec<DayOfWeek>,
}

impl ScheduleEntry {
    /// `(hour, minute)` of an `"HH:MM"` entry, `None` when malformed.
    pub fn hour_minute(&self) -> Option<(u8, u8)> {
        let time = NaiveTime::parse_from_str(self.time.trim(), "%H:%M").ok()?;
        Some((time.hour() as u8, time.minute() as u8))
    }

    pub fn matches(&self, now: &LocalTime) -> bool {
        self.days_of_week.contains(&now.weekday)
            && self.hour_minute() == Some((now.hour, now.minute))
    }
}

/// Decides, once per successful schedule poll, whether the siren should fire.
///
/// Two payload shapes are handled. A pre-computed [`ActivationDecision`] is
/// trusted as-is. A raw list of [`ScheduleEntry`] is matched locally, only
/// during the first `window_secs` seconds of the matching minute and at most
/// once per minute.
///
/// A matching minute is consumed even when the siren is already running, so
/// a scheduled alarm that overlaps an active period merges into it rather
/// than firing again once it ends.
#[derive(Debug, Clone)]
pub struct ScheduleChecker {
    window_secs: u8,
    last_activated_minute: Option<u16>,
    next_alarm: Option<String>,
}

impl ScheduleChecker {
    pub fn new(window_secs: u8) -> Self {
        Self {
            window_secs,
            last_activated_minute: None,
            next_alarm: None,
        }
    }

    pub fn next_alarm(&self) -> Option<&str> {
        self.next_alarm.as_deref()
    }

    pub fn poll<T: HttpTransport>(
        &mut self,
        poller: &mut RemotePoller<T>,
        url: &str,
        timeout_ms: u64,
        now: Option<&LocalTime>,
        siren_active: bool,
    ) -> Option<TriggerSource> {
        match poller.get::<SchedulePayload>(url, timeout_ms) {
            Ok(payload) => self.evaluate(payload, now, siren_active),
            Err(PollError::HttpStatus(code)) => {
                warn!("schedule poll failed with HTTP {code}; retrying next cycle");
                None
            }
            Err(err) => {
                warn!("schedule poll failed: {err}; retrying next cycle");
                None
            }
        }
    }

    pub fn evaluate(
        &mut self,
        payload: SchedulePayload,
        now: Option<&LocalTime>,
        siren_active: bool,
    ) -> Option<TriggerSource> {
        match payload {
            SchedulePayload::Decision(decision) => self.evaluate_decision(decision, siren_active),
            SchedulePayload::Legacy { agendamentos } => {
                let Some(now) = now else {
                    debug!("clock not synchronized; skipping schedule matching");
                    return None;
                };
                self.next_alarm = next_alarm_today(&agendamentos, now);
                self.evaluate_entries(&agendamentos, now)
            }
        }
    }

    fn evaluate_decision(
        &mut self,
        decision: ActivationDecision,
        siren_active: bool,
    ) -> Option<TriggerSource> {
        if decision.next_alarm != self.next_alarm {
            if let Some(next) = &decision.next_alarm {
                info!("next alarm at {next}");
            }
            self.next_alarm = decision.next_alarm.clone();
        }

        if !decision.should_activate {
            return None;
        }
        if siren_active {
            debug!("activation requested while siren already active; ignoring");
            return None;
        }
        Some(decision.trigger_source())
    }

    fn evaluate_entries(&mut self, entries: &[ScheduleEntry], now: &LocalTime) -> Option<TriggerSource> {
        if now.second > self.window_secs {
            return None;
        }

        let minute_key = now.minute_of_week();
        if self.last_activated_minute == Some(minute_key) {
            return None;
        }

        let entry = entries.iter().find(|entry| entry.matches(now))?;
        self.last_activated_minute = Some(minute_key);
        info!("schedule entry {} matched", entry.time);
        Some(TriggerSource::Scheduled)
    }
}

/// Earliest entry later today than `now`, formatted `HH:MM`.
pub fn next_alarm_today(entries: &[ScheduleEntry], now: &LocalTime) -> Option<String> {
    let current = (now.hour, now.minute);
    entries
        .iter()
        .filter(|entry| entry.days_of_week.contains(&now.weekday))
        .filter_map(|entry| entry.hour_minute())
        .filter(|hm| *hm > current)
        .min()
        .map(|(hour, minute)| format!("{hour:02}:{minute:02}"))
}
