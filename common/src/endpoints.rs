pub const PATH_SCHEDULE_DECISION: &str = "/api/comando";
pub const PATH_CHECK_COMMAND: &str = "/check_command/";
pub const PATH_CONFIRM_COMMAND: &str = "/confirm_command/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub schedule: String,
    pub command: String,
    pub confirm: String,
}

impl Endpoints {
    pub fn from_base(base: &str) -> Self {
        let base = base.trim().trim_end_matches('/');
        Self {
            schedule: format!("{base}{PATH_SCHEDULE_DECISION}"),
            command: format!("{base}{PATH_CHECK_COMMAND}"),
            confirm: format!("{base}{PATH_CONFIRM_COMMAND}"),
        }
    }
}
