//! Records owned by the persistence collaborator
//!
//! The controller never creates or deletes these; it reads them and asks the
//! store to apply the few mutations it is responsible for.

use appliance_shared::now_ms;
use std::time::Duration;

pub type DeviceId = u32;
pub type ExecutionId = u64;
pub type UserId = u32;
pub type ProgramId = u32;

/// A physical appliance behind a switchable outlet
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub location: String,
    /// Gateway unique id of the outlet, `None` until paired
    pub endpoint_id: Option<String>,
    /// Draw in watts below which a program counts as done
    pub auto_end_power_threshold: f64,
    /// How long the draw must stay below the threshold
    pub auto_end_wait: Duration,
    pub enabled: bool,
}

impl Device {
    /// The endpoint id, if the device has been paired with an outlet
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: Option<String>,
    pub email_notification: bool,
    pub pushover_user_key: Option<String>,
    pub push_id: Option<String>,
    pub push_enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub id: ProgramId,
    pub name: String,
    pub duration: Duration,
    /// Whether the program may end early when the power draw drops
    pub auto_end: bool,
}

/// One run of a program on a device for a user
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub id: ExecutionId,
    pub device: Device,
    pub user: User,
    pub program: Program,
    pub started_at_ms: Option<u64>,
    pub stopped_at_ms: Option<u64>,
}

impl Execution {
    pub fn is_running(&self) -> bool {
        self.started_at_ms.is_some() && self.stopped_at_ms.is_none()
    }

    pub fn elapsed_at(&self, now_ms: u64) -> Duration {
        match self.started_at_ms {
            Some(start) => {
                let end = self.stopped_at_ms.unwrap_or(now_ms);
                Duration::from_millis(end.saturating_sub(start))
            }
            None => Duration::ZERO,
        }
    }

    pub fn remaining_at(&self, now_ms: u64) -> Duration {
        self.program.duration.saturating_sub(self.elapsed_at(now_ms))
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(now_ms())
    }

    /// Time left until the program's nominal end
    pub fn remaining(&self) -> Duration {
        self.remaining_at(now_ms())
    }
}
