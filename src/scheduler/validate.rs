use crate::limits::*;
use crate::model::{Caller, Role, SlotDate, TimeWindow};

use super::SchedulerError;

/// What a mentor submits to publish a slot. Identity comes from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub subject: String,
    pub date: String,
    pub time_slot: String,
    pub max_occupants: i64,
    pub description: Option<String>,
}

pub(super) struct ValidSlot {
    pub subject: String,
    pub date: SlotDate,
    pub time_slot: TimeWindow,
    pub max_occupants: u32,
    pub description: Option<String>,
}

fn required(field: &str, value: &str, max_len: usize) -> Result<(), SchedulerError> {
    if value.trim().is_empty() {
        return Err(SchedulerError::Validation(format!("{field} is required")));
    }
    bounded(field, value, max_len)
}

fn bounded(field: &str, value: &str, max_len: usize) -> Result<(), SchedulerError> {
    if value.len() > max_len {
        return Err(SchedulerError::Validation(format!(
            "{field} exceeds {max_len} bytes"
        )));
    }
    Ok(())
}

pub(super) fn require_role(caller: &Caller, role: Role) -> Result<(), SchedulerError> {
    if caller.role != role {
        return Err(SchedulerError::Forbidden(format!("{role} role required")));
    }
    Ok(())
}

/// Mentors must carry a display name; students only need an id.
pub(super) fn identity(caller: &Caller) -> Result<(), SchedulerError> {
    required(&format!("{} id", caller.role), &caller.id, MAX_ID_LEN)?;
    match caller.role {
        Role::Mentor => required("mentor name", &caller.name, MAX_NAME_LEN)?,
        Role::Student => bounded("student name", &caller.name, MAX_NAME_LEN)?,
    }
    bounded("email", &caller.email, MAX_EMAIL_LEN)
}

pub(super) fn publish(request: PublishRequest) -> Result<ValidSlot, SchedulerError> {
    required("subject", &request.subject, MAX_SUBJECT_LEN)?;
    required("date", &request.date, 10)?;
    required("time slot", &request.time_slot, 11)?;
    let date = SlotDate::parse(&request.date)?;
    let time_slot = TimeWindow::parse(&request.time_slot)?;
    let max_occupants = u32::try_from(request.max_occupants)
        .ok()
        .filter(|n| (1..=MAX_OCCUPANTS).contains(n))
        .ok_or_else(|| {
            SchedulerError::Validation(format!(
                "max occupants must be between 1 and {MAX_OCCUPANTS}, got {}",
                request.max_occupants
            ))
        })?;
    if let Some(d) = &request.description {
        bounded("description", d, MAX_DESCRIPTION_LEN)?;
    }
    Ok(ValidSlot {
        subject: request.subject,
        date,
        time_slot,
        max_occupants,
        description: request.description.filter(|d| !d.trim().is_empty()),
    })
}
