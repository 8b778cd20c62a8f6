use std::collections::HashSet;

use uuid::Uuid;

use super::{TransitionError, TransitionResult};

pub const MAX_TRAINING_HOURS: i32 = 720;

status_enum! {
    TrainingStatus {
        Scheduled => "scheduled",
        Ongoing => "ongoing",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

status_enum! {
    RegistrationStatus {
        Registered => "registered",
        Attended => "attended",
        NoShow => "no_show",
        Completed => "completed",
    }
}

status_enum! {
    CompletionStatus {
        Pending => "pending",
        Passed => "passed",
        Failed => "failed",
    }
}

const SESSION: &str = "training session";

pub fn session_transition(from: TrainingStatus, to: TrainingStatus) -> TransitionResult<()> {
    if from == to {
        return Err(TransitionError::Unchanged(SESSION));
    }
    let allowed = matches!(
        (from, to),
        (TrainingStatus::Scheduled, TrainingStatus::Ongoing)
            | (TrainingStatus::Scheduled, TrainingStatus::Completed)
            | (TrainingStatus::Ongoing, TrainingStatus::Completed)
            | (TrainingStatus::Scheduled, TrainingStatus::Cancelled)
            | (TrainingStatus::Ongoing, TrainingStatus::Cancelled)
    );
    if allowed {
        Ok(())
    } else {
        Err(TransitionError::Invalid {
            entity: SESSION,
            from: from.as_str(),
            to: to.as_str(),
        })
    }
}

pub fn ensure_editable(status: TrainingStatus) -> TransitionResult<()> {
    if status == TrainingStatus::Scheduled {
        Ok(())
    } else {
        Err(TransitionError::NotEditable(SESSION))
    }
}

pub fn ensure_accepts_attendance(status: TrainingStatus) -> TransitionResult<()> {
    match status {
        TrainingStatus::Scheduled | TrainingStatus::Ongoing => Ok(()),
        _ => Err(TransitionError::NotEditable(SESSION)),
    }
}

pub fn validate_hours(hours: i32) -> TransitionResult<i32> {
    if hours > 0 && hours <= MAX_TRAINING_HOURS {
        Ok(hours)
    } else {
        Err(TransitionError::InvalidHours(hours))
    }
}

/// Notification title and body for a completed registration.
pub fn completion_text(
    session_title: &str,
    hours: i32,
    completion: CompletionStatus,
) -> (String, String) {
    let outcome = match completion {
        CompletionStatus::Passed => "passed",
        CompletionStatus::Failed => "did not pass",
        CompletionStatus::Pending => "are pending evaluation for",
    };
    (
        "Training completed".to_string(),
        format!("You {outcome} \"{session_title}\". {hours} training hours were recorded."),
    )
}

/// Registration updates produced by an attendance sheet.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AttendancePlan {
    pub attended: Vec<Uuid>,
    pub no_show: Vec<Uuid>,
    /// Attendees that have no registration on the session.
    pub unknown: Vec<Uuid>,
}

/// Listed reservists become `attended`; everyone else still in play becomes
/// `no_show`. Completed registrations are never touched.
pub fn plan_attendance(
    registrations: &[(Uuid, RegistrationStatus)],
    attendees: &HashSet<Uuid>,
) -> AttendancePlan {
    let mut plan = AttendancePlan::default();
    let mut seen = HashSet::new();

    for (reservist_id, status) in registrations {
        seen.insert(*reservist_id);
        if *status == RegistrationStatus::Completed {
            continue;
        }
        if attendees.contains(reservist_id) {
            if *status != RegistrationStatus::Attended {
                plan.attended.push(*reservist_id);
            }
        } else if *status != RegistrationStatus::NoShow {
            plan.no_show.push(*reservist_id);
        }
    }

    plan.unknown = attendees
        .iter()
        .filter(|id| !seen.contains(id))
        .copied()
        .collect();
    plan.unknown.sort();
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hours_are_bounded() {
        assert!(validate_hours(1).is_ok());
        assert!(validate_hours(720).is_ok());
        assert_eq!(validate_hours(0), Err(TransitionError::InvalidHours(0)));
        assert_eq!(validate_hours(721), Err(TransitionError::InvalidHours(721)));
        assert!(validate_hours(-4).is_err());
    }

    #[test]
    fn cancelled_and_completed_are_terminal() {
        for from in [TrainingStatus::Completed, TrainingStatus::Cancelled] {
            for to in TrainingStatus::ALL {
                assert!(session_transition(from, *to).is_err());
            }
        }
        assert!(session_transition(TrainingStatus::Scheduled, TrainingStatus::Ongoing).is_ok());
        assert!(session_transition(TrainingStatus::Ongoing, TrainingStatus::Scheduled).is_err());
    }

    #[test]
    fn non_attendees_become_no_show() {
        let alpha = Uuid::new_v4();
        let bravo = Uuid::new_v4();
        let charlie = Uuid::new_v4();
        let registrations = vec![
            (alpha, RegistrationStatus::Registered),
            (bravo, RegistrationStatus::Registered),
            (charlie, RegistrationStatus::Attended),
        ];
        let attendees: HashSet<Uuid> = [alpha].into_iter().collect();

        let plan = plan_attendance(&registrations, &attendees);
        assert_eq!(plan.attended, vec![alpha]);
        let mut no_show = plan.no_show.clone();
        no_show.sort();
        let mut expected = vec![bravo, charlie];
        expected.sort();
        assert_eq!(no_show, expected);
        assert!(plan.unknown.is_empty());
    }

    #[test]
    fn completed_registrations_are_left_alone() {
        let done = Uuid::new_v4();
        let plan = plan_attendance(
            &[(done, RegistrationStatus::Completed)],
            &HashSet::new(),
        );
        assert!(plan.no_show.is_empty());
        assert!(plan.attended.is_empty());
    }

    #[test]
    fn completion_message_names_hours() {
        let (_, message) = completion_text("Basic Rifle Marksmanship", 16, CompletionStatus::Passed);
        assert!(message.contains("passed"));
        assert!(message.contains("16 training hours"));
    }

    #[test]
    fn unregistered_attendees_are_reported() {
        let stranger = Uuid::new_v4();
        let plan = plan_attendance(&[], &[stranger].into_iter().collect());
        assert_eq!(plan.unknown, vec![stranger]);
    }
}
