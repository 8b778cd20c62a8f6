use serde_json::Value;

use super::{TransitionError, TransitionResult};

status_enum! {
    RidsStatus {
        Draft => "draft",
        Submitted => "submitted",
        Approved => "approved",
        Rejected => "rejected",
    }
}

status_enum! {
    /// Child collections of a RIDS form.
    RidsSection {
        PromotionHistory => "promotion_history",
        Training => "training",
        Awards => "awards",
        Dependents => "dependents",
        Education => "education",
        ActiveDuty => "active_duty",
        UnitAssignments => "unit_assignments",
        Designations => "designations",
    }
}

const ENTITY: &str = "rids form";

/// Guarded lifecycle: `draft -> submitted -> approved | rejected`, and
/// `rejected -> draft` when the reservist edits again.
pub fn can_transition(from: RidsStatus, to: RidsStatus) -> bool {
    matches!(
        (from, to),
        (RidsStatus::Draft, RidsStatus::Submitted)
            | (RidsStatus::Submitted, RidsStatus::Approved)
            | (RidsStatus::Submitted, RidsStatus::Rejected)
            | (RidsStatus::Rejected, RidsStatus::Draft)
    )
}

pub fn transition(from: RidsStatus, to: RidsStatus) -> TransitionResult<RidsStatus> {
    if from == to {
        return Err(TransitionError::Unchanged(ENTITY));
    }
    if !can_transition(from, to) {
        return Err(TransitionError::Invalid {
            entity: ENTITY,
            from: from.as_str(),
            to: to.as_str(),
        });
    }
    Ok(to)
}

/// Content edits are allowed on drafts and on rejected forms; the latter
/// reopen as a draft.
pub fn status_after_edit(status: RidsStatus) -> TransitionResult<RidsStatus> {
    match status {
        RidsStatus::Draft => Ok(RidsStatus::Draft),
        RidsStatus::Rejected => transition(status, RidsStatus::Draft),
        RidsStatus::Submitted | RidsStatus::Approved => Err(TransitionError::NotEditable(ENTITY)),
    }
}

pub fn ensure_deletable(status: RidsStatus) -> TransitionResult<()> {
    if status == RidsStatus::Draft {
        Ok(())
    } else {
        Err(TransitionError::Invalid {
            entity: ENTITY,
            from: status.as_str(),
            to: "deleted",
        })
    }
}

/// Notification sent to the reservist when a reviewer moves their form, if
/// the target status warrants one.
pub fn notification_text(status: RidsStatus, reason: Option<&str>) -> Option<(String, String)> {
    match status {
        RidsStatus::Approved => Some((
            "RIDS approved".to_string(),
            "Your Reservist Information Data Sheet has been approved.".to_string(),
        )),
        RidsStatus::Rejected => Some((
            "RIDS returned".to_string(),
            format!(
                "Your Reservist Information Data Sheet was rejected. Reason: {}",
                reason.unwrap_or("not specified")
            ),
        )),
        RidsStatus::Draft | RidsStatus::Submitted => None,
    }
}

impl RidsSection {
    /// Fields every entry of the section must carry as non-empty strings.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            RidsSection::PromotionHistory => &["rank", "date_of_rank"],
            RidsSection::Training => &["course", "school"],
            RidsSection::Awards => &["award"],
            RidsSection::Dependents => &["name", "relationship"],
            RidsSection::Education => &["school", "level"],
            RidsSection::ActiveDuty => &["unit", "start_date"],
            RidsSection::UnitAssignments => &["unit", "assigned_at"],
            RidsSection::Designations => &["position", "effective_date"],
        }
    }

    pub fn validate_entry(self, data: &Value) -> Result<(), String> {
        let object = data
            .as_object()
            .ok_or_else(|| format!("{} entry must be a JSON object", self))?;

        for field in self.required_fields() {
            let present = object
                .get(*field)
                .and_then(Value::as_str)
                .map(|value| !value.trim().is_empty())
                .unwrap_or(false);
            if !present {
                return Err(format!("{} entry requires '{}'", self, field));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn guarded_transitions() {
        assert!(transition(RidsStatus::Draft, RidsStatus::Submitted).is_ok());
        assert!(transition(RidsStatus::Submitted, RidsStatus::Approved).is_ok());
        assert!(transition(RidsStatus::Submitted, RidsStatus::Rejected).is_ok());
        assert!(transition(RidsStatus::Rejected, RidsStatus::Draft).is_ok());
    }

    #[test]
    fn unguarded_shortcuts_are_refused() {
        for (from, to) in [
            (RidsStatus::Draft, RidsStatus::Approved),
            (RidsStatus::Submitted, RidsStatus::Draft),
            (RidsStatus::Approved, RidsStatus::Rejected),
            (RidsStatus::Approved, RidsStatus::Draft),
            (RidsStatus::Rejected, RidsStatus::Approved),
        ] {
            assert!(
                matches!(transition(from, to), Err(TransitionError::Invalid { .. })),
                "{from} -> {to} should be refused"
            );
        }
    }

    #[test]
    fn only_drafts_are_deletable() {
        assert!(ensure_deletable(RidsStatus::Draft).is_ok());
        for status in [
            RidsStatus::Submitted,
            RidsStatus::Approved,
            RidsStatus::Rejected,
        ] {
            assert!(ensure_deletable(status).is_err());
        }
    }

    #[test]
    fn editing_rejected_form_reopens_draft() {
        assert_eq!(
            status_after_edit(RidsStatus::Rejected).unwrap(),
            RidsStatus::Draft
        );
        assert_eq!(
            status_after_edit(RidsStatus::Submitted).unwrap_err(),
            TransitionError::NotEditable("rids form")
        );
    }

    #[test]
    fn section_entries_need_required_fields() {
        let ok = json!({ "name": "Maria", "relationship": "spouse" });
        assert!(RidsSection::Dependents.validate_entry(&ok).is_ok());

        let missing = json!({ "name": "Maria" });
        let err = RidsSection::Dependents.validate_entry(&missing).unwrap_err();
        assert!(err.contains("relationship"));

        assert!(RidsSection::Awards.validate_entry(&json!(["medal"])).is_err());
    }

    #[test]
    fn reviewers_outcomes_are_notified() {
        let (_, message) = notification_text(RidsStatus::Rejected, Some("missing AFPSN")).unwrap();
        assert!(message.contains("missing AFPSN"));
        assert!(notification_text(RidsStatus::Approved, None).is_some());
        assert!(notification_text(RidsStatus::Submitted, None).is_none());
    }

    #[test]
    fn sections_parse_from_path_segments() {
        assert_eq!(
            "unit_assignments".parse::<RidsSection>().unwrap(),
            RidsSection::UnitAssignments
        );
        assert_eq!(RidsSection::ALL.len(), 8);
    }
}
