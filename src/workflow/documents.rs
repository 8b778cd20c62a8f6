use super::{require_reason, TransitionError, TransitionResult};

status_enum! {
    DocumentStatus {
        Pending => "pending",
        Verified => "verified",
        Rejected => "rejected",
    }
}

/// What happens to the validator columns on a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorUpdate {
    Set,
    Clear,
    Keep,
}

/// The column values a document takes after a status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChange {
    pub status: DocumentStatus,
    pub rejection_reason: Option<String>,
    pub validator: ValidatorUpdate,
    pub reason: Option<String>,
}

/// The dedicated validate action only accepts `pending -> verified`.
pub fn validate(from: DocumentStatus) -> TransitionResult<DocumentChange> {
    if from != DocumentStatus::Pending {
        return Err(TransitionError::Invalid {
            entity: "document",
            from: from.as_str(),
            to: DocumentStatus::Verified.as_str(),
        });
    }

    Ok(DocumentChange {
        status: DocumentStatus::Verified,
        rejection_reason: None,
        validator: ValidatorUpdate::Set,
        reason: None,
    })
}

/// Free-form status change. Any move is allowed given a reason; validator
/// columns are only stamped when leaving `pending` and are cleared on the way
/// back to it.
pub fn change_status(
    from: DocumentStatus,
    to: DocumentStatus,
    reason: Option<&str>,
) -> TransitionResult<DocumentChange> {
    let reason = require_reason(reason)?;
    if from == to {
        return Err(TransitionError::Unchanged("document"));
    }

    let validator = match (from, to) {
        (_, DocumentStatus::Pending) => ValidatorUpdate::Clear,
        (DocumentStatus::Pending, _) => ValidatorUpdate::Set,
        _ => ValidatorUpdate::Keep,
    };

    Ok(DocumentChange {
        status: to,
        rejection_reason: (to == DocumentStatus::Rejected).then(|| reason.clone()),
        validator,
        reason: Some(reason),
    })
}

/// Notification title and body sent to the reservist after a change.
pub fn notification_text(
    status: DocumentStatus,
    document_title: &str,
    reason: Option<&str>,
) -> (String, String) {
    match status {
        DocumentStatus::Verified => (
            "Document verified".to_string(),
            format!("Your document \"{document_title}\" has been verified."),
        ),
        DocumentStatus::Rejected => (
            "Document rejected".to_string(),
            format!(
                "Your document \"{document_title}\" was rejected. Reason: {}",
                reason.unwrap_or("not specified")
            ),
        ),
        DocumentStatus::Pending => (
            "Document returned for review".to_string(),
            format!("Your document \"{document_title}\" is pending review again."),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_only_from_pending() {
        assert_eq!(
            validate(DocumentStatus::Pending).unwrap().status,
            DocumentStatus::Verified
        );
        assert!(validate(DocumentStatus::Rejected).is_err());
        assert!(validate(DocumentStatus::Verified).is_err());
    }

    #[test]
    fn rejecting_requires_reason() {
        let err = change_status(DocumentStatus::Pending, DocumentStatus::Rejected, Some(" "))
            .unwrap_err();
        assert_eq!(err, TransitionError::ReasonRequired);
    }

    #[test]
    fn rejecting_stores_reason_and_stamps_validator() {
        let change = change_status(
            DocumentStatus::Pending,
            DocumentStatus::Rejected,
            Some("blurry scan"),
        )
        .unwrap();
        assert_eq!(change.rejection_reason.as_deref(), Some("blurry scan"));
        assert_eq!(change.validator, ValidatorUpdate::Set);
    }

    #[test]
    fn back_to_pending_clears_validator() {
        for from in [DocumentStatus::Verified, DocumentStatus::Rejected] {
            let change = change_status(from, DocumentStatus::Pending, Some("re-check")).unwrap();
            assert_eq!(change.validator, ValidatorUpdate::Clear);
            assert!(change.rejection_reason.is_none());
        }
    }

    #[test]
    fn verified_to_rejected_keeps_validator() {
        let change = change_status(
            DocumentStatus::Verified,
            DocumentStatus::Rejected,
            Some("expired"),
        )
        .unwrap();
        assert_eq!(change.validator, ValidatorUpdate::Keep);
    }

    #[test]
    fn same_status_is_a_conflict() {
        let err = change_status(DocumentStatus::Pending, DocumentStatus::Pending, Some("x"))
            .unwrap_err();
        assert_eq!(err, TransitionError::Unchanged("document"));
    }

    #[test]
    fn rejection_message_mentions_reason() {
        let (_, message) =
            notification_text(DocumentStatus::Rejected, "Birth certificate", Some("unreadable"));
        assert!(message.contains("Birth certificate"));
        assert!(message.contains("unreadable"));
    }
}
