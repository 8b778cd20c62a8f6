//! Status vocabularies and transition rules for accounts, documents, RIDS
//! forms and training sessions.
//!
//! Everything here is pure: handlers load the current row, ask the matching
//! module whether a move is allowed, then persist the outcome.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot move {entity} from {from} to {to}")]
    Invalid {
        entity: &'static str,
        from: &'static str,
        to: &'static str,
    },
    #[error("{0} is already in the requested status")]
    Unchanged(&'static str),
    #[error("{0} cannot be modified in its current status")]
    NotEditable(&'static str),
    #[error("a non-empty reason is required")]
    ReasonRequired,
    #[error("{role} accounts may not set status to {to}")]
    NotPermitted {
        role: &'static str,
        to: &'static str,
    },
    #[error("you cannot deactivate your own account")]
    SelfDeactivation,
    #[error("hours completed must be greater than 0 and at most 720, got {0}")]
    InvalidHours(i32),
}

pub type TransitionResult<T> = Result<T, TransitionError>;

/// Trims `reason` and rejects it when nothing is left.
pub fn require_reason(reason: Option<&str>) -> TransitionResult<String> {
    reason
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .ok_or(TransitionError::ReasonRequired)
}

/// Declares a string-backed status enum stored as `VARCHAR` and exchanged as
/// snake_case JSON.
macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    )),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub mod accounts;
pub mod documents;
pub mod rids;
pub mod training;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_is_trimmed() {
        assert_eq!(require_reason(Some("  expired id  ")).unwrap(), "expired id");
    }

    #[test]
    fn blank_reason_is_rejected() {
        assert_eq!(require_reason(Some("   ")), Err(TransitionError::ReasonRequired));
        assert_eq!(require_reason(None), Err(TransitionError::ReasonRequired));
    }
}
