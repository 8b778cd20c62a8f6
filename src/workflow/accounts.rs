use uuid::Uuid;

use super::{TransitionError, TransitionResult};

status_enum! {
    Role {
        Reservist => "reservist",
        Staff => "staff",
        Admin => "admin",
        SuperAdmin => "super_admin",
    }
}

status_enum! {
    AccountStatus {
        Pending => "pending",
        Active => "active",
        Inactive => "inactive",
        Deactivated => "deactivated",
    }
}

status_enum! {
    /// Operational readiness of a reservist, independent of the account status.
    ReadinessStatus {
        Ready => "ready",
        Standby => "standby",
        NotReady => "not_ready",
        Retired => "retired",
    }
}

impl Role {
    pub fn is_staff_or_above(self) -> bool {
        !matches!(self, Role::Reservist)
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }

    /// Landing path of the portal this role belongs to.
    pub fn home_path(self) -> &'static str {
        match self {
            Role::Reservist => "/reservist",
            Role::Staff => "/staff",
            Role::Admin | Role::SuperAdmin => "/admin",
        }
    }

    /// Whether accounts of this role may manage accounts of `target`.
    pub fn manages(self, target: Role) -> bool {
        match self {
            Role::SuperAdmin => true,
            Role::Admin => matches!(target, Role::Reservist | Role::Staff),
            Role::Staff => matches!(target, Role::Reservist),
            Role::Reservist => false,
        }
    }
}

/// Who is asking and whose account is being changed.
#[derive(Debug, Clone, Copy)]
pub struct StatusChange {
    pub actor_id: Uuid,
    pub actor_role: Role,
    pub target_id: Uuid,
    pub target_role: Role,
    pub from: AccountStatus,
    pub to: AccountStatus,
}

/// Staff may only toggle active and inactive; administrators may set any
/// status on accounts they manage. Nobody may take their own account out of
/// `active`.
pub fn check_status_change(change: StatusChange) -> TransitionResult<()> {
    if change.actor_id == change.target_id && change.to != AccountStatus::Active {
        return Err(TransitionError::SelfDeactivation);
    }

    if !change.actor_role.manages(change.target_role) {
        return Err(TransitionError::NotPermitted {
            role: change.actor_role.as_str(),
            to: change.to.as_str(),
        });
    }

    if change.from == change.to {
        return Err(TransitionError::Unchanged("account"));
    }

    if change.actor_role.is_admin() {
        return Ok(());
    }

    match (change.from, change.to) {
        (AccountStatus::Active, AccountStatus::Inactive)
        | (AccountStatus::Inactive, AccountStatus::Active) => Ok(()),
        _ => Err(TransitionError::NotPermitted {
            role: change.actor_role.as_str(),
            to: change.to.as_str(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(actor_role: Role, from: AccountStatus, to: AccountStatus) -> StatusChange {
        StatusChange {
            actor_id: Uuid::new_v4(),
            actor_role,
            target_id: Uuid::new_v4(),
            target_role: Role::Reservist,
            from,
            to,
        }
    }

    #[test]
    fn staff_toggles_active_and_inactive() {
        assert!(check_status_change(change(
            Role::Staff,
            AccountStatus::Active,
            AccountStatus::Inactive
        ))
        .is_ok());
        assert!(check_status_change(change(
            Role::Staff,
            AccountStatus::Inactive,
            AccountStatus::Active
        ))
        .is_ok());
    }

    #[test]
    fn staff_cannot_deactivate_or_reset_to_pending() {
        for (from, to) in [
            (AccountStatus::Active, AccountStatus::Deactivated),
            (AccountStatus::Inactive, AccountStatus::Pending),
            (AccountStatus::Pending, AccountStatus::Active),
        ] {
            let err = check_status_change(change(Role::Staff, from, to)).unwrap_err();
            assert!(matches!(err, TransitionError::NotPermitted { .. }));
        }
    }

    #[test]
    fn admins_set_any_status() {
        for role in [Role::Admin, Role::SuperAdmin] {
            assert!(check_status_change(change(
                role,
                AccountStatus::Pending,
                AccountStatus::Deactivated
            ))
            .is_ok());
        }
    }

    #[test]
    fn self_deactivation_is_rejected() {
        let id = Uuid::new_v4();
        let err = check_status_change(StatusChange {
            actor_id: id,
            actor_role: Role::SuperAdmin,
            target_id: id,
            target_role: Role::SuperAdmin,
            from: AccountStatus::Active,
            to: AccountStatus::Deactivated,
        })
        .unwrap_err();
        assert_eq!(err, TransitionError::SelfDeactivation);
    }

    #[test]
    fn admin_cannot_manage_other_admins() {
        let mut request = change(Role::Admin, AccountStatus::Active, AccountStatus::Inactive);
        request.target_role = Role::Admin;
        assert!(matches!(
            check_status_change(request),
            Err(TransitionError::NotPermitted { .. })
        ));
    }

    #[test]
    fn same_status_is_reported() {
        let err = check_status_change(change(
            Role::Admin,
            AccountStatus::Active,
            AccountStatus::Active,
        ))
        .unwrap_err();
        assert_eq!(err, TransitionError::Unchanged("account"));
    }

    #[test]
    fn roles_route_to_their_portal() {
        assert_eq!(Role::Staff.home_path(), "/staff");
        assert_eq!(Role::SuperAdmin.home_path(), "/admin");
        assert_eq!("super_admin".parse::<Role>().unwrap(), Role::SuperAdmin);
        assert!("colonel".parse::<Role>().is_err());
    }
}
