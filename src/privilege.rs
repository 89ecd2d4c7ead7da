//! Privilege bitmask model (spec §4.7).
//!
//! Grounded on the five base privilege names enumerated in
//! `examples/original_source/redfish-core/include/registries/privilege_registry.hpp`
//! (`Login`, `ConfigureManager`, `ConfigureUsers`, `ConfigureComponents`,
//! `ConfigureSelf`); `NoAuth` is added per spec.md §4.7 as the short-circuit
//! bit for routes that require no session at all.

use std::ops::{BitOr, BitOrAssign};

/// One bit per base privilege. A rule's required privileges are expressed
/// as one or more [`PrivilegeSet`] alternatives (`Vec<PrivilegeSet>`); the
/// check passes iff any alternative is a subset of the granted set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrivilegeSet(u8);

impl PrivilegeSet {
    pub const NONE: PrivilegeSet = PrivilegeSet(0);
    pub const LOGIN: PrivilegeSet = PrivilegeSet(1 << 0);
    pub const CONFIGURE_MANAGER: PrivilegeSet = PrivilegeSet(1 << 1);
    pub const CONFIGURE_USERS: PrivilegeSet = PrivilegeSet(1 << 2);
    pub const CONFIGURE_COMPONENTS: PrivilegeSet = PrivilegeSet(1 << 3);
    pub const CONFIGURE_SELF: PrivilegeSet = PrivilegeSet(1 << 4);
    /// Short-circuits to allow regardless of the granted set (spec §4.7).
    pub const NO_AUTH: PrivilegeSet = PrivilegeSet(1 << 5);

    pub fn contains(self, other: PrivilegeSet) -> bool {
        self.0 & other.0 == other.0
    }

    /// True iff `self` is a subset of `granted`.
    pub fn is_subset_of(self, granted: PrivilegeSet) -> bool {
        granted.contains(self)
    }
}

impl BitOr for PrivilegeSet {
    type Output = PrivilegeSet;
    fn bitor(self, rhs: PrivilegeSet) -> PrivilegeSet {
        PrivilegeSet(self.0 | rhs.0)
    }
}

impl BitOrAssign for PrivilegeSet {
    fn bitor_assign(&mut self, rhs: PrivilegeSet) {
        self.0 |= rhs.0;
    }
}

/// Resolves a Redfish user-role name to its granted privilege set. The
/// four standard roles (`Administrator`, `Operator`, `ReadOnly`,
/// `NoAccess`) mirror the roles referenced throughout
/// `examples/original_source/redfish-core/` resource handlers; an
/// unrecognized role grants nothing.
pub fn resolve_role(role: &str) -> PrivilegeSet {
    match role {
        "Administrator" => {
            PrivilegeSet::LOGIN
                | PrivilegeSet::CONFIGURE_MANAGER
                | PrivilegeSet::CONFIGURE_USERS
                | PrivilegeSet::CONFIGURE_COMPONENTS
                | PrivilegeSet::CONFIGURE_SELF
        }
        "Operator" => PrivilegeSet::LOGIN | PrivilegeSet::CONFIGURE_COMPONENTS | PrivilegeSet::CONFIGURE_SELF,
        "ReadOnly" => PrivilegeSet::LOGIN | PrivilegeSet::CONFIGURE_SELF,
        _ => PrivilegeSet::NONE,
    }
}

/// Checks a rule's required-privilege alternatives against a session's
/// granted set. `NoAuth` anywhere in `required` allows unconditionally.
/// An empty `required` list also allows (no privilege requirement at all).
pub fn privilege_allows(required: &[PrivilegeSet], granted: PrivilegeSet) -> bool {
    if required.iter().any(|r| r.contains(PrivilegeSet::NO_AUTH)) {
        return true;
    }
    if required.is_empty() {
        return true;
    }
    required.iter().any(|r| r.is_subset_of(granted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_auth_short_circuits() {
        assert!(privilege_allows(&[PrivilegeSet::NO_AUTH], PrivilegeSet::NONE));
    }

    #[test]
    fn any_required_set_subset_allows() {
        let granted = PrivilegeSet::LOGIN | PrivilegeSet::CONFIGURE_SELF;
        let required = [PrivilegeSet::CONFIGURE_USERS, PrivilegeSet::CONFIGURE_SELF];
        assert!(privilege_allows(&required, granted));
    }

    #[test]
    fn read_only_role_lacks_configure_users() {
        let granted = resolve_role("ReadOnly");
        let required = [PrivilegeSet::CONFIGURE_USERS];
        assert!(!privilege_allows(&required, granted));
    }

    #[test]
    fn missing_privilege_denies() {
        let granted = PrivilegeSet::LOGIN;
        let required = [PrivilegeSet::CONFIGURE_USERS];
        assert!(!privilege_allows(&required, granted));
    }

    /// Property P5: adding a privilege to the granted set never turns an
    /// allow into a deny.
    #[test]
    fn monotonicity() {
        let required = [PrivilegeSet::CONFIGURE_USERS];
        let a = PrivilegeSet::CONFIGURE_USERS;
        let bigger = a | PrivilegeSet::CONFIGURE_MANAGER;
        assert!(privilege_allows(&required, a));
        assert!(privilege_allows(&required, bigger));
    }
}
