// SPDX-License-Identifier: MIT OR Apache-2.0

//! Permission levels an account can hold in a space.
use std::fmt;

use serde::{Deserialize, Serialize};

/// Permission level of an account, ordered from weakest to strongest.
///
/// Every level includes the capabilities of the levels below it: writers can
/// read, admins can write and owners can do everything admins can.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Permissions {
    /// No access. Accounts with a pending join request hold this level.
    #[default]
    None,

    /// Read the content of the space.
    Reader,

    /// Read and change the content of the space.
    Writer,

    /// Additionally manage accounts: accept and decline join requests,
    /// change permissions and remove accounts.
    Admin,

    /// The account which created the space. Owners can not be removed.
    Owner,
}

impl Permissions {
    pub fn is_none(&self) -> bool {
        *self == Self::None
    }

    pub fn can_read(&self) -> bool {
        *self >= Self::Reader
    }

    pub fn can_write(&self) -> bool {
        *self >= Self::Writer
    }

    /// Whether this level allows handling join requests and removals.
    pub fn can_manage_accounts(&self) -> bool {
        *self >= Self::Admin
    }

    pub fn is_owner(&self) -> bool {
        *self == Self::Owner
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            Self::None => "none",
            Self::Reader => "reader",
            Self::Writer => "writer",
            Self::Admin => "admin",
            Self::Owner => "owner",
        };
        write!(f, "{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::Permissions;

    #[test]
    fn levels_are_ordered() {
        assert!(Permissions::None < Permissions::Reader);
        assert!(Permissions::Reader < Permissions::Writer);
        assert!(Permissions::Writer < Permissions::Admin);
        assert!(Permissions::Admin < Permissions::Owner);
    }

    #[test]
    fn capabilities() {
        assert!(!Permissions::None.can_read());
        assert!(Permissions::Reader.can_read());
        assert!(!Permissions::Reader.can_write());
        assert!(Permissions::Writer.can_write());
        assert!(!Permissions::Writer.can_manage_accounts());
        assert!(Permissions::Admin.can_manage_accounts());
        assert!(!Permissions::Admin.is_owner());
        assert!(Permissions::Owner.can_manage_accounts());
        assert!(Permissions::Owner.can_write());
    }
}
