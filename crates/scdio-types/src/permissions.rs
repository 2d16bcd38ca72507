use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Role permission bitmask. Stored as a plain integer on `server_roles`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(u32);

impl Permissions {
    pub const NONE: Self = Self(0);
    pub const VIEW_CHANNELS: Self = Self(1);
    pub const SEND_MESSAGES: Self = Self(2);
    pub const MANAGE_MESSAGES: Self = Self(4);
    pub const MANAGE_CHANNELS: Self = Self(8);
    pub const MANAGE_ROLES: Self = Self(16);
    pub const MANAGE_SERVER: Self = Self(32);
    pub const ADMIN: Self = Self(64);

    /// Every defined bit.
    pub const ALL: Self = Self(127);

    /// What a fresh member gets through `@everyone`.
    pub const DEFAULT_MEMBER: Self = Self(Self::VIEW_CHANNELS.0 | Self::SEND_MESSAGES.0);

    /// Unknown bits are dropped.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// `(self & required) == required`, with ADMIN granting everything.
    pub const fn contains(self, required: Self) -> bool {
        if self.0 & Self::ADMIN.0 != 0 {
            return true;
        }
        self.0 & required.0 == required.0
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permissions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl FromIterator<Permissions> for Permissions {
    fn from_iter<I: IntoIterator<Item = Permissions>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, |acc, p| acc | p)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#09b}", self.0)
    }
}
