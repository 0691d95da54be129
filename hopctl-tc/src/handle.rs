//! TC handle computation.
//!
//! TC handles are 32-bit values split into major:minor (16:16 bits). This module
//! provides utilities for computing handles according to our numbering scheme.
//!
//! | Component        | Handle          | Example (index=2) |
//! |------------------|-----------------|-------------------|
//! | HTB root qdisc   | `1:0`           | `N/A`             |
//! | Aggregate class  | `1:1`           | `N/A`             |
//! | Per-subnet class | `1:(0x10+index)`| `1:12`            |
//! | Ingress qdisc    | `ffff:0`        | `N/A`             |

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// The offset added to a subnet's index to compute its class minor number.
///
/// This keeps minors below the offset free for the aggregate class, and makes the class of
/// subnet `i` render as `1:1i` for the first sixteen subnets.
pub const ID_OFFSET: u16 = 0x10;

/// A `major:minor` traffic control handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassId {
    pub major: u16,
    pub minor: u16,
}

impl ClassId {
    /// The HTB root qdisc, `1:0`.
    pub const ROOT_QDISC: Self = Self::new(1, 0);
    /// The aggregate class every per-subnet class hangs from, `1:1`.
    pub const AGGREGATE: Self = Self::new(1, 1);
    /// The ingress qdisc, `ffff:0`.
    pub const INGRESS: Self = Self::new(0xffff, 0);

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Compute the class handle for the subnet at `index` in a plan.
    ///
    /// # Example
    ///
    /// ```
    /// use hopctl_tc::ClassId;
    /// assert_eq!(ClassId::for_index(2).to_string(), "1:12");
    /// ```
    pub const fn for_index(index: u16) -> Self {
        Self::new(1, ID_OFFSET + index)
    }

    /// The raw 32-bit handle.
    pub const fn as_u32(self) -> u32 {
        (self.major as u32) << 16 | self.minor as u32
    }

    /// The qdisc form (`major:`) used when a handle names a qdisc.
    pub fn qdisc(self) -> String {
        format!("{:x}:", self.major)
    }
}

/// `tc` prints and parses handles in hexadecimal.
impl Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:{:x}", self.major, self.minor)
    }
}
