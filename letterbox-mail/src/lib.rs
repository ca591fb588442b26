pub mod flags;
pub mod header;
pub mod loader;
pub mod login;
pub mod mailstore;
pub mod memory;
pub mod sequence;

use std::num::NonZeroU32;

pub type ImapUid = NonZeroU32;
pub type ImapUidvalidity = NonZeroU32;
