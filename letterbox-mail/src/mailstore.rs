//! The contract a storage backend fulfills to be served over IMAP.
//!
//! Every call may fail: the protocol layer answers `NO` to any backend
//! error, except for [`SequenceError`](crate::sequence::SequenceError)s
//! which are client mistakes and answered with `BAD`.

use std::num::NonZeroU32;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use crate::flags::Flags;
use crate::header::Header;
use crate::sequence::SequenceSet;
use crate::{ImapUid, ImapUidvalidity};

/// Mailbox hierarchy delimiter.
pub const MAILBOX_HIERARCHY_DELIMITER: char = '/';

pub const INBOX: &str = "INBOX";

pub type ArcMailstore = Arc<dyn Mailstore>;

#[async_trait]
pub trait Mailstore: Send + Sync {
    /// Check the credentials and open the user's storage.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Arc<dyn User>>;
}

#[async_trait]
pub trait User: Send + Sync {
    fn username(&self) -> &str;

    async fn mailboxes(&self) -> Result<Vec<Arc<dyn Mailbox>>>;

    /// `INBOX` is matched case-insensitively, any other name exactly.
    async fn mailbox_by_name(&self, name: &str) -> Result<Option<Arc<dyn Mailbox>>>;
}

#[async_trait]
pub trait Mailbox: Send + Sync {
    fn name(&self) -> &str;

    async fn uid_validity(&self) -> Result<ImapUidvalidity>;
    async fn message_count(&self) -> Result<u32>;
    async fn next_uid(&self) -> Result<ImapUid>;
    async fn last_uid(&self) -> Result<Option<ImapUid>>;
    async fn recent_count(&self) -> Result<u32>;
    async fn unseen_count(&self) -> Result<u32>;

    async fn message_by_sequence_number(&self, seq: NonZeroU32)
        -> Result<Option<Box<dyn Message>>>;
    async fn message_by_uid(&self, uid: ImapUid) -> Result<Option<Box<dyn Message>>>;

    /// Messages designated by `set` read as UIDs, see
    /// [`SequenceSet::resolve_uids`].
    async fn message_set_by_uid(&self, set: &SequenceSet) -> Result<Vec<Box<dyn Message>>>;

    /// Messages designated by `set` read as sequence numbers, see
    /// [`SequenceSet::resolve_sequence_numbers`].
    async fn message_set_by_sequence_number(
        &self,
        set: &SequenceSet,
    ) -> Result<Vec<Box<dyn Message>>>;

    /// A draft that only joins the mailbox once saved.
    fn new_message(&self) -> Result<Box<dyn Message>>;

    /// Remove every message flagged `\Deleted`. Returns the removed
    /// messages in ascending order, each carrying the sequence number it had
    /// before the call.
    async fn delete_flagged_messages(&self) -> Result<Vec<Box<dyn Message>>>;

    /// Clear `\Recent` on every message and return the UIDs that had it.
    /// The session that claims them is the only one to report them as
    /// recent.
    async fn claim_recent(&self) -> Result<Vec<ImapUid>>;
}

/// A snapshot of a message taken when it was queried.
///
/// Mutations only touch the snapshot until [`Message::save`] is called.
#[async_trait]
pub trait Message: Send + Sync {
    /// `None` for a draft.
    fn uid(&self) -> Option<ImapUid>;
    /// `None` for a draft.
    fn sequence_number(&self) -> Option<NonZeroU32>;
    fn header(&self) -> &Header;
    fn body(&self) -> &str;
    fn internal_date(&self) -> DateTime<FixedOffset>;
    fn flags(&self) -> &Flags;

    /// Size of the full RFC 822 text, header section included.
    fn size(&self) -> u32 {
        (self.header().raw().len() + self.body().len()) as u32
    }

    /// Flag mutations are recorded and replayed on the stored message by
    /// [`Message::save`], so concurrent snapshots do not overwrite each
    /// other. `\Recent` is kept by a replace.
    fn overwrite_flags(&mut self, flags: &Flags);
    fn add_flags(&mut self, flags: &Flags);
    fn remove_flags(&mut self, flags: &Flags);

    fn set_header(&mut self, header: Header);
    fn set_body(&mut self, body: String);
    fn set_internal_date(&mut self, date: DateTime<FixedOffset>);

    /// Commit the snapshot: a draft is appended to its mailbox and gets its
    /// UID and sequence number, an existing message has its recorded flag
    /// changes applied and the snapshot is refreshed with the result.
    async fn save(&mut self) -> Result<()>;
}
