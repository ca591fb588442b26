use std::collections::BTreeSet;
use std::num::NonZeroU32;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use imap_codec::imap_types::fetch::MessageDataItem;
use imap_codec::imap_types::response::{Code, Data, Status};
use tokio::sync::Mutex;

use letterbox_mail::flags::{Flag, Flags};
use letterbox_mail::mailstore::{Mailbox, Message};
use letterbox_mail::sequence::SequenceSet;
use letterbox_mail::ImapUid;

use crate::imap::flags;
use crate::imap::mail_view::{FetchAttr, MailView};
use crate::imap::response::Body;

const DEFAULT_FLAGS: [Flag; 5] = [
    Flag::Seen,
    Flag::Answered,
    Flag::Flagged,
    Flag::Deleted,
    Flag::Draft,
];

/// How `STORE` combines the given flags with the current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Replace,
    Add,
    Remove,
}

/// A selected (or examined) mailbox as seen by one session.
///
/// Nothing is cached: every call asks the backend, so sequence numbers and
/// counters always reflect the current content of the mailbox. The only
/// session-local state is the set of messages this session took `\Recent`
/// from: a read-write view claims them when it reports the counters, and
/// keeps showing them as `\Recent` until they are expunged or the view is
/// dropped.
pub struct MailboxView {
    pub mailbox: Arc<dyn Mailbox>,
    pub read_only: bool,
    recent: Mutex<BTreeSet<ImapUid>>,
}

impl MailboxView {
    pub fn new(mailbox: Arc<dyn Mailbox>, read_only: bool) -> Self {
        Self {
            mailbox,
            read_only,
            recent: Mutex::new(BTreeSet::new()),
        }
    }

    /// Untagged data sent in answer to SELECT and EXAMINE.
    pub async fn summary(&self) -> Result<Vec<Body>> {
        let mut data = self.update().await?;
        data.extend(self.flags()?);
        data.push(Body::Status(Status::ok(
            None,
            Some(Code::UidValidity(self.mailbox.uid_validity().await?)),
            "UIDs valid",
        )?));
        data.push(Body::Status(Status::ok(
            None,
            Some(Code::UidNext(self.mailbox.next_uid().await?)),
            "Predicted next UID",
        )?));
        Ok(data)
    }

    /// Current `EXISTS` and `RECENT` counters.
    pub async fn update(&self) -> Result<Vec<Body>> {
        let exists = self.mailbox.message_count().await?;
        let recent = if self.read_only {
            self.mailbox.recent_count().await?
        } else {
            let claimed = self.mailbox.claim_recent().await?;
            let mut recent = self.recent.lock().await;
            recent.extend(claimed);
            u32::try_from(recent.len())?
        };
        Ok(vec![
            Body::Data(Data::Exists(exists)),
            Body::Data(Data::Recent(recent)),
        ])
    }

    fn flags(&self) -> Result<Vec<Body>> {
        let flags = DEFAULT_FLAGS.into_iter().collect::<Flags>();
        let permanent = if self.read_only {
            vec![]
        } else {
            flags::to_permanent(&flags, true)?
        };

        Ok(vec![
            Body::Data(Data::Flags(flags::to_list(&flags)?)),
            Body::Status(Status::ok(
                None,
                Some(Code::PermanentFlags(permanent)),
                "Flags permitted",
            )?),
        ])
    }

    async fn messages(&self, set: &SequenceSet, is_uid: bool) -> Result<Vec<Box<dyn Message>>> {
        if is_uid {
            self.mailbox.message_set_by_uid(set).await
        } else {
            self.mailbox.message_set_by_sequence_number(set).await
        }
    }

    pub async fn fetch(
        &self,
        set: &SequenceSet,
        attrs: &[FetchAttr],
        is_uid: bool,
    ) -> Result<Vec<Body>> {
        let mut attrs = attrs.to_vec();
        if is_uid && !attrs.contains(&FetchAttr::Uid) {
            attrs.insert(0, FetchAttr::Uid);
        }
        let mark_seen = !self.read_only && attrs.iter().any(FetchAttr::sets_seen);
        if mark_seen && !attrs.contains(&FetchAttr::Flags) {
            attrs.push(FetchAttr::Flags);
        }

        let recent = self.recent.lock().await.clone();
        let mut ret = vec![];
        for mut msg in self.messages(set, is_uid).await? {
            if mark_seen && !msg.flags().contains(Flag::Seen) {
                msg.add_flags(&Flags::new().with(Flag::Seen));
                msg.save().await?;
            }

            let view = MailView::new(msg.as_ref(), is_recent(&recent, msg.as_ref()));
            let items = attrs
                .iter()
                .map(|attr| view.item(attr))
                .collect::<Result<Vec<_>>>()?;
            ret.push(fetch_data(msg.as_ref(), items)?);
        }
        Ok(ret)
    }

    /// Apply `flags` to every message of `set`. The backend keeps `\Recent`
    /// out of a `FLAGS` replace.
    pub async fn store(
        &self,
        set: &SequenceSet,
        mode: StoreMode,
        flags: &Flags,
        silent: bool,
        is_uid: bool,
    ) -> Result<Vec<Body>> {
        let recent = self.recent.lock().await.clone();
        let mut ret = vec![];
        for mut msg in self.messages(set, is_uid).await? {
            match mode {
                StoreMode::Add => msg.add_flags(flags),
                StoreMode::Remove => msg.remove_flags(flags),
                StoreMode::Replace => msg.overwrite_flags(flags),
            }
            msg.save().await?;

            if silent {
                continue;
            }
            let view = MailView::new(msg.as_ref(), is_recent(&recent, msg.as_ref()));
            let mut items = vec![];
            if is_uid {
                items.push(view.item(&FetchAttr::Uid)?);
            }
            items.push(view.flags()?);
            ret.push(fetch_data(msg.as_ref(), items)?);
        }
        Ok(ret)
    }

    /// Remove `\Deleted` messages. Each `EXPUNGE` line accounts for the
    /// removals reported before it.
    pub async fn expunge(&self) -> Result<Vec<Body>> {
        let removed = self.mailbox.delete_flagged_messages().await?;
        let mut recent = self.recent.lock().await;
        let mut ret = vec![];
        for (i, msg) in removed.iter().enumerate() {
            if let Some(uid) = msg.uid() {
                recent.remove(&uid);
            }
            let seq = sequence_number(msg.as_ref())?.get() - i as u32;
            let seq = NonZeroU32::new(seq)
                .ok_or_else(|| anyhow!("expunged messages are not in sequence order"))?;
            ret.push(Body::Data(Data::Expunge(seq)));
        }
        Ok(ret)
    }
}

fn is_recent(recent: &BTreeSet<ImapUid>, msg: &dyn Message) -> bool {
    msg.uid().map(|uid| recent.contains(&uid)).unwrap_or(false)
}

fn fetch_data(msg: &dyn Message, items: Vec<MessageDataItem<'static>>) -> Result<Body> {
    Ok(Body::Data(Data::Fetch {
        seq: sequence_number(msg)?,
        items: items
            .try_into()
            .map_err(|_| anyhow!("empty fetch item list"))?,
    }))
}

fn sequence_number(msg: &dyn Message) -> Result<NonZeroU32> {
    msg.sequence_number()
        .ok_or_else(|| anyhow!("fetched message has no sequence number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use letterbox_mail::memory::MemUser;

    #[tokio::test]
    async fn test_expunge_numbers_follow_removals() {
        let mut user = MemUser::new("user");
        let inbox = user.create_mailbox("INBOX");
        for i in 0..5 {
            let raw = format!("Subject: {}\r\n\r\nbody\r\n", i);
            let flags = match i {
                1 | 2 | 4 => Flags::new().with(Flag::Deleted),
                _ => Flags::new(),
            };
            inbox.append_raw(raw.as_bytes(), flags).await.unwrap();
        }

        let view = MailboxView::new(inbox.clone(), false);
        let lines = view
            .expunge()
            .await
            .unwrap()
            .into_iter()
            .map(|b| match b {
                Body::Data(Data::Expunge(seq)) => seq.get(),
                other => panic!("unexpected line {:?}", other),
            })
            .collect::<Vec<_>>();
        assert_eq!(lines, vec![2, 2, 3]);
        assert_eq!(inbox.message_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_recent_is_claimed_by_read_write_views() {
        let mut user = MemUser::new("user");
        let inbox = user.create_mailbox("INBOX");
        inbox
            .append_raw(b"Subject: new\r\n\r\nbody\r\n", Flags::new().with(Flag::Recent))
            .await
            .unwrap();

        let examined = MailboxView::new(inbox.clone(), true);
        assert_eq!(examined.update().await.unwrap()[1], Body::Data(Data::Recent(1)));

        let first = MailboxView::new(inbox.clone(), false);
        assert_eq!(first.update().await.unwrap()[1], Body::Data(Data::Recent(1)));
        // still reported to the session that claimed it
        assert_eq!(first.update().await.unwrap()[1], Body::Data(Data::Recent(1)));

        let second = MailboxView::new(inbox.clone(), false);
        assert_eq!(second.update().await.unwrap()[1], Body::Data(Data::Recent(0)));
        assert_eq!(examined.update().await.unwrap()[1], Body::Data(Data::Recent(0)));
    }
}
