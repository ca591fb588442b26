//! A mail store living in memory: each mailbox is a UID-ordered vector
//! behind a `tokio` lock, shared by all the sessions of its user.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU32;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::RwLock;

use crate::flags::{Flag, Flags};
use crate::header::{parse_message, Header};
use crate::login::{hash_password, verify_password};
use crate::mailstore::{self, Mailstore, INBOX};
use crate::sequence::SequenceSet;
use crate::{ImapUid, ImapUidvalidity};

#[derive(Default)]
pub struct MemoryMailstore {
    users: HashMap<String, UserEntry>,
}

struct UserEntry {
    password: String,
    user: Arc<MemUser>,
}

impl MemoryMailstore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `user`, `password` being an argon2 hash.
    pub fn add_user(&mut self, user: MemUser, password: String) {
        tracing::debug!(user=%user.username, "registered");
        self.users.insert(
            user.username.clone(),
            UserEntry {
                password,
                user: Arc::new(user),
            },
        );
    }

    /// The `alice` / `hunter2` account used in development mode.
    pub async fn demo() -> Result<Self> {
        let mut alice = MemUser::new("alice");
        alice.create_mailbox("Archive");
        let archive = alice.create_mailbox("Archive/2023");
        let inbox = alice.create_mailbox(INBOX);

        for raw in DEMO_MAILS {
            inbox.append_raw(raw.as_bytes(), Flags::new()).await?;
        }
        archive
            .append_raw(DEMO_MAILS[0].as_bytes(), Flags::new().with(Flag::Seen))
            .await?;

        let mut store = Self::new();
        store.add_user(alice, hash_password("hunter2")?);
        Ok(store)
    }
}

#[async_trait]
impl Mailstore for MemoryMailstore {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Arc<dyn mailstore::User>> {
        tracing::debug!(user=%username, "login");
        let entry = match self.users.get(username) {
            None => bail!("User {} does not exist", username),
            Some(u) => u,
        };

        tracing::debug!(user=%username, "verify password");
        if !verify_password(password, &entry.password)? {
            bail!("Wrong password");
        }

        let user: Arc<dyn mailstore::User> = entry.user.clone();
        Ok(user)
    }
}

// ---- user ----

pub struct MemUser {
    username: String,
    mailboxes: BTreeMap<String, Arc<MemMailbox>>,
}

impl MemUser {
    /// A user always owns an `INBOX`.
    pub fn new(username: impl Into<String>) -> Self {
        let mut user = Self {
            username: username.into(),
            mailboxes: BTreeMap::new(),
        };
        user.create_mailbox(INBOX);
        user
    }

    /// Create the mailbox `name`, or return it if it already exists.
    pub fn create_mailbox(&mut self, name: &str) -> Arc<MemMailbox> {
        let name = normalize_name(name);
        self.mailboxes
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemMailbox::new(name)))
            .clone()
    }
}

#[async_trait]
impl mailstore::User for MemUser {
    fn username(&self) -> &str {
        &self.username
    }

    async fn mailboxes(&self) -> Result<Vec<Arc<dyn mailstore::Mailbox>>> {
        Ok(self
            .mailboxes
            .values()
            .map(|mb| mb.clone() as Arc<dyn mailstore::Mailbox>)
            .collect())
    }

    async fn mailbox_by_name(&self, name: &str) -> Result<Option<Arc<dyn mailstore::Mailbox>>> {
        Ok(self
            .mailboxes
            .get(normalize_name(name))
            .map(|mb| mb.clone() as Arc<dyn mailstore::Mailbox>))
    }
}

fn normalize_name(name: &str) -> &str {
    if name.eq_ignore_ascii_case(INBOX) {
        INBOX
    } else {
        name
    }
}

// ---- mailbox ----

pub struct MemMailbox {
    name: String,
    state: Arc<RwLock<MailboxState>>,
}

struct MailboxState {
    uid_validity: ImapUidvalidity,
    uid_next: ImapUid,
    // ordered by UID, the position is the sequence number minus one
    mails: Vec<StoredMail>,
}

#[derive(Clone)]
struct StoredMail {
    uid: ImapUid,
    header: Header,
    body: String,
    internal_date: DateTime<FixedOffset>,
    flags: Flags,
}

impl MemMailbox {
    fn new(name: &str) -> Self {
        let uid_validity = u32::try_from(Utc::now().timestamp())
            .ok()
            .and_then(NonZeroU32::new)
            .unwrap_or(NonZeroU32::MIN);
        Self {
            name: name.to_string(),
            state: Arc::new(RwLock::new(MailboxState {
                uid_validity,
                uid_next: NonZeroU32::MIN,
                mails: vec![],
            })),
        }
    }

    /// Store a message without going through a draft.
    pub async fn append(
        &self,
        header: Header,
        body: String,
        internal_date: DateTime<FixedOffset>,
        flags: Flags,
    ) -> Result<ImapUid> {
        let mut state = self.state.write().await;
        let (uid, _) = state.push(header, body, internal_date, flags)?;
        Ok(uid)
    }

    /// Parse and store a RFC 822 message received now.
    pub async fn append_raw(&self, raw: &[u8], flags: Flags) -> Result<ImapUid> {
        let (header, body) = parse_message(raw)?;
        self.append(header, body, Utc::now().into(), flags).await
    }

    fn snapshot(&self, seq: usize, mail: &StoredMail) -> Box<dyn mailstore::Message> {
        Box::new(MemMessage {
            mailbox: self.state.clone(),
            uid: Some(mail.uid),
            seq: NonZeroU32::new(seq as u32 + 1),
            header: mail.header.clone(),
            body: mail.body.clone(),
            internal_date: mail.internal_date,
            flags: mail.flags.clone(),
            changes: vec![],
        })
    }
}

impl MailboxState {
    fn push(
        &mut self,
        header: Header,
        body: String,
        internal_date: DateTime<FixedOffset>,
        flags: Flags,
    ) -> Result<(ImapUid, NonZeroU32)> {
        let uid = self.uid_next;
        self.uid_next = uid
            .checked_add(1)
            .ok_or_else(|| anyhow!("UID space of the mailbox is exhausted"))?;
        self.mails.push(StoredMail {
            uid,
            header,
            body,
            internal_date,
            flags,
        });
        let seq = NonZeroU32::new(self.mails.len() as u32)
            .ok_or_else(|| anyhow!("empty mailbox after insertion"))?;
        Ok((uid, seq))
    }

    fn position(&self, uid: ImapUid) -> Option<usize> {
        self.mails.binary_search_by_key(&uid, |m| m.uid).ok()
    }

    fn count(&self, pred: impl Fn(&Flags) -> bool) -> u32 {
        self.mails.iter().filter(|m| pred(&m.flags)).count() as u32
    }
}

#[async_trait]
impl mailstore::Mailbox for MemMailbox {
    fn name(&self) -> &str {
        &self.name
    }

    async fn uid_validity(&self) -> Result<ImapUidvalidity> {
        Ok(self.state.read().await.uid_validity)
    }

    async fn message_count(&self) -> Result<u32> {
        Ok(self.state.read().await.mails.len() as u32)
    }

    async fn next_uid(&self) -> Result<ImapUid> {
        Ok(self.state.read().await.uid_next)
    }

    async fn last_uid(&self) -> Result<Option<ImapUid>> {
        Ok(self.state.read().await.mails.last().map(|m| m.uid))
    }

    async fn recent_count(&self) -> Result<u32> {
        Ok(self.state.read().await.count(|f| f.contains(Flag::Recent)))
    }

    async fn unseen_count(&self) -> Result<u32> {
        Ok(self.state.read().await.count(|f| !f.contains(Flag::Seen)))
    }

    async fn message_by_sequence_number(
        &self,
        seq: NonZeroU32,
    ) -> Result<Option<Box<dyn mailstore::Message>>> {
        let state = self.state.read().await;
        let idx = seq.get() as usize - 1;
        Ok(state.mails.get(idx).map(|m| self.snapshot(idx, m)))
    }

    async fn message_by_uid(&self, uid: ImapUid) -> Result<Option<Box<dyn mailstore::Message>>> {
        let state = self.state.read().await;
        Ok(state
            .position(uid)
            .map(|idx| self.snapshot(idx, &state.mails[idx])))
    }

    async fn message_set_by_uid(
        &self,
        set: &SequenceSet,
    ) -> Result<Vec<Box<dyn mailstore::Message>>> {
        let state = self.state.read().await;
        let uids = state.mails.iter().map(|m| m.uid).collect::<Vec<_>>();
        Ok(set
            .resolve_uids(&uids)
            .into_iter()
            .filter_map(|idx| state.mails.get(idx).map(|m| self.snapshot(idx, m)))
            .collect())
    }

    async fn message_set_by_sequence_number(
        &self,
        set: &SequenceSet,
    ) -> Result<Vec<Box<dyn mailstore::Message>>> {
        let state = self.state.read().await;
        let seqs = set.resolve_sequence_numbers(state.mails.len() as u32)?;
        Ok(seqs
            .into_iter()
            .filter_map(|seq| {
                let idx = seq.get() as usize - 1;
                state.mails.get(idx).map(|m| self.snapshot(idx, m))
            })
            .collect())
    }

    fn new_message(&self) -> Result<Box<dyn mailstore::Message>> {
        Ok(Box::new(MemMessage {
            mailbox: self.state.clone(),
            uid: None,
            seq: None,
            header: Header::new(),
            body: String::new(),
            internal_date: Utc::now().into(),
            flags: Flags::new(),
            changes: vec![],
        }))
    }

    async fn delete_flagged_messages(&self) -> Result<Vec<Box<dyn mailstore::Message>>> {
        let mut state = self.state.write().await;
        let removed = state
            .mails
            .iter()
            .enumerate()
            .filter(|(_, m)| m.flags.contains(Flag::Deleted))
            .map(|(idx, m)| self.snapshot(idx, m))
            .collect::<Vec<_>>();
        state.mails.retain(|m| !m.flags.contains(Flag::Deleted));
        tracing::debug!(mailbox=%self.name, count=removed.len(), "mailbox.expunged");
        Ok(removed)
    }

    async fn claim_recent(&self) -> Result<Vec<ImapUid>> {
        let mut state = self.state.write().await;
        let mut claimed = vec![];
        for mail in state.mails.iter_mut() {
            if mail.flags.contains(Flag::Recent) {
                mail.flags.remove(Flag::Recent);
                claimed.push(mail.uid);
            }
        }
        Ok(claimed)
    }
}

// ---- message ----

/// A flag mutation made on a snapshot, replayed on the stored message when
/// the snapshot is saved.
#[derive(Debug, Clone)]
enum FlagChange {
    Replace(Flags),
    Add(Flags),
    Remove(Flags),
}

impl FlagChange {
    /// `\Recent` is owned by the store and survives a replace.
    fn apply(&self, flags: &mut Flags) {
        match self {
            FlagChange::Replace(new) => {
                let recent = flags.contains(Flag::Recent);
                flags.replace(new);
                if recent {
                    flags.insert(Flag::Recent);
                } else {
                    flags.remove(Flag::Recent);
                }
            }
            FlagChange::Add(new) => flags.union(new),
            FlagChange::Remove(old) => flags.difference(old),
        }
    }
}

pub struct MemMessage {
    mailbox: Arc<RwLock<MailboxState>>,
    uid: Option<ImapUid>,
    seq: Option<NonZeroU32>,
    header: Header,
    body: String,
    internal_date: DateTime<FixedOffset>,
    flags: Flags,
    changes: Vec<FlagChange>,
}

impl MemMessage {
    fn change(&mut self, change: FlagChange) {
        change.apply(&mut self.flags);
        self.changes.push(change);
    }
}

#[async_trait]
impl mailstore::Message for MemMessage {
    fn uid(&self) -> Option<ImapUid> {
        self.uid
    }

    fn sequence_number(&self) -> Option<NonZeroU32> {
        self.seq
    }

    fn header(&self) -> &Header {
        &self.header
    }

    fn body(&self) -> &str {
        &self.body
    }

    fn internal_date(&self) -> DateTime<FixedOffset> {
        self.internal_date
    }

    fn flags(&self) -> &Flags {
        &self.flags
    }

    fn overwrite_flags(&mut self, flags: &Flags) {
        self.change(FlagChange::Replace(flags.clone()));
    }

    fn add_flags(&mut self, flags: &Flags) {
        self.change(FlagChange::Add(flags.clone()));
    }

    fn remove_flags(&mut self, flags: &Flags) {
        self.change(FlagChange::Remove(flags.clone()));
    }

    // Content setters only matter for drafts: once stored, only the flags
    // of a message are written back.
    fn set_header(&mut self, header: Header) {
        self.header = header;
    }

    fn set_body(&mut self, body: String) {
        self.body = body;
    }

    fn set_internal_date(&mut self, date: DateTime<FixedOffset>) {
        self.internal_date = date;
    }

    async fn save(&mut self) -> Result<()> {
        let mut state = self.mailbox.write().await;
        match self.uid {
            None => {
                self.changes.clear();
                self.flags.insert(Flag::Recent);
                let (uid, seq) = state.push(
                    self.header.clone(),
                    self.body.clone(),
                    self.internal_date,
                    self.flags.clone(),
                )?;
                self.uid = Some(uid);
                self.seq = Some(seq);
            }
            Some(uid) => {
                let idx = state
                    .position(uid)
                    .ok_or_else(|| anyhow!("message {} has been expunged", uid))?;
                let stored = &mut state.mails[idx].flags;
                for change in self.changes.drain(..) {
                    change.apply(stored);
                }
                self.flags = stored.clone();
                self.seq = NonZeroU32::new(idx as u32 + 1);
            }
        }
        Ok(())
    }
}

const DEMO_MAILS: [&str; 3] = [
    "Date: Sat, 8 Jul 2023 07:14:29 +0200\r\n\
From: Bob Robert <bob@example.tld>\r\n\
To: Alice Malice <alice@example.tld>\r\n\
Subject: Welcome\r\n\
Message-ID: <welcome@example.tld>\r\n\
\r\n\
Hello Alice,\r\n\
this is your new mailbox.\r\n",
    "Date: Sun, 9 Jul 2023 10:02:11 +0200\r\n\
From: Carol <carol@example.tld>\r\n\
To: Alice Malice <alice@example.tld>\r\n\
Subject: Lunch\r\n\
Message-ID: <lunch@example.tld>\r\n\
\r\n\
Lunch tomorrow at noon?\r\n",
    "Date: Mon, 10 Jul 2023 18:45:00 +0200\r\n\
From: Bob Robert <bob@example.tld>\r\n\
To: Alice Malice <alice@example.tld>\r\n\
Subject: Re: Welcome\r\n\
In-Reply-To: <welcome@example.tld>\r\n\
\r\n\
Did you get my first message?\r\n",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailstore::{Mailbox, Message, User};
    use crate::sequence::SequenceError;

    fn uid(n: u32) -> ImapUid {
        NonZeroU32::new(n).unwrap()
    }

    async fn mailbox_with(n: usize) -> Arc<MemMailbox> {
        let mut user = MemUser::new("user");
        let inbox = user.create_mailbox("inbox");
        for i in 0..n {
            let raw = format!("Subject: mail {}\r\n\r\nbody {}\r\n", i + 1, i + 1);
            inbox.append_raw(raw.as_bytes(), Flags::new()).await.unwrap();
        }
        inbox
    }

    #[tokio::test]
    async fn test_authenticate() {
        let mut store = MemoryMailstore::new();
        store.add_user(MemUser::new("user"), hash_password("pass").unwrap());

        let user = store.authenticate("user", "pass").await.unwrap();
        assert_eq!(user.username(), "user");
        assert!(store.authenticate("user", "wrong").await.is_err());
        assert!(store.authenticate("nobody", "pass").await.is_err());
    }

    #[tokio::test]
    async fn test_inbox_is_case_insensitive() {
        let mut user = MemUser::new("user");
        user.create_mailbox("Work/Projects");
        assert!(user.mailbox_by_name("iNbOx").await.unwrap().is_some());
        assert!(user.mailbox_by_name("work/projects").await.unwrap().is_none());

        let names = user
            .mailboxes()
            .await
            .unwrap()
            .iter()
            .map(|mb| mb.name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["INBOX", "Work/Projects"]);
    }

    #[tokio::test]
    async fn test_sequence_numbers_follow_uids() {
        let inbox = mailbox_with(3).await;
        assert_eq!(inbox.message_count().await.unwrap(), 3);
        assert_eq!(inbox.next_uid().await.unwrap(), uid(4));
        assert_eq!(inbox.last_uid().await.unwrap(), Some(uid(3)));

        let all = inbox
            .message_set_by_sequence_number(&"1:*".parse().unwrap())
            .await
            .unwrap();
        let seqs = all
            .iter()
            .map(|m| m.sequence_number().unwrap().get())
            .collect::<Vec<_>>();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(all[1].header().get("subject"), Some("mail 2"));
    }

    #[tokio::test]
    async fn test_expunge_keeps_uids() {
        let inbox = mailbox_with(4).await;
        for n in [2, 3] {
            let mut msg = inbox.message_by_uid(uid(n)).await.unwrap().unwrap();
            msg.add_flags(&Flags::new().with(Flag::Deleted));
            msg.save().await.unwrap();
        }

        let removed = inbox.delete_flagged_messages().await.unwrap();
        let removed = removed
            .iter()
            .map(|m| (m.uid().unwrap().get(), m.sequence_number().unwrap().get()))
            .collect::<Vec<_>>();
        assert_eq!(removed, vec![(2, 2), (3, 3)]);
        assert_eq!(inbox.message_count().await.unwrap(), 2);

        let last = inbox.message_by_sequence_number(uid(2)).await.unwrap().unwrap();
        assert_eq!(last.uid(), Some(uid(4)));

        let found = inbox
            .message_set_by_uid(&"2:4".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].uid(), Some(uid(4)));

        inbox.append_raw(b"Subject: new\r\n\r\n", Flags::new()).await.unwrap();
        assert_eq!(inbox.last_uid().await.unwrap(), Some(uid(5)));
    }

    #[tokio::test]
    async fn test_out_of_range_is_a_sequence_error() {
        let inbox = mailbox_with(2).await;
        let err = inbox
            .message_set_by_sequence_number(&"1:3".parse().unwrap())
            .await
            .err()
            .unwrap();
        assert_eq!(
            err.downcast_ref::<SequenceError>(),
            Some(&SequenceError::OutOfRange { value: 3, exists: 2 })
        );
    }

    #[tokio::test]
    async fn test_flags_only_change_on_save() {
        let inbox = mailbox_with(1).await;
        let mut msg = inbox.message_by_uid(uid(1)).await.unwrap().unwrap();
        msg.add_flags(&Flags::new().with(Flag::Seen));
        assert_eq!(inbox.unseen_count().await.unwrap(), 1);

        msg.save().await.unwrap();
        assert_eq!(inbox.unseen_count().await.unwrap(), 0);
        let stored = inbox.message_by_uid(uid(1)).await.unwrap().unwrap();
        assert!(stored.flags().contains(Flag::Seen));
    }

    #[tokio::test]
    async fn test_interleaved_snapshots_keep_both_changes() {
        let inbox = mailbox_with(1).await;
        let mut first = inbox.message_by_uid(uid(1)).await.unwrap().unwrap();
        let mut second = inbox.message_by_uid(uid(1)).await.unwrap().unwrap();

        first.add_flags(&Flags::new().with(Flag::Seen));
        second.add_flags(&Flags::new().with(Flag::Flagged));
        first.save().await.unwrap();
        second.save().await.unwrap();

        let stored = inbox.message_by_uid(uid(1)).await.unwrap().unwrap();
        assert!(stored.flags().contains(Flag::Seen));
        assert!(stored.flags().contains(Flag::Flagged));
        assert_eq!(second.flags(), stored.flags());

        // a removal made on a stale snapshot only removes what it names
        let mut stale = inbox.message_by_uid(uid(1)).await.unwrap().unwrap();
        let mut other = inbox.message_by_uid(uid(1)).await.unwrap().unwrap();
        other.add_flags(&Flags::new().with(Flag::Answered));
        other.save().await.unwrap();
        stale.remove_flags(&Flags::new().with(Flag::Seen));
        stale.save().await.unwrap();
        assert!(stale.flags().contains(Flag::Answered));
        assert!(!stale.flags().contains(Flag::Seen));
    }

    #[tokio::test]
    async fn test_replace_keeps_recent() {
        let inbox = mailbox_with(0).await;
        let mut draft = inbox.new_message().unwrap();
        draft.save().await.unwrap();

        let mut msg = inbox.message_by_uid(uid(1)).await.unwrap().unwrap();
        msg.overwrite_flags(&Flags::new().with(Flag::Draft));
        msg.save().await.unwrap();
        assert!(msg.flags().contains(Flag::Recent));
        assert!(msg.flags().contains(Flag::Draft));
    }

    #[tokio::test]
    async fn test_recent_is_claimed_once() {
        let inbox = mailbox_with(1).await;
        let mut draft = inbox.new_message().unwrap();
        draft.save().await.unwrap();
        assert_eq!(inbox.recent_count().await.unwrap(), 1);

        assert_eq!(inbox.claim_recent().await.unwrap(), vec![uid(2)]);
        assert_eq!(inbox.recent_count().await.unwrap(), 0);
        assert!(inbox.claim_recent().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_draft_gets_uid_on_save() {
        let inbox = mailbox_with(1).await;
        let mut draft = inbox.new_message().unwrap();
        assert_eq!(draft.uid(), None);
        draft.set_header(Header::parse("Subject: draft\r\n"));
        draft.set_body("text\r\n".into());
        assert_eq!(inbox.message_count().await.unwrap(), 1);

        draft.save().await.unwrap();
        assert_eq!(draft.uid(), Some(uid(2)));
        assert_eq!(draft.sequence_number(), Some(uid(2)));
        assert!(draft.flags().contains(Flag::Recent));
        assert_eq!(inbox.recent_count().await.unwrap(), 1);
        assert_eq!(draft.size(), "Subject: draft\r\n\r\ntext\r\n".len() as u32);
    }

    #[tokio::test]
    async fn test_save_expunged_message_fails() {
        let inbox = mailbox_with(1).await;
        let mut msg = inbox.message_by_uid(uid(1)).await.unwrap().unwrap();
        msg.add_flags(&Flags::new().with(Flag::Deleted));
        msg.save().await.unwrap();
        inbox.delete_flagged_messages().await.unwrap();

        assert!(msg.save().await.is_err());
    }

    #[tokio::test]
    async fn test_demo_store() {
        let store = MemoryMailstore::demo().await.unwrap();
        let alice = store.authenticate("alice", "hunter2").await.unwrap();
        let inbox = alice.mailbox_by_name("INBOX").await.unwrap().unwrap();
        assert_eq!(inbox.message_count().await.unwrap(), 3);
        assert_eq!(alice.mailboxes().await.unwrap().len(), 3);
    }
}
