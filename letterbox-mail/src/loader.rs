//! Load a directory tree of RFC 822 files into a [`MemUser`].
//!
//! ```text
//! root/
//!   a.eml            -> INBOX, UID 1
//!   b.eml            -> INBOX, UID 2
//!   Archive/
//!     2023/
//!       c.eml        -> Archive/2023, UID 1
//! ```
//!
//! Files are taken in lexical order, their modification time becomes their
//! internal date and they are marked `\Seen`. Hidden entries and symbolic
//! links are skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::flags::{Flag, Flags};
use crate::header::parse_message;
use crate::mailstore::{INBOX, MAILBOX_HIERARCHY_DELIMITER};
use crate::memory::MemUser;

/// Returns the number of messages loaded.
pub async fn load_tree(user: &mut MemUser, root: &Path) -> Result<usize> {
    let tree = scan(root)
        .await
        .with_context(|| format!("unable to walk {}", root.display()))?;

    let mut count = 0;
    for (name, files) in tree.iter() {
        let mailbox = user.create_mailbox(name);
        for path in files {
            let raw = tokio::fs::read(path)
                .await
                .with_context(|| format!("unable to read {}", path.display()))?;
            let modified = tokio::fs::metadata(path).await?.modified()?;

            let (header, body) = match parse_message(&raw) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(path=%path.display(), error=%e, "skipping unparsable message");
                    continue;
                }
            };
            mailbox
                .append(
                    header,
                    body,
                    DateTime::<Utc>::from(modified).into(),
                    Flags::new().with(Flag::Seen),
                )
                .await?;
            count += 1;
        }
    }

    tracing::info!(root=%root.display(), mailboxes=tree.len(), messages=count, "filesystem.loaded");
    Ok(count)
}

/// Mailbox names and their files, in lexical order.
async fn scan(root: &Path) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let mut tree = BTreeMap::new();
    let mut pending = vec![(root.to_path_buf(), INBOX.to_string())];

    while let Some((dir, mailbox)) = pending.pop() {
        let mut entries = vec![];
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            entries.push(entry);
        }
        entries.sort_by_key(|e| e.file_name());

        let mut files = vec![];
        for entry in entries {
            let file_name = match entry.file_name().to_str() {
                Some(n) if !n.starts_with('.') => n.to_string(),
                _ => continue,
            };
            let path = entry.path();
            let kind = tokio::fs::symlink_metadata(&path).await?.file_type();
            if kind.is_symlink() {
                tracing::debug!(path=%path.display(), "skipping symbolic link");
            } else if kind.is_dir() {
                let child = if dir == root {
                    file_name
                } else {
                    format!("{}{}{}", mailbox, MAILBOX_HIERARCHY_DELIMITER, file_name)
                };
                pending.push((path, child));
            } else {
                files.push(path);
            }
        }
        tree.entry(mailbox).or_insert_with(Vec::new).extend(files);
    }
    Ok(tree)
}
