use anyhow::Result;
use imap_codec::imap_types::core::Atom;
use imap_codec::imap_types::flag::{Flag as ImapFlag, FlagFetch, FlagPerm};

use letterbox_mail::flags::{Flag, Flags};

/// `None` for `\Recent`, which only exists in fetch data.
pub fn system(flag: Flag) -> Option<ImapFlag<'static>> {
    match flag {
        Flag::Seen => Some(ImapFlag::Seen),
        Flag::Answered => Some(ImapFlag::Answered),
        Flag::Flagged => Some(ImapFlag::Flagged),
        Flag::Deleted => Some(ImapFlag::Deleted),
        Flag::Draft => Some(ImapFlag::Draft),
        Flag::Recent => None,
    }
}

pub fn keyword(name: &str) -> Result<ImapFlag<'static>> {
    Ok(ImapFlag::keyword(Atom::try_from(name.to_string())?))
}

/// Flags of a message as sent in `FETCH` data, system flags first.
pub fn to_fetch(flags: &Flags) -> Result<Vec<FlagFetch<'static>>> {
    let mut ret = flags
        .system()
        .map(|f| system(f).map(FlagFetch::Flag).unwrap_or(FlagFetch::Recent))
        .collect::<Vec<_>>();
    for name in flags.keywords() {
        ret.push(FlagFetch::Flag(keyword(name)?));
    }
    Ok(ret)
}

/// The `FLAGS` list of a mailbox.
pub fn to_list(flags: &Flags) -> Result<Vec<ImapFlag<'static>>> {
    let mut ret = flags.system().filter_map(system).collect::<Vec<_>>();
    for name in flags.keywords() {
        ret.push(keyword(name)?);
    }
    Ok(ret)
}

/// `PERMANENTFLAGS`, with `\*` when clients may create keywords.
pub fn to_permanent(flags: &Flags, new_keywords: bool) -> Result<Vec<FlagPerm<'static>>> {
    let mut ret = to_list(flags)?
        .into_iter()
        .map(FlagPerm::Flag)
        .collect::<Vec<_>>();
    if new_keywords {
        ret.push(FlagPerm::Asterisk);
    }
    Ok(ret)
}
