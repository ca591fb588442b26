use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use chrono::{DateTime, FixedOffset, Utc};
use imap_codec::imap_types::core::QuotedChar;
use imap_codec::imap_types::flag::FlagNameAttribute;
use imap_codec::imap_types::mailbox::Mailbox as MailboxCodec;
use imap_codec::imap_types::response::{Code, Data};
use imap_codec::imap_types::status::StatusDataItem;

use letterbox_mail::flags::Flags;
use letterbox_mail::header::parse_message;
use letterbox_mail::mailstore::{INBOX, MAILBOX_HIERARCHY_DELIMITER as MBX_HIER_DELIM};

use crate::imap::command::{astring, flag_list, CommandError, Context, HandlerResult};
use crate::imap::flow;
use crate::imap::mailbox_view::MailboxView;
use crate::imap::request::Arg;
use crate::imap::response::Response;

pub(crate) async fn select(ctx: Context<'_>) -> HandlerResult {
    open(ctx, false).await
}

pub(crate) async fn examine(ctx: Context<'_>) -> HandlerResult {
    open(ctx, true).await
}

pub(crate) async fn list(ctx: Context<'_>) -> HandlerResult {
    list_mailboxes(ctx, false).await
}

/// Every mailbox counts as subscribed.
pub(crate) async fn lsub(ctx: Context<'_>) -> HandlerResult {
    list_mailboxes(ctx, true).await
}

pub(crate) async fn status(ctx: Context<'_>) -> HandlerResult {
    let args = ctx.args(2)?;
    let name = astring(&args[0])?;
    let wanted = match args[1].as_list() {
        Some(items) if !items.is_empty() => items,
        _ => return Err(CommandError::syntax("expected a list of status items")),
    };

    let mb = match ctx.user()?.mailbox_by_name(&name).await? {
        Some(mb) => mb,
        None => {
            return Ok((
                Response::build()
                    .to_req(ctx.req)
                    .message("Mailbox does not exist")
                    .no()?,
                flow::Transition::None,
            ))
        }
    };

    let mut items = vec![];
    for item in wanted {
        let item = item
            .as_atom()
            .ok_or_else(|| CommandError::syntax("expected a status item"))?
            .to_ascii_uppercase();
        let item = match item.as_str() {
            "MESSAGES" => StatusDataItem::Messages(mb.message_count().await?),
            "RECENT" => StatusDataItem::Recent(mb.recent_count().await?),
            "UIDNEXT" => StatusDataItem::UidNext(mb.next_uid().await?),
            "UIDVALIDITY" => StatusDataItem::UidValidity(mb.uid_validity().await?),
            "UNSEEN" => StatusDataItem::Unseen(mb.unseen_count().await?),
            _ => return Err(CommandError::syntax(format!("unknown status item {}", item))),
        };
        items.push(item);
    }

    Ok((
        Response::build()
            .to_req(ctx.req)
            .message("STATUS completed")
            .data(Data::Status {
                mailbox: mailbox_name(mb.name())?,
                items: items.into(),
            })
            .ok()?,
        flow::Transition::None,
    ))
}

/// `APPEND <mailbox> [(flags)] ["date-time"] <literal>`
pub(crate) async fn append(ctx: Context<'_>) -> HandlerResult {
    let args = &ctx.req.args;
    if !(2..=4).contains(&args.len()) {
        return Err(CommandError::syntax("APPEND takes 2 to 4 arguments"));
    }
    let name = astring(&args[0])?;
    let raw = match args.last() {
        Some(Arg::Literal(data)) => data,
        _ => return Err(CommandError::syntax("the message must be sent as a literal")),
    };

    let mut flags = None;
    let mut date = None;
    for arg in &args[1..args.len() - 1] {
        match arg {
            Arg::List(_) if flags.is_none() && date.is_none() => {
                flags = Some(flag_list(std::slice::from_ref(arg))?)
            }
            Arg::Quoted(text) if date.is_none() => date = Some(parse_date_time(text)?),
            _ => return Err(CommandError::syntax("unexpected APPEND argument")),
        }
    }

    let mb = match ctx.user()?.mailbox_by_name(&name).await? {
        Some(mb) => mb,
        None => {
            return Ok((
                Response::build()
                    .to_req(ctx.req)
                    .code(Code::TryCreate)
                    .message("Mailbox does not exist")
                    .no()?,
                flow::Transition::None,
            ))
        }
    };

    let (header, body) = match parse_message(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!(error=%e, "rejected appended message");
            return Ok((
                Response::build()
                    .to_req(ctx.req)
                    .message("Could not parse the message")
                    .no()?,
                flow::Transition::None,
            ));
        }
    };

    let mut msg = mb.new_message()?;
    msg.set_header(header);
    msg.set_body(body);
    msg.set_internal_date(date.unwrap_or_else(|| Utc::now().into()));
    msg.overwrite_flags(&flags.unwrap_or_else(Flags::new));
    msg.save().await?;
    tracing::debug!(mailbox=%mb.name(), uid=?msg.uid(), "message appended");

    Ok((
        Response::build()
            .to_req(ctx.req)
            .message("APPEND completed")
            .ok()?,
        flow::Transition::None,
    ))
}

// ---- internals ----

/// SELECT and EXAMINE. On failure the current selection, if any, is kept.
async fn open(ctx: Context<'_>, read_only: bool) -> HandlerResult {
    let args = ctx.args(1)?;
    let name = astring(&args[0])?;
    let user = ctx.user()?;

    let mb = match user.mailbox_by_name(&name).await? {
        Some(mb) => mb,
        None => {
            return Ok((
                Response::build()
                    .to_req(ctx.req)
                    .message("Mailbox does not exist")
                    .no()?,
                flow::Transition::None,
            ))
        }
    };

    let view = MailboxView::new(mb, read_only);
    let data = view.summary().await?;
    tracing::info!(username=%user.username(), mailbox=%name, read_only, "mailbox.selected");

    let (code, verb) = if read_only {
        (Code::ReadOnly, "EXAMINE")
    } else {
        (Code::ReadWrite, "SELECT")
    };
    Ok((
        Response::build()
            .to_req(ctx.req)
            .message(format!("{} completed", verb))
            .code(code)
            .set_body(data)
            .ok()?,
        flow::Transition::Select(view),
    ))
}

async fn list_mailboxes(ctx: Context<'_>, is_lsub: bool) -> HandlerResult {
    let args = ctx.args(2)?;
    let reference = astring(&args[0])?;
    let wildcard = astring(&args[1])?;
    let verb = if is_lsub { "LSUB" } else { "LIST" };

    if wildcard.is_empty() {
        let root = listing(is_lsub, vec![FlagNameAttribute::Noselect], "")?;
        return Ok((
            Response::build()
                .to_req(ctx.req)
                .message(format!("{} completed", verb))
                .data(root)
                .ok()?,
            flow::Transition::None,
        ));
    }
    let wildcard = normalize_inbox(&format!("{}{}", reference, wildcard));

    let mailboxes = ctx.user()?.mailboxes().await?;
    let mut vmailboxes = BTreeMap::new();
    for mb in mailboxes.iter() {
        let name = mb.name();
        for (i, _) in name.match_indices(MBX_HIER_DELIM) {
            if i > 0 {
                vmailboxes.entry(&name[..i]).or_insert(false);
            }
        }
        vmailboxes.insert(name, true);
    }

    let ret = vmailboxes
        .into_iter()
        .filter(|(name, _)| matches_wildcard(&wildcard, name))
        .map(|(name, is_real)| {
            let attributes = if is_real {
                vec![]
            } else {
                vec![FlagNameAttribute::Noselect]
            };
            listing(is_lsub, attributes, name)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((
        Response::build()
            .to_req(ctx.req)
            .message(format!("{} completed", verb))
            .many_data(ret)
            .ok()?,
        flow::Transition::None,
    ))
}

fn listing(
    is_lsub: bool,
    items: Vec<FlagNameAttribute<'static>>,
    name: &str,
) -> Result<Data<'static>> {
    let delimiter = Some(
        QuotedChar::try_from(MBX_HIER_DELIM)
            .map_err(|_| anyhow!("invalid hierarchy delimiter {:?}", MBX_HIER_DELIM))?,
    );
    let mailbox = mailbox_name(name)?;
    Ok(if is_lsub {
        Data::Lsub {
            items,
            delimiter,
            mailbox,
        }
    } else {
        Data::List {
            items,
            delimiter,
            mailbox,
        }
    })
}

fn mailbox_name(name: &str) -> Result<MailboxCodec<'static>> {
    MailboxCodec::try_from(name.to_string())
        .map_err(|e| anyhow!("mailbox name {:?} can not be sent: {:?}", name, e))
}

/// `INBOX` is case-insensitive, so a pattern starting with it in any case
/// is rewritten to the stored spelling.
fn normalize_inbox(pattern: &str) -> String {
    match (pattern.get(..INBOX.len()), pattern.get(INBOX.len()..)) {
        (Some(head), Some(rest))
            if head.eq_ignore_ascii_case(INBOX)
                && (rest.is_empty() || rest.starts_with(MBX_HIER_DELIM)) =>
        {
            format!("{}{}", INBOX, rest)
        }
        _ => pattern.to_string(),
    }
}

/// `date-time` of RFC 3501, e.g. `17-Jul-1996 02:44:25 -0700`.
fn parse_date_time(text: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_str(text.trim(), "%d-%b-%Y %H:%M:%S %z")
        .map_err(|_| CommandError::syntax(format!("invalid date-time {:?}", text)))
}

/// `*` matches anything, `%` anything but the hierarchy delimiter.
fn matches_wildcard(wildcard: &str, name: &str) -> bool {
    let wildcard = wildcard.chars().collect::<Vec<char>>();
    let name = name.chars().collect::<Vec<char>>();

    let mut matches = vec![vec![false; wildcard.len() + 1]; name.len() + 1];

    for i in 0..=name.len() {
        for j in 0..=wildcard.len() {
            matches[i][j] = (i == 0 && j == 0)
                || (j > 0
                    && matches[i][j - 1]
                    && (wildcard[j - 1] == '%' || wildcard[j - 1] == '*'))
                || (i > 0
                    && j > 0
                    && matches[i - 1][j - 1]
                    && wildcard[j - 1] == name[i - 1]
                    && wildcard[j - 1] != '%'
                    && wildcard[j - 1] != '*')
                || (i > 0
                    && j > 0
                    && matches[i - 1][j]
                    && (wildcard[j - 1] == '*'
                        || (wildcard[j - 1] == '%' && name[i - 1] != MBX_HIER_DELIM)));
        }
    }

    matches[name.len()][wildcard.len()]
}
