use crate::imap::command::{
    expect_args, flag_list, sequence_set, CommandError, Context, HandlerResult,
};
use crate::imap::flow;
use crate::imap::mail_view::FetchAttr;
use crate::imap::mailbox_view::StoreMode;
use crate::imap::request::Arg;
use crate::imap::response::Response;

pub(crate) async fn check(ctx: Context<'_>) -> HandlerResult {
    ctx.args(0)?;
    let body = ctx.selection()?.update().await?;
    Ok((
        Response::build()
            .to_req(ctx.req)
            .message("CHECK completed")
            .set_body(body)
            .ok()?,
        flow::Transition::None,
    ))
}

/// Leaves the Selected state, silently expunging a read-write mailbox.
pub(crate) async fn close(ctx: Context<'_>) -> HandlerResult {
    ctx.args(0)?;
    let view = ctx.selection()?;
    if !view.read_only {
        view.expunge().await?;
    }
    Ok((
        Response::build()
            .to_req(ctx.req)
            .message("CLOSE completed")
            .ok()?,
        flow::Transition::Unselect,
    ))
}

pub(crate) async fn expunge(ctx: Context<'_>) -> HandlerResult {
    ctx.args(0)?;
    let view = ctx.selection()?;
    if view.read_only {
        return read_only(&ctx);
    }
    let body = view.expunge().await?;
    Ok((
        Response::build()
            .to_req(ctx.req)
            .message("EXPUNGE completed")
            .set_body(body)
            .ok()?,
        flow::Transition::None,
    ))
}

pub(crate) async fn fetch(ctx: Context<'_>) -> HandlerResult {
    let args = &ctx.req.args;
    fetch_messages(&ctx, args, false).await
}

pub(crate) async fn store(ctx: Context<'_>) -> HandlerResult {
    let args = &ctx.req.args;
    store_flags(&ctx, args, false).await
}

/// `UID FETCH` and `UID STORE`: the set holds UIDs instead of sequence
/// numbers.
pub(crate) async fn uid(ctx: Context<'_>) -> HandlerResult {
    let (sub, rest) = ctx
        .req
        .args
        .split_first()
        .ok_or_else(|| CommandError::syntax("missing UID command"))?;
    let sub = sub.as_atom().map(str::to_ascii_uppercase);
    match sub.as_deref() {
        Some("FETCH") => fetch_messages(&ctx, rest, true).await,
        Some("STORE") => store_flags(&ctx, rest, true).await,
        _ => Err(CommandError::syntax("unsupported UID command")),
    }
}

// ---- internals ----

async fn fetch_messages(ctx: &Context<'_>, args: &[Arg], is_uid: bool) -> HandlerResult {
    let args = expect_args(args, 2)?;
    let set = sequence_set(&args[0])?;
    let attrs = FetchAttr::parse_all(&args[1])?;

    let body = ctx.selection()?.fetch(&set, &attrs, is_uid).await?;
    Ok((
        Response::build()
            .to_req(ctx.req)
            .message(completed("FETCH", is_uid))
            .set_body(body)
            .ok()?,
        flow::Transition::None,
    ))
}

async fn store_flags(ctx: &Context<'_>, args: &[Arg], is_uid: bool) -> HandlerResult {
    if args.len() < 3 {
        return Err(CommandError::syntax("STORE takes a set, an item and flags"));
    }
    let set = sequence_set(&args[0])?;
    let (mode, silent) = store_item(&args[1])?;
    let flags = flag_list(&args[2..])?;

    let view = ctx.selection()?;
    if view.read_only {
        return read_only(ctx);
    }

    let body = view.store(&set, mode, &flags, silent, is_uid).await?;
    Ok((
        Response::build()
            .to_req(ctx.req)
            .message(completed("STORE", is_uid))
            .set_body(body)
            .ok()?,
        flow::Transition::None,
    ))
}

/// `[+|-]FLAGS[.SILENT]`
fn store_item(arg: &Arg) -> anyhow::Result<(StoreMode, bool)> {
    let item = arg
        .as_atom()
        .ok_or_else(|| CommandError::syntax("expected a STORE item"))?
        .to_ascii_uppercase();
    let (item, silent) = match item.strip_suffix(".SILENT") {
        Some(item) => (item, true),
        None => (item.as_str(), false),
    };
    let mode = match item {
        "FLAGS" => StoreMode::Replace,
        "+FLAGS" => StoreMode::Add,
        "-FLAGS" => StoreMode::Remove,
        _ => return Err(CommandError::syntax(format!("unknown STORE item {}", item))),
    };
    Ok((mode, silent))
}

fn completed(verb: &str, is_uid: bool) -> String {
    if is_uid {
        format!("UID {} completed", verb)
    } else {
        format!("{} completed", verb)
    }
}

fn read_only(ctx: &Context<'_>) -> HandlerResult {
    Ok((
        Response::build()
            .to_req(ctx.req)
            .message("Mailbox is read-only")
            .no()?,
        flow::Transition::None,
    ))
}
