use imap_codec::imap_types::response::Status;

use crate::imap::command::{Context, HandlerResult};
use crate::imap::flow;
use crate::imap::response::Response;

pub(crate) async fn capability(ctx: Context<'_>) -> HandlerResult {
    ctx.args(0)?;
    let res = Response::build()
        .to_req(ctx.req)
        .message("Server capabilities")
        .data(ctx.capabilities.to_data()?)
        .ok()?;

    Ok((res, flow::Transition::None))
}

/// Doubles as a poll: in the Selected state the counters are refreshed.
pub(crate) async fn noop(ctx: Context<'_>) -> HandlerResult {
    ctx.args(0)?;
    let body = match ctx.state.selection() {
        Some(view) => view.update().await?,
        None => vec![],
    };
    Ok((
        Response::build()
            .to_req(ctx.req)
            .set_body(body)
            .message("NOOP completed")
            .ok()?,
        flow::Transition::None,
    ))
}

pub(crate) async fn logout(ctx: Context<'_>) -> HandlerResult {
    ctx.args(0)?;
    Ok((
        Response::build()
            .to_req(ctx.req)
            .info(Status::bye(None, "Logging out")?)
            .message("LOGOUT completed")
            .ok()?,
        flow::Transition::Logout,
    ))
}
