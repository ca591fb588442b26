use base64::Engine;

use crate::imap::command::{astring, CommandError, Context, HandlerResult};
use crate::imap::flow;
use crate::imap::response::Response;

pub(crate) async fn login(ctx: Context<'_>) -> HandlerResult {
    let args = ctx.args(2)?;
    let (username, password) = (astring(&args[0])?, astring(&args[1])?);
    tracing::info!(user = %username, "command.login");

    authenticate_user(ctx, &username, &password).await
}

/// `AUTHENTICATE PLAIN [initial-response]`. Without an initial response the
/// client is asked for it with a continuation, and its answer is appended
/// to the arguments before this handler runs again.
pub(crate) async fn authenticate(ctx: Context<'_>) -> HandlerResult {
    let args = &ctx.req.args;
    let mechanism = match args.first().and_then(|a| a.as_atom()) {
        Some(m) => m,
        None => return Err(CommandError::syntax("missing authentication mechanism")),
    };
    if !mechanism.eq_ignore_ascii_case("PLAIN") {
        return Ok((
            Response::build()
                .to_req(ctx.req)
                .message("Unsupported authentication mechanism")
                .no()?,
            flow::Transition::None,
        ));
    }

    let encoded = match args.len() {
        1 => return Ok((Response::build().continuation()?, flow::Transition::None)),
        2 => astring(&args[1])?,
        _ => return Err(CommandError::syntax("too many arguments")),
    };
    let encoded = encoded.trim();
    if encoded == "*" {
        return Ok((
            Response::build()
                .to_req(ctx.req)
                .message("Authentication cancelled")
                .bad()?,
            flow::Transition::None,
        ));
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| CommandError::syntax("invalid base64 in authentication response"))?;
    let (authz, authc, password) = match decoded.split(|c| *c == 0).collect::<Vec<_>>()[..] {
        [authz, authc, password] => (
            String::from_utf8_lossy(authz).into_owned(),
            String::from_utf8_lossy(authc).into_owned(),
            String::from_utf8_lossy(password).into_owned(),
        ),
        _ => return Err(CommandError::syntax("malformed PLAIN response")),
    };
    tracing::info!(user = %authc, "command.authenticate");

    if !authz.is_empty() && authz != authc {
        tracing::debug!(authz=%authz, authc=%authc, "impersonation refused");
        return Ok((
            Response::build()
                .to_req(ctx.req)
                .message("Authentication failed")
                .no()?,
            flow::Transition::None,
        ));
    }

    authenticate_user(ctx, &authc, &password).await
}

async fn authenticate_user(ctx: Context<'_>, username: &str, password: &str) -> HandlerResult {
    let user = match ctx.mailstore.authenticate(username, password).await {
        Err(e) => {
            tracing::debug!(error=%e, "authentication failed");
            return Ok((
                Response::build()
                    .to_req(ctx.req)
                    .message("Authentication failed")
                    .no()?,
                flow::Transition::None,
            ));
        }
        Ok(u) => u,
    };

    tracing::info!(username=%username, "connected");
    Ok((
        Response::build().to_req(ctx.req).message("Completed").ok()?,
        flow::Transition::Authenticate(user),
    ))
}
