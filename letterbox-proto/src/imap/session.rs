use std::sync::Arc;

use anyhow::Result;

use letterbox_mail::flags::FlagError;
use letterbox_mail::mailstore::ArcMailstore;
use letterbox_mail::sequence::SequenceError;

use crate::imap::capability::ServerCapability;
use crate::imap::command::{CommandError, CommandRegistry, Context};
use crate::imap::flow;
use crate::imap::request::{self, Arg, Request};
use crate::imap::response::Response;

/// The IMAP state of one connection.
///
/// Lines are fed one at a time to [`Instance::command`], which answers with
/// exactly one [`Response`] to write back before the next line. It only
/// fails when no valid response can be built at all.
pub struct Instance {
    registry: Arc<CommandRegistry>,
    mailstore: ArcMailstore,
    capabilities: ServerCapability,
    pub state: flow::State,
    // command waiting for the client's answer to a continuation
    pending: Option<Request>,
}

impl Instance {
    pub fn new(registry: Arc<CommandRegistry>, mailstore: ArcMailstore) -> Self {
        Self {
            registry,
            mailstore,
            capabilities: ServerCapability::default(),
            state: flow::State::NotAuthenticated,
            pending: None,
        }
    }

    pub fn capabilities(&self) -> &ServerCapability {
        &self.capabilities
    }

    pub fn is_logged_out(&self) -> bool {
        matches!(self.state, flow::State::Logout)
    }

    pub async fn command(&mut self, line: &[u8]) -> Result<Response> {
        let req = match self.pending.take() {
            Some(mut req) => {
                let answer = String::from_utf8_lossy(trim_eol(line)).into_owned();
                req.args.push(Arg::Atom(answer));
                req
            }
            None => match request::parse(line) {
                Ok(req) => req,
                Err(e) => {
                    tracing::debug!(tag=?e.tag, "unparsable command line");
                    return Response::bad_static(e.tag, "Could not parse command");
                }
            },
        };
        tracing::debug!(tag=%req.tag, command=%req.name, state=?self.state, "command");

        if self.is_logged_out() {
            return Response::bad_static(
                Some(req.tag),
                "No commands are allowed in the LOGOUT state.",
            );
        }

        let command = match self.registry.get(&req.name) {
            Some(c) => *c,
            None => return Response::bad_static(Some(req.tag), "Unknown command"),
        };
        if !command.requires.allows(&self.state) {
            return Response::build()
                .to_req(&req)
                .message("Command not authorized in this state")
                .no();
        }

        let ctx = Context {
            req: &req,
            state: &self.state,
            mailstore: &self.mailstore,
            capabilities: &self.capabilities,
        };
        let (resp, tr) = match (command.handler)(ctx).await {
            Ok(r) => r,
            Err(err) => return failure(&req, err),
        };

        if resp.is_continuation() {
            if !matches!(tr, flow::Transition::None) {
                tracing::error!(command=%req.name, "continuation requested along with a transition");
                return Response::bad_static(Some(req.tag), "Internal error");
            }
            self.pending = Some(req);
            return Ok(resp);
        }

        if resp.tag() != Some(req.tag.as_str()) {
            tracing::error!(
                command=%req.name,
                expected=%req.tag,
                got=?resp.tag(),
                "handler did not complete the command with its tag"
            );
            return Response::bad_static(Some(req.tag), "Internal error");
        }

        if let Err(e) = self.state.apply(tr) {
            tracing::error!(
                "Transition error {:?} occured while processing on command {:?}",
                e,
                req
            );
            return Response::bad_static(
                Some(req.tag),
                "Internal error, processing command triggered an illegal IMAP state transition",
            );
        }

        Ok(resp)
    }
}

/// Client mistakes are answered `BAD` with their description, anything
/// else is a backend failure answered `NO`.
fn failure(req: &Request, err: anyhow::Error) -> Result<Response> {
    let client_error = err.downcast_ref::<SequenceError>().is_some()
        || err.downcast_ref::<FlagError>().is_some()
        || err.downcast_ref::<CommandError>().is_some();

    if client_error {
        tracing::debug!(command=%req.name, error=%err, "rejected arguments");
        // descriptions quoting client input may not fit in a status text
        Response::build()
            .to_req(req)
            .message(err.to_string())
            .bad()
            .or_else(|_| Response::bad_static(Some(req.tag.clone()), "Invalid arguments"))
    } else {
        tracing::warn!(command=%req.name, error=?err, "command failed");
        Response::build()
            .to_req(req)
            .message(format!("{} failed", req.name))
            .no()
            .or_else(|_| Response::bad_static(Some(req.tag.clone()), "Internal error"))
    }
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
