pub mod anonymous;
pub mod anystate;
pub mod authenticated;
pub mod selected;

use std::collections::HashMap;

use anyhow::Result;
pub use futures::future::BoxFuture;
use thiserror::Error;

use letterbox_mail::flags::{Flag, Flags};
use letterbox_mail::mailstore::{ArcMailstore, User};
use letterbox_mail::sequence::SequenceSet;

use crate::imap::capability::ServerCapability;
use crate::imap::flow;
use crate::imap::mailbox_view::MailboxView;
use crate::imap::request::{Arg, Request};
use crate::imap::response::Response;

/// Errors a handler raises for malformed arguments; answered with `BAD`.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}")]
    Syntax(String),
}

impl CommandError {
    pub fn syntax(msg: impl Into<String>) -> anyhow::Error {
        CommandError::Syntax(msg.into()).into()
    }
}

/// The lowest state a command can be run from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requires {
    /// Any state but `Logout`.
    AnyState,
    /// Exactly `NotAuthenticated`.
    NotAuthenticated,
    /// `Authenticated` or `Selected`.
    Authenticated,
    Selected,
}

impl Requires {
    pub fn allows(self, state: &flow::State) -> bool {
        use flow::State;
        match (self, state) {
            (_, State::Logout) => false,
            (Requires::AnyState, _) => true,
            (Requires::NotAuthenticated, State::NotAuthenticated) => true,
            (Requires::Authenticated, State::Authenticated(_) | State::Selected(..)) => true,
            (Requires::Selected, State::Selected(..)) => true,
            _ => false,
        }
    }
}

/// What a handler gets to see of the session.
pub struct Context<'a> {
    pub req: &'a Request,
    pub state: &'a flow::State,
    pub mailstore: &'a ArcMailstore,
    pub capabilities: &'a ServerCapability,
}

impl<'a> Context<'a> {
    pub fn user(&self) -> Result<&'a std::sync::Arc<dyn User>> {
        self.state
            .user()
            .ok_or_else(|| anyhow::anyhow!("no authenticated user in state {}", self.state.name()))
    }

    pub fn selection(&self) -> Result<&'a MailboxView> {
        self.state
            .selection()
            .ok_or_else(|| anyhow::anyhow!("no selected mailbox in state {}", self.state.name()))
    }

    /// The arguments, which must be exactly `n`.
    pub fn args(&self, n: usize) -> Result<&'a [Arg]> {
        expect_args(&self.req.args, n)
    }
}

pub type HandlerResult = Result<(Response, flow::Transition)>;
pub type Handler = for<'a> fn(Context<'a>) -> BoxFuture<'a, HandlerResult>;

/// Turn an `async fn(Context<'_>) -> HandlerResult` into a [`Handler`].
#[macro_export]
macro_rules! handler {
    ($f:path) => {{
        fn boxed<'a>(
            ctx: $crate::imap::command::Context<'a>,
        ) -> $crate::imap::command::BoxFuture<'a, $crate::imap::command::HandlerResult> {
            Box::pin($f(ctx))
        }
        boxed as $crate::imap::command::Handler
    }};
}

#[derive(Clone, Copy)]
pub struct Command {
    pub requires: Requires,
    pub handler: Handler,
}

/// Command names and their handlers. Built once, then shared read-only by
/// every session.
#[derive(Default, Clone)]
pub struct CommandRegistry {
    commands: HashMap<String, Command>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, requires: Requires, handler: Handler) -> &mut Self {
        self.commands
            .insert(name.to_ascii_uppercase(), Command { requires, handler });
        self
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(&name.to_ascii_uppercase())
    }

    /// The base command set of RFC 3501 served by Letterbox.
    pub fn imap4rev1() -> Self {
        let mut reg = Self::new();
        reg.register("CAPABILITY", Requires::AnyState, handler!(anystate::capability))
            .register("NOOP", Requires::AnyState, handler!(anystate::noop))
            .register("LOGOUT", Requires::AnyState, handler!(anystate::logout))
            .register("LOGIN", Requires::NotAuthenticated, handler!(anonymous::login))
            .register(
                "AUTHENTICATE",
                Requires::NotAuthenticated,
                handler!(anonymous::authenticate),
            )
            .register("SELECT", Requires::Authenticated, handler!(authenticated::select))
            .register("EXAMINE", Requires::Authenticated, handler!(authenticated::examine))
            .register("LIST", Requires::Authenticated, handler!(authenticated::list))
            .register("LSUB", Requires::Authenticated, handler!(authenticated::lsub))
            .register("STATUS", Requires::Authenticated, handler!(authenticated::status))
            .register("APPEND", Requires::Authenticated, handler!(authenticated::append))
            .register("CHECK", Requires::Selected, handler!(selected::check))
            .register("CLOSE", Requires::Selected, handler!(selected::close))
            .register("EXPUNGE", Requires::Selected, handler!(selected::expunge))
            .register("FETCH", Requires::Selected, handler!(selected::fetch))
            .register("STORE", Requires::Selected, handler!(selected::store))
            .register("UID", Requires::Selected, handler!(selected::uid));
        reg
    }
}

// ---- argument helpers ----

pub(crate) fn expect_args(args: &[Arg], n: usize) -> Result<&[Arg]> {
    if args.len() != n {
        return Err(CommandError::syntax(format!(
            "expected {} argument(s), got {}",
            n,
            args.len()
        )));
    }
    Ok(args)
}

pub(crate) fn astring(arg: &Arg) -> Result<String> {
    arg.as_astring()
        .ok_or_else(|| CommandError::syntax("expected a string"))
}

pub(crate) fn sequence_set(arg: &Arg) -> Result<SequenceSet> {
    let text = arg
        .as_atom()
        .ok_or_else(|| CommandError::syntax("expected a sequence set"))?;
    Ok(text.parse::<SequenceSet>()?)
}

/// Flags given to STORE or APPEND, either a parenthesized list or bare
/// atoms. `\Recent` is managed by the server and refused.
pub(crate) fn flag_list(args: &[Arg]) -> Result<Flags> {
    let mut flags = Flags::new();
    for arg in args {
        let names = match arg {
            Arg::List(items) => items.as_slice(),
            atom @ Arg::Atom(_) => std::slice::from_ref(atom),
            _ => return Err(CommandError::syntax("expected a flag list")),
        };
        for name in names {
            let name = name
                .as_atom()
                .ok_or_else(|| CommandError::syntax("expected a flag"))?;
            flags.insert_name(name)?;
        }
    }
    if flags.contains(Flag::Recent) {
        return Err(CommandError::syntax("\\Recent can not be set by clients"));
    }
    Ok(flags)
}
