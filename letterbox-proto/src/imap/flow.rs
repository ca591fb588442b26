use std::fmt;
use std::sync::Arc;

use letterbox_mail::mailstore::User;
use thiserror::Error;

use crate::imap::mailbox_view::MailboxView;

#[derive(Debug, Error)]
#[error("forbidden transition {transition} from state {state}")]
pub struct TransitionError {
    state: &'static str,
    transition: &'static str,
}

// See RFC3501 section 3.
// https://datatracker.ietf.org/doc/html/rfc3501#page-13
pub enum State {
    NotAuthenticated,
    Authenticated(Arc<dyn User>),
    Selected(Arc<dyn User>, MailboxView),
    Logout,
}

pub enum Transition {
    None,
    Authenticate(Arc<dyn User>),
    /// SELECT and EXAMINE, replacing the current selection if any
    Select(MailboxView),
    Unselect,
    Logout,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::NotAuthenticated => "NotAuthenticated",
            State::Authenticated(_) => "Authenticated",
            State::Selected(..) => "Selected",
            State::Logout => "Logout",
        }
    }

    pub fn user(&self) -> Option<&Arc<dyn User>> {
        match self {
            State::Authenticated(user) | State::Selected(user, _) => Some(user),
            _ => None,
        }
    }

    pub fn selection(&self) -> Option<&MailboxView> {
        match self {
            State::Selected(_, view) => Some(view),
            _ => None,
        }
    }

    pub fn apply(&mut self, tr: Transition) -> Result<(), TransitionError> {
        let new_state = match (&*self, tr) {
            (_, Transition::None) => return Ok(()),
            (State::NotAuthenticated, Transition::Authenticate(user)) => State::Authenticated(user),
            (State::Authenticated(user) | State::Selected(user, _), Transition::Select(view)) => {
                State::Selected(user.clone(), view)
            }
            (State::Selected(user, _), Transition::Unselect) => State::Authenticated(user.clone()),
            (_, Transition::Logout) => State::Logout,
            (state, tr) => {
                return Err(TransitionError {
                    state: state.name(),
                    transition: tr.name(),
                })
            }
        };

        *self = new_state;
        Ok(())
    }
}

impl Transition {
    fn name(&self) -> &'static str {
        match self {
            Transition::None => "None",
            Transition::Authenticate(_) => "Authenticate",
            Transition::Select(_) => "Select",
            Transition::Unselect => "Unselect",
            Transition::Logout => "Logout",
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Authenticated(user) => write!(f, "Authenticated({})", user.username()),
            State::Selected(user, view) => write!(
                f,
                "Selected({}, {}, read_only={})",
                user.username(),
                view.mailbox.name(),
                view.read_only
            ),
            other => f.write_str(other.name()),
        }
    }
}
