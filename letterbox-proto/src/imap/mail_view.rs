//! `FETCH` data items: parsing of the requested attributes and rendering of
//! a message snapshot into response items.

use anyhow::{anyhow, Result};
use imap_codec::imap_types::core::{AString, IString, Literal, NString};
use imap_codec::imap_types::datetime::DateTime;
use imap_codec::imap_types::fetch::{MessageDataItem, Section as FetchSection};
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::u32 as number,
    combinator::{all_consuming, map, opt, value},
    multi::separated_list1,
    sequence::{delimited, preceded, separated_pair},
    IResult,
};

use letterbox_mail::flags::Flag;
use letterbox_mail::mailstore::Message;

use crate::imap::command::CommandError;
use crate::imap::flags;
use crate::imap::request::Arg;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section {
    Full,
    Header,
    Text,
    HeaderFields(Vec<String>),
    HeaderFieldsNot(Vec<String>),
}

impl Section {
    /// How the section is echoed back in the response. `None` is `BODY[]`.
    fn to_fetch_section(&self) -> Result<Option<FetchSection<'static>>> {
        Ok(match self {
            Section::Full => None,
            Section::Header => Some(FetchSection::Header(None)),
            Section::Text => Some(FetchSection::Text(None)),
            Section::HeaderFields(names) => Some(FetchSection::HeaderFields(None, header_names(names)?)),
            Section::HeaderFieldsNot(names) => {
                Some(FetchSection::HeaderFieldsNot(None, header_names(names)?))
            }
        })
    }
}

fn header_names<T>(names: &[String]) -> Result<T>
where
    T: TryFrom<Vec<AString<'static>>>,
{
    names
        .iter()
        .map(|n| AString::try_from(n.clone()).map_err(|e| anyhow!("invalid header name {:?}: {}", n, e)))
        .collect::<Result<Vec<_>>>()?
        .try_into()
        .map_err(|_| anyhow!("empty header field list"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAttr {
    Uid,
    Flags,
    Rfc822Size,
    InternalDate,
    Rfc822,
    Rfc822Header,
    Rfc822Text,
    Body {
        section: Section,
        partial: Option<(u32, u32)>,
        peek: bool,
    },
}

impl FetchAttr {
    /// Fetching this attribute marks the message `\Seen`.
    pub fn sets_seen(&self) -> bool {
        matches!(
            self,
            FetchAttr::Rfc822 | FetchAttr::Rfc822Text | FetchAttr::Body { peek: false, .. }
        )
    }

    /// Parse the attribute argument of `FETCH`: a single attribute, a macro
    /// or a parenthesized list.
    pub fn parse_all(arg: &Arg) -> Result<Vec<FetchAttr>> {
        match arg {
            Arg::Atom(name) if name.eq_ignore_ascii_case("FAST") => Ok(vec![
                FetchAttr::Flags,
                FetchAttr::InternalDate,
                FetchAttr::Rfc822Size,
            ]),
            Arg::Atom(name) => Ok(vec![FetchAttr::parse(name)?]),
            Arg::List(items) if !items.is_empty() => items
                .iter()
                .map(|item| match item.as_atom() {
                    Some(name) => FetchAttr::parse(name),
                    None => Err(CommandError::Syntax("invalid fetch attribute".into()).into()),
                })
                .collect(),
            _ => Err(CommandError::Syntax("invalid fetch attributes".into()).into()),
        }
    }

    pub fn parse(name: &str) -> Result<FetchAttr> {
        all_consuming(fetch_attr)(name)
            .map(|(_, attr)| attr)
            .map_err(|_| {
                CommandError::Syntax(format!("unsupported fetch attribute {}", name)).into()
            })
    }
}

fn fetch_attr(input: &str) -> IResult<&str, FetchAttr> {
    alt((
        value(FetchAttr::Uid, tag_no_case("UID")),
        value(FetchAttr::Flags, tag_no_case("FLAGS")),
        value(FetchAttr::Rfc822Size, tag_no_case("RFC822.SIZE")),
        value(FetchAttr::Rfc822Header, tag_no_case("RFC822.HEADER")),
        value(FetchAttr::Rfc822Text, tag_no_case("RFC822.TEXT")),
        value(FetchAttr::Rfc822, tag_no_case("RFC822")),
        value(FetchAttr::InternalDate, tag_no_case("INTERNALDATE")),
        body_attr,
    ))(input)
}

fn body_attr(input: &str) -> IResult<&str, FetchAttr> {
    let (input, peek) = alt((
        value(true, tag_no_case("BODY.PEEK[")),
        value(false, tag_no_case("BODY[")),
    ))(input)?;
    let (input, section) = section(input)?;
    let (input, _) = tag("]")(input)?;
    let (input, partial) = opt(delimited(
        tag("<"),
        separated_pair(number, tag("."), number),
        tag(">"),
    ))(input)?;
    Ok((
        input,
        FetchAttr::Body {
            section,
            partial,
            peek,
        },
    ))
}

fn section(input: &str) -> IResult<&str, Section> {
    alt((
        map(
            preceded(tag_no_case("HEADER.FIELDS.NOT "), header_list),
            Section::HeaderFieldsNot,
        ),
        map(
            preceded(tag_no_case("HEADER.FIELDS "), header_list),
            Section::HeaderFields,
        ),
        value(Section::Header, tag_no_case("HEADER")),
        value(Section::Text, tag_no_case("TEXT")),
        value(Section::Full, tag("")),
    ))(input)
}

fn header_list(input: &str) -> IResult<&str, Vec<String>> {
    delimited(
        tag("("),
        separated_list1(
            tag(" "),
            map(
                take_while1(|c: char| c.is_ascii_graphic() && c != '(' && c != ')' && c != ':'),
                |s: &str| s.to_ascii_uppercase(),
            ),
        ),
        tag(")"),
    )(input)
}

// ---- rendering ----

pub struct MailView<'a> {
    msg: &'a dyn Message,
    recent: bool,
}

impl<'a> MailView<'a> {
    /// `recent` adds `\Recent` to the reported flags, for messages this
    /// session claimed as recent.
    pub fn new(msg: &'a dyn Message, recent: bool) -> Self {
        Self { msg, recent }
    }

    pub fn flags(&self) -> Result<MessageDataItem<'static>> {
        let mut flags = self.msg.flags().clone();
        if self.recent {
            flags.insert(Flag::Recent);
        }
        Ok(MessageDataItem::Flags(flags::to_fetch(&flags)?))
    }

    pub fn item(&self, attr: &FetchAttr) -> Result<MessageDataItem<'static>> {
        Ok(match attr {
            FetchAttr::Uid => MessageDataItem::Uid(
                self.msg
                    .uid()
                    .ok_or_else(|| anyhow!("fetched message has no UID"))?,
            ),
            FetchAttr::Flags => self.flags()?,
            FetchAttr::Rfc822Size => MessageDataItem::Rfc822Size(self.msg.size()),
            FetchAttr::InternalDate => {
                MessageDataItem::InternalDate(DateTime::try_from(self.msg.internal_date())?)
            }
            FetchAttr::Rfc822 => MessageDataItem::Rfc822(literal(self.full())),
            FetchAttr::Rfc822Header => {
                MessageDataItem::Rfc822Header(literal(self.msg.header().raw().into_bytes()))
            }
            FetchAttr::Rfc822Text => {
                MessageDataItem::Rfc822Text(literal(self.msg.body().as_bytes().to_vec()))
            }
            FetchAttr::Body {
                section, partial, ..
            } => {
                let content = match section {
                    Section::Full => self.full(),
                    Section::Header => self.msg.header().raw().into_bytes(),
                    Section::Text => self.msg.body().as_bytes().to_vec(),
                    Section::HeaderFields(names) => self.msg.header().select(names, false).into_bytes(),
                    Section::HeaderFieldsNot(names) => {
                        self.msg.header().select(names, true).into_bytes()
                    }
                };
                let (origin, data) = match partial {
                    Some((origin, count)) => (Some(*origin), slice(&content, *origin, *count).to_vec()),
                    None => (None, content),
                };
                MessageDataItem::BodyExt {
                    section: section.to_fetch_section()?,
                    origin,
                    data: literal(data),
                }
            }
        })
    }

    fn full(&self) -> Vec<u8> {
        let mut full = self.msg.header().raw().into_bytes();
        full.extend_from_slice(self.msg.body().as_bytes());
        full
    }
}

/// Content that can not be sent as a literal is answered `NIL`.
fn literal(data: Vec<u8>) -> NString<'static> {
    NString(Literal::try_from(data).ok().map(IString::Literal))
}

/// `<origin.count>` works on octets, even inside a multi-byte character.
fn slice(content: &[u8], origin: u32, count: u32) -> &[u8] {
    let start = (origin as usize).min(content.len());
    let end = start.saturating_add(count as usize).min(content.len());
    &content[start..end]
}
