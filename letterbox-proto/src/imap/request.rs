//! Tokenizer for IMAP command lines.
//!
//! A line is `tag SP name *(SP argument) [CRLF]` where an argument is an
//! atom, a quoted string, a `{n}` literal (its data already inlined by the
//! transport) or a parenthesized list of arguments. Atoms keep any
//! `[...]` section verbatim, spaces included, so that
//! `BODY[HEADER.FIELDS (From To)]<0.10>` is a single argument.

use nom::{
    branch::alt,
    bytes::complete::{tag, take, take_while, take_while1},
    character::complete::u32 as number,
    combinator::{all_consuming, map, map_res, opt, recognize},
    error::{Error, ErrorKind},
    multi::{many0, many1, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub tag: String,
    /// Command name, upper-cased.
    pub name: String,
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Atom(String),
    Quoted(String),
    Literal(Vec<u8>),
    List(Vec<Arg>),
}

impl Arg {
    /// `astring`: an atom or a string.
    pub fn as_astring(&self) -> Option<String> {
        match self {
            Arg::Atom(s) | Arg::Quoted(s) => Some(s.clone()),
            Arg::Literal(data) => Some(String::from_utf8_lossy(data).into_owned()),
            Arg::List(_) => None,
        }
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Arg::Atom(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Arg]> {
        match self {
            Arg::List(items) => Some(items),
            _ => None,
        }
    }
}

/// The line could not be tokenized. Carries the tag when one could be read,
/// so that the error can still be reported as a tagged `BAD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub tag: Option<String>,
}

pub fn parse(line: &[u8]) -> Result<Request, ParseError> {
    match all_consuming(request)(line) {
        Ok((_, req)) => Ok(req),
        Err(_) => Err(ParseError {
            tag: leading_tag(line),
        }),
    }
}

/// Size of the literal announced at the end of a partial line, if any.
/// The transport answers it with a continuation and reads the data.
pub fn literal_announcement(line: &[u8]) -> Option<u32> {
    let line = line.strip_suffix(b"\n")?;
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let line = line.strip_suffix(b"}")?;
    let start = line.iter().rposition(|c| *c == b'{')?;
    let digits = std::str::from_utf8(&line[start + 1..]).ok()?;
    if digits.is_empty() || !digits.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn leading_tag(line: &[u8]) -> Option<String> {
    terminated(tag_str, tag(" "))(line)
        .ok()
        .map(|(_, t)| t)
}

// ---- grammar ----

fn request(input: &[u8]) -> IResult<&[u8], Request> {
    let (input, tag_value) = tag_str(input)?;
    let (input, _) = tag(" ")(input)?;
    let (input, name) = map_res(take_while1(is_name_char), std::str::from_utf8)(input)?;
    let (input, args) = many0(preceded(tag(" "), arg))(input)?;
    let (input, _) = opt(crlf)(input)?;
    Ok((
        input,
        Request {
            tag: tag_value,
            name: name.to_ascii_uppercase(),
            args,
        },
    ))
}

fn tag_str(input: &[u8]) -> IResult<&[u8], String> {
    map(
        map_res(take_while1(|c| is_atom_char(c) && c != b'+'), std::str::from_utf8),
        String::from,
    )(input)
}

fn crlf(input: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(pair(opt(tag("\r")), tag("\n")))(input)
}

fn arg(input: &[u8]) -> IResult<&[u8], Arg> {
    alt((list, quoted, literal, atom))(input)
}

fn list(input: &[u8]) -> IResult<&[u8], Arg> {
    map(
        delimited(tag("("), separated_list0(tag(" "), arg), tag(")")),
        Arg::List,
    )(input)
}

fn literal(input: &[u8]) -> IResult<&[u8], Arg> {
    let (input, len) = delimited(tag("{"), number, pair(tag("}"), crlf))(input)?;
    let (input, data) = take(len)(input)?;
    Ok((input, Arg::Literal(data.to_vec())))
}

fn atom(input: &[u8]) -> IResult<&[u8], Arg> {
    map(
        map_res(
            recognize(many1(alt((take_while1(is_atom_char), section)))),
            std::str::from_utf8,
        ),
        |s| Arg::Atom(s.to_string()),
    )(input)
}

fn section(input: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(tuple((
        tag("["),
        take_while(|c| c != b']' && c != b'\r' && c != b'\n'),
        tag("]"),
    )))(input)
}

fn quoted(input: &[u8]) -> IResult<&[u8], Arg> {
    let (mut rest, _) = tag("\"")(input)?;
    let mut value = vec![];
    loop {
        match rest {
            [b'"', tail @ ..] => {
                rest = tail;
                break;
            }
            [b'\\', c @ (b'"' | b'\\'), tail @ ..] => {
                value.push(*c);
                rest = tail;
            }
            [c, tail @ ..] if *c != b'\\' && *c != b'\r' && *c != b'\n' => {
                value.push(*c);
                rest = tail;
            }
            _ => return Err(nom::Err::Error(Error::new(rest, ErrorKind::Char))),
        }
    }
    let value = String::from_utf8(value)
        .map_err(|_| nom::Err::Error(Error::new(input, ErrorKind::Char)))?;
    Ok((rest, Arg::Quoted(value)))
}

fn is_atom_char(c: u8) -> bool {
    c > 0x20 && c < 0x7f && !matches!(c, b'(' | b')' | b'{' | b'"' | b'[')
}

fn is_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'.' || c == b'-'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(s: &str) -> Arg {
        Arg::Atom(s.into())
    }

    #[test]
    fn test_simple_command() {
        let req = parse(b"a001 login \"smith\" sesame\r\n").unwrap();
        assert_eq!(req.tag, "a001");
        assert_eq!(req.name, "LOGIN");
        assert_eq!(req.args, vec![Arg::Quoted("smith".into()), atom("sesame")]);

        let req = parse(b"A1 CAPABILITY").unwrap();
        assert!(req.args.is_empty());
    }

    #[test]
    fn test_lists_and_sections() {
        let req =
            parse(b"A2 FETCH 1:* (FLAGS BODY.PEEK[HEADER.FIELDS (From To)]<0.100>)\r\n").unwrap();
        assert_eq!(
            req.args,
            vec![
                atom("1:*"),
                Arg::List(vec![
                    atom("FLAGS"),
                    atom("BODY.PEEK[HEADER.FIELDS (From To)]<0.100>")
                ]),
            ]
        );

        let req = parse(b"A3 STORE 2 +FLAGS.SILENT (\\Deleted $Junk)").unwrap();
        assert_eq!(
            req.args[2],
            Arg::List(vec![atom("\\Deleted"), atom("$Junk")])
        );

        let req = parse(b"A4 STATUS INBOX ()").unwrap();
        assert_eq!(req.args[1], Arg::List(vec![]));
    }

    #[test]
    fn test_quoted_escapes() {
        let req = parse(b"A5 LIST \"\" \"my \\\"box\\\\\"").unwrap();
        assert_eq!(req.args[0], Arg::Quoted("".into()));
        assert_eq!(req.args[1], Arg::Quoted("my \"box\\".into()));
    }

    #[test]
    fn test_literal() {
        let req = parse(b"A6 APPEND INBOX (\\Seen) {11}\r\nHello\r\nYou!\r\n").unwrap();
        assert_eq!(req.args.len(), 3);
        assert_eq!(req.args[2], Arg::Literal(b"Hello\r\nYou!".to_vec()));
        assert_eq!(req.args[2].as_astring().unwrap(), "Hello\r\nYou!");
    }

    #[test]
    fn test_errors_keep_tag() {
        assert_eq!(parse(b"A7 LOGIN \"unterminated\r\n").unwrap_err().tag, Some("A7".into()));
        assert_eq!(parse(b"A8 FETCH (1\r\n").unwrap_err().tag, Some("A8".into()));
        assert_eq!(parse(b"\r\n").unwrap_err().tag, None);
        assert_eq!(parse(b"+ LOGIN").unwrap_err().tag, None);
        assert!(parse(b"A9 LOGIN a  b").is_err());
    }

    #[test]
    fn test_literal_announcement() {
        assert_eq!(literal_announcement(b"A1 APPEND INBOX {310}\r\n"), Some(310));
        assert_eq!(literal_announcement(b"A1 LOGIN {5}\n"), Some(5));
        assert_eq!(literal_announcement(b"A1 LOGIN {x}\r\n"), None);
        assert_eq!(literal_announcement(b"A1 NOOP\r\n"), None);
    }
}
