use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// System flags defined by RFC 3501, section 2.3.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    Recent,
}

impl Flag {
    pub const ALL: [Flag; 6] = [
        Flag::Seen,
        Flag::Answered,
        Flag::Flagged,
        Flag::Deleted,
        Flag::Draft,
        Flag::Recent,
    ];

    const fn bit(self) -> u8 {
        match self {
            Flag::Seen => 1,
            Flag::Answered => 1 << 1,
            Flag::Flagged => 1 << 2,
            Flag::Deleted => 1 << 3,
            Flag::Draft => 1 << 4,
            Flag::Recent => 1 << 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Flag::Seen => "\\Seen",
            Flag::Answered => "\\Answered",
            Flag::Flagged => "\\Flagged",
            Flag::Deleted => "\\Deleted",
            Flag::Draft => "\\Draft",
            Flag::Recent => "\\Recent",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flag {
    type Err = FlagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Flag::ALL
            .into_iter()
            .find(|flag| flag.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| FlagError::UnknownSystemFlag(s.to_string()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlagError {
    #[error("unknown system flag {0}")]
    UnknownSystemFlag(String),
    #[error("invalid keyword {0:?}")]
    InvalidKeyword(String),
}

/// The flags of a message: a bitmask of system flags plus free keywords.
///
/// Mutations follow the three STORE modes of IMAP: [`Flags::union`] (`+FLAGS`),
/// [`Flags::difference`] (`-FLAGS`) and [`Flags::replace`] (`FLAGS`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    bits: u8,
    keywords: BTreeSet<String>,
}

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, flag: Flag) -> bool {
        self.bits & flag.bit() != 0
    }

    pub fn insert(&mut self, flag: Flag) {
        self.bits |= flag.bit();
    }

    pub fn remove(&mut self, flag: Flag) {
        self.bits &= !flag.bit();
    }

    pub fn with(mut self, flag: Flag) -> Self {
        self.insert(flag);
        self
    }

    pub fn has_keyword(&self, keyword: &str) -> bool {
        self.keywords.contains(keyword)
    }

    pub fn insert_keyword(&mut self, keyword: &str) -> Result<(), FlagError> {
        if !is_valid_keyword(keyword) {
            return Err(FlagError::InvalidKeyword(keyword.to_string()));
        }
        self.keywords.insert(keyword.to_string());
        Ok(())
    }

    /// Parse a flag as written on the wire: `\Seen` is a system flag,
    /// anything without a leading backslash is a keyword.
    pub fn insert_name(&mut self, name: &str) -> Result<(), FlagError> {
        if name.starts_with('\\') {
            self.insert(name.parse()?);
            Ok(())
        } else {
            self.insert_keyword(name)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0 && self.keywords.is_empty()
    }

    pub fn system(&self) -> impl Iterator<Item = Flag> + '_ {
        Flag::ALL.into_iter().filter(|f| self.contains(*f))
    }

    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.keywords.iter().map(String::as_str)
    }

    /// `+FLAGS`
    pub fn union(&mut self, other: &Flags) {
        self.bits |= other.bits;
        self.keywords.extend(other.keywords.iter().cloned());
    }

    /// `-FLAGS`
    pub fn difference(&mut self, other: &Flags) {
        self.bits &= !other.bits;
        self.keywords.retain(|k| !other.keywords.contains(k));
    }

    /// `FLAGS`
    pub fn replace(&mut self, other: &Flags) {
        self.bits = other.bits;
        self.keywords = other.keywords.clone();
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<T: IntoIterator<Item = Flag>>(iter: T) -> Self {
        let mut flags = Flags::new();
        iter.into_iter().for_each(|f| flags.insert(f));
        flags
    }
}

/// Renders the parenthesized list used by the `FLAGS` data item.
impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self
            .system()
            .map(|flag| flag.as_str().to_string())
            .chain(self.keywords.iter().cloned())
            .collect::<Vec<_>>();
        write!(f, "({})", names.join(" "))
    }
}

fn is_valid_keyword(keyword: &str) -> bool {
    !keyword.is_empty()
        && keyword.bytes().all(|c| {
            c > 0x20 && c < 0x7f && !matches!(c, b'(' | b')' | b'{' | b'%' | b'*' | b'"' | b'\\' | b']')
        })
}
