//! IMAP sequence sets (RFC 3501, section 9, `sequence-set`) and their
//! resolution against the current content of a mailbox.
//!
//! A set is only a query descriptor: `*` is kept symbolic until the set is
//! resolved, so that it always designates the *current* last message.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::digit1,
    combinator::{all_consuming, map, map_opt, map_res, opt, value},
    multi::separated_list1,
    sequence::{pair, preceded},
    IResult,
};
use thiserror::Error;

use crate::ImapUid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    #[error("invalid sequence set {0:?}")]
    Syntax(String),
    #[error("message {value} does not exist, mailbox has {exists} messages")]
    OutOfRange { value: u32, exists: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqBound {
    Value(NonZeroU32),
    /// `*`, the last message of the mailbox
    Last,
}

impl SeqBound {
    fn eval(self, last: u32) -> u32 {
        match self {
            SeqBound::Value(v) => v.get(),
            SeqBound::Last => last,
        }
    }
}

impl fmt::Display for SeqBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeqBound::Value(v) => write!(f, "{}", v),
            SeqBound::Last => f.write_str("*"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqRange {
    pub min: SeqBound,
    pub max: Option<SeqBound>,
}

impl SeqRange {
    /// Inclusive bounds once `*` is known, smallest first.
    fn bounds(&self, last: u32) -> (u32, u32) {
        let start = self.min.eval(last);
        let end = self.max.map(|b| b.eval(last)).unwrap_or(start);
        if end < start {
            (end, start)
        } else {
            (start, end)
        }
    }
}

impl fmt::Display for SeqRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{}:{}", self.min, max),
            None => write!(f, "{}", self.min),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSet(Vec<SeqRange>);

impl SequenceSet {
    pub fn single(n: NonZeroU32) -> Self {
        Self(vec![SeqRange {
            min: SeqBound::Value(n),
            max: None,
        }])
    }

    /// `1:*`
    pub fn all() -> Self {
        Self(vec![SeqRange {
            min: SeqBound::Value(NonZeroU32::MIN),
            max: Some(SeqBound::Last),
        }])
    }

    pub fn ranges(&self) -> &[SeqRange] {
        &self.0
    }

    /// Resolve the set as message sequence numbers in a mailbox holding
    /// `exists` messages.
    ///
    /// Sequence numbers are dense, so any number above `exists` is an error
    /// that invalidates the whole set. Duplicates are kept, in the order the
    /// ranges were written.
    pub fn resolve_sequence_numbers(
        &self,
        exists: u32,
    ) -> Result<Vec<NonZeroU32>, SequenceError> {
        if exists == 0 {
            return Ok(vec![]);
        }

        let mut resolved = vec![];
        for range in self.0.iter() {
            let (start, end) = range.bounds(exists);
            if end > exists {
                return Err(SequenceError::OutOfRange { value: end, exists });
            }
            resolved.extend((start..=end).filter_map(NonZeroU32::new));
        }
        Ok(resolved)
    }

    /// Resolve the set as UIDs against `uids`, the ascending list of the UIDs
    /// currently present in the mailbox. Returns positions into `uids`.
    ///
    /// UIDs may have gaps: a range only yields the UIDs that still exist and
    /// never fails.
    pub fn resolve_uids(&self, uids: &[ImapUid]) -> Vec<usize> {
        let last = match uids.last() {
            Some(uid) => uid.get(),
            None => return vec![],
        };

        let mut resolved = vec![];
        for range in self.0.iter() {
            let (start, end) = range.bounds(last);
            let from = uids.partition_point(|u| u.get() < start);
            let to = uids.partition_point(|u| u.get() <= end);
            resolved.extend(from..to);
        }
        resolved
    }
}

impl fmt::Display for SequenceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ranges = self.0.iter().map(|r| r.to_string()).collect::<Vec<_>>();
        f.write_str(&ranges.join(","))
    }
}

impl FromStr for SequenceSet {
    type Err = SequenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        all_consuming(sequence_set)(s)
            .map(|(_, ranges)| SequenceSet(ranges))
            .map_err(|_| SequenceError::Syntax(s.to_string()))
    }
}

// ---- parser ----

fn nz_number(input: &str) -> IResult<&str, NonZeroU32> {
    map_opt(map_res(digit1, |d: &str| d.parse::<u32>()), NonZeroU32::new)(input)
}

fn seq_bound(input: &str) -> IResult<&str, SeqBound> {
    alt((value(SeqBound::Last, tag("*")), map(nz_number, SeqBound::Value)))(input)
}

fn seq_range(input: &str) -> IResult<&str, SeqRange> {
    map(
        pair(seq_bound, opt(preceded(tag(":"), seq_bound))),
        |(min, max)| SeqRange { min, max },
    )(input)
}

fn sequence_set(input: &str) -> IResult<&str, Vec<SeqRange>> {
    separated_list1(tag(","), seq_range)(input)
}
