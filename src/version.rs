//! Version strings, their total order, and range algebra.
//!
//! A [`Version`] is a sequence of numeric and alphabetic segments. Ordering
//! compares segments left to right with these rules:
//!
//! - numbers compare numerically, plain words lexicographically;
//! - a number sorts above a plain word at the same position (`1.0 > 1.0a`);
//! - a missing segment sorts between the two (`1.0a < 1.0 < 1.0.1`);
//! - the development words `develop`, `main`, `master`, `head`, `trunk` and
//!   `stable` sort above every number, in that order of precedence.
//!
//! A [`VersionList`] is a union of [`VersionRange`]s. An upper bound is
//! *prefix inclusive*: `:1.2` admits `1.2.7` because `1.2` is a segment prefix
//! of it, which makes `@1.2` (the range `1.2:1.2`) mean "any 1.2 release".

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::InvalidVersionFormat;

/// Development words, lowest precedence first.
const INFINITY_WORDS: [&str; 6] = ["stable", "trunk", "head", "master", "main", "develop"];

/// One component of a version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Number(u64),
    Word(String),
}

impl Segment {
    fn key(&self) -> SegmentKey<'_> {
        match self {
            Segment::Number(n) => SegmentKey::Number(*n),
            Segment::Word(w) => match INFINITY_WORDS.iter().position(|i| *i == w.as_str()) {
                Some(rank) => SegmentKey::Infinity(rank),
                None => SegmentKey::Word(w),
            },
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Number(n) => write!(f, "{n}"),
            Segment::Word(w) => f.write_str(w),
        }
    }
}

/// Comparison key for one position; variant order is the sort order.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SegmentKey<'a> {
    Word(&'a str),
    End,
    Number(u64),
    Infinity(usize),
}

/// A parsed version such as `1.2.3`, `2.0b1` or `develop`.
#[derive(Debug, Clone)]
pub struct Version {
    string: String,
    segments: Vec<Segment>,
}

impl Version {
    /// Parse a version string.
    pub fn parse(input: &str) -> Result<Self, InvalidVersionFormat> {
        if input.is_empty() {
            return Err(InvalidVersionFormat::new(input, "empty version"));
        }
        if let Some(c) = input
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
        {
            return Err(InvalidVersionFormat::new(
                input,
                format!("unexpected character `{c}`"),
            ));
        }

        let mut segments = Vec::new();
        for piece in input.split(['.', '-', '_']) {
            if piece.is_empty() {
                return Err(InvalidVersionFormat::new(
                    input,
                    "unbalanced separators produce an empty segment",
                ));
            }
            let mut rest = piece;
            while !rest.is_empty() {
                let numeric = rest.starts_with(|c: char| c.is_ascii_digit());
                let end = rest
                    .find(|c: char| c.is_ascii_digit() != numeric)
                    .unwrap_or(rest.len());
                let (run, tail) = rest.split_at(end);
                if numeric {
                    let n = run.parse::<u64>().map_err(|_| {
                        InvalidVersionFormat::new(input, format!("numeric segment `{run}` too large"))
                    })?;
                    segments.push(Segment::Number(n));
                } else {
                    segments.push(Segment::Word(run.to_string()));
                }
                rest = tail;
            }
        }

        Ok(Self {
            string: input.to_string(),
            segments,
        })
    }

    /// The string this version was parsed from.
    pub fn as_str(&self) -> &str {
        &self.string
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether `self`'s segments are a leading subsequence of `other`'s.
    pub fn is_prefix_of(&self, other: &Version) -> bool {
        self.segments.len() <= other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// Whether this is a development version (contains a development word).
    pub fn is_develop(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s.key(), SegmentKey::Infinity(_)))
    }

    fn key_at(&self, i: usize) -> SegmentKey<'_> {
        self.segments.get(i).map_or(SegmentKey::End, Segment::key)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        for i in 0..len {
            match self.key_at(i).cmp(&other.key_at(i)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
    }
}

impl FromStr for Version {
    type Err = InvalidVersionFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string)
    }
}

/// Order lower bounds; `None` (unbounded) is the loosest.
fn cmp_lower(a: Option<&Version>, b: Option<&Version>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.cmp(b),
    }
}

/// Order upper bounds by the set of versions they admit.
///
/// A proper prefix admits strictly more than its extensions, so it is the
/// larger bound even when it compares lower as a version.
fn cmp_upper(a: Option<&Version>, b: Option<&Version>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) if a == b => Ordering::Equal,
        (Some(a), Some(b)) if a.is_prefix_of(b) => Ordering::Greater,
        (Some(a), Some(b)) if b.is_prefix_of(a) => Ordering::Less,
        (Some(a), Some(b)) => a.cmp(b),
    }
}

fn below_upper(v: &Version, hi: Option<&Version>) -> bool {
    match hi {
        None => true,
        Some(hi) => v <= hi || hi.is_prefix_of(v),
    }
}

/// A contiguous set of versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionRange {
    /// Exactly one version (`=1.2`).
    Exact(Version),
    /// `lo:hi` with either side optional; `1.2` alone is `1.2:1.2`.
    Between {
        lo: Option<Version>,
        hi: Option<Version>,
    },
}

impl VersionRange {
    /// The range admitting every version.
    pub fn any() -> Self {
        VersionRange::Between { lo: None, hi: None }
    }

    /// Parse one comma-free range expression.
    pub fn parse(input: &str) -> Result<Self, InvalidVersionFormat> {
        let s = input.trim();
        if let Some(exact) = s.strip_prefix('=') {
            return Ok(VersionRange::Exact(Version::parse(exact)?));
        }
        match s.split_once(':') {
            Some((lo, hi)) => {
                if hi.contains(':') {
                    return Err(InvalidVersionFormat::new(input, "too many `:` in range"));
                }
                let lo = if lo.is_empty() { None } else { Some(Version::parse(lo)?) };
                let hi = if hi.is_empty() { None } else { Some(Version::parse(hi)?) };
                Ok(VersionRange::Between { lo, hi })
            }
            None => {
                let v = Version::parse(s)?;
                Ok(VersionRange::Between {
                    lo: Some(v.clone()),
                    hi: Some(v),
                })
            }
        }
    }

    pub fn contains(&self, v: &Version) -> bool {
        match self {
            VersionRange::Exact(e) => e == v,
            VersionRange::Between { lo, hi } => {
                lo.as_ref().is_none_or(|lo| lo <= v) && below_upper(v, hi.as_ref())
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            VersionRange::Exact(_) => false,
            VersionRange::Between { lo: Some(lo), hi } => !below_upper(lo, hi.as_ref()),
            VersionRange::Between { lo: None, .. } => false,
        }
    }

    /// The versions admitted by both ranges, or `None` when there are none.
    pub fn intersect(&self, other: &VersionRange) -> Option<VersionRange> {
        match (self, other) {
            (VersionRange::Exact(v), r) | (r, VersionRange::Exact(v)) => {
                r.contains(v).then(|| VersionRange::Exact(v.clone()))
            }
            (
                VersionRange::Between { lo: lo1, hi: hi1 },
                VersionRange::Between { lo: lo2, hi: hi2 },
            ) => {
                let lo = match cmp_lower(lo1.as_ref(), lo2.as_ref()) {
                    Ordering::Less => lo2.clone(),
                    _ => lo1.clone(),
                };
                let hi = match cmp_upper(hi1.as_ref(), hi2.as_ref()) {
                    Ordering::Greater => hi2.clone(),
                    _ => hi1.clone(),
                };
                let range = VersionRange::Between { lo, hi };
                (!range.is_empty()).then_some(range)
            }
        }
    }

    /// Whether every version in `self` is also in `other`.
    pub fn is_subset_of(&self, other: &VersionRange) -> bool {
        match (self, other) {
            (VersionRange::Exact(v), r) => r.contains(v),
            (VersionRange::Between { .. }, VersionRange::Exact(_)) => false,
            (
                VersionRange::Between { lo: lo1, hi: hi1 },
                VersionRange::Between { lo: lo2, hi: hi2 },
            ) => {
                cmp_lower(lo1.as_ref(), lo2.as_ref()) != Ordering::Less
                    && cmp_upper(hi1.as_ref(), hi2.as_ref()) != Ordering::Greater
            }
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRange::Exact(v) => write!(f, "={v}"),
            VersionRange::Between {
                lo: Some(lo),
                hi: Some(hi),
            } if lo == hi => write!(f, "{lo}"),
            VersionRange::Between { lo, hi } => {
                if let Some(lo) = lo {
                    write!(f, "{lo}")?;
                }
                f.write_str(":")?;
                if let Some(hi) = hi {
                    write!(f, "{hi}")?;
                }
                Ok(())
            }
        }
    }
}

/// A union of version ranges, as written after `@` in a spec.
///
/// An empty list admits nothing and results from intersecting disjoint
/// constraints.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionList {
    ranges: Vec<VersionRange>,
}

impl VersionList {
    /// The unconstrained list (`:`).
    pub fn any() -> Self {
        Self {
            ranges: vec![VersionRange::any()],
        }
    }

    /// A list admitting only `v`.
    pub fn exact(v: Version) -> Self {
        Self {
            ranges: vec![VersionRange::Exact(v)],
        }
    }

    pub fn from_ranges(ranges: impl IntoIterator<Item = VersionRange>) -> Self {
        let mut list = Self { ranges: Vec::new() };
        for range in ranges {
            list.push(range);
        }
        list
    }

    /// Parse a comma-separated list such as `1.2:1.4,=2.0,3:`.
    pub fn parse(input: &str) -> Result<Self, InvalidVersionFormat> {
        if input.trim().is_empty() {
            return Err(InvalidVersionFormat::new(input, "empty version list"));
        }
        let ranges = input
            .split(',')
            .map(VersionRange::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_ranges(ranges))
    }

    fn push(&mut self, range: VersionRange) {
        if !range.is_empty() && !self.ranges.contains(&range) {
            self.ranges.push(range);
        }
    }

    pub fn ranges(&self) -> &[VersionRange] {
        &self.ranges
    }

    pub fn is_any(&self) -> bool {
        self.ranges.iter().any(|r| *r == VersionRange::any())
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The single version of an exact list.
    pub fn concrete(&self) -> Option<&Version> {
        match self.ranges.as_slice() {
            [VersionRange::Exact(v)] => Some(v),
            _ => None,
        }
    }

    pub fn contains(&self, v: &Version) -> bool {
        self.ranges.iter().any(|r| r.contains(v))
    }

    pub fn intersect(&self, other: &VersionList) -> VersionList {
        if self.is_any() {
            return other.clone();
        }
        if other.is_any() {
            return self.clone();
        }
        let mut out = VersionList { ranges: Vec::new() };
        for a in &self.ranges {
            for b in &other.ranges {
                if let Some(r) = a.intersect(b) {
                    out.push(r);
                }
            }
        }
        out
    }

    pub fn intersects(&self, other: &VersionList) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Whether every range of `self` lies inside some range of `other`.
    pub fn is_subset_of(&self, other: &VersionList) -> bool {
        other.is_any()
            || self
                .ranges
                .iter()
                .all(|a| other.ranges.iter().any(|b| a.is_subset_of(b)))
    }
}

impl Default for VersionList {
    fn default() -> Self {
        Self::any()
    }
}

impl FromStr for VersionList {
    type Err = InvalidVersionFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionList::parse(s)
    }
}

impl fmt::Display for VersionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}
