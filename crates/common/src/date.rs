use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A calendar date with variable precision, from a bare year down to the second.
///
/// Components past the first invalid one are dropped, so `2021-13-01` is just `2021`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Date {
    tokens: Vec<u32>,
}

const TOKEN_RANGES: [(u32, u32); 6] = [
    (1, u32::MAX),
    (1, 12),
    (1, 31),
    (0, 23),
    (0, 59),
    (0, 59),
];

impl Date {
    pub fn from_year(year: i64) -> Option<Self> {
        if (10_000_000..100_000_000).contains(&year) {
            // Eight digit years are packed yyyymmdd stamps.
            let year = year as u32;
            return Self::from_tokens(&[year / 10_000, (year / 100) % 100, year % 100]);
        }
        if year <= 0 || year > i64::from(u32::MAX) {
            return None;
        }
        Self::from_tokens(&[year as u32])
    }

    pub fn from_ymd(year: u32, month: u32, day: u32) -> Option<Self> {
        Self::from_tokens(&[year, month, day])
    }

    pub fn from_ymdhm(year: u32, month: u32, day: u32, hour: u32, minute: u32) -> Option<Self> {
        Self::from_tokens(&[year, month, day, hour, minute])
    }

    /// Parses an ISO-8601 style timestamp, falling back to a plain integer year.
    pub fn parse(text: &str) -> Option<Self> {
        match parse_iso8601(text) {
            Some(tokens) => Self::from_tokens(&tokens),
            None => text.parse::<i64>().ok().and_then(Self::from_year),
        }
    }

    fn from_tokens(tokens: &[u32]) -> Option<Self> {
        let mut validated = Vec::with_capacity(tokens.len());
        for (token, (min, max)) in tokens.iter().zip(TOKEN_RANGES) {
            if *token < min || *token > max {
                break;
            }
            validated.push(*token);
        }
        if validated.is_empty() {
            None
        } else {
            Some(Self { tokens: validated })
        }
    }

    pub fn year(&self) -> u32 {
        self.tokens[0]
    }

    pub fn month(&self) -> Option<u32> {
        self.tokens.get(1).copied()
    }

    pub fn day(&self) -> Option<u32> {
        self.tokens.get(2).copied()
    }

    pub fn hour(&self) -> Option<u32> {
        self.tokens.get(3).copied()
    }

    pub fn minute(&self) -> Option<u32> {
        self.tokens.get(4).copied()
    }

    pub fn second(&self) -> Option<u32> {
        self.tokens.get(5).copied()
    }
}

impl Ord for Date {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lexicographic over tokens: a less precise date sorts first on a shared prefix.
        self.tokens.cmp(&other.tokens)
    }
}

impl PartialOrd for Date {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.year())?;
        let Some(month) = self.month() else {
            return Ok(());
        };
        write!(f, "-{:02}", month)?;
        let Some(day) = self.day() else {
            return Ok(());
        };
        write!(f, "-{:02}", day)?;
        let Some(hour) = self.hour() else {
            return Ok(());
        };
        write!(f, "T{:02}", hour)?;
        if let Some(minute) = self.minute() {
            write!(f, ":{:02}", minute)?;
            if let Some(second) = self.second() {
                write!(f, ":{:02}", second)?;
            }
        }
        f.write_str("Z")
    }
}

/// An inclusive span of dates, as covered by the songs of an album.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub min: Date,
    pub max: Date,
}

impl DateRange {
    pub fn single(date: Date) -> Self {
        Self {
            min: date.clone(),
            max: date,
        }
    }

    pub fn expand(&mut self, date: &Date) {
        if *date < self.min {
            self.min = date.clone();
        }
        if *date > self.max {
            self.max = date.clone();
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{} - {}", self.min, self.max)
        }
    }
}

/// Matches `YYYY[-MM[-DD[THH[:MM[:SS[Z]]]]]]`, accepting `.` as a date/time separator and a
/// space in place of `T`.
fn parse_iso8601(text: &str) -> Option<Vec<u32>> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    tokens.push(fixed_digits(bytes, &mut pos, 4)?);
    let separators: [&[u8]; 5] = [b"-.", b"-.", b"T ", b":.", b":."];
    for allowed in separators {
        if pos == bytes.len() {
            return Some(tokens);
        }
        if !allowed.contains(&bytes[pos]) {
            return None;
        }
        pos += 1;
        tokens.push(fixed_digits(bytes, &mut pos, 2)?);
    }
    if pos < bytes.len() && bytes[pos] == b'Z' && tokens.len() == 6 {
        pos += 1;
    }
    if pos == bytes.len() {
        Some(tokens)
    } else {
        None
    }
}

fn fixed_digits(bytes: &[u8], pos: &mut usize, len: usize) -> Option<u32> {
    let slice = bytes.get(*pos..*pos + len)?;
    if !slice.iter().all(u8::is_ascii_digit) {
        return None;
    }
    *pos += len;
    slice
        .iter()
        .try_fold(0u32, |acc, digit| Some(acc * 10 + u32::from(digit - b'0')))
}
