//! GTID (Global Transaction ID) 관리
//!
//! GTID 형식: source:sequence (MySQL 은 서버 UUID, Google 포맷은 server id)
//! GTID 집합 형식: "uuid1:1-100:200,uuid2:1-50"

use crate::error::{Result, StreamerError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// 단일 GTID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Gtid {
    pub source: String,
    pub sequence: u64,
}

impl Gtid {
    pub fn new(source: impl Into<String>, sequence: u64) -> Self {
        Gtid {
            source: source.into(),
            sequence,
        }
    }

    /// "source:sequence" 문자열 파싱
    pub fn parse(gtid: &str) -> Result<Self> {
        let (source, sequence) = gtid
            .rsplit_once(':')
            .ok_or_else(|| StreamerError::Gtid(format!("Invalid GTID format: {}", gtid)))?;
        if source.is_empty() {
            return Err(StreamerError::Gtid(format!("Missing GTID source: {}", gtid)));
        }
        let sequence = sequence
            .parse::<u64>()
            .map_err(|_| StreamerError::Gtid(format!("Invalid sequence: {}", sequence)))?;
        Ok(Gtid::new(source, sequence))
    }

    /// 시퀀스 0 또는 nil UUID 는 실제 트랜잭션을 가리키지 않는다
    pub fn is_anonymous(&self) -> bool {
        self.sequence == 0 || self.source == uuid::Uuid::nil().to_string()
    }
}

impl fmt::Display for Gtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.sequence)
    }
}

/// GTID 범위 (양 끝 포함)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GtidRange {
    pub start: u64,
    pub end: u64,
}

impl GtidRange {
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(StreamerError::Gtid(format!(
                "Invalid range: {} > {}",
                start, end
            )));
        }
        Ok(GtidRange { start, end })
    }

    pub fn contains(&self, value: u64) -> bool {
        value >= self.start && value <= self.end
    }

    /// 겹치거나 맞닿은 범위 병합
    fn merge(&self, other: &GtidRange) -> Option<GtidRange> {
        if self.end.saturating_add(1) >= other.start && other.end.saturating_add(1) >= self.start {
            Some(GtidRange {
                start: self.start.min(other.start),
                end: self.end.max(other.end),
            })
        } else {
            None
        }
    }
}

impl fmt::Display for GtidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

fn interval_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)(?:-(\d+))?$").unwrap())
}

/// source 별 GTID 범위 집합
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct GtidSet {
    sets: BTreeMap<String, Vec<GtidRange>>,
}

impl GtidSet {
    pub fn new() -> Self {
        GtidSet::default()
    }

    /// GTID 집합 문자열 파싱
    pub fn parse(gtid_str: &str) -> Result<Self> {
        let mut gtid_set = GtidSet::new();
        let trimmed = gtid_str.trim();
        if trimmed.is_empty() || trimmed == "NULL" {
            return Ok(gtid_set);
        }

        for part in trimmed.split(',') {
            let part = part.trim();
            let mut fields = part.split(':');
            let source = match fields.next() {
                Some(source) if !source.is_empty() => source,
                _ => return Err(StreamerError::Gtid(format!("Missing source in: {}", part))),
            };

            let mut any = false;
            for interval in fields {
                let caps = interval_pattern().captures(interval).ok_or_else(|| {
                    StreamerError::Gtid(format!("Invalid interval: {}", interval))
                })?;
                let start = parse_number(&caps[1])?;
                let end = match caps.get(2) {
                    Some(end) => parse_number(end.as_str())?,
                    None => start,
                };
                gtid_set.add_range(source, GtidRange::new(start, end)?);
                any = true;
            }
            if !any {
                return Err(StreamerError::Gtid(format!("No intervals for {}", source)));
            }
        }

        Ok(gtid_set)
    }

    pub fn add(&mut self, gtid: &Gtid) {
        self.add_range(
            &gtid.source,
            GtidRange {
                start: gtid.sequence,
                end: gtid.sequence,
            },
        );
    }

    fn add_range(&mut self, source: &str, range: GtidRange) {
        let ranges = self.sets.entry(source.to_string()).or_default();
        ranges.push(range);
        ranges.sort();

        let mut merged: Vec<GtidRange> = Vec::with_capacity(ranges.len());
        for range in ranges.drain(..) {
            match merged.last_mut() {
                Some(last) => match last.merge(&range) {
                    Some(m) => *last = m,
                    None => merged.push(range),
                },
                None => merged.push(range),
            }
        }
        *ranges = merged;
    }

    pub fn contains(&self, gtid: &Gtid) -> bool {
        self.sets
            .get(&gtid.source)
            .map(|ranges| ranges.iter().any(|r| r.contains(gtid.sequence)))
            .unwrap_or(false)
    }

    pub fn ranges(&self, source: &str) -> &[GtidRange] {
        self.sets.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.sets.values().all(|ranges| ranges.is_empty())
    }
}

fn parse_number(s: &str) -> Result<u64> {
    s.parse::<u64>()
        .map_err(|_| StreamerError::Gtid(format!("Invalid sequence: {}", s)))
}

impl fmt::Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (source, ranges) in &self.sets {
            if ranges.is_empty() {
                continue;
            }
            if !first {
                write!(f, ",")?;
            }
            first = false;
            write!(f, "{}", source)?;
            for range in ranges {
                write!(f, ":{}", range)?;
            }
        }
        Ok(())
    }
}

impl From<GtidSet> for String {
    fn from(set: GtidSet) -> Self {
        set.to_string()
    }
}

impl TryFrom<String> for GtidSet {
    type Error = StreamerError;

    fn try_from(value: String) -> Result<Self> {
        GtidSet::parse(&value)
    }
}
