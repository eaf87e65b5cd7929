//! Plugin Version - 느슨한 버전 비교와 버전 범위
//!
//! 플러그인 버전은 semver가 아니다 ("1.2", "1.10", "2.0b1", "v1.3-dev").
//! 점/하이픈/밑줄로 나눈 세그먼트를 숫자 우선으로 비교하므로 "1.10" > "1.9".
//!
//! ## 범위 문법
//!
//! - `1.2`            → `>=1.2` (연산자 없는 단일 버전)
//! - `>=1.2 <2.0`     → 모든 절을 AND
//! - `>=1.2,<2.0`     → requires 토큰 안에서는 쉼표로 절을 구분
//!
//! 연산자: `<`, `<=`, `>`, `>=`, `=`

use plugdeck_foundation::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// LooseVersion
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    number: u64,
    suffix: String,
}

impl Segment {
    const ZERO: Segment = Segment {
        number: 0,
        suffix: String::new(),
    };

    fn parse(part: &str) -> Self {
        let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
        let suffix = part[digits.len()..].to_ascii_lowercase();
        Self {
            number: digits.parse().unwrap_or(0),
            suffix,
        }
    }

    fn compare(&self, other: &Segment) -> Ordering {
        self.number.cmp(&other.number).then_with(|| {
            // 접미사 없는 쪽이 더 크다 (1.0 > 1.0b1)
            match (self.suffix.is_empty(), other.suffix.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.suffix.cmp(&other.suffix),
            }
        })
    }
}

/// 느슨하게 정렬되는 버전
#[derive(Debug, Clone)]
pub struct LooseVersion {
    raw: String,
    segments: Vec<Segment>,
}

impl LooseVersion {
    pub fn parse(s: &str) -> Self {
        let raw = s.trim().to_string();
        let body = raw
            .strip_prefix('v')
            .or_else(|| raw.strip_prefix('V'))
            .unwrap_or(&raw);

        let segments = body
            .split(['.', '-', '_'])
            .filter(|p| !p.is_empty())
            .map(Segment::parse)
            .collect();

        Self { raw, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// 숫자로 시작하는지 (`v` 접두사 허용)
    pub fn is_well_formed(s: &str) -> bool {
        let s = s.trim();
        let body = s.strip_prefix(['v', 'V']).unwrap_or(s);
        body.starts_with(|c: char| c.is_ascii_digit())
    }
}

impl Ord for LooseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let zero = Segment::ZERO;
        let len = self.segments.len().max(other.segments.len());
        for i in 0..len {
            let a = self.segments.get(i).unwrap_or(&zero);
            let b = other.segments.get(i).unwrap_or(&zero);
            match a.compare(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for LooseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for LooseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LooseVersion {}

impl fmt::Display for LooseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// 두 버전 문자열 비교
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    LooseVersion::parse(a).cmp(&LooseVersion::parse(b))
}

// ============================================================================
// VersionRange
// ============================================================================

/// 비교 연산자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Comparator {
    fn as_str(&self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Eq => "=",
        }
    }

    fn split(clause: &str) -> Option<(Self, &str)> {
        // 두 글자 연산자를 먼저 확인
        for (prefix, op) in [
            ("<=", Comparator::Le),
            (">=", Comparator::Ge),
            ("==", Comparator::Eq),
            ("<", Comparator::Lt),
            (">", Comparator::Gt),
            ("=", Comparator::Eq),
        ] {
            if let Some(rest) = clause.strip_prefix(prefix) {
                return Some((op, rest));
            }
        }
        None
    }

    fn holds(&self, ord: Ordering) -> bool {
        match self {
            Comparator::Lt => ord == Ordering::Less,
            Comparator::Le => ord != Ordering::Greater,
            Comparator::Gt => ord == Ordering::Greater,
            Comparator::Ge => ord != Ordering::Less,
            Comparator::Eq => ord == Ordering::Equal,
        }
    }
}

/// 단일 범위 절
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionClause {
    pub op: Comparator,
    pub version: LooseVersion,
}

/// 버전 범위 (절의 AND)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    clauses: Vec<VersionClause>,
}

impl VersionRange {
    /// 범위 파싱
    pub fn parse(expr: &str) -> Result<Self> {
        let tokens: Vec<&str> = expr
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.is_empty() {
            return Err(Error::Validation("Empty version range".to_string()));
        }

        // 연산자 없는 단일 버전은 최소 버전
        if tokens.len() == 1 && Comparator::split(tokens[0]).is_none() {
            if !LooseVersion::is_well_formed(tokens[0]) {
                return Err(Error::Validation(format!("Invalid version '{}'", tokens[0])));
            }
            return Ok(Self::at_least(tokens[0]));
        }

        let mut clauses = Vec::with_capacity(tokens.len());
        for token in tokens {
            let (op, version) = Comparator::split(token).ok_or_else(|| {
                Error::Validation(format!(
                    "Version range clause '{}' in '{}' has no comparator",
                    token, expr
                ))
            })?;
            if !LooseVersion::is_well_formed(version) {
                return Err(Error::Validation(format!(
                    "Version range clause '{}' in '{}' has no valid version",
                    token, expr
                )));
            }
            clauses.push(VersionClause {
                op,
                version: LooseVersion::parse(version),
            });
        }

        Ok(Self { clauses })
    }

    /// `>= version`
    pub fn at_least(version: &str) -> Self {
        Self {
            clauses: vec![VersionClause {
                op: Comparator::Ge,
                version: LooseVersion::parse(version),
            }],
        }
    }

    /// 모든 절을 만족하는지
    pub fn satisfied_by(&self, version: &str) -> bool {
        let target = LooseVersion::parse(version);
        self.clauses
            .iter()
            .all(|clause| clause.op.holds(target.cmp(&clause.version)))
    }

    /// 단일 `>=` 절이면 그 버전
    pub fn minimum(&self) -> Option<&LooseVersion> {
        match self.clauses.as_slice() {
            [VersionClause {
                op: Comparator::Ge,
                version,
            }] => Some(version),
            _ => None,
        }
    }

    pub fn clauses(&self) -> &[VersionClause] {
        &self.clauses
    }
}

impl FromStr for VersionRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .clauses
            .iter()
            .map(|c| format!("{}{}", c.op.as_str(), c.version))
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}
