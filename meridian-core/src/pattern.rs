use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::PatternError;
use crate::naming::ServiceKey;

const NAMESPACE_SEPARATOR: &str = ">>";
const SEGMENT_SEPARATOR: char = '.';

/// One `.`-separated element of a pattern expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// Matches the identical path segment, case-sensitive.
    Literal(String),
    /// `*`: matches exactly one path segment.
    AnyOne,
    /// `**`: matches one or more trailing path segments.
    AnySuffix,
}

/// A namespace-scoped wildcard expression over service paths.
///
/// The canonical textual form is `namespace>>expression`, e.g.
/// `public>>group1.*` or `public>>orders.**`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Pattern {
    namespace: String,
    expression: String,
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn new(
        namespace: impl Into<String>,
        expression: impl Into<String>,
    ) -> Result<Self, PatternError> {
        let namespace = namespace.into();
        let expression = expression.into();
        if namespace.is_empty() {
            return Err(PatternError::EmptyNamespace);
        }
        if expression.is_empty() {
            return Err(PatternError::EmptyExpression);
        }
        let segments = parse_segments(&expression)?;
        Ok(Self {
            namespace,
            expression,
            segments,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the expression contains no wildcard at all.
    pub fn is_exact(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Direct (index-free) evaluation of this pattern against one key.
    pub fn matches(&self, key: &ServiceKey) -> bool {
        self.namespace == key.namespace && match_segments(&self.segments, &key.path_segments())
    }
}

fn parse_segments(expression: &str) -> Result<Vec<Segment>, PatternError> {
    let raw: Vec<&str> = expression.split(SEGMENT_SEPARATOR).collect();
    let last = raw.len() - 1;
    let mut segments = Vec::with_capacity(raw.len());

    for (position, part) in raw.into_iter().enumerate() {
        let segment = match part {
            "" => {
                return Err(PatternError::EmptySegment {
                    expression: expression.to_string(),
                    position,
                })
            }
            "*" => Segment::AnyOne,
            "**" if position == last => Segment::AnySuffix,
            "**" => {
                return Err(PatternError::MisplacedSuffixWildcard {
                    expression: expression.to_string(),
                })
            }
            other if other.contains('*') => {
                return Err(PatternError::MixedWildcardSegment {
                    expression: expression.to_string(),
                    segment: other.to_string(),
                })
            }
            other => Segment::Literal(other.to_string()),
        };
        segments.push(segment);
    }

    Ok(segments)
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> bool {
    match (pattern.split_first(), path.split_first()) {
        (None, None) => true,
        (Some((Segment::AnySuffix, _)), Some(_)) => true,
        (Some((Segment::AnyOne, rest)), Some((_, path_rest))) => match_segments(rest, path_rest),
        (Some((Segment::Literal(lit), rest)), Some((seg, path_rest))) => {
            lit == seg && match_segments(rest, path_rest)
        }
        _ => false,
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.namespace, NAMESPACE_SEPARATOR, self.expression)
    }
}

impl FromStr for Pattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, expression) = s
            .split_once(NAMESPACE_SEPARATOR)
            .ok_or_else(|| PatternError::Malformed(s.to_string()))?;
        Pattern::new(namespace, expression)
    }
}

impl From<Pattern> for String {
    fn from(pattern: Pattern) -> Self {
        pattern.to_string()
    }
}

impl TryFrom<String> for Pattern {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(group: &str, name: &str) -> ServiceKey {
        ServiceKey::new("public", group, name)
    }

    #[test]
    fn single_wildcard_stays_within_one_segment() {
        let p = Pattern::new("public", "group1.*").unwrap();
        assert!(p.matches(&key("group1", "svcA")));
        assert!(p.matches(&key("group1", "svcB")));
        assert!(!p.matches(&key("group2", "svcA")));
        assert!(!p.matches(&key("group1", "sub.svcC")));
    }

    #[test]
    fn suffix_wildcard_crosses_segments() {
        let p = Pattern::new("public", "group1.**").unwrap();
        assert!(p.matches(&key("group1", "svcA")));
        assert!(p.matches(&key("group1", "sub.svcC")));
        assert!(!p.matches(&key("group2", "svcA")));
    }

    #[test]
    fn literals_are_case_sensitive_and_namespace_scoped() {
        let p = Pattern::new("public", "group1.svcA").unwrap();
        assert!(p.is_exact());
        assert!(!p.matches(&key("group1", "SVCA")));
        assert!(!p.matches(&ServiceKey::new("dev", "group1", "svcA")));
    }

    #[test]
    fn rejects_invalid_expressions() {
        assert_eq!(Pattern::new("", "a.*"), Err(PatternError::EmptyNamespace));
        assert_eq!(Pattern::new("ns", ""), Err(PatternError::EmptyExpression));
        assert!(matches!(
            Pattern::new("ns", "a..b"),
            Err(PatternError::EmptySegment { position: 1, .. })
        ));
        assert!(matches!(
            Pattern::new("ns", "**.a"),
            Err(PatternError::MisplacedSuffixWildcard { .. })
        ));
        assert!(matches!(
            Pattern::new("ns", "svc*"),
            Err(PatternError::MixedWildcardSegment { .. })
        ));
    }

    #[test]
    fn parses_canonical_form() {
        let p: Pattern = "public>>group1.*".parse().unwrap();
        assert_eq!(p.namespace(), "public");
        assert_eq!(p.expression(), "group1.*");
        assert_eq!(p.to_string(), "public>>group1.*");
        assert!("no-separator".parse::<Pattern>().is_err());
    }
}
