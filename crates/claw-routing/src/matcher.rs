//! Label matchers.
//!
//! A [`Matcher`] compares a single label against a value or regular
//! expression; a [`Matchers`] set holds when every member holds. Matchers are
//! written in the Alertmanager text form:
//!
//! ```rust
//! use claw_routing::{Matcher, Matchers, Alert};
//!
//! let matchers = Matchers::parse_all(["severity=\"critical\"", "job=~\"liberty|db\""]).unwrap();
//! let alert = Alert::from_pairs([("alertname", "Down"), ("severity", "critical"), ("job", "db")]);
//! assert!(matchers.matches(&alert.labels));
//!
//! let m = Matcher::parse("instance!~\"node-[0-9]+\"").unwrap();
//! assert_eq!(m.to_string(), "instance!~\"node-[0-9]+\"");
//! ```

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RoutingError};
use crate::types::{is_valid_label_name, LabelSet};

/// Comparison performed by a [`Matcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchOperator {
    /// Label value equals the pattern (`=`).
    Equal,
    /// Label value differs from the pattern (`!=`).
    NotEqual,
    /// Label value fully matches the regex (`=~`).
    Regex,
    /// Label value does not fully match the regex (`!~`).
    NotRegex,
}

impl MatchOperator {
    /// Returns the operator as written in matcher text.
    #[must_use]
    pub const fn as_symbol(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Regex => "=~",
            Self::NotRegex => "!~",
        }
    }

    /// Returns true for the regex operators.
    #[must_use]
    pub const fn is_regex(&self) -> bool {
        matches!(self, Self::Regex | Self::NotRegex)
    }
}

impl fmt::Display for MatchOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_symbol())
    }
}

/// A single `(label, operator, pattern)` condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Matcher {
    name: String,
    operator: MatchOperator,
    value: String,
    regex: Option<Regex>,
}

impl Matcher {
    /// Creates a matcher, compiling the pattern for regex operators.
    ///
    /// Regex patterns are anchored: `job=~"lib"` does not match `liberty`.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::InvalidMatcher` if the label name is invalid or
    /// the regex does not compile.
    pub fn new(
        name: impl Into<String>,
        operator: MatchOperator,
        value: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let value = value.into();

        if !is_valid_label_name(&name) {
            return Err(RoutingError::InvalidMatcher {
                matcher: format!("{name}{operator}{value}"),
                reason: format!("invalid label name '{name}'"),
            });
        }

        let regex = if operator.is_regex() {
            let anchored = format!("^(?:{value})$");
            let compiled = Regex::new(&anchored).map_err(|e| RoutingError::InvalidMatcher {
                matcher: format!("{name}{operator}{value}"),
                reason: e.to_string(),
            })?;
            Some(compiled)
        } else {
            None
        };

        Ok(Self {
            name,
            operator,
            value,
            regex,
        })
    }

    /// Creates an equality matcher.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::InvalidMatcher` if the label name is invalid.
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        Self::new(name, MatchOperator::Equal, value)
    }

    /// Creates a regex matcher.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::InvalidMatcher` if the label name is invalid or
    /// the regex does not compile.
    pub fn regex(name: impl Into<String>, pattern: impl Into<String>) -> Result<Self> {
        Self::new(name, MatchOperator::Regex, pattern)
    }

    /// Parses matcher text such as `severity="critical"` or `job=~db.*`.
    ///
    /// Inside quotes only `\\`, `\"` and `\n` are escapes; any other
    /// backslash is kept, so `job=~"node-\d+"` and `job=~node-\d+` agree.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::InvalidMatcher` if the text is malformed.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| RoutingError::InvalidMatcher {
            matcher: input.to_string(),
            reason: reason.to_string(),
        };

        let text = input.trim();
        let name_end = text
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .ok_or_else(|| invalid("missing operator"))?;
        let name = &text[..name_end];
        if name.is_empty() {
            return Err(invalid("missing label name"));
        }

        let rest = text[name_end..].trim_start();
        let (operator, rest) = if let Some(r) = rest.strip_prefix("=~") {
            (MatchOperator::Regex, r)
        } else if let Some(r) = rest.strip_prefix("!~") {
            (MatchOperator::NotRegex, r)
        } else if let Some(r) = rest.strip_prefix("!=") {
            (MatchOperator::NotEqual, r)
        } else if let Some(r) = rest.strip_prefix('=') {
            (MatchOperator::Equal, r)
        } else {
            return Err(invalid("missing operator"));
        };

        let value = parse_value(rest.trim()).map_err(|reason| invalid(&reason))?;
        Self::new(name, operator, value)
    }

    /// Returns the label name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the operator.
    #[must_use]
    pub const fn operator(&self) -> MatchOperator {
        self.operator
    }

    /// Returns the pattern.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Evaluates the matcher against a label set.
    ///
    /// A missing label reads as the empty string.
    #[must_use]
    pub fn matches(&self, labels: &LabelSet) -> bool {
        let actual = labels.get(&self.name).map_or("", String::as_str);
        match (&self.operator, &self.regex) {
            (MatchOperator::Equal, _) => actual == self.value,
            (MatchOperator::NotEqual, _) => actual != self.value,
            (MatchOperator::Regex, Some(re)) => re.is_match(actual),
            (MatchOperator::NotRegex, Some(re)) => !re.is_match(actual),
            // Regex operators always carry a compiled pattern.
            (MatchOperator::Regex | MatchOperator::NotRegex, None) => false,
        }
    }
}

fn parse_value(raw: &str) -> std::result::Result<String, String> {
    let Some(quoted) = raw.strip_prefix('"') else {
        return Ok(raw.to_string());
    };

    let mut value = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => value.push('\n'),
                Some(escaped @ ('\\' | '"')) => value.push(escaped),
                // Regex escapes such as `\d` keep their backslash.
                Some(other) => {
                    value.push('\\');
                    value.push(other);
                }
                None => return Err("dangling escape".to_string()),
            },
            '"' => {
                if chars.as_str().trim().is_empty() {
                    return Ok(value);
                }
                return Err("unexpected text after closing quote".to_string());
            }
            other => value.push(other),
        }
    }

    Err("unterminated quoted value".to_string())
}

fn quote_value(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.operator == other.operator && self.value == other.value
    }
}

impl Eq for Matcher {}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, self.operator, quote_value(&self.value))
    }
}

impl TryFrom<String> for Matcher {
    type Error = RoutingError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Matcher> for String {
    fn from(matcher: Matcher) -> Self {
        matcher.to_string()
    }
}

/// A conjunction of matchers. The empty set matches every label set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Matchers(Vec<Matcher>);

impl Matchers {
    /// Creates an empty matcher set.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Parses every entry of `inputs` with [`Matcher::parse`].
    ///
    /// # Errors
    ///
    /// Returns the first parse error.
    pub fn parse_all<I, S>(inputs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        inputs
            .into_iter()
            .map(|s| Matcher::parse(s.as_ref()))
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// Builds equality matchers from a legacy `match` map.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::InvalidMatcher` for invalid label names.
    pub fn from_equal_map(map: &BTreeMap<String, String>) -> Result<Self> {
        map.iter()
            .map(|(k, v)| Matcher::equal(k.clone(), v.clone()))
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// Builds regex matchers from a legacy `match_re` map.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::InvalidMatcher` for invalid names or patterns.
    pub fn from_regex_map(map: &BTreeMap<String, String>) -> Result<Self> {
        map.iter()
            .map(|(k, v)| Matcher::regex(k.clone(), v.clone()))
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// Adds a matcher.
    pub fn push(&mut self, matcher: Matcher) {
        self.0.push(matcher);
    }

    /// Appends every matcher from `other`.
    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// Returns true if the set has no matchers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of matchers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the matchers.
    pub fn iter(&self) -> impl Iterator<Item = &Matcher> {
        self.0.iter()
    }

    /// Returns true if every matcher holds for `labels`.
    #[must_use]
    pub fn matches(&self, labels: &LabelSet) -> bool {
        self.0.iter().all(|m| m.matches(labels))
    }
}

impl fmt::Display for Matchers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, m) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{m}")?;
        }
        f.write_str("}")
    }
}

impl FromIterator<Matcher> for Matchers {
    fn from_iter<T: IntoIterator<Item = Matcher>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    mod parse_tests {
        use super::*;
        use test_case::test_case;

        #[test_case("severity=critical", "severity", MatchOperator::Equal, "critical")]
        #[test_case("severity=\"critical\"", "severity", MatchOperator::Equal, "critical")]
        #[test_case("job != \"db\"", "job", MatchOperator::NotEqual, "db")]
        #[test_case("job=~\"lib.*\"", "job", MatchOperator::Regex, "lib.*")]
        #[test_case("job!~db|cache", "job", MatchOperator::NotRegex, "db|cache")]
        #[test_case("msg=\"say \\\"hi\\\"\"", "msg", MatchOperator::Equal, "say \"hi\"")]
        #[test_case("team=\"\"", "team", MatchOperator::Equal, "")]
        #[test_case(r#"job=~"node-\d+""#, "job", MatchOperator::Regex, r"node-\d+")]
        #[test_case(r#"host=~"db\.internal""#, "host", MatchOperator::Regex, r"db\.internal")]
        #[test_case(r#"path="C:\\tmp""#, "path", MatchOperator::Equal, r"C:\tmp")]
        fn parses(input: &str, name: &str, op: MatchOperator, value: &str) {
            let m = Matcher::parse(input).unwrap();
            assert_eq!(m.name(), name);
            assert_eq!(m.operator(), op);
            assert_eq!(m.value(), value);
        }

        #[test_case("severity" ; "no operator")]
        #[test_case("=critical" ; "no name")]
        #[test_case("sev-erity=critical" ; "bad name")]
        #[test_case("job=\"unterminated" ; "unterminated quote")]
        #[test_case("job=\"a\" trailing" ; "trailing text")]
        #[test_case("job=~\"(\"" ; "bad regex")]
        fn rejects(input: &str) {
            assert!(matches!(
                Matcher::parse(input),
                Err(RoutingError::InvalidMatcher { .. })
            ));
        }

        #[test]
        fn display_roundtrips() {
            for text in ["a=\"b\"", "a!=\"b c\"", "a=~\"x|y\"", "a!~\"q\\\"z\""] {
                let m = Matcher::parse(text).unwrap();
                assert_eq!(m.to_string(), text);
                assert_eq!(Matcher::parse(&m.to_string()).unwrap(), m);
            }
        }

        #[test]
        fn serde_uses_text_form() {
            let m = Matcher::regex("job", "liberty.*").unwrap();
            let json = serde_json::to_string(&m).unwrap();
            assert_eq!(json, r#""job=~\"liberty.*\"""#);
            let back: Matcher = serde_json::from_str(&json).unwrap();
            assert_eq!(back, m);
        }

        #[test]
        fn serde_rejects_bad_regex() {
            let parsed: serde_json::Result<Matcher> = serde_json::from_str(r#""job=~\"[\"""#);
            assert!(parsed.is_err());
        }
    }

    mod evaluation_tests {
        use super::*;

        #[test]
        fn equality_and_inequality() {
            let set = labels(&[("severity", "critical")]);
            assert!(Matcher::equal("severity", "critical").unwrap().matches(&set));
            assert!(!Matcher::equal("severity", "warning").unwrap().matches(&set));
            let ne = Matcher::new("severity", MatchOperator::NotEqual, "warning").unwrap();
            assert!(ne.matches(&set));
        }

        #[test]
        fn quoted_and_bare_regex_escapes_agree() {
            let set = labels(&[("job", "node-12")]);
            let quoted = Matcher::parse(r#"job=~"node-\d+""#).unwrap();
            let bare = Matcher::parse(r"job=~node-\d+").unwrap();

            assert_eq!(quoted, bare);
            assert!(quoted.matches(&set));
            assert!(!quoted.matches(&labels(&[("job", "node-d")])));
            assert_eq!(Matcher::parse(&quoted.to_string()).unwrap(), quoted);
        }

        #[test]
        fn regex_is_anchored() {
            let set = labels(&[("job", "liberty")]);
            assert!(!Matcher::regex("job", "lib").unwrap().matches(&set));
            assert!(Matcher::regex("job", "lib.*").unwrap().matches(&set));
            assert!(Matcher::regex("job", "db|liberty").unwrap().matches(&set));
        }

        #[test]
        fn missing_label_reads_as_empty() {
            let set = labels(&[("alertname", "A")]);
            assert!(Matcher::equal("team", "").unwrap().matches(&set));
            assert!(!Matcher::equal("team", "sre").unwrap().matches(&set));
            assert!(Matcher::new("team", MatchOperator::NotEqual, "sre")
                .unwrap()
                .matches(&set));
        }

        #[test]
        fn regex_against_missing_label_needs_empty_match() {
            let set = labels(&[("alertname", "A")]);
            assert!(!Matcher::regex("team", ".+").unwrap().matches(&set));
            assert!(Matcher::regex("team", ".*").unwrap().matches(&set));
            assert!(Matcher::regex("team", "sre|").unwrap().matches(&set));
            let not_re = Matcher::new("team", MatchOperator::NotRegex, ".+").unwrap();
            assert!(not_re.matches(&set));
        }

        #[test]
        fn matcher_set_is_conjunction() {
            let set = labels(&[("severity", "critical"), ("job", "db")]);
            let both = Matchers::parse_all(["severity=critical", "job=db"]).unwrap();
            let one_off = Matchers::parse_all(["severity=critical", "job=web"]).unwrap();
            assert!(both.matches(&set));
            assert!(!one_off.matches(&set));
        }

        #[test]
        fn empty_set_matches_everything() {
            assert!(Matchers::new().matches(&LabelSet::new()));
            assert!(Matchers::default().is_empty());
        }

        #[test]
        fn legacy_maps() {
            let mut eq = BTreeMap::new();
            eq.insert("severity".to_string(), "critical".to_string());
            let mut re = BTreeMap::new();
            re.insert("job".to_string(), "lib.*".to_string());

            let mut set = Matchers::from_equal_map(&eq).unwrap();
            set.extend(Matchers::from_regex_map(&re).unwrap());
            assert_eq!(set.len(), 2);
            assert!(set.matches(&labels(&[("severity", "critical"), ("job", "liberty")])));
            assert_eq!(set.to_string(), "{severity=\"critical\",job=~\"lib.*\"}");
        }
    }
}
