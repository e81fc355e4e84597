//! Policy clause parsing.
//!
//! A clause has the form `NUM OP metric OP NUM` where both bound
//! prefixes are optional and `OP` is `<` or `<=`. Anything that does
//! not match parses to an inert clause (no metric name, no bounds)
//! rather than an error — individual bad clauses must never take down
//! a whole policy.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?P<lower>[0-9]+(?:\.[0-9]+)?)\s*(?P<lop><=?)\s*)?(?P<name>\w+)\s*(?:(?P<uop><=?)\s*(?P<upper>[0-9]+(?:\.[0-9]+)?)\s*)?$",
    )
    .expect("clause pattern is valid")
});

/// One parsed scaling-policy clause.
///
/// Inclusivity tracks the parsed operator: `<=` is inclusive, a strict
/// `<` is not, and an absent operator reads as non-inclusive (there is
/// no boundary to include).
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointCriteria {
    pub metric_name: Option<String>,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub lower_inclusive: bool,
    pub upper_inclusive: bool,
}

impl EndpointCriteria {
    /// Parse a clause. Non-matching input yields an inert clause.
    pub fn parse(clause: &str) -> Self {
        let Some(caps) = CLAUSE.captures(clause) else {
            return Self {
                metric_name: None,
                lower_bound: None,
                upper_bound: None,
                lower_inclusive: false,
                upper_inclusive: false,
            };
        };

        // The numeral pattern guarantees these parse.
        let bound = |name: &str| {
            caps.name(name)
                .and_then(|m| m.as_str().parse::<f64>().ok())
        };

        Self {
            metric_name: caps.name("name").map(|m| m.as_str().to_string()),
            lower_bound: bound("lower"),
            upper_bound: bound("upper"),
            lower_inclusive: caps.name("lop").is_some_and(|m| m.as_str() == "<="),
            upper_inclusive: caps.name("uop").is_some_and(|m| m.as_str() == "<="),
        }
    }
}

impl fmt::Display for EndpointCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn bound(value: Option<f64>) -> String {
            match value {
                Some(v) => format!("{v:?}"),
                None => "None".to_string(),
            }
        }

        write!(
            f,
            "{} => {}{},{}{}",
            self.metric_name.as_deref().unwrap_or("None"),
            if self.lower_inclusive { "[" } else { "(" },
            bound(self.lower_bound),
            bound(self.upper_bound),
            if self.upper_inclusive { "]" } else { ")" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upper_bound_only() {
        let c = EndpointCriteria::parse("foo <= 4.0");
        assert_eq!(c.metric_name.as_deref(), Some("foo"));
        assert_eq!(c.lower_bound, None);
        assert_eq!(c.upper_bound, Some(4.0));
        assert!(!c.lower_inclusive);
        assert!(c.upper_inclusive);
        assert_eq!(c.to_string(), "foo => (None,4.0]");
    }

    #[test]
    fn both_bounds() {
        let c = EndpointCriteria::parse("1.0 <= foo <= 2.0");
        assert_eq!(c.metric_name.as_deref(), Some("foo"));
        assert_eq!(c.lower_bound, Some(1.0));
        assert_eq!(c.upper_bound, Some(2.0));
        assert_eq!(c.to_string(), "foo => [1.0,2.0]");
    }

    #[test]
    fn invalid_operator_is_inert() {
        let c = EndpointCriteria::parse("foo == 4");
        assert_eq!(c.metric_name, None);
        assert_eq!(c.lower_bound, None);
        assert_eq!(c.upper_bound, None);
        assert_eq!(c.to_string(), "None => (None,None)");
    }

    #[test]
    fn strict_operators() {
        let c = EndpointCriteria::parse("100<response<800");
        assert_eq!(c.metric_name.as_deref(), Some("response"));
        assert_eq!(c.lower_bound, Some(100.0));
        assert_eq!(c.upper_bound, Some(800.0));
        assert!(!c.lower_inclusive);
        assert!(!c.upper_inclusive);
        assert_eq!(c.to_string(), "response => (100.0,800.0)");
    }

    #[test]
    fn bare_metric_name() {
        let c = EndpointCriteria::parse("rate");
        assert_eq!(c.metric_name.as_deref(), Some("rate"));
        assert_eq!(c.lower_bound, None);
        assert_eq!(c.upper_bound, None);
        assert_eq!(c.to_string(), "rate => (None,None)");
    }

    #[test]
    fn whitespace_is_tolerated() {
        let c = EndpointCriteria::parse("  20 <=  rate  <= 50 ");
        assert_eq!(c.metric_name.as_deref(), Some("rate"));
        assert_eq!(c.lower_bound, Some(20.0));
        assert_eq!(c.upper_bound, Some(50.0));
    }

    #[test]
    fn negative_bounds_do_not_parse() {
        let c = EndpointCriteria::parse("-5<=rate<=10");
        assert_eq!(c.metric_name, None);
    }
}
