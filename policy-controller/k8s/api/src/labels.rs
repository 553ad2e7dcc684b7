use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use regex::Regex;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
    sync::{Arc, LazyLock},
};
use thiserror::Error;

#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

pub type Expressions = Vec<Expression>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expression {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// A validated label selector.
///
/// Built from a Kubernetes `LabelSelector`. Every `matchLabels` entry and every
/// `matchExpressions` requirement must hold for a label set to match, so a
/// selector without requirements matches everything.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct Selector {
    match_labels: Map,
    match_expressions: Expressions,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("{0:?} is not a valid label selector operator")]
    InvalidOperator(String),

    #[error("values must be non-empty for operator {operator} on key {key:?}")]
    MissingValues { key: String, operator: Operator },

    #[error("values must be empty for operator {operator} on key {key:?}")]
    UnexpectedValues { key: String, operator: Operator },

    #[error("{0:?} is not a valid label key")]
    InvalidKey(String),

    #[error("{value:?} is not a valid value for label key {key:?}")]
    InvalidValue { key: String, value: String },
}

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$")
        .expect("label name regex must compile")
});

static PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("label prefix regex must compile")
});

// === Selector ===

impl Selector {
    pub fn from_expressions(exprs: Expressions) -> Self {
        Self {
            match_labels: Map::new(),
            match_expressions: exprs,
        }
    }

    pub fn from_map(map: Map) -> Self {
        Self {
            match_labels: map,
            match_expressions: Expressions::new(),
        }
    }

    /// Returns true if the selector places no constraints on labels.
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        for expr in self.match_expressions.iter() {
            if !expr.matches(labels.as_ref()) {
                return false;
            }
        }

        for (k, v) in self.match_labels.iter() {
            if labels.0.get(k) != Some(v) {
                return false;
            }
        }

        true
    }
}

impl TryFrom<&LabelSelector> for Selector {
    type Error = ParseError;

    fn try_from(selector: &LabelSelector) -> Result<Self, ParseError> {
        let mut match_labels = Map::new();
        for (key, value) in selector.match_labels.iter().flatten() {
            validate_key(key)?;
            validate_value(key, value)?;
            match_labels.insert(key.clone(), value.clone());
        }

        let match_expressions = selector
            .match_expressions
            .iter()
            .flatten()
            .map(Expression::try_from)
            .collect::<Result<Expressions, _>>()?;

        Ok(Self {
            match_labels,
            match_expressions,
        })
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl std::iter::FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self::from_expressions(iter.into_iter().collect())
    }
}

// === Labels ===

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

// === Expression ===

impl Expression {
    pub fn new(
        key: impl Into<String>,
        operator: Operator,
        values: impl IntoIterator<Item = String>,
    ) -> Result<Self, ParseError> {
        let key = key.into();
        let values = values.into_iter().collect::<BTreeSet<_>>();
        validate_key(&key)?;

        match operator {
            Operator::In | Operator::NotIn if values.is_empty() => {
                return Err(ParseError::MissingValues { key, operator });
            }
            Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                return Err(ParseError::UnexpectedValues { key, operator });
            }
            _ => {}
        }
        for value in values.iter() {
            validate_value(&key, value)?;
        }

        Ok(Self {
            key,
            operator,
            values,
        })
    }

    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => labels
                .get(&self.key)
                .map(|v| self.values.contains(v))
                .unwrap_or(false),
            Operator::NotIn => labels
                .get(&self.key)
                .map(|v| !self.values.contains(v))
                .unwrap_or(true),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

impl TryFrom<&LabelSelectorRequirement> for Expression {
    type Error = ParseError;

    fn try_from(req: &LabelSelectorRequirement) -> Result<Self, ParseError> {
        let operator = req.operator.parse()?;
        Self::new(
            req.key.clone(),
            operator,
            req.values.iter().flatten().cloned(),
        )
    }
}

// === Operator ===

impl FromStr for Operator {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, ParseError> {
        match s {
            "In" => Ok(Self::In),
            "NotIn" => Ok(Self::NotIn),
            "Exists" => Ok(Self::Exists),
            "DoesNotExist" => Ok(Self::DoesNotExist),
            _ => Err(ParseError::InvalidOperator(s.to_string())),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::In => "In",
            Self::NotIn => "NotIn",
            Self::Exists => "Exists",
            Self::DoesNotExist => "DoesNotExist",
        })
    }
}

// === validation ===

fn validate_key(key: &str) -> Result<(), ParseError> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN || !PREFIX_RE.is_match(prefix) {
            return Err(ParseError::InvalidKey(key.to_string()));
        }
    }

    if name.len() > MAX_NAME_LEN || !NAME_RE.is_match(name) {
        return Err(ParseError::InvalidKey(key.to_string()));
    }

    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<(), ParseError> {
    if value.is_empty() {
        return Ok(());
    }

    if value.len() > MAX_NAME_LEN || !NAME_RE.is_match(value) {
        return Err(ParseError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn requirement(key: &str, operator: &str, values: &[&str]) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values: if values.is_empty() {
                None
            } else {
                Some(values.iter().map(|v| v.to_string()).collect())
            },
        }
    }

    fn expression(key: &str, operator: Operator, values: &[&str]) -> Expression {
        Expression::new(key, operator, values.iter().map(|v| v.to_string()))
            .expect("expression must be valid")
    }

    #[test]
    fn test_matches() {
        for (selector, labels, matches, msg) in &[
            (Selector::default(), Labels::default(), true, "empty match"),
            (
                Selector::default(),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "empty selector matches any labels",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(Some(("foo", "bar"))),
                true,
                "exact label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "sufficient label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::default(),
                false,
                "missing label",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(Some(("foo", "baz"))),
                false,
                "mismatched label value",
            ),
            (
                Selector::from_iter(Some(expression("foo", Operator::In, &["bar"]))),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "expression match",
            ),
            (
                Selector::from_iter(Some(expression("foo", Operator::In, &["bar"]))),
                Labels::default(),
                false,
                "in requires the key",
            ),
            (
                Selector::from_iter(Some(expression("foo", Operator::NotIn, &["bar"]))),
                Labels::default(),
                true,
                "not-in matches a missing key",
            ),
            (
                Selector::from_iter(Some(expression("foo", Operator::NotIn, &["bar"]))),
                Labels::from_iter(Some(("foo", "bar"))),
                false,
                "not-in rejects a listed value",
            ),
            (
                Selector::from_iter(Some(expression("foo", Operator::NotIn, &["bar"]))),
                Labels::from_iter(Some(("foo", "qux"))),
                true,
                "not-in matches an unlisted value",
            ),
            (
                Selector::from_iter(Some(expression("foo", Operator::Exists, &[]))),
                Labels::from_iter(Some(("foo", ""))),
                true,
                "exists matches an empty value",
            ),
            (
                Selector::from_iter(Some(expression("foo", Operator::DoesNotExist, &[]))),
                Labels::from_iter(Some(("foo", "bar"))),
                false,
                "does-not-exist rejects a present key",
            ),
        ] {
            assert_eq!(selector.matches(labels), *matches, "{}", msg);
        }
    }

    #[test]
    fn parses_label_selector() {
        let selector = Selector::try_from(&LabelSelector {
            match_labels: Some(btreemap! { "env".to_string() => "test".to_string() }),
            match_expressions: Some(vec![requirement(
                "example.com/tier",
                "In",
                &["a", "b"],
            )]),
        })
        .expect("selector must parse");

        assert!(selector.matches(&Labels::from_iter(vec![
            ("env", "test"),
            ("example.com/tier", "b"),
        ])));
        assert!(!selector.matches(&Labels::from_iter(vec![("env", "test")])));
        assert!(!selector.matches(&Labels::from_iter(vec![
            ("env", "prod"),
            ("example.com/tier", "a"),
        ])));
    }

    #[test]
    fn empty_label_selector_matches_everything() {
        let selector = Selector::try_from(&LabelSelector::default()).expect("selector must parse");
        assert!(selector.is_empty());
        assert!(selector.matches(&Labels::default()));
        assert!(selector.matches(&Labels::from_iter(Some(("env", "test")))));
    }

    #[test]
    fn rejects_invalid_operator() {
        let err = Selector::try_from(&LabelSelector {
            match_expressions: Some(vec![requirement("env", "Equals", &["test"])]),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err, ParseError::InvalidOperator("Equals".to_string()));
    }

    #[test]
    fn rejects_invalid_value_sets() {
        let err = Selector::try_from(&LabelSelector {
            match_expressions: Some(vec![requirement("env", "In", &[])]),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingValues {
                key: "env".to_string(),
                operator: Operator::In,
            }
        );

        let err = Selector::try_from(&LabelSelector {
            match_expressions: Some(vec![requirement("env", "Exists", &["test"])]),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(
            err,
            ParseError::UnexpectedValues {
                key: "env".to_string(),
                operator: Operator::Exists,
            }
        );
    }

    #[test]
    fn rejects_invalid_keys_and_values() {
        for key in ["", "-env", "env-", "Example.com/env", "/env", "a/b/c"] {
            let err = Selector::try_from(&LabelSelector {
                match_labels: Some(btreemap! { key.to_string() => "test".to_string() }),
                ..Default::default()
            })
            .unwrap_err();
            assert_eq!(err, ParseError::InvalidKey(key.to_string()), "{key}");
        }

        let err = Selector::try_from(&LabelSelector {
            match_labels: Some(btreemap! { "env".to_string() => "not valid".to_string() }),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidValue {
                key: "env".to_string(),
                value: "not valid".to_string(),
            }
        );

        let long = "a".repeat(MAX_NAME_LEN + 1);
        assert!(Selector::try_from(&LabelSelector {
            match_labels: Some(btreemap! { "env".to_string() => long }),
            ..Default::default()
        })
        .is_err());
    }
}
