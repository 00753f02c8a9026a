//! Label selector matching
//!
//! A [`Selector`] is the conjunction of its requirements. `matchLabels`
//! entries become equality requirements and `matchExpressions` add set-based
//! ones. A selector with no requirements matches nothing: a ReplicaSet always
//! carries at least one term, and an empty one must never sweep up every pod
//! in the namespace.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::Error;

/// A single selector term
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    /// `key == value`
    Equals(String, String),
    /// `key in (values)`
    In(String, BTreeSet<String>),
    /// `key notin (values)`, also satisfied when the key is absent
    NotIn(String, BTreeSet<String>),
    /// `key` is present with any value
    Exists(String),
    /// `key` is absent
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            Requirement::In(key, values) => labels.get(key).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(key, values) => !labels.get(key).is_some_and(|v| values.contains(v)),
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::DoesNotExist(key) => !labels.contains_key(key),
        }
    }
}

/// Compiled label selector
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Selector made of equality terms only
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
        Self {
            requirements: labels
                .iter()
                .map(|(k, v)| Requirement::Equals(k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Compile a Kubernetes `LabelSelector`
    ///
    /// `owner` is the `namespace/name` of the object carrying the selector and
    /// only appears in the error.
    pub fn from_label_selector(selector: &LabelSelector, owner: &str) -> Result<Self, Error> {
        let mut requirements = selector
            .match_labels
            .as_ref()
            .map(|labels| Self::from_labels(labels).requirements)
            .unwrap_or_default();

        for expr in selector.match_expressions.iter().flatten() {
            let values: BTreeSet<String> = expr.values.iter().flatten().cloned().collect();
            let key = expr.key.clone();
            let requirement = match expr.operator.as_str() {
                "In" | "NotIn" if values.is_empty() => {
                    return Err(Error::invalid_selector(
                        owner,
                        format!("operator {} on key {} requires values", expr.operator, key),
                    ));
                }
                "In" => Requirement::In(key, values),
                "NotIn" => Requirement::NotIn(key, values),
                "Exists" => Requirement::Exists(key),
                "DoesNotExist" => Requirement::DoesNotExist(key),
                other => {
                    return Err(Error::invalid_selector(
                        owner,
                        format!("unknown operator {} on key {}", other, key),
                    ));
                }
            };
            requirements.push(requirement);
        }

        Ok(Self { requirements })
    }

    /// Whether the selector has no requirements
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// The compiled requirements
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Check a label set against every requirement
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        !self.requirements.is_empty() && self.requirements.iter().all(|r| r.matches(labels))
    }

    /// Like [`Selector::matches`], treating missing labels as an empty set
    pub fn matches_opt(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        match labels {
            Some(labels) => self.matches(labels),
            None => self.matches(&BTreeMap::new()),
        }
    }
}
