use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

/// Canonical tag naming the business grouping a resource belongs to.
pub const TAG_USAGE: &str = "Usage";

/// Canonical tag naming the person responsible for a resource.
pub const TAG_OWNER: &str = "Owner";

/// Sentinel category for resources no tag or heuristic can place.
pub const TAG_UNKNOWN: &str = "Unknown";

/// A single predicate a classification rule can check.
///
/// Predicates inspect the resource's tag map or its key-pair name; they
/// carry no classification logic of their own.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// The tag exists with a non-empty value.
    TagPresent { tag: String },
    /// The tag's value contains the given substring.
    TagContains {
        tag: String,
        value: String,
        #[serde(default)]
        ignore_case: bool,
    },
    /// The resource was launched with the given key pair.
    KeyName { name: String },
}

impl Predicate {
    fn matches(&self, tags: &HashMap<String, String>, key_name: Option<&str>) -> bool {
        match self {
            Self::TagPresent { tag } => tag_value(tags, tag).is_some(),
            Self::TagContains {
                tag,
                value,
                ignore_case,
            } => tag_value(tags, tag).is_some_and(|tag_value| {
                if *ignore_case {
                    tag_value.to_lowercase().contains(&value.to_lowercase())
                } else {
                    tag_value.contains(value.as_str())
                }
            }),
            Self::KeyName { name } => key_name == Some(name.as_str()),
        }
    }
}

/// One classification rule: a category assigned when any of its predicates
/// matches.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageRule {
    /// Category assigned on match.
    pub category: String,
    /// Predicates checked in order; any match assigns the category.
    pub any: Vec<Predicate>,
}

/// Assigns usage and owner categories to compute resources.
///
/// The usage category comes from the `Usage` tag when present; untagged
/// resources fall through an ordered rule list where the first matching
/// rule wins. The rule list is policy, not algorithm: it ships with
/// defaults mirroring the tagging conventions of the monitored account and
/// can be replaced wholesale from configuration.
pub struct Classifier {
    rules: Vec<UsageRule>,
}

impl Classifier {
    /// Creates a classifier with the given ordered rule list.
    pub fn new(rules: Vec<UsageRule>) -> Self {
        Self { rules }
    }

    /// The built-in rule list, used when configuration supplies none.
    pub fn default_rules() -> Vec<UsageRule> {
        fn tag_present(tag: &str) -> Predicate {
            Predicate::TagPresent {
                tag: tag.to_string(),
            }
        }
        fn tag_contains(tag: &str, value: &str, ignore_case: bool) -> Predicate {
            Predicate::TagContains {
                tag: tag.to_string(),
                value: value.to_string(),
                ignore_case,
            }
        }
        fn key_name(name: &str) -> Predicate {
            Predicate::KeyName {
                name: name.to_string(),
            }
        }
        fn rule(category: &str, any: Vec<Predicate>) -> UsageRule {
            UsageRule {
                category: category.to_string(),
                any,
            }
        }

        vec![
            rule(
                "UEMaaS",
                vec![tag_present("Client.Guardian"), key_name("GDN-key")],
            ),
            rule(
                "CoE",
                vec![tag_contains("Name", "CoE", false), key_name("coe-demo")],
            ),
            rule("CloudDemo", vec![tag_present("DemoId")]),
            rule("easyTravelNG", vec![key_name("EasyTravelLargeDeployment")]),
            rule(
                "MapReduce",
                vec![tag_present("aws:elasticmapreduce:instance-group-role")],
            ),
            rule("Puppet", vec![tag_contains("Name", "puppet", true)]),
            rule("Cloudera", vec![tag_contains("Name", "cloudera", true)]),
        ]
    }

    /// Returns the usage category for a resource.
    ///
    /// A non-sentinel `Usage` tag always wins; otherwise the rule list is
    /// consulted and unmatched resources get the `Unknown` sentinel.
    pub fn usage(&self, tags: &HashMap<String, String>, key_name: Option<&str>) -> String {
        if let Some(usage) = usage_tag(tags) {
            return usage.to_string();
        }

        match self.match_rules(tags, key_name) {
            Some(category) => category.to_string(),
            None => {
                debug!(?key_name, "no usage tag and no matching rule");
                TAG_UNKNOWN.to_string()
            }
        }
    }

    /// Returns the owner category for a resource.
    ///
    /// Owner tagging has no heuristic fallback: the tag is either set or
    /// the resource counts as `Unknown`.
    pub fn owner(&self, tags: &HashMap<String, String>) -> String {
        tag_value(tags, TAG_OWNER)
            .filter(|owner| *owner != TAG_UNKNOWN)
            .unwrap_or(TAG_UNKNOWN)
            .to_string()
    }

    /// Evaluates the rule list alone, first match wins.
    ///
    /// Exposed separately so the tagging utility can apply the same policy
    /// the monitor classifies with.
    pub fn match_rules(
        &self,
        tags: &HashMap<String, String>,
        key_name: Option<&str>,
    ) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.any.iter().any(|p| p.matches(tags, key_name)))
            .map(|rule| rule.category.as_str())
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(Self::default_rules())
    }
}

/// Returns the explicit, non-sentinel `Usage` tag value, if any.
pub fn usage_tag(tags: &HashMap<String, String>) -> Option<&str> {
    tag_value(tags, TAG_USAGE).filter(|usage| *usage != TAG_UNKNOWN)
}

/// Case-insensitive tag lookup, treating empty values as absent.
fn tag_value<'a>(tags: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
        .filter(|value| !value.is_empty())
}
