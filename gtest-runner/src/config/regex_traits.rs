// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{errors::RegexTraitParseError, test_case::Trait};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::fmt;
use tracing::warn;

/// Separates rules in the string form of a rule list.
pub const TRAIT_RULE_SEPARATOR: &str = "//||//";

/// Separates the regex from the trait within a rule.
pub const TRAIT_REGEX_SEPARATOR: &str = "///";

/// Separates the trait name from the trait value within a rule.
pub const TRAIT_VALUE_SEPARATOR: &str = ",";

/// Assigns a trait to every test whose display name matches a regex.
#[derive(Clone, Debug)]
pub struct RegexTraitRule {
    regex: Regex,
    test_trait: Trait,
}

impl RegexTraitRule {
    /// Creates a new rule.
    pub fn new(
        regex: &str,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, RegexTraitParseError> {
        let test_trait = Trait::new(name, value);
        let regex = Regex::new(regex).map_err(|error| RegexTraitParseError::InvalidRegex {
            rule: format!(
                "{regex}{TRAIT_REGEX_SEPARATOR}{}{TRAIT_VALUE_SEPARATOR}{}",
                test_trait.name, test_trait.value
            ),
            error,
        })?;
        Ok(Self { regex, test_trait })
    }

    /// Parses a single rule of the form `regex///Name,Value`.
    pub fn parse(rule: &str) -> Result<Self, RegexTraitParseError> {
        let invalid = || RegexTraitParseError::InvalidSyntax {
            rule: rule.to_owned(),
        };
        let (regex, test_trait) = rule.split_once(TRAIT_REGEX_SEPARATOR).ok_or_else(invalid)?;
        let (name, value) = test_trait
            .split_once(TRAIT_VALUE_SEPARATOR)
            .ok_or_else(invalid)?;
        Self::new(regex, name, value)
    }

    /// Parses a list of rules separated by `//||//`.
    ///
    /// Invalid rules are logged and skipped.
    pub fn parse_list(rules: &str) -> Vec<Self> {
        rules
            .split(TRAIT_RULE_SEPARATOR)
            .filter(|rule| !rule.is_empty())
            .filter_map(|rule| match Self::parse(rule) {
                Ok(rule) => Some(rule),
                Err(error) => {
                    warn!("ignoring trait rule: {error}");
                    None
                }
            })
            .collect()
    }

    /// The regex display names are matched against.
    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// The trait assigned to matching tests.
    pub fn test_trait(&self) -> &Trait {
        &self.test_trait
    }

    /// Returns true if this rule applies to a test with the given display name.
    pub fn matches(&self, display_name: &str) -> bool {
        self.regex.is_match(display_name)
    }
}

impl fmt::Display for RegexTraitRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{TRAIT_REGEX_SEPARATOR}{}{TRAIT_VALUE_SEPARATOR}{}",
            self.regex, self.test_trait.name, self.test_trait.value
        )
    }
}

/// A list of [`RegexTraitRule`]s, as read from the config.
///
/// Accepts either the `//||//`-separated string form, or a list of
/// `{ regex, name, value }` tables. Invalid rules are logged and skipped.
#[derive(Clone, Debug, Default)]
pub struct RegexTraitRules(Vec<RegexTraitRule>);

impl RegexTraitRules {
    /// Creates a new list from already-parsed rules.
    pub fn new(rules: Vec<RegexTraitRule>) -> Self {
        Self(rules)
    }

    /// The rules, in configuration order.
    pub fn rules(&self) -> &[RegexTraitRule] {
        &self.0
    }

    /// Returns the traits of every rule matching `display_name`.
    pub fn matching<'a>(&'a self, display_name: &'a str) -> impl Iterator<Item = &'a Trait> + 'a {
        self.0
            .iter()
            .filter(move |rule| rule.matches(display_name))
            .map(RegexTraitRule::test_trait)
    }

    /// Returns true if there are no rules.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RegexTraitRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rule) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(TRAIT_RULE_SEPARATOR)?;
            }
            write!(f, "{rule}")?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RegexTraitRulesDeserialize {
    String(String),
    List(Vec<RegexTraitRuleTable>),
}

#[derive(Deserialize)]
struct RegexTraitRuleTable {
    regex: String,
    name: String,
    value: String,
}

impl<'de> Deserialize<'de> for RegexTraitRules {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let rules = match RegexTraitRulesDeserialize::deserialize(deserializer)? {
            RegexTraitRulesDeserialize::String(rules) => RegexTraitRule::parse_list(&rules),
            RegexTraitRulesDeserialize::List(tables) => tables
                .into_iter()
                .filter_map(|table| {
                    match RegexTraitRule::new(&table.regex, table.name, table.value) {
                        Ok(rule) => Some(rule),
                        Err(error) => {
                            warn!("ignoring trait rule: {error}");
                            None
                        }
                    }
                })
                .collect(),
        };
        Ok(Self(rules))
    }
}

/// Computes the final traits of a test.
///
/// The result is, in order:
///
/// 1. traits from `before` rules, unless a symbol trait or an `after` trait has the same name;
/// 2. symbol traits, unless an `after` trait has the same name;
/// 3. traits from `after` rules.
pub fn merge_traits(
    display_name: &str,
    before: &RegexTraitRules,
    symbol_traits: &[Trait],
    after: &RegexTraitRules,
) -> Vec<Trait> {
    let after_traits: Vec<&Trait> = after.matching(display_name).collect();
    let overridden_by_after = |name: &str| after_traits.iter().any(|t| t.name == name);

    let mut traits: Vec<Trait> = before
        .matching(display_name)
        .filter(|t| {
            !overridden_by_after(&t.name) && !symbol_traits.iter().any(|s| s.name == t.name)
        })
        .cloned()
        .collect();
    traits.extend(
        symbol_traits
            .iter()
            .filter(|t| !overridden_by_after(&t.name))
            .cloned(),
    );
    traits.extend(after_traits.into_iter().cloned());
    traits
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn rules(s: &str) -> RegexTraitRules {
        RegexTraitRules::new(RegexTraitRule::parse_list(s))
    }

    #[test]
    fn parse_valid_list() {
        let rules = rules("Foo.*///Type,Small//||//.*Bar///Author,Jane");
        let traits: Vec<_> = rules.rules().iter().map(|r| r.test_trait().clone()).collect();
        assert_eq!(
            traits,
            vec![Trait::new("Type", "Small"), Trait::new("Author", "Jane")]
        );
        assert_eq!(rules.to_string(), "Foo.*///Type,Small//||//.*Bar///Author,Jane");
    }

    #[test_case("Foo.*//Type,Small"; "missing regex separator")]
    #[test_case("Foo.*///TypeSmall"; "missing value separator")]
    #[test_case("Foo(///Type,Small"; "invalid regex")]
    fn invalid_rules_are_skipped(invalid: &str) {
        assert!(RegexTraitRule::parse(invalid).is_err());
        let list = format!("A///X,1//||//{invalid}//||//B///Y,2");
        assert_eq!(rules(&list).rules().len(), 2);
    }

    #[test]
    fn deserialize_both_forms() {
        #[derive(Deserialize)]
        struct Wrapper {
            rules: RegexTraitRules,
        }

        let from_string: Wrapper = serde_json::from_str(r#"{"rules": "A///X,1"}"#).unwrap();
        assert_eq!(from_string.rules.rules().len(), 1);

        let from_tables: Wrapper = serde_json::from_str(
            r#"{"rules": [{"regex": "A", "name": "X", "value": "1"},
                          {"regex": "(", "name": "Y", "value": "2"}]}"#,
        )
        .unwrap();
        assert_eq!(from_tables.rules.rules().len(), 1);
    }

    #[test]
    fn merge_order_and_overrides() {
        let before = rules("Suite///Type,Small//||//Suite///Owner,QA//||//Suite///Area,Core");
        let after = rules("Suite///Area,Io//||//Other///Skipped,Yes");
        let symbol_traits = vec![Trait::new("Owner", "Dev"), Trait::new("Area", "Ui")];

        let traits = merge_traits("Suite.Test", &before, &symbol_traits, &after);
        assert_eq!(
            traits,
            vec![
                Trait::new("Type", "Small"),
                Trait::new("Owner", "Dev"),
                Trait::new("Area", "Io"),
            ]
        );
    }

    #[test]
    fn merge_without_rules_keeps_symbol_traits() {
        let symbol_traits = vec![Trait::new("Owner", "Dev")];
        let empty = RegexTraitRules::default();
        assert_eq!(
            merge_traits("Suite.Test", &empty, &symbol_traits, &empty),
            symbol_traits
        );
    }
}
