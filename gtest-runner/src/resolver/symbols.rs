// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{errors::SymbolResolverError, test_case::Trait};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::fmt;
use tracing::{debug, warn};

/// The suffix of the symbol implementing a test.
pub const TEST_BODY_SIGNATURE: &str = "::TestBody";

/// Separates the name and value of a trait encoded in a symbol.
pub const TRAIT_SEPARATOR: &str = "__GTA__";

/// The suffix of symbols that encode traits.
pub const TRAIT_APPENDIX: &str = "_GTA_TRAIT";

/// A symbol name pattern in wildcard syntax: `*` matches any run of characters and `?` matches
/// exactly one.
#[derive(Clone, Debug)]
pub struct SymbolPattern {
    pattern: String,
    regex: Regex,
}

impl SymbolPattern {
    /// Compiles a wildcard pattern.
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let mut regex = String::with_capacity(pattern.len() + 2);
        regex.push('^');
        let mut literal = [0u8; 4];
        for c in pattern.chars() {
            match c {
                '*' => regex.push_str(".*"),
                '?' => regex.push('.'),
                c => regex.push_str(&regex::escape(c.encode_utf8(&mut literal))),
            }
        }
        regex.push('$');
        let regex = Regex::new(&regex).expect("escaped wildcard patterns are valid regexes");
        Self { pattern, regex }
    }

    /// The pattern that matches every test method.
    pub fn test_methods() -> Self {
        Self::new(format!("*{TEST_BODY_SIGNATURE}"))
    }

    /// The pattern that matches every trait symbol.
    pub fn trait_symbols() -> Self {
        Self::new(format!("*{TRAIT_APPENDIX}"))
    }

    /// Returns true if the whole of `symbol` matches.
    pub fn matches(&self, symbol: &str) -> bool {
        self.regex.is_match(symbol)
    }

    /// The original wildcard pattern.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Display for SymbolPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// A function found in a debug symbol database.
///
/// The address fields are opaque to everything but the resolver that produced the symbol.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FunctionSymbol {
    /// The undecorated, fully-qualified function name.
    pub name: String,

    /// The module (compilation unit) the function is defined in.
    pub module: usize,

    /// The section of the function's address.
    pub section: u16,

    /// The offset of the function's address within its section.
    pub offset: u32,

    /// The length of the function in bytes.
    pub len: u32,
}

/// A source location of a function.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LineLocation {
    /// The source file.
    pub file: Utf8PathBuf,

    /// The 1-based line number.
    pub line: u32,
}

/// A symbol with its source location and the traits attached to it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceFileLocation {
    /// The symbol name.
    pub symbol: String,

    /// The source file. Empty if no line information was found.
    pub source_file: Utf8PathBuf,

    /// The 1-based line number, or 0 if no line information was found.
    pub line: u32,

    /// Traits attached to the symbol's test class.
    pub traits: Vec<Trait>,
}

impl SourceFileLocation {
    /// Creates a location without traits.
    pub fn new(symbol: impl Into<String>, source_file: impl Into<Utf8PathBuf>, line: u32) -> Self {
        Self {
            symbol: symbol.into(),
            source_file: source_file.into(),
            line,
            traits: Vec::new(),
        }
    }

    /// The symbol text before the last `::`.
    pub fn test_class_signature(&self) -> &str {
        self.symbol
            .rfind("::")
            .map_or(self.symbol.as_str(), |index| &self.symbol[..index])
    }

    /// Decodes the trait carried by a trait symbol, `<TestClass>::<Name>__GTA__<Value>_GTA_TRAIT`.
    pub fn decode_trait(&self) -> Option<Trait> {
        let start = self.symbol.rfind("::").map_or(0, |index| index + 2);
        let payload = self.symbol[start..].strip_suffix(TRAIT_APPENDIX)?;
        let (name, value) = payload.split_once(TRAIT_SEPARATOR)?;
        Some(Trait::new(name, value))
    }
}

/// Returns the traits that apply to `test_symbol`: those whose trait symbol's test class
/// signature is a prefix of it.
pub fn traits_for_symbol(test_symbol: &str, trait_symbols: &[SourceFileLocation]) -> Vec<Trait> {
    trait_symbols
        .iter()
        .filter(|trait_symbol| test_symbol.starts_with(trait_symbol.test_class_signature()))
        .filter_map(|trait_symbol| {
            let decoded = trait_symbol.decode_trait();
            if decoded.is_none() {
                debug!("ignoring malformed trait symbol `{}`", trait_symbol.symbol);
            }
            decoded
        })
        .collect()
}

/// Removes the namespace from a test method symbol: everything up to and including the last
/// `::` before the trailing `::TestBody`.
pub fn strip_test_symbol_namespace(symbol: &str) -> &str {
    let head = symbol.strip_suffix(TEST_BODY_SIGNATURE).unwrap_or(symbol);
    head.rfind("::").map_or(symbol, |index| &symbol[index + 2..])
}

/// Reads functions and their source locations from a debug symbol database.
pub trait SymbolResolver {
    /// Returns every function whose name matches `pattern`.
    fn find_functions(
        &mut self,
        pattern: &SymbolPattern,
    ) -> Result<Vec<FunctionSymbol>, SymbolResolverError>;

    /// Returns the source location of `function`, if the database has line information for it.
    fn resolve_line(
        &mut self,
        function: &FunctionSymbol,
    ) -> Result<Option<LineLocation>, SymbolResolverError>;

    /// Returns every function matching `pattern` along with its source location.
    ///
    /// Functions without line information get an empty location and a warning.
    fn functions(
        &mut self,
        pattern: &SymbolPattern,
    ) -> Result<Vec<SourceFileLocation>, SymbolResolverError> {
        let functions = self.find_functions(pattern)?;
        let mut locations = Vec::with_capacity(functions.len());
        for function in functions {
            match self.resolve_line(&function)? {
                Some(line) => {
                    locations.push(SourceFileLocation::new(function.name, line.file, line.line))
                }
                None => {
                    warn!("failed to locate line number for `{}`", function.name);
                    locations.push(SourceFileLocation::new(function.name, "", 0));
                }
            }
        }
        Ok(locations)
    }
}

/// Creates [`SymbolResolver`]s.
pub trait SymbolResolverFactory: Send + Sync {
    /// Opens the debug symbol database `pdb` belonging to `binary`.
    fn create(
        &self,
        binary: &Utf8Path,
        pdb: &Utf8Path,
    ) -> Result<Box<dyn SymbolResolver>, SymbolResolverError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("*::TestBody", "Suite_Name_Test::TestBody", true; "suffix")]
    #[test_case("*::TestBody", "Suite_Name_Test::TestBodyX", false; "anchored end")]
    #[test_case("Suite_?_Test::*", "Suite_A_Test::TestBody", true; "single char")]
    #[test_case("Suite_?_Test::*", "Suite_AB_Test::TestBody", false; "single char only")]
    #[test_case("*_GTA_TRAIT", "A_B_Test::Size__GTA__Large_GTA_TRAIT", true; "trait")]
    #[test_case("a.b*", "aXb", false; "dot is literal")]
    fn wildcard_patterns(pattern: &str, symbol: &str, matches: bool) {
        assert_eq!(SymbolPattern::new(pattern).matches(symbol), matches);
    }

    #[test_case("ns::Suite_Name_Test::TestBody", "Suite_Name_Test::TestBody"; "namespaced")]
    #[test_case("a::b::Suite_Name_Test::TestBody", "Suite_Name_Test::TestBody"; "nested")]
    #[test_case("Suite_Name_Test::TestBody", "Suite_Name_Test::TestBody"; "plain")]
    #[test_case(
        "gtest_case_Suite_::Name<int>::TestBody",
        "Name<int>::TestBody";
        "typed"
    )]
    #[test_case("TestBody", "TestBody"; "bare")]
    fn strip_namespace(symbol: &str, expected: &str) {
        assert_eq!(strip_test_symbol_namespace(symbol), expected);
    }

    #[test]
    fn trait_symbols_apply_by_prefix() {
        let trait_symbols = vec![
            SourceFileLocation::new("Suite_Name_Test::Size__GTA__Large_GTA_TRAIT", "", 0),
            SourceFileLocation::new("Suite_Name_Test::Owner__GTA__Jane_GTA_TRAIT", "", 0),
            SourceFileLocation::new("Other_Name_Test::Size__GTA__Small_GTA_TRAIT", "", 0),
            SourceFileLocation::new("Suite_Name_Test::Broken_GTA_TRAIT", "", 0),
        ];
        assert_eq!(
            traits_for_symbol("Suite_Name_Test::TestBody", &trait_symbols),
            vec![Trait::new("Size", "Large"), Trait::new("Owner", "Jane")]
        );
        assert_eq!(
            traits_for_symbol("Unrelated_Test::TestBody", &trait_symbols),
            vec![]
        );
    }

    #[test]
    fn test_class_signature() {
        let location = SourceFileLocation::new("ns::Suite_Name_Test::TestBody", "a.cpp", 3);
        assert_eq!(location.test_class_signature(), "ns::Suite_Name_Test");
    }

    struct FakeResolver;

    impl SymbolResolver for FakeResolver {
        fn find_functions(
            &mut self,
            pattern: &SymbolPattern,
        ) -> Result<Vec<FunctionSymbol>, SymbolResolverError> {
            Ok(["A_B_Test::TestBody", "C_D_Test::TestBody", "helper"]
                .into_iter()
                .filter(|name| pattern.matches(name))
                .enumerate()
                .map(|(module, name)| FunctionSymbol {
                    name: name.to_owned(),
                    module,
                    section: 1,
                    offset: 0,
                    len: 0,
                })
                .collect())
        }

        fn resolve_line(
            &mut self,
            function: &FunctionSymbol,
        ) -> Result<Option<LineLocation>, SymbolResolverError> {
            Ok((function.module == 0).then(|| LineLocation {
                file: "a.cpp".into(),
                line: 7,
            }))
        }
    }

    #[test]
    fn functions_without_lines_get_empty_locations() {
        let locations = FakeResolver
            .functions(&SymbolPattern::test_methods())
            .expect("fake resolver succeeds");
        assert_eq!(
            locations,
            vec![
                SourceFileLocation::new("A_B_Test::TestBody", "a.cpp", 7),
                SourceFileLocation::new("C_D_Test::TestBody", "", 0),
            ]
        );
    }
}
