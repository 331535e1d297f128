// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    PdbLocator, SourceFileLocation, SymbolPattern, SymbolResolverFactory, pe::PeFile,
    strip_test_symbol_namespace, traits_for_symbol,
};
use crate::errors::{DisplayErrorChain, SymbolResolverError};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// The result of resolving the test methods of one executable.
#[derive(Clone, Debug, Default)]
pub struct ResolutionOutcome {
    /// Locations keyed by namespace-stripped test method symbol.
    pub locations: HashMap<String, SourceFileLocation>,

    /// Problems encountered along the way. These are also logged.
    pub warnings: Vec<String>,
}

impl ResolutionOutcome {
    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }

    fn merge(&mut self, other: Self) {
        self.locations.extend(other.locations);
        self.warnings.extend(other.warnings);
    }
}

/// Resolves source locations and traits for the test methods of an executable.
pub struct BinaryMetadataResolver<'a> {
    factory: &'a dyn SymbolResolverFactory,
}

impl<'a> BinaryMetadataResolver<'a> {
    /// Creates a new resolver using `factory` to open symbol databases.
    pub fn new(factory: &'a dyn SymbolResolverFactory) -> Self {
        Self { factory }
    }

    /// Resolves `signatures` (namespace-stripped test method symbols) for `executable`.
    ///
    /// The executable's own program database is read first. If it yields no locations, the
    /// `additional_pdbs` are read, followed by the databases of every imported DLL found next to
    /// the executable.
    pub fn resolve_all(
        &self,
        executable: &Utf8Path,
        signatures: &HashSet<String>,
        path_extension: &str,
        additional_pdbs: &[Utf8PathBuf],
    ) -> ResolutionOutcome {
        let mut outcome = self.resolve_binary(executable, signatures, path_extension);
        if !outcome.locations.is_empty() {
            return outcome;
        }

        for pdb in additional_pdbs {
            if !pdb.is_file() {
                outcome.warn(format!("configured additional PDB file `{pdb}` does not exist"));
                continue;
            }
            let found = self.resolve_pdb(executable, pdb, signatures);
            outcome.merge(found);
        }

        let imports = match PeFile::open(executable).and_then(|pe| pe.imports()) {
            Ok(imports) => imports,
            Err(error) => {
                debug!("reading imports of `{executable}` failed: {error}");
                Vec::new()
            }
        };
        let module_dir = executable.parent().unwrap_or(Utf8Path::new(""));
        for import in imports {
            let imported = module_dir.join(&import);
            if imported.is_file() {
                let found = self.resolve_binary(&imported, signatures, path_extension);
                outcome.merge(found);
            }
        }

        outcome
    }

    fn resolve_binary(
        &self,
        binary: &Utf8Path,
        signatures: &HashSet<String>,
        path_extension: &str,
    ) -> ResolutionOutcome {
        match PdbLocator::find_pdb(binary, path_extension) {
            Some(pdb) => self.resolve_pdb(binary, &pdb, signatures),
            None => {
                let mut outcome = ResolutionOutcome::default();
                outcome.warn(format!(
                    "couldn't find the .pdb file of `{binary}`: \
                     you might not get source locations for some or all of your tests"
                ));
                outcome
            }
        }
    }

    fn resolve_pdb(
        &self,
        binary: &Utf8Path,
        pdb: &Utf8Path,
        signatures: &HashSet<String>,
    ) -> ResolutionOutcome {
        let mut outcome = ResolutionOutcome::default();
        match self.find_locations(binary, pdb, signatures) {
            Ok(locations) => outcome.locations = locations,
            Err(error) => outcome.warn(format!(
                "resolving test locations and traits in `{binary}` failed: {}",
                DisplayErrorChain::new(&error)
            )),
        }
        outcome
    }

    fn find_locations(
        &self,
        binary: &Utf8Path,
        pdb: &Utf8Path,
        signatures: &HashSet<String>,
    ) -> Result<HashMap<String, SourceFileLocation>, SymbolResolverError> {
        let mut resolver = self.factory.create(binary, pdb)?;
        let test_methods = resolver.functions(&SymbolPattern::test_methods())?;
        let trait_symbols = resolver.functions(&SymbolPattern::trait_symbols())?;
        debug!(
            "found {} test method symbols and {} trait symbols in `{binary}`",
            test_methods.len(),
            trait_symbols.len()
        );

        let mut locations = HashMap::new();
        for mut location in test_methods {
            let key = strip_test_symbol_namespace(&location.symbol);
            if !signatures.contains(key) || locations.contains_key(key) {
                continue;
            }
            let key = key.to_owned();
            location.traits = traits_for_symbol(&location.symbol, &trait_symbols);
            locations.insert(key, location);
        }
        Ok(locations)
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;
    use crate::resolver::{FunctionSymbol, LineLocation, SymbolResolver};
    use std::sync::Mutex;

    /// A symbol database described in memory: `(symbol, file, line)`.
    #[derive(Debug, Default)]
    pub(crate) struct FakeResolverFactory {
        pub(crate) symbols: HashMap<Utf8PathBuf, Vec<(String, String, u32)>>,
        pub(crate) opened: Mutex<Vec<Utf8PathBuf>>,
    }

    impl FakeResolverFactory {
        pub(crate) fn with_symbols(
            mut self,
            pdb: impl Into<Utf8PathBuf>,
            symbols: &[(&str, &str, u32)],
        ) -> Self {
            self.symbols.insert(
                pdb.into(),
                symbols
                    .iter()
                    .map(|(s, f, l)| ((*s).to_owned(), (*f).to_owned(), *l))
                    .collect(),
            );
            self
        }
    }

    struct FakeResolver(Vec<(String, String, u32)>);

    impl SymbolResolver for FakeResolver {
        fn find_functions(
            &mut self,
            pattern: &SymbolPattern,
        ) -> Result<Vec<FunctionSymbol>, SymbolResolverError> {
            Ok(self
                .0
                .iter()
                .enumerate()
                .filter(|(_, (symbol, _, _))| pattern.matches(symbol))
                .map(|(index, (symbol, _, _))| FunctionSymbol {
                    name: symbol.clone(),
                    module: index,
                    section: 0,
                    offset: 0,
                    len: 0,
                })
                .collect())
        }

        fn resolve_line(
            &mut self,
            function: &FunctionSymbol,
        ) -> Result<Option<LineLocation>, SymbolResolverError> {
            Ok(self
                .0
                .get(function.module)
                .filter(|(_, file, _)| !file.is_empty())
                .map(|(_, file, line)| LineLocation {
                    file: file.into(),
                    line: *line,
                }))
        }
    }

    impl SymbolResolverFactory for FakeResolverFactory {
        fn create(
            &self,
            _binary: &Utf8Path,
            pdb: &Utf8Path,
        ) -> Result<Box<dyn SymbolResolver>, SymbolResolverError> {
            self.opened
                .lock()
                .expect("lock is not poisoned")
                .push(pdb.to_owned());
            match self.symbols.get(pdb) {
                Some(symbols) => Ok(Box::new(FakeResolver(symbols.clone()))),
                None => Err(SymbolResolverError::Open {
                    pdb: pdb.to_owned(),
                    error: std::io::Error::from(std::io::ErrorKind::NotFound),
                }),
            }
        }
    }
}
