// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{FunctionSymbol, LineLocation, SymbolPattern, SymbolResolver, SymbolResolverFactory};
use crate::errors::SymbolResolverError;
use camino::{Utf8Path, Utf8PathBuf};
use pdb::{FallibleIterator, ModuleInfo, PDB, PdbInternalSectionOffset, StringTable, SymbolData};
use std::fs::File;
use tracing::debug;

/// Creates [`PdbResolver`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct PdbResolverFactory;

impl SymbolResolverFactory for PdbResolverFactory {
    fn create(
        &self,
        _binary: &Utf8Path,
        pdb: &Utf8Path,
    ) -> Result<Box<dyn SymbolResolver>, SymbolResolverError> {
        Ok(Box::new(PdbResolver::open(pdb)?))
    }
}

/// A [`SymbolResolver`] reading MSVC program databases.
///
/// Function names come from the procedure records of each module's symbol stream, and line
/// numbers from the module's line program.
pub struct PdbResolver {
    path: Utf8PathBuf,
    pdb: PDB<'static, File>,
    string_table: Option<StringTable<'static>>,
    // Loaded on first use. `None` for modules without debug information.
    modules: Option<Vec<Option<ModuleInfo<'static>>>>,
}

impl PdbResolver {
    /// Opens the program database at `path`.
    pub fn open(path: &Utf8Path) -> Result<Self, SymbolResolverError> {
        debug!("parsing PDB file `{path}`");
        let file = File::open(path).map_err(|error| SymbolResolverError::Open {
            pdb: path.to_owned(),
            error,
        })?;
        let mut pdb = PDB::open(file).map_err(|error| SymbolResolverError::Pdb {
            pdb: path.to_owned(),
            error,
        })?;
        // Some linkers omit the string table; file names are then unavailable.
        let string_table = match pdb.string_table() {
            Ok(table) => Some(table),
            Err(error) => {
                debug!("PDB `{path}` has no string table: {error}");
                None
            }
        };
        Ok(Self {
            path: path.to_owned(),
            pdb,
            string_table,
            modules: None,
        })
    }

    fn pdb_error(&self, error: pdb::Error) -> SymbolResolverError {
        SymbolResolverError::Pdb {
            pdb: self.path.clone(),
            error,
        }
    }

    fn modules(&mut self) -> Result<&[Option<ModuleInfo<'static>>], SymbolResolverError> {
        if self.modules.is_none() {
            let loaded = self.load_modules().map_err(|error| self.pdb_error(error))?;
            self.modules = Some(loaded);
        }
        Ok(self.modules.as_deref().unwrap_or_default())
    }

    fn load_modules(&mut self) -> Result<Vec<Option<ModuleInfo<'static>>>, pdb::Error> {
        let debug_info = self.pdb.debug_information()?;
        let mut modules = debug_info.modules()?;
        let mut infos = Vec::new();
        while let Some(module) = modules.next()? {
            infos.push(self.pdb.module_info(&module)?);
        }
        Ok(infos)
    }
}

impl SymbolResolver for PdbResolver {
    fn find_functions(
        &mut self,
        pattern: &SymbolPattern,
    ) -> Result<Vec<FunctionSymbol>, SymbolResolverError> {
        let path = self.path.clone();
        let to_error = |error| SymbolResolverError::Pdb {
            pdb: path.clone(),
            error,
        };

        let mut functions = Vec::new();
        for (module, info) in self.modules()?.iter().enumerate() {
            let Some(info) = info else {
                continue;
            };
            let mut symbols = info.symbols().map_err(to_error)?;
            while let Some(symbol) = symbols.next().map_err(to_error)? {
                // Unsupported record kinds fail to parse. None of them are procedures.
                let Ok(SymbolData::Procedure(procedure)) = symbol.parse() else {
                    continue;
                };
                let name = procedure.name.to_string();
                if pattern.matches(&name) {
                    functions.push(FunctionSymbol {
                        name: name.into_owned(),
                        module,
                        section: procedure.offset.section,
                        offset: procedure.offset.offset,
                        len: procedure.len,
                    });
                }
            }
        }
        debug!(
            "found {} functions matching `{pattern}` in `{}`",
            functions.len(),
            self.path
        );
        Ok(functions)
    }

    fn resolve_line(
        &mut self,
        function: &FunctionSymbol,
    ) -> Result<Option<LineLocation>, SymbolResolverError> {
        let path = self.path.clone();
        let to_error = |error| SymbolResolverError::Pdb {
            pdb: path.clone(),
            error,
        };

        self.modules()?;
        // Borrow the string table separately from the module list.
        let modules = self.modules.as_deref().unwrap_or_default();
        let Some(Some(info)) = modules.get(function.module) else {
            return Ok(None);
        };
        let Some(string_table) = &self.string_table else {
            return Ok(None);
        };

        let program = info.line_program().map_err(to_error)?;
        let offset = PdbInternalSectionOffset {
            offset: function.offset,
            section: function.section,
        };
        let mut lines = program.lines_for_symbol(offset);
        let Some(line) = lines.next().map_err(to_error)? else {
            return Ok(None);
        };
        let file_info = program.get_file_info(line.file_index).map_err(to_error)?;
        let file = file_info
            .name
            .to_string_lossy(string_table)
            .map_err(to_error)?;
        Ok(Some(LineLocation {
            file: Utf8PathBuf::from(file.into_owned()),
            line: line.line_start,
        }))
    }
}
