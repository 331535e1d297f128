// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Minimal reader for PE (Portable Executable) images.
//!
//! Only the parts needed for test discovery are read: the import directory, to find DLLs a test
//! executable depends on, and the debug directory, to find the path of its program database.

use crate::errors::PeParseError;
use camino::{Utf8Path, Utf8PathBuf};

const DOS_SIGNATURE: &[u8] = b"MZ";
const NT_SIGNATURE: &[u8] = b"PE\0\0";
const E_LFANEW_OFFSET: usize = 0x3c;
const COFF_HEADER_SIZE: usize = 20;
const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;
const SECTION_HEADER_SIZE: usize = 40;
const IMPORT_DESCRIPTOR_SIZE: usize = 20;
const DEBUG_DIRECTORY_SIZE: usize = 28;
const CODEVIEW_SIGNATURE: &[u8] = b"RSDS";
// Signature, GUID and age.
const CODEVIEW_HEADER_SIZE: usize = 4 + 16 + 4;

/// Index of the import table in the data directories.
pub const IMPORT_DIRECTORY: usize = 1;
/// Index of the debug directory in the data directories.
pub const DEBUG_DIRECTORY: usize = 6;
/// `IMAGE_DEBUG_TYPE_CODEVIEW`.
pub const DEBUG_TYPE_CODEVIEW: u32 = 2;

/// An entry of the data directory table.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DataDirectory {
    /// The relative virtual address of the table.
    pub virtual_address: u32,

    /// The size of the table in bytes.
    pub size: u32,
}

#[derive(Clone, Copy, Debug)]
struct Section {
    virtual_address: u32,
    virtual_size: u32,
    raw_size: u32,
    raw_offset: u32,
}

/// A parsed PE image.
#[derive(Clone, Debug)]
pub struct PeFile {
    data: Vec<u8>,
    data_directories: Vec<DataDirectory>,
    sections: Vec<Section>,
}

impl PeFile {
    /// Reads and parses the image at `path`.
    pub fn open(path: &Utf8Path) -> Result<Self, PeParseError> {
        let data = std::fs::read(path).map_err(|error| PeParseError::Read {
            path: path.to_owned(),
            error,
        })?;
        Self::parse(data)
    }

    /// Parses the headers of an in-memory image.
    pub fn parse(data: Vec<u8>) -> Result<Self, PeParseError> {
        if !data.starts_with(DOS_SIGNATURE) {
            return Err(PeParseError::InvalidDosHeader);
        }
        let nt_offset = read_u32(&data, E_LFANEW_OFFSET, "DOS header")? as usize;
        if bytes(&data, nt_offset, NT_SIGNATURE.len(), "NT signature")? != NT_SIGNATURE {
            return Err(PeParseError::InvalidNtSignature { offset: nt_offset });
        }

        let coff_offset = nt_offset + NT_SIGNATURE.len();
        let section_count = read_u16(&data, coff_offset + 2, "COFF header")? as usize;
        let optional_header_size = read_u16(&data, coff_offset + 16, "COFF header")? as usize;

        let optional_offset = coff_offset + COFF_HEADER_SIZE;
        let (count_offset, directories_offset) =
            match read_u16(&data, optional_offset, "optional header")? {
                PE32_MAGIC => (optional_offset + 92, optional_offset + 96),
                PE32_PLUS_MAGIC => (optional_offset + 108, optional_offset + 112),
                magic => return Err(PeParseError::UnknownOptionalHeader { magic }),
            };
        let directory_count = read_u32(&data, count_offset, "optional header")? as usize;
        let data_directories = (0..directory_count.min(16))
            .map(|index| {
                let offset = directories_offset + index * 8;
                Ok(DataDirectory {
                    virtual_address: read_u32(&data, offset, "data directory")?,
                    size: read_u32(&data, offset + 4, "data directory")?,
                })
            })
            .collect::<Result<Vec<_>, PeParseError>>()?;

        let sections_offset = optional_offset + optional_header_size;
        let sections = (0..section_count)
            .map(|index| {
                let offset = sections_offset + index * SECTION_HEADER_SIZE;
                Ok(Section {
                    virtual_size: read_u32(&data, offset + 8, "section header")?,
                    virtual_address: read_u32(&data, offset + 12, "section header")?,
                    raw_size: read_u32(&data, offset + 16, "section header")?,
                    raw_offset: read_u32(&data, offset + 20, "section header")?,
                })
            })
            .collect::<Result<Vec<_>, PeParseError>>()?;

        Ok(Self {
            data,
            data_directories,
            sections,
        })
    }

    /// Returns the data directory at `index`, if present and non-empty.
    pub fn data_directory(&self, index: usize) -> Option<DataDirectory> {
        self.data_directories
            .get(index)
            .copied()
            .filter(|dir| dir.virtual_address != 0 && dir.size != 0)
    }

    /// Translates a relative virtual address into a file offset.
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize, PeParseError> {
        self.sections
            .iter()
            .find(|section| {
                let size = section.virtual_size.max(section.raw_size);
                rva >= section.virtual_address && rva - section.virtual_address < size
            })
            .map(|section| (rva - section.virtual_address + section.raw_offset) as usize)
            .ok_or(PeParseError::UnmappedRva { rva })
    }

    /// Returns the names of the DLLs this image imports, in table order.
    pub fn imports(&self) -> Result<Vec<String>, PeParseError> {
        let Some(directory) = self.data_directory(IMPORT_DIRECTORY) else {
            return Ok(Vec::new());
        };

        let mut offset = self.rva_to_offset(directory.virtual_address)?;
        let mut imports = Vec::new();
        loop {
            let original_first_thunk = read_u32(&self.data, offset, "import descriptor")?;
            let name_rva = read_u32(&self.data, offset + 12, "import descriptor")?;
            if original_first_thunk == 0 || name_rva == 0 {
                break;
            }
            let name_offset = self.rva_to_offset(name_rva)?;
            imports.push(read_c_string(&self.data, name_offset, "import name")?);
            offset += IMPORT_DESCRIPTOR_SIZE;
        }
        Ok(imports)
    }

    /// Returns the program database path recorded in the CodeView debug entry, if any.
    pub fn pdb_path(&self) -> Result<Option<Utf8PathBuf>, PeParseError> {
        let Some(directory) = self.data_directory(DEBUG_DIRECTORY) else {
            return Ok(None);
        };

        let start = self.rva_to_offset(directory.virtual_address)?;
        let count = directory.size as usize / DEBUG_DIRECTORY_SIZE;
        for index in 0..count {
            let entry = start + index * DEBUG_DIRECTORY_SIZE;
            if read_u32(&self.data, entry + 12, "debug directory")? != DEBUG_TYPE_CODEVIEW {
                continue;
            }
            let record = read_u32(&self.data, entry + 24, "debug directory")? as usize;
            if bytes(&self.data, record, CODEVIEW_SIGNATURE.len(), "CodeView record")?
                != CODEVIEW_SIGNATURE
            {
                continue;
            }
            let path = read_c_string(&self.data, record + CODEVIEW_HEADER_SIZE, "PDB path")?;
            if !path.is_empty() {
                return Ok(Some(path.into()));
            }
        }
        Ok(None)
    }
}

fn bytes<'a>(
    data: &'a [u8],
    offset: usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], PeParseError> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or(PeParseError::Truncated { what, offset })
}

fn read_u16(data: &[u8], offset: usize, what: &'static str) -> Result<u16, PeParseError> {
    let b = bytes(data, offset, 2, what)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(data: &[u8], offset: usize, what: &'static str) -> Result<u32, PeParseError> {
    let b = bytes(data, offset, 4, what)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_c_string(data: &[u8], offset: usize, what: &'static str) -> Result<String, PeParseError> {
    let tail = data
        .get(offset..)
        .ok_or(PeParseError::Truncated { what, offset })?;
    let len = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(PeParseError::Truncated { what, offset })?;
    Ok(String::from_utf8_lossy(&tail[..len]).into_owned())
}

#[cfg(test)]
pub(crate) mod test_helpers {
    /// Builds a minimal PE32+ image with one section holding an import table and, optionally, a
    /// CodeView debug entry.
    pub(crate) fn build_pe(imports: &[&str], pdb_path: Option<&str>) -> Vec<u8> {
        const SECTION_VA: u32 = 0x1000;
        const SECTION_RAW: usize = 0x200;

        let mut section = Vec::new();
        let descriptors_len = (imports.len() + 1) * 20;
        section.resize(descriptors_len, 0);
        for (index, import) in imports.iter().enumerate() {
            let name_rva = SECTION_VA + section.len() as u32;
            section.extend_from_slice(import.as_bytes());
            section.push(0);
            let descriptor = index * 20;
            // OriginalFirstThunk: any non-zero value.
            section[descriptor..descriptor + 4].copy_from_slice(&1u32.to_le_bytes());
            section[descriptor + 12..descriptor + 16].copy_from_slice(&name_rva.to_le_bytes());
        }

        let mut debug_dir = None;
        if let Some(pdb_path) = pdb_path {
            let record_offset = SECTION_RAW + section.len() + 28;
            let entry_rva = SECTION_VA + section.len() as u32;
            let mut entry = [0u8; 28];
            entry[12..16].copy_from_slice(&2u32.to_le_bytes());
            entry[24..28].copy_from_slice(&(record_offset as u32).to_le_bytes());
            section.extend_from_slice(&entry);
            section.extend_from_slice(b"RSDS");
            section.extend_from_slice(&[0xab; 16]);
            section.extend_from_slice(&1u32.to_le_bytes());
            section.extend_from_slice(pdb_path.as_bytes());
            section.push(0);
            debug_dir = Some((entry_rva, 28u32));
        }

        let mut image = vec![0u8; SECTION_RAW];
        image[0..2].copy_from_slice(b"MZ");
        let nt = 0x40usize;
        image[0x3c..0x40].copy_from_slice(&(nt as u32).to_le_bytes());
        image[nt..nt + 4].copy_from_slice(b"PE\0\0");
        let coff = nt + 4;
        image[coff..coff + 2].copy_from_slice(&0x8664u16.to_le_bytes());
        image[coff + 2..coff + 4].copy_from_slice(&1u16.to_le_bytes());
        image[coff + 16..coff + 18].copy_from_slice(&240u16.to_le_bytes());
        let optional = coff + 20;
        image[optional..optional + 2].copy_from_slice(&0x20bu16.to_le_bytes());
        image[optional + 108..optional + 112].copy_from_slice(&16u32.to_le_bytes());
        let directories = optional + 112;
        if !imports.is_empty() {
            let import_dir = directories + 8;
            image[import_dir..import_dir + 4].copy_from_slice(&SECTION_VA.to_le_bytes());
            image[import_dir + 4..import_dir + 8]
                .copy_from_slice(&(descriptors_len as u32).to_le_bytes());
        }
        if let Some((rva, size)) = debug_dir {
            let dir = directories + 6 * 8;
            image[dir..dir + 4].copy_from_slice(&rva.to_le_bytes());
            image[dir + 4..dir + 8].copy_from_slice(&size.to_le_bytes());
        }
        let header = optional + 240;
        let section_len = section.len() as u32;
        image[header..header + 8].copy_from_slice(b".rdata\0\0");
        image[header + 8..header + 12].copy_from_slice(&section_len.to_le_bytes());
        image[header + 12..header + 16].copy_from_slice(&SECTION_VA.to_le_bytes());
        image[header + 16..header + 20].copy_from_slice(&section_len.to_le_bytes());
        image[header + 20..header + 24].copy_from_slice(&(SECTION_RAW as u32).to_le_bytes());

        image.extend_from_slice(&section);
        image
    }
}

#[cfg(test)]
mod tests {
    use super::{test_helpers::build_pe, *};
    use pretty_assertions::assert_eq;

    #[test]
    fn imports_and_pdb_path() {
        let pe = PeFile::parse(build_pe(
            &["gtest.dll", "KERNEL32.dll"],
            Some(r"C:\build\tests.pdb"),
        ))
        .expect("image is valid");
        assert_eq!(
            pe.imports().expect("imports are readable"),
            vec!["gtest.dll".to_owned(), "KERNEL32.dll".to_owned()]
        );
        assert_eq!(
            pe.pdb_path().expect("debug directory is readable"),
            Some(Utf8PathBuf::from(r"C:\build\tests.pdb"))
        );
    }

    #[test]
    fn no_directories() {
        let pe = PeFile::parse(build_pe(&[], None)).expect("image is valid");
        assert_eq!(pe.imports().expect("no imports"), Vec::<String>::new());
        assert_eq!(pe.pdb_path().expect("no debug directory"), None);
    }

    #[test]
    fn invalid_images() {
        assert!(matches!(
            PeFile::parse(b"\x7fELF".to_vec()),
            Err(PeParseError::InvalidDosHeader)
        ));
        assert!(matches!(
            PeFile::parse(b"MZ".to_vec()),
            Err(PeParseError::Truncated { .. })
        ));

        let mut image = build_pe(&[], None);
        image[0x40] = b'X';
        assert!(matches!(
            PeFile::parse(image),
            Err(PeParseError::InvalidNtSignature { offset: 0x40 })
        ));

        let mut image = build_pe(&[], None);
        image[0x58] = 0x07;
        assert!(matches!(
            PeFile::parse(image),
            Err(PeParseError::UnknownOptionalHeader { .. })
        ));
    }

    #[test]
    fn unmapped_rva() {
        let pe = PeFile::parse(build_pe(&["a.dll"], None)).expect("image is valid");
        assert!(matches!(
            pe.rva_to_offset(0x9000),
            Err(PeParseError::UnmappedRva { rva: 0x9000 })
        ));
    }
}
