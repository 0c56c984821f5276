// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Write as _;

use anyhow::{bail, Result};
use goblin::elf::{note::NT_GNU_BUILD_ID, program_header::PT_LOAD, Elf};

use crate::path::FilePath;
use crate::Module;

impl<'data> Module<'data> for LinuxModule<'data> {
    fn executable_path(&self) -> &FilePath {
        &self.path
    }

    fn debuginfo_path(&self) -> &FilePath {
        self.debuginfo
            .as_ref()
            .map(|(path, _)| path)
            .unwrap_or(&self.path)
    }

    fn debuginfo_data(&self) -> &'data [u8] {
        self.debuginfo
            .as_ref()
            .map(|(_, data)| *data)
            .unwrap_or(self.data)
    }
}

pub struct LinuxModule<'data> {
    path: FilePath,
    data: &'data [u8],
    elf: Elf<'data>,

    // Separate debug info file, when the executable is stripped.
    debuginfo: Option<(FilePath, &'data [u8])>,
}

impl<'data> LinuxModule<'data> {
    pub fn new(path: FilePath, data: &'data [u8]) -> Result<Self> {
        let elf = Elf::parse(data)?;
        check_loadable(&elf)?;

        Ok(Self {
            path,
            data,
            elf,
            debuginfo: None,
        })
    }

    /// Use the separate debug info file at `path` instead of the embedded sections.
    pub fn with_debuginfo(mut self, path: FilePath, data: &'data [u8]) -> Self {
        self.debuginfo = Some((path, data));
        self
    }

    pub fn elf(&self) -> &Elf<'data> {
        &self.elf
    }

    /// True if the executable itself carries DWARF line info.
    pub fn has_embedded_debuginfo(&self) -> bool {
        self.section_data(".debug_line").is_some() || self.section_data(".zdebug_line").is_some()
    }

    /// GNU build ID, as lowercase hex.
    pub fn build_id(&self) -> Option<String> {
        let notes = self
            .elf
            .iter_note_sections(self.data, Some(".note.gnu.build-id"))?;

        for note in notes.flatten() {
            if note.n_type == NT_GNU_BUILD_ID && !note.desc.is_empty() {
                let mut hex = String::with_capacity(2 * note.desc.len());
                for byte in note.desc {
                    let _ = write!(hex, "{byte:02x}");
                }
                return Some(hex);
            }
        }

        None
    }

    /// File name recorded in `.gnu_debuglink`.
    pub fn debug_link(&self) -> Option<String> {
        let data = self.section_data(".gnu_debuglink")?;
        let end = data.iter().position(|b| *b == 0)?;
        let name = std::str::from_utf8(&data[..end]).ok()?;

        if name.is_empty() {
            return None;
        }

        Some(name.to_owned())
    }

    fn section_data(&self, section: &str) -> Option<&'data [u8]> {
        for shdr in &self.elf.section_headers {
            if self.elf.shdr_strtab.get_at(shdr.sh_name) == Some(section) {
                let range = shdr.file_range()?;
                return self.data.get(range);
            }
        }

        None
    }
}

fn check_loadable(elf: &Elf) -> Result<()> {
    let loadable = elf
        .program_headers
        .iter()
        .any(|header| header.p_type == PT_LOAD);

    if !loadable {
        bail!("ELF file has no loadable segments");
    }

    Ok(())
}
