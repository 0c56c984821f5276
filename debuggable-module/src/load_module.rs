// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use goblin::Hint;

use crate::linux::LinuxModule;
use crate::loader::Loader;
use crate::path::FilePath;
use crate::Module;

const DEBUG_ROOT: &str = "/usr/lib/debug";

pub trait LoadModule<'data>
where
    Self: Sized,
{
    fn load(loader: &'data Loader, exe_path: FilePath) -> Result<Self>;
}

impl<'data> LoadModule<'data> for LinuxModule<'data> {
    fn load(loader: &'data Loader, elf_path: FilePath) -> Result<Self> {
        let data = loader.load(&elf_path)?;
        let module = LinuxModule::new(elf_path, data)?;

        if module.has_embedded_debuginfo() {
            return Ok(module);
        }

        let Some(debug_path) = find_debuginfo(&module) else {
            debug!(
                "no separate debug info found for `{}`",
                module.executable_path()
            );
            return Ok(module);
        };

        debug!(
            "using separate debug info `{debug_path}` for `{}`",
            module.executable_path()
        );
        let debug_data = loader.load(&debug_path)?;

        Ok(module.with_debuginfo(debug_path, debug_data))
    }
}

impl<'data> LoadModule<'data> for Box<dyn Module<'data> + 'data> {
    fn load(loader: &'data Loader, exe_path: FilePath) -> Result<Self> {
        let exe_data = loader.load(&exe_path)?;

        let mut cursor = Cursor::new(&exe_data);
        let hint = goblin::peek(&mut cursor)?;

        let module: Box<dyn Module<'data>> = match hint {
            Hint::Elf(..) => {
                let module = LinuxModule::load(loader, exe_path)?;
                Box::new(module)
            }
            _ => {
                bail!("unsupported module file format: {:x?}", hint);
            }
        };

        Ok(module)
    }
}

// Search the places GDB looks for separate debug info: the build-ID tree, then the
// `.gnu_debuglink` name next to the executable and under the global debug directory.
fn find_debuginfo(module: &LinuxModule) -> Option<FilePath> {
    debuginfo_candidates(module)
        .into_iter()
        .find(|path| path.is_file())
        .and_then(|path| FilePath::new(path.to_string_lossy().into_owned()).ok())
}

fn debuginfo_candidates(module: &LinuxModule) -> Vec<PathBuf> {
    let mut candidates = vec![];

    if let Some(build_id) = module.build_id() {
        if build_id.len() > 2 {
            let (dir, file) = build_id.split_at(2);
            candidates.push(
                Path::new(DEBUG_ROOT)
                    .join(".build-id")
                    .join(dir)
                    .join(format!("{file}.debug")),
            );
        }
    }

    if let Some(link) = module.debug_link() {
        let exe_dir = Path::new(module.executable_path().directory());
        candidates.push(exe_dir.join(&link));
        candidates.push(exe_dir.join(".debug").join(&link));

        let relative_dir = exe_dir.strip_prefix("/").unwrap_or(exe_dir);
        candidates.push(Path::new(DEBUG_ROOT).join(relative_dir).join(&link));
    }

    candidates
        .into_iter()
        .filter(|path| path.as_path() != module.executable_path().as_path())
        .collect()
}
