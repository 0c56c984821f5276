// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::Result;
use clap::Parser;

use debuggable_module::{
    lines::{self, ResolveOptions},
    load_module::LoadModule,
    loader::Loader,
    path::{FilePath, PathSubstitution, PathSubstitutions},
    Module,
};

/// Print the source line table of a module.
#[derive(Parser, Debug)]
struct Args {
    #[arg(short, long)]
    module: String,

    /// Only print files whose path contains this string.
    #[arg(short, long)]
    file: Option<String>,

    /// Also resolve inlined functions.
    #[arg(long)]
    inlinees: bool,

    /// `<build prefix>?<local prefix>`
    #[arg(long)]
    substitute_source_path: Vec<PathSubstitution>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let loader = Loader::new();
    let path = FilePath::new(&args.module)?;
    let module = Box::<dyn Module>::load(&loader, path)?;

    let options = ResolveOptions {
        substitutions: PathSubstitutions::new(args.substitute_source_path),
        inlinees: args.inlinees,
    };
    let lines = lines::resolve(&*module, &options)?;

    println!("debug info: {}", module.debuginfo_path());

    for (file, table) in lines.files() {
        if let Some(filter) = &args.file {
            if !file.as_str().contains(filter.as_str()) {
                continue;
            }
        }

        println!("{file}");

        for (line, ranges) in table {
            let ranges: Vec<_> = ranges
                .iter()
                .map(|range| format!("{:x}..{:x}", range.start, range.end))
                .collect();

            println!("    {line:>6}: {}", ranges.join(", "));
        }
    }

    Ok(())
}
