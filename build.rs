//! Build script that renders the `mist.1` manual page.
//!
//! The page lands in `OUT_DIR` so packaging can pick it up alongside the
//! worker binary.

use std::env;
use std::io::Write;

use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

const MANUAL_NAME: &str = "mist.1";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var("OUT_DIR").map(Utf8PathBuf::from)?;
    let dir = Dir::open_ambient_dir(&out_dir, ambient_authority())?;

    let mut manual = Vec::new();
    Man::new(Cli::command()).render(&mut manual)?;
    dir.write(MANUAL_NAME, &manual)?;

    Ok(())
}
