use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sfs", about = "Single-file SFS volume toolkit")]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pack a host folder into a new image
    Create {
        /// Image file to create
        image: PathBuf,

        /// Folder whose contents become the volume
        folder: PathBuf,

        /// Directory names to skip while scanning (repeatable)
        #[arg(long = "ignore", value_name = "NAME")]
        ignore: Vec<String>,
    },

    /// Add a single file to an existing image
    Add {
        image: PathBuf,

        /// Host file; stored under its base name
        file: PathBuf,
    },

    /// List the entries of an image
    List { image: PathBuf },

    /// Write a file's contents to stdout
    Cat {
        image: PathBuf,

        /// Path inside the image
        path: String,
    },

    /// Grow an image to a new size (e.g. "8M")
    Resize {
        image: PathBuf,

        /// New total size, with optional K/M/G suffix
        size: String,
    },

    /// Truncate the unused tail of an image
    Shrink { image: PathBuf },

    /// Compact file extents and rewrite the index
    Defrag { image: PathBuf },
}
