use std::io::Write;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sfs::cli::{Cli, Command};
use sfs::error::SfsError;
use sfs::volume::{NodeKind, Volume};
use sfs::{import, util};

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
            .add_directive("sfs=info".parse().expect("valid log directive"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Create {
            image,
            folder,
            ignore,
        } => {
            import::pack_folder(&image, &folder, &ignore)?;
        }
        Command::Add { image, file } => {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| SfsError::NotFound {
                    path: file.display().to_string(),
                })?
                .to_string();
            let mut vol = Volume::open(&image)?;
            import::add_file(&mut vol, &file, &name)?;
            println!("Added {name}");
        }
        Command::List { image } => {
            let vol = Volume::open(&image)?;
            if let Some(label) = vol.label() {
                println!("Volume: {label}");
            }
            println!("{:<6} {:<10} {}", "Type", "Size", "Name");
            println!("{}", "-".repeat(60));
            for path in vol.all_paths() {
                let st = vol.stat(&path)?;
                match st.kind {
                    NodeKind::Dir => println!("{:<6} {:<10} {path}", "DIR", "-"),
                    NodeKind::File => println!("{:<6} {:<10} {path}", "FILE", st.length),
                }
            }
        }
        Command::Cat { image, path } => {
            let mut vol = Volume::open(&image)?;
            let st = vol.stat(&path)?;
            let bytes = vol.read(&path, 0, st.length as usize)?;
            std::io::stdout()
                .write_all(&bytes)
                .map_err(|e| SfsError::Io {
                    context: "writing to stdout".into(),
                    source: e,
                })?;
        }
        Command::Resize { image, size } => {
            let bytes = util::parse_size(&size)?;
            let mut vol = Volume::open(&image)?;
            vol.resize(bytes)?;
            println!("Resized to {} blocks", vol.superblock.total_blocks);
        }
        Command::Shrink { image } => {
            let mut vol = Volume::open(&image)?;
            vol.shrink_to_fit()?;
            println!("Shrunk to {} blocks", vol.superblock.total_blocks);
        }
        Command::Defrag { image } => {
            let mut vol = Volume::open(&image)?;
            vol.defrag()?;
            println!("Defragmentation complete");
        }
    }

    Ok(())
}
