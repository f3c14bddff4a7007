#![forbid(unsafe_code)]

mod shell;

use anyhow::{Context, Result, bail};
use cfs::{
    ByteBlockDevice, CfsError, DEFAULT_BLOCK_SIZE, DEFAULT_CAPACITY, DiskCatalog, DiskStats,
    FileByteDevice, FileLoader, Geometry, StoreConfig,
};
use serde::Serialize;
use shell::{Flow, Shell};
use std::env;
use std::io::{self, BufRead, IsTerminal, Write};

#[derive(Debug, Serialize)]
struct StatOutput<'a> {
    name: &'a str,
    #[serde(flatten)]
    stats: DiskStats,
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        let code = error
            .downcast_ref::<CfsError>()
            .map_or(1, CfsError::to_errno);
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1).peekable();
    let mut config = StoreConfig::default();
    if args.peek().is_some_and(|arg| arg == "--root") {
        args.next();
        let Some(root) = args.next() else {
            bail!("--root requires a directory argument");
        };
        config = StoreConfig::new(root);
    }

    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };
    let catalog = DiskCatalog::new(config);

    match command.as_str() {
        "createdisk" => {
            let Some(name) = args.next() else {
                bail!("createdisk requires <name> [capacity] [block-size]");
            };
            let capacity = parse_u32(args.next(), DEFAULT_CAPACITY, "capacity")?;
            let block_size = parse_u32(args.next(), DEFAULT_BLOCK_SIZE, "block size")?;
            createdisk(&catalog, &name, capacity, block_size)
        }
        "deletedisk" => {
            let Some(name) = args.next() else {
                bail!("deletedisk requires <name>");
            };
            catalog
                .delete_disk(&name)
                .with_context(|| format!("failed to delete disk {name}"))?;
            println!("Disk {name} was deleted");
            Ok(())
        }
        "showdisks" => {
            let json = args.any(|arg| arg == "--json");
            showdisks(&catalog, json)
        }
        "stat" => {
            let Some(name) = args.next() else {
                bail!("stat requires <name>");
            };
            let json = args.any(|arg| arg == "--json");
            stat(&catalog, &name, json)
        }
        "shell" => {
            let Some(name) = args.next() else {
                bail!("shell requires <name>");
            };
            shell_cmd(&catalog, &name)
        }
        "run" => {
            let Some(name) = args.next() else {
                bail!("run requires <name> <command...>");
            };
            let line = args.collect::<Vec<_>>().join(" ");
            if line.trim().is_empty() {
                bail!("run requires a command after the disk name");
            }
            run_one(&catalog, &name, &line)
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("cfs\n");
    println!("USAGE:");
    println!("  cfs [--root <dir>] createdisk <name> [capacity] [block-size]");
    println!("  cfs [--root <dir>] deletedisk <name>");
    println!("  cfs [--root <dir>] showdisks [--json]");
    println!("  cfs [--root <dir>] stat <name> [--json]");
    println!("  cfs [--root <dir>] shell <name>");
    println!("  cfs [--root <dir>] run <name> <command...>");
    println!();
    println!("Disk images live in <root>/DiskUnits, loadable files in <root>/Files.");
}

fn parse_u32(arg: Option<String>, default: u32, what: &str) -> Result<u32> {
    match arg {
        None => Ok(default),
        Some(text) => text
            .parse()
            .with_context(|| format!("{what} must be a positive integer, got {text:?}")),
    }
}

fn createdisk(catalog: &DiskCatalog, name: &str, capacity: u32, block_size: u32) -> Result<()> {
    let geometry = Geometry::new(capacity, block_size)
        .map_err(|e| CfsError::InvalidGeometry(e.to_string()))
        .with_context(|| format!("disk parameters capacity={capacity} block_size={block_size}"))?;
    catalog
        .create_disk(name, geometry)
        .with_context(|| format!("failed to create disk {name}"))?;
    println!("Disk {name} was created");
    Ok(())
}

fn showdisks(catalog: &DiskCatalog, json: bool) -> Result<()> {
    let summaries = catalog.show_disks().context("failed to read the disk registry")?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summaries).context("serialize output")?
        );
    } else if summaries.is_empty() {
        println!("No disks registered");
    } else {
        for summary in &summaries {
            println!("{summary}");
        }
    }
    Ok(())
}

fn stat(catalog: &DiskCatalog, name: &str, json: bool) -> Result<()> {
    let (disk, _) = catalog
        .mount_disk(name)
        .with_context(|| format!("failed to mount disk {name}"))?;
    let stats = disk.stats().context("failed to walk the free list")?;
    disk.unmount().context("failed to unmount")?;

    if json {
        let output = StatOutput { name, stats };
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
    } else {
        println!("disk: {name}");
        println!("capacity: {}", stats.capacity);
        println!("block_size: {}", stats.block_size);
        println!("inode_count: {}", stats.inode_count);
        println!("first_data_block: {}", stats.first_data_block);
        println!("free_blocks: {}", stats.free_blocks);
        println!("free_inodes: {}", stats.free_inodes);
    }
    Ok(())
}

fn open_shell(catalog: &DiskCatalog, name: &str) -> Result<Shell<ByteBlockDevice<FileByteDevice>>> {
    let (disk, session) = catalog
        .mount_disk(name)
        .with_context(|| format!("failed to mount disk {name}"))?;
    let loader = FileLoader::new(catalog.config().clone());
    Ok(Shell::new(disk, session, loader))
}

/// Interactive loop. Recoverable errors are reported and the loop goes on;
/// an I/O or corruption error ends the session without unmounting.
fn shell_cmd(catalog: &DiskCatalog, name: &str) -> Result<()> {
    let mut sh = open_shell(catalog, name)?;
    let stdin = io::stdin();
    let interactive = stdin.is_terminal();
    let mut stdout = io::stdout();

    loop {
        if interactive {
            print!("{}", sh.prompt());
            stdout.flush().context("flush prompt")?;
        }
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).context("read command")? == 0 {
            break;
        }
        match sh.execute(&line, &mut stdout) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit) => break,
            Err(err) if err.is_fatal() => {
                return Err(err.into_report())
                    .with_context(|| format!("disk {name} is no longer usable"));
            }
            Err(err) => eprintln!("error: {err}"),
        }
    }

    sh.into_disk().unmount().context("failed to unmount")?;
    println!("Disk has been unmounted");
    Ok(())
}

fn run_one(catalog: &DiskCatalog, name: &str, line: &str) -> Result<()> {
    let mut sh = open_shell(catalog, name)?;
    let mut stdout = io::stdout();
    let outcome = sh
        .execute(line, &mut stdout)
        .map(|_| ())
        .map_err(|err| (err.is_fatal(), err.into_report()));
    if let Err((true, err)) = outcome {
        return Err(err).with_context(|| format!("disk {name} is no longer usable"));
    }
    sh.into_disk().unmount().context("failed to unmount")?;
    outcome
        .map_err(|(_, err)| err)
        .with_context(|| format!("{line:?} failed"))
}
