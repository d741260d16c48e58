//! vmfs - command line client for a VMFS host
//!
//! Usage:
//!   vmfs --socket 127.0.0.1:7070 ls /
//!   vmfs --shm /dev/shm/vmfs.mbx cat /notes.txt
//!   vmfs --socket 127.0.0.1:7070 put ./local.bin /remote.bin
//!
//! Logging via RUST_LOG (e.g. RUST_LOG=vmfs=trace).

use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use vmfs::mailbox::{MessageBox, SharedMailbox, SocketMailbox};
use vmfs::{AttrMask, Attributes, Handle, ObjectType, OpenFlags, Vfs, VfsConfig};

#[derive(Parser, Debug)]
#[command(name = "vmfs")]
#[command(about = "Access the host filesystem over a VMFS mailbox")]
struct Args {
    /// Host address for the TCP mailbox
    #[arg(long, conflicts_with = "shm")]
    socket: Option<SocketAddr>,

    /// Shared-memory mailbox file
    #[arg(long)]
    shm: Option<PathBuf>,

    /// Chunk size for file transfers
    #[arg(long)]
    max_data: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List mounts
    Mounts,
    /// List a directory
    Ls { path: String },
    /// Show attributes
    Stat { path: String },
    /// Print a file to stdout
    Cat { path: String },
    /// Copy a local file to the host
    Put { local: PathBuf, remote: String },
    Mkdir { path: String },
    Rmdir { path: String },
    Rm { path: String },
    Mv { from: String, to: String },
    /// Create LINK pointing at TARGET
    Ln { target: String, link: String },
    Readlink { path: String },
}

const LIST_MASK: AttrMask = AttrMask::TYPE.union(AttrMask::SIZE).union(AttrMask::NAME);

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let mut config = VfsConfig::from_env()?;
    if let Some(max_data) = args.max_data {
        config.max_data = max_data;
    }

    if let Some(addr) = args.socket {
        info!(%addr, "connecting");
        let mailbox = SocketMailbox::connect(addr, config.max_message)
            .with_context(|| format!("connecting to {}", addr))?;
        run(&Vfs::with_config(mailbox, config)?, args.command)
    } else if let Some(path) = args.shm {
        info!(path = %path.display(), "mapping shared mailbox");
        let mailbox = SharedMailbox::open(&path, config.max_message)
            .with_context(|| format!("mapping {}", path.display()))?;
        run(&Vfs::with_config(mailbox, config)?, args.command)
    } else {
        bail!("one of --socket or --shm is required");
    }
}

fn run<M: MessageBox>(vfs: &Vfs<M>, command: Command) -> Result<()> {
    let mut out = io::stdout().lock();

    match command {
        Command::Mounts => {
            let mask = AttrMask::NAME | AttrMask::DISKSIZE | AttrMask::DISKFREE;
            for mount in vfs.mounts(mask)? {
                writeln!(
                    out,
                    "{:<20} {:>14} {:>14}",
                    mount.name.unwrap_or_default(),
                    mount.disk_size.unwrap_or(0),
                    mount.disk_free.unwrap_or(0)
                )?;
            }
        }
        Command::Ls { path } => {
            for entry in vfs.read_dir_all(&path, LIST_MASK)? {
                print_entry(&mut out, &entry)?;
            }
        }
        Command::Stat { path } => {
            let attrs = vfs.stat(&path, AttrMask::all().difference(AttrMask::NAME))?;
            writeln!(out, "{:#?}", attrs)?;
        }
        Command::Cat { path } => {
            let h = vfs.open_file(&path, OpenFlags::RDONLY)?;
            let data = with_close(vfs, h, vfs.read_to_end(h))?;
            out.write_all(&data)?;
        }
        Command::Put { local, remote } => {
            let data = std::fs::read(&local)
                .with_context(|| format!("reading {}", local.display()))?;
            let flags = OpenFlags::WRONLY | OpenFlags::CREATE | OpenFlags::TRUNCATE;
            let h = vfs.open_file(&remote, flags)?;
            let written = with_close(vfs, h, vfs.write_file(h, 0, &data))?;
            if written < data.len() {
                bail!("short write: {} of {} bytes", written, data.len());
            }
            info!(bytes = written, %remote, "uploaded");
        }
        Command::Mkdir { path } => vfs.mkdir(&path)?,
        Command::Rmdir { path } => vfs.rmdir(&path)?,
        Command::Rm { path } => vfs.remove(&path)?,
        Command::Mv { from, to } => vfs.rename(&from, &to)?,
        Command::Ln { target, link } => vfs.symlink(&target, &link)?,
        Command::Readlink { path } => writeln!(out, "{}", vfs.readlink_string(&path)?)?,
    }

    Ok(())
}

/// Close `h` after `result`, keeping the first error.
fn with_close<M: MessageBox, T>(vfs: &Vfs<M>, h: Handle, result: vmfs::Result<T>) -> Result<T> {
    let closed = vfs.close_file(h);
    let value = result?;
    closed?;
    Ok(value)
}

fn print_entry(out: &mut impl Write, entry: &Attributes) -> io::Result<()> {
    let kind = match entry.object_type {
        Some(ObjectType::Dir) => 'd',
        Some(ObjectType::Link) => 'l',
        Some(ObjectType::File) => '-',
        Some(ObjectType::Mount) => 'm',
        _ => '?',
    };
    writeln!(
        out,
        "{} {:>12} {}",
        kind,
        entry.size.unwrap_or(0),
        entry.name.as_deref().unwrap_or("")
    )
}
