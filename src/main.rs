use anyhow::{anyhow, Context, Result};
use blocksync::cluster::LocalCluster;
use blocksync::config::ClusterConfig;
use blocksync::{dbpath, logging, util, SyncClient};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "blocksync")]
#[command(version, about = "Content-addressed file synchronization over sharded block stores")]
struct Cli {
    /// Data directory name (no slashes) or path to a data directory.
    ///
    /// If it contains no path separators, it is treated as a name and placed under
    /// the default blocksync data directory (platform-specific).
    #[arg(long, default_value = "default")]
    data: String,

    /// Cluster config file (B / metadata / blockN lines). Defaults to one shard.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase logging verbosity (use together with RUST_LOG for fine control).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload files; directories are walked and files named by relative path
    Upload {
        /// One or more files or directories
        paths: Vec<PathBuf>,
    },

    /// Download the current version of a file into a directory
    Download {
        filename: String,
        /// Existing destination directory
        dest: PathBuf,
    },

    /// Delete a file (records a tombstone)
    Delete { filename: String },

    /// List catalog entries
    Ls,

    /// Print data directory and shard usage
    Info,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let data_dir = dbpath::resolve_data_dir(&cli.data)
        .with_context(|| format!("Failed to resolve --data {}", cli.data))?;

    let config = match &cli.config {
        Some(path) => ClusterConfig::load(path)?,
        None => ClusterConfig::single_node(),
    };

    let cluster = LocalCluster::open(&data_dir, config)?;

    match cli.cmd {
        Command::Upload { paths } => {
            if paths.is_empty() {
                return Err(anyhow!("upload requires at least one path"));
            }
            let client = cluster.client()?;
            for p in &paths {
                upload_path(&client, p)?;
            }
            Ok(())
        }

        Command::Download { filename, dest } => {
            let client = cluster.client()?;
            let path = client.download(&filename, &dest)?;
            println!("{}", path.display());
            Ok(())
        }

        Command::Delete { filename } => {
            let client = cluster.client()?;
            let version = client.delete(&filename)?;
            println!("deleted {filename} (version {version})");
            Ok(())
        }

        Command::Ls => {
            for (name, f) in cluster.metadata().list_files() {
                if f.tombstoned {
                    println!("v{:<5} {:>7}  {}  (deleted)", f.version, "-", name);
                } else {
                    println!("v{:<5} {:>7}  {}", f.version, f.hashlist.len(), name);
                }
            }
            Ok(())
        }

        Command::Info => {
            let cfg = cluster.config();
            println!("Data directory: {}", cluster.path().display());
            println!("Metadata:       {}", cfg.metadata);
            println!("Placement:      {}", cfg.placement);
            println!("Chunk size:     {}", util::format_size(cfg.chunk_size as u64));
            println!("Attempt budget: {}", cfg.max_attempts);
            for (idx, st) in cluster.shard_stats()?.iter().enumerate() {
                println!(
                    "  shard {idx} ({}): {} blocks, {}",
                    cfg.shards[idx],
                    st.blocks,
                    util::format_size(st.bytes)
                );
            }
            Ok(())
        }
    }
}

fn upload_path(client: &SyncClient, path: &Path) -> Result<()> {
    let md = std::fs::metadata(path).with_context(|| format!("metadata {}", path.display()))?;

    if md.is_file() {
        let r = client.upload(path)?;
        print_upload(&r);
        return Ok(());
    }

    if !md.is_dir() {
        return Err(anyhow!("{} is neither a file nor a directory", path.display()));
    }

    for entry in walkdir::WalkDir::new(path).follow_links(false) {
        let entry = entry.with_context(|| format!("walk {}", path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(path)
            .with_context(|| format!("relative path of {}", entry.path().display()))?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let r = client.upload_as(&name, entry.path())?;
        print_upload(&r);
    }
    Ok(())
}

fn print_upload(r: &blocksync::UploadReport) {
    println!(
        "{} v{} {} ({} blocks, {} pushed)",
        r.filename,
        r.version,
        util::format_size(r.size),
        r.blocks,
        r.blocks_pushed
    );
}
