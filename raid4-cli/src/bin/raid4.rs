// vim: tw=80
//! A thin command-line front end over `raid4-core`, exercising the RAID4
//! streaming layout engine end to end against a POSIX directory tree: put,
//! get (optionally in degraded mode, dropping one of the three extents per
//! split), and delete.
//!
//! This binary plays the part the LRS/DSS normally play for the real
//! `phobos` tool: it answers the Data Processor's allocation requests
//! itself, handing out three subdirectories of `--root` as the three media
//! of every split, and it persists the resulting `Layout` as a JSON sidecar
//! file next to the object so a later `get`/`delete` invocation can look it
//! back up. A real deployment would ask the LRS and look the layout up in
//! the DSS instead; those are out of this crate's scope (`spec.md` §1).

use std::{
    fs::File,
    path::{Path, PathBuf},
    process::exit,
};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use raid4_core::{
    config::Config,
    error::{Error, Result},
    io_adapter::{posix::PosixAdapter, MapperKind},
    processor::{
        DeleteAllocResponse, EraseProcessor, MediumGrant, ReadAllocResponse, ReadProcessor,
        Request, Response, WriteAllocResponse, WriteProcessor,
    },
    types::{Layout, PhoId},
};

#[derive(Parser)]
#[command(name = "raid4", about = "Exercise the RAID4 streaming layout engine against a directory tree")]
struct Cli {
    /// Directory holding the three media subdirectories and layout manifests.
    #[arg(long, global = true, default_value = "./raid4-data")]
    root: PathBuf,

    /// Chunk size in bytes for new writes.
    #[arg(long, global = true, default_value_t = 65536)]
    chunk_size: usize,

    /// Optional TOML config file (`layout_raid4.*` keys).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encode a file into a new RAID4-layout object.
    Put { object_id: String, input: PathBuf },
    /// Decode an object back to a file.
    Get {
        object_id: String,
        output: PathBuf,
        /// Simulate the loss of one extent per split: data0, data1, or parity.
        #[arg(long)]
        missing: Option<String>,
    },
    /// Delete every extent of an object.
    Delete { object_id: String },
}

/// What gets persisted alongside the three media directories: enough to
/// reopen the object later without a real DSS.
#[derive(Serialize, Deserialize)]
struct Manifest {
    object_id: String,
    size: u64,
    layout: Layout,
}

impl Manifest {
    fn path(root: &Path, object_id: &str) -> PathBuf {
        root.join(format!("{object_id}.manifest.json"))
    }

    fn load(root: &Path, object_id: &str) -> Result<Self> {
        let text = std::fs::read_to_string(Self::path(root, object_id))
            .map_err(|e| Error::not_found(format!("no manifest for {object_id}: {e}")))?;
        serde_json::from_str(&text).map_err(|e| Error::invalid_input(format!("corrupt manifest: {e}")))
    }

    fn save(&self, root: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(|e| Error::invalid_input(e.to_string()))?;
        std::fs::write(Self::path(root, &self.object_id), text)?;
        Ok(())
    }
}

/// Three media subdirectories of `root`, always granted together as one
/// split's (data-0, data-1, parity) triple.
fn media_roots(root: &Path) -> [(PhoId, PathBuf); 3] {
    ["m0", "m1", "m2"].map(|name| {
        let medium = PhoId::new("dir", name, "local");
        (medium, root.join(name))
    })
}

fn fs_root_for(root: &Path, medium: &PhoId) -> PathBuf {
    root.join(&medium.name)
}

fn run_put(root: &Path, chunk_size: usize, config: &Config, object_id: &str, input: &Path) -> Result<()> {
    let size = std::fs::metadata(input)?.len();
    let source = Box::new(File::open(input)?);
    let adapter = PosixAdapter::new(MapperKind::Clean);
    let mut proc = WriteProcessor::new(
        adapter,
        object_id,
        size,
        chunk_size,
        config.layout_raid4.into(),
        "dir",
        Vec::new(),
        source,
    );

    let roots = media_roots(root);
    let mut next_response: Option<Response> = None;
    loop {
        let (reqs, done) = proc.step(next_response.take())?;
        if done {
            break;
        }
        for req in reqs {
            match req {
                Request::WriteAlloc(r) => {
                    let mut media = Vec::with_capacity(roots.len());
                    for (medium, path) in &roots {
                        std::fs::create_dir_all(path)?;
                        media.push(MediumGrant {
                            medium: medium.clone(),
                            fs_root: path.display().to_string(),
                            avail_size: r.size.max(1),
                        });
                    }
                    proc.on_write_alloc_response(WriteAllocResponse { media })?;
                }
                Request::Release(r) => {
                    let (more, release_done) =
                        proc.step(Some(Response::Release(raid4_core::processor::ReleaseResponse {
                            medium: r.medium,
                            rc: r.rc,
                        })))?;
                    debug_assert!(more.is_empty());
                    if release_done {
                        let manifest = Manifest { object_id: object_id.to_string(), size, layout: proc.layout().clone() };
                        manifest.save(root)?;
                        return Ok(());
                    }
                }
                _ => unreachable!("write processor only emits WriteAlloc/Release"),
            }
        }
    }
    let manifest = Manifest { object_id: object_id.to_string(), size, layout: proc.layout().clone() };
    manifest.save(root)?;
    Ok(())
}

fn run_get(root: &Path, config: &Config, object_id: &str, output: &Path, missing: Option<&str>) -> Result<()> {
    let manifest = Manifest::load(root, object_id)?;
    let n_splits = manifest.layout.n_splits();
    let present: Vec<[u32; 2]> = (0..n_splits)
        .map(|k| {
            let base = (k * 3) as u32;
            match missing {
                Some("data0") => [base + 1, base + 2],
                Some("data1") => [base, base + 2],
                Some("parity") => [base, base + 1],
                _ => [base, base + 1],
            }
        })
        .collect();

    let dest = Box::new(File::create(output)?);
    let adapter = PosixAdapter::new(MapperKind::Clean);
    let mut proc = ReadProcessor::new(adapter, manifest.layout.clone(), present, config.layout_raid4.check_hash, dest);

    let mut next_response: Option<Response> = None;
    loop {
        let (reqs, done) = proc.step(next_response.take())?;
        if done {
            return Ok(());
        }
        for req in reqs {
            match req {
                Request::ReadAlloc(r) => {
                    let extents = r
                        .media_id
                        .iter()
                        .map(|medium| raid4_core::processor::ExtentLease {
                            medium: medium.clone(),
                            fs_root: fs_root_for(root, medium).display().to_string(),
                        })
                        .collect();
                    proc.on_read_alloc_response(ReadAllocResponse { extents })?;
                }
                _ => unreachable!("read processor only emits ReadAlloc"),
            }
        }
        next_response = None;
    }
}

fn run_delete(root: &Path, object_id: &str) -> Result<()> {
    let manifest = Manifest::load(root, object_id)?;
    let adapter = PosixAdapter::new(MapperKind::Clean);
    let mut proc = EraseProcessor::new(adapter, manifest.layout.clone());

    loop {
        let (reqs, done) = proc.step(None)?;
        if done {
            break;
        }
        for req in reqs {
            match req {
                Request::DeleteAlloc(r) => {
                    let fs_root = r.media_id.iter().map(|m| fs_root_for(root, m).display().to_string()).collect();
                    proc.on_delete_alloc_response(DeleteAllocResponse { fs_root })?;
                }
                _ => unreachable!("erase processor only emits DeleteAlloc"),
            }
        }
    }
    std::fs::remove_file(Manifest::path(root, object_id)).ok();
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    };
    let config = match config {
        Ok(c) => c,
        Err(e) => {
            eprintln!("raid4: {e}");
            exit(1);
        }
    };

    let result = match &cli.command {
        Command::Put { object_id, input } => run_put(&cli.root, cli.chunk_size, &config, object_id, input),
        Command::Get { object_id, output, missing } => {
            run_get(&cli.root, &config, object_id, output, missing.as_deref())
        }
        Command::Delete { object_id } => run_delete(&cli.root, object_id),
    };

    if let Err(e) = result {
        eprintln!("raid4: {e}");
        exit(1);
    }
}
