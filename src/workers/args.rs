//! Command-line argument parsing and configuration.
//!
//! Supports:
//! - CLI arguments via clap
//! - TOML configuration file (`framedrop.toml`, or `--config <PATH>`)
//! - Merging CLI with file config (CLI takes precedence)

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use framedrop::core::config::DEFAULT_CHUNK_SIZE;
use framedrop::core::protocol::Encoding;
use framedrop::core::sender::TransferOptions;

const DEFAULT_CONFIG_FILE: &str = "framedrop.toml";
const DEFAULT_PARENT_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_FRAME_URL: &str = "http://localhost:3001/iframe.html";
const DEFAULT_OUT_DIR: &str = "framedrop-uploads";

/// framedrop - hand a file to a cross-origin frame in chunks.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about)]
#[command(propagate_version = true)]
pub struct Args {
    /// Verbosity level (-v, -vv, -vvv).
    #[clap(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file. Defaults to ./framedrop.toml when present.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Transfer a file through an in-process frame and store the upload.
    Send(SendArgs),
    /// Print the address a host page embeds for the frame.
    FrameUrl {
        /// Address of the frame page.
        #[clap(long)]
        frame_url: Option<String>,
        /// Origin of the host page.
        #[clap(long)]
        parent_origin: Option<String>,
    },
}

#[derive(clap::Args, Clone, Debug)]
pub struct SendArgs {
    /// File to transfer.
    pub file: PathBuf,

    /// Correlation id echoed by the frame. A random UUID when omitted.
    #[clap(long)]
    pub orbit_file_id: Option<String>,

    /// Entity data as a JSON object, e.g. '{"caseId":17}'.
    #[clap(long)]
    pub entity_data: Option<String>,

    /// Chunk size in bytes.
    #[clap(long)]
    pub chunk_size: Option<usize>,

    /// Delay after each chunk, in milliseconds.
    #[clap(long)]
    pub throttle_ms: Option<u64>,

    /// Chunk encoding: base64, text or buffer.
    #[clap(long)]
    pub encoding: Option<Encoding>,

    /// Directory the frame's backend stores uploads in.
    #[clap(long)]
    pub out_dir: Option<PathBuf>,

    /// Origin the host page is served from.
    #[clap(long)]
    pub parent_origin: Option<String>,

    /// Address of the frame page.
    #[clap(long)]
    pub frame_url: Option<String>,
}

/// Settings read from the TOML file. Every key is optional.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct FileConfig {
    pub verbose: Option<u8>,
    pub chunk_size: Option<usize>,
    pub throttle_ms: Option<u64>,
    pub encoding: Option<Encoding>,
    pub out_dir: Option<PathBuf>,
    pub parent_origin: Option<String>,
    pub frame_url: Option<String>,
}

/// Fully resolved `send` settings.
#[derive(Clone, Debug, PartialEq)]
pub struct SendSettings {
    pub file: PathBuf,
    pub orbit_file_id: Option<String>,
    pub entity_data: Option<String>,
    pub options: TransferOptions,
    pub out_dir: PathBuf,
    pub parent_origin: String,
    pub frame_url: String,
}

impl Args {
    /// Load Args from CLI + TOML file (if it exists).
    /// CLI values override those from the file.
    ///
    /// An unreadable config file is skipped; the error is handed back so it
    /// can be logged once tracing is up.
    pub fn load() -> (Self, FileConfig, Option<anyhow::Error>) {
        let mut args = Args::parse();
        let path = args
            .config
            .clone()
            .map(Self::resolve_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let (file, skipped) = match Self::from_file(&path) {
            Ok(file) => (file.unwrap_or_default(), None),
            Err(e) => (FileConfig::default(), Some(e)),
        };
        if args.verbose == 0 {
            args.verbose = file.verbose.unwrap_or(0);
        }
        (args, file, skipped)
    }

    /// Resolve a potentially relative path to an absolute one.
    fn resolve_path(p: PathBuf) -> PathBuf {
        if p.is_absolute() {
            p
        } else {
            std::env::current_dir().unwrap_or_default().join(p)
        }
    }

    /// Load settings from a TOML file. `Ok(None)` when there is no file.
    fn from_file(path: &Path) -> anyhow::Result<Option<FileConfig>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config = toml::from_str::<FileConfig>(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(config))
    }
}

impl SendArgs {
    /// Merge file settings with CLI args (CLI takes precedence).
    pub fn merge(self, file: &FileConfig) -> SendSettings {
        let defaults = TransferOptions::default();
        let throttle_ms = self.throttle_ms.or(file.throttle_ms);
        SendSettings {
            file: self.file,
            orbit_file_id: self.orbit_file_id,
            entity_data: self.entity_data,
            options: TransferOptions {
                chunk_size: self.chunk_size.or(file.chunk_size).unwrap_or(DEFAULT_CHUNK_SIZE),
                throttle: throttle_ms.map(Duration::from_millis).unwrap_or(defaults.throttle),
                encoding: self.encoding.or(file.encoding).unwrap_or_default(),
                handshake_timeout: defaults.handshake_timeout,
            },
            out_dir: self
                .out_dir
                .or_else(|| file.out_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR)),
            parent_origin: self
                .parent_origin
                .or_else(|| file.parent_origin.clone())
                .unwrap_or_else(|| DEFAULT_PARENT_ORIGIN.to_string()),
            frame_url: self
                .frame_url
                .or_else(|| file.frame_url.clone())
                .unwrap_or_else(|| DEFAULT_FRAME_URL.to_string()),
        }
    }
}

/// Resolve `frame-url` arguments against the file settings.
pub fn frame_url_settings(
    frame_url: Option<String>,
    parent_origin: Option<String>,
    file: &FileConfig,
) -> (String, String) {
    (
        frame_url
            .or_else(|| file.frame_url.clone())
            .unwrap_or_else(|| DEFAULT_FRAME_URL.to_string()),
        parent_origin
            .or_else(|| file.parent_origin.clone())
            .unwrap_or_else(|| DEFAULT_PARENT_ORIGIN.to_string()),
    )
}
