//! tagcodex - inspect and edit audio file metadata
//!
//! ```bash
//! tagcodex info song.flac other.m4a
//! tagcodex tags --compact *.mp3
//! tagcodex set song.ogg -f title="New title" -f track=3/12 --cover front.jpg
//! tagcodex clear song.wma
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result as R, anyhow};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use tagcodex_lib::config::CodexConfig;
use tagcodex_lib::{Artwork, AudioFile, FieldKey, Tag};

#[derive(Parser, Debug)]
#[command(name = "tagcodex")]
#[command(about = "Read and write tags and stream properties of audio files", long_about = None)]
struct Cli {
    /// TOML file with [read] and [write] options
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print single-line JSON
    #[arg(long, global = true)]
    compact: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream properties
    Info {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Generic tag fields
    Tags {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Chunk/box/page outline
    Chunks { file: PathBuf },
    /// Set fields, keeping everything else
    Set {
        file: PathBuf,
        /// KEY=VALUE, an empty value removes the field
        #[arg(short, long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
        /// Image to store as the front cover
        #[arg(long, value_name = "IMAGE")]
        cover: Option<PathBuf>,
    },
    /// Remove every mapped field
    Clear { file: PathBuf },
}

#[derive(Serialize)]
struct FileReport<T: Serialize> {
    file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open(path: &Path, config: &CodexConfig) -> R<AudioFile> {
    let file = AudioFile::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    Ok(file.with_config(config.clone()))
}

/// Run `read` over every file in parallel, keeping input order.
fn report_all<T, F>(files: &[PathBuf], config: &CodexConfig, read: F) -> Vec<FileReport<T>>
where
    T: Serialize + Send,
    F: Fn(&AudioFile) -> tagcodex_lib::Result<T> + Sync,
{
    files
        .par_iter()
        .map(|path| {
            let outcome = open(path, config).and_then(|file| read(&file).map_err(anyhow::Error::from));
            let (result, error) = match outcome {
                Ok(value) => (Some(value), None),
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "read failed");
                    (None, Some(format!("{:#}", e)))
                }
            };
            FileReport {
                file: path.display().to_string(),
                result,
                error,
            }
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T, compact: bool) -> R<()> {
    let text = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{}", text);
    Ok(())
}

fn parse_assignment(text: &str) -> R<(FieldKey, String)> {
    let (key, value) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{}'", text))?;
    let key: FieldKey = key.parse().map_err(|e: String| anyhow!(e))?;
    if key == FieldKey::CoverArt {
        return Err(anyhow!("use --cover to set artwork"));
    }
    Ok((key, value.to_string()))
}

fn apply_edits(tag: &mut Tag, fields: &[String], cover: Option<&Path>) -> R<()> {
    for assignment in fields {
        let (key, value) = parse_assignment(assignment)?;
        if value.is_empty() {
            tag.remove(key);
        } else {
            tag.set(key, value);
        }
    }
    if let Some(path) = cover {
        let data = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
        let mime = Artwork::sniff_mime(&data);
        tag.set(FieldKey::CoverArt, Artwork::new(mime, data));
    }
    Ok(())
}

fn main() -> R<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => CodexConfig::load(path).with_context(|| format!("cannot load config {}", path.display()))?,
        None => CodexConfig::default(),
    };

    match &cli.command {
        Command::Info { files } => {
            let reports = report_all(files, &config, AudioFile::header);
            print_json(&reports, cli.compact)?;
        }
        Command::Tags { files } => {
            let reports = report_all(files, &config, AudioFile::tag);
            print_json(&reports, cli.compact)?;
        }
        Command::Chunks { file } => {
            let summary = open(file, &config)?.chunks_summary()?;
            print_json(&summary, cli.compact)?;
        }
        Command::Set { file, fields, cover } => {
            if fields.is_empty() && cover.is_none() {
                return Err(anyhow!("nothing to set, pass --field or --cover"));
            }
            let audio = open(file, &config)?;
            let mut tag = audio.tag()?;
            apply_edits(&mut tag, fields, cover.as_deref())?;
            audio.save_tag(&tag)?;
            print_json(&json!({ "file": file.display().to_string(), "tags": tag }), cli.compact)?;
        }
        Command::Clear { file } => {
            open(file, &config)?.delete_tag()?;
            tracing::debug!(file = %file.display(), "tags cleared");
        }
    }
    Ok(())
}
