//! Command-line interface for the osmerge toolkit.
//!
//! Two subcommands: `info` summarises a PBF extract, `merge` runs the
//! non-interactive full merge of a patch file into a base file and writes
//! the result as PBF.

#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::info;
use osmerge_core::Osm;
use osmerge_merge::{DEFAULT_CANDIDATE_RADIUS_M, Merge, MergeError, MergeOptions};
use osmerge_pbf::PbfError;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced to the terminal.
#[derive(Debug, Error)]
pub enum CliError {
    /// A source or destination file could not be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        /// The offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A PBF file could not be decoded.
    #[error("failed to decode {path}: {source}")]
    Decode {
        /// The offending path.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: PbfError,
    },
    /// The merge workflow failed.
    #[error("merge failed: {source}")]
    Merge {
        /// Engine error.
        #[from]
        source: MergeError,
    },
    /// The merged result could not be written.
    #[error("failed to write {path}: {source}")]
    Write {
        /// The offending path.
        path: PathBuf,
        /// Encoder error.
        #[source]
        source: PbfError,
    },
    /// The JSON summary could not be rendered.
    #[error("failed to render summary: {source}")]
    Render {
        /// Serialiser error.
        #[from]
        source: serde_json::Error,
    },
}

#[derive(Debug, Parser)]
#[command(
    name = "osmerge",
    about = "Inspect and merge OpenStreetMap PBF extracts",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Summarise the contents of a PBF extract.
    Info(InfoArgs),
    /// Merge a patch extract into a base extract and write the result.
    Merge(MergeArgs),
}

#[derive(Debug, Parser)]
struct InfoArgs {
    /// Path to the PBF file.
    file: PathBuf,
    /// Emit the summary as JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct MergeArgs {
    /// Path to the base PBF file.
    base: PathBuf,
    /// Path to the patch PBF file.
    patch: PathBuf,
    /// Destination path for the merged PBF.
    #[arg(long, short)]
    output: PathBuf,
    /// Candidate search radius in metres.
    #[arg(long, default_value_t = DEFAULT_CANDIDATE_RADIUS_M)]
    radius: f64,
    /// Also remove base entities that are absent from the patch.
    #[arg(long)]
    classify_deletions: bool,
}

/// Run the CLI with the current process arguments.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Info(args) => {
            let summary = run_info(&args)?;
            println!("{summary}");
        }
        Command::Merge(args) => run_merge(&args)?,
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct FileSummary {
    nodes: usize,
    ways: usize,
    relations: usize,
    /// `[min lon, min lat, max lon, max lat]`.
    bbox: Option<[f64; 4]>,
    required_features: Vec<String>,
    writing_program: Option<String>,
}

impl FileSummary {
    fn from_store(osm: &Osm) -> Self {
        Self {
            nodes: osm.nodes().len(),
            ways: osm.ways().len(),
            relations: osm.relations().len(),
            bbox: osm
                .bbox()
                .map(|bbox| [bbox.left, bbox.bottom, bbox.right, bbox.top]),
            required_features: osm.header.required_features.clone(),
            writing_program: osm.header.writing_program.clone(),
        }
    }

    fn render_text(&self) -> String {
        let mut lines = vec![
            format!("nodes:     {}", self.nodes),
            format!("ways:      {}", self.ways),
            format!("relations: {}", self.relations),
        ];
        if let Some([left, bottom, right, top]) = self.bbox {
            lines.push(format!("bbox:      {left:.7},{bottom:.7},{right:.7},{top:.7}"));
        }
        if !self.required_features.is_empty() {
            lines.push(format!("features:  {}", self.required_features.join(", ")));
        }
        if let Some(program) = &self.writing_program {
            lines.push(format!("written by {program}"));
        }
        lines.join("\n")
    }
}

fn load_store(path: &Path) -> Result<Osm, CliError> {
    let file = File::open(path).map_err(|source| CliError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    osmerge_pbf::read_osm(BufReader::new(file)).map_err(|source| CliError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

fn run_info(args: &InfoArgs) -> Result<String, CliError> {
    let osm = load_store(&args.file)?;
    let summary = FileSummary::from_store(&osm);
    if args.json {
        Ok(serde_json::to_string_pretty(&summary)?)
    } else {
        Ok(summary.render_text())
    }
}

fn run_merge(args: &MergeArgs) -> Result<(), CliError> {
    let base = load_store(&args.base)?;
    let patch = load_store(&args.patch)?;
    info!(
        "merging {} ({} nodes) into {} ({} nodes)",
        args.patch.display(),
        patch.nodes().len(),
        args.base.display(),
        base.nodes().len(),
    );

    let options = MergeOptions {
        candidate_radius_m: args.radius,
        classify_deletions: args.classify_deletions,
    };
    let mut merge = Merge::new(base, patch, options)?;
    let applied = merge.run_full_merge()?;
    info!("applied {applied} changes");

    let merged = merge.into_base();
    let output = File::create(&args.output).map_err(|source| CliError::Open {
        path: args.output.clone(),
        source,
    })?;
    osmerge_pbf::write_osm(&merged, BufWriter::new(output)).map_err(|source| {
        CliError::Write {
            path: args.output.clone(),
            source,
        }
    })?;
    info!("wrote merged extract to {}", args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use osmerge_core::{Node, Tags, Way};
    use rstest::rstest;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn write_pbf(dir: &TempDir, name: &str, osm: &Osm) -> PathBuf {
        let path = dir.path().join(name);
        let bytes = osmerge_pbf::to_bytes(osm).expect("encode");
        let mut file = File::create(&path).expect("create file");
        file.write_all(&bytes).expect("write file");
        path
    }

    fn sample_store(way_tag: &str, extra_way: bool) -> Osm {
        let mut osm = Osm::new();
        osm.add_node(&Node::new(1, 13.0, 52.0)).expect("add node");
        osm.add_node(&Node::new(2, 13.001, 52.0)).expect("add node");
        osm.add_way(&Way {
            tags: Tags::from([("key".to_owned(), way_tag.to_owned())]),
            ..Way::new(1, vec![1, 2])
        })
        .expect("add way");
        if extra_way {
            osm.add_way(&Way::new(2, vec![2, 1])).expect("add way");
        }
        osm.finish().expect("finish");
        osm
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn info_summarises_an_extract(#[case] json: bool) {
        let dir = TempDir::new().expect("temp dir");
        let path = write_pbf(&dir, "extract.osm.pbf", &sample_store("value", false));

        let summary = run_info(&InfoArgs { file: path, json }).expect("info");
        if json {
            let parsed: serde_json::Value = serde_json::from_str(&summary).expect("valid json");
            assert_eq!(parsed["nodes"], 2);
            assert_eq!(parsed["ways"], 1);
        } else {
            assert!(summary.contains("nodes:     2"));
            assert!(summary.contains("ways:      1"));
        }
    }

    #[test]
    fn merge_writes_a_decodable_merged_extract() {
        let dir = TempDir::new().expect("temp dir");
        let base = write_pbf(&dir, "base.osm.pbf", &sample_store("value", false));
        let patch = write_pbf(&dir, "patch.osm.pbf", &sample_store("newValue", true));
        let output = dir.path().join("merged.osm.pbf");

        run_merge(&MergeArgs {
            base,
            patch,
            output: output.clone(),
            radius: DEFAULT_CANDIDATE_RADIUS_M,
            classify_deletions: false,
        })
        .expect("merge");

        let merged = load_store(&output).expect("decode output");
        assert_eq!(merged.ways().len(), 2);
        let way = merged.ways().by_id(1).expect("frozen").expect("present");
        assert_eq!(way.tags.get("key"), Some(&"newValue".to_owned()));
    }

    #[test]
    fn missing_input_reports_an_open_error() {
        let error = run_info(&InfoArgs {
            file: PathBuf::from("/nonexistent/file.osm.pbf"),
            json: false,
        })
        .expect_err("must fail");
        assert!(matches!(error, CliError::Open { .. }));
    }
}
