//! Command-line front end for working with saved analysis documents:
//! inspect them, trim the clip, and export measurements as CSV.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use image::{GrayImage, RgbImage};
use tracing::info;
use tracing_subscriber::EnvFilter;

use facemetrics::clip::{ClipEditor, ClipRange};
use facemetrics::detector::{BackgroundRemover, Detection, FaceDetector};
use facemetrics::document::Document;
use facemetrics::export;
use facemetrics::measures::enabled_items;
use facemetrics::normalize::FILL_COLOR;
use facemetrics::types::Rect;
use facemetrics::{EngineConfig, NormalizationEngine};

#[derive(Parser)]
#[command(name = "facemetrics", about = "Facial measurement document tool", version)]
struct Cli {
    /// Engine config file (JSON). Defaults apply when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize a document: capture rate, frames, measure registry.
    Info { document: PathBuf },

    /// Replay a document's clip and write measurements as CSV.
    Export {
        document: PathBuf,

        /// Output CSV path.
        #[arg(short, long)]
        output: PathBuf,

        /// First clip frame (inclusive).
        #[arg(long, default_value_t = 0)]
        begin: usize,

        /// One past the last clip frame. Defaults to the end.
        #[arg(long)]
        end: Option<usize>,

        /// Export every Nth frame. Overrides the config value.
        #[arg(long)]
        step: Option<usize>,
    },

    /// Write a copy of a document restricted to a frame range.
    Trim {
        document: PathBuf,

        #[arg(long)]
        begin: usize,

        #[arg(long)]
        end: usize,

        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Replay never re-detects, so the document tool runs without any
/// model backend behind the detector seam.
struct NullDetector;

impl FaceDetector for NullDetector {
    fn detect(&mut self, _image: &RgbImage) -> facemetrics::Result<Option<Detection>> {
        Ok(None)
    }

    fn infer_landmarks(
        &mut self,
        _image: &RgbImage,
        _bbox: &Rect,
    ) -> facemetrics::Result<(facemetrics::LandmarkSet, facemetrics::HeadPose)> {
        Ok((
            facemetrics::LandmarkSet::empty(),
            facemetrics::HeadPose::default(),
        ))
    }
}

/// Segments stored lateral canvases by distance from the fill color,
/// which is what the dead space around a normalized profile is made of.
struct FillColorRemover;

impl BackgroundRemover for FillColorRemover {
    fn remove_background(&mut self, image: &RgbImage) -> facemetrics::Result<GrayImage> {
        let mut mask = GrayImage::new(image.width(), image.height());
        for (x, y, pixel) in image.enumerate_pixels() {
            let diff: u32 = pixel
                .0
                .iter()
                .zip(FILL_COLOR.0.iter())
                .map(|(a, b)| (*a as i32 - *b as i32).unsigned_abs())
                .sum();
            if diff > 48 {
                mask.put_pixel(x, y, image::Luma([255]));
            }
        }
        Ok(mask)
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::load(p).with_context(|| format!("reading {}", p.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Info { document } => {
            let doc = Document::load(&document)?;
            println!("frames:  {}", doc.frames.len());
            println!("fps:     {}", doc.fps);
            println!("measures:");
            for measure in &doc.measures {
                let state = if measure.enabled { "on " } else { "off" };
                let items: Vec<&str> = measure
                    .items
                    .iter()
                    .map(|i| i.name.as_str())
                    .collect();
                println!("  [{state}] {:<22} {}", measure.kind.id(), items.join(", "));
            }
            println!("columns: {}", enabled_items(&doc.measures).join(", "));
        }

        Command::Export {
            document,
            output,
            begin,
            end,
            step,
        } => {
            let doc = Document::load(&document)?;
            let end = end.unwrap_or(doc.frames.len());
            if begin >= end || end > doc.frames.len() {
                bail!("invalid frame range {begin}..{end}");
            }
            let mut engine = NormalizationEngine::new(NullDetector, FillColorRemover, &config);
            let step = step.unwrap_or(config.csv_step);
            export::save_csv(
                &output,
                &mut engine,
                &doc.frames,
                ClipRange::new(begin, end),
                step,
                &doc.measures,
                doc.fps,
            )?;
            info!(path = %output.display(), "export complete");
        }

        Command::Trim {
            document,
            begin,
            end,
            output,
        } => {
            let doc = Document::load(&document)?;
            let mut editor = ClipEditor::new(doc.frames.len());
            if !editor.set_range(begin, end) {
                bail!(
                    "invalid frame range {begin}..{end} for {} frames",
                    doc.frames.len()
                );
            }
            let range = editor.range();
            let frames = doc.frames[range.begin..range.end].to_vec();
            let trimmed = Document::new(doc.fps, doc.measures, frames);
            trimmed.save(&output)?;
            info!(path = %output.display(), frames = range.len(), "trim complete");
        }
    }
    Ok(())
}
