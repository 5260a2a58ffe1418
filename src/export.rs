//! CSV export of the active clip. Each stored snapshot is replayed
//! through the measurement registry and written as one row per clip
//! frame, one column per enabled measure item.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::clip::ClipRange;
use crate::detector::{BackgroundRemover, FaceDetector};
use crate::error::Result;
use crate::measures::{self, Measure, Measurements};
use crate::normalize::NormalizationEngine;
use crate::types::FrameSnapshot;

/// Replays every clip frame at the given stride and measures it.
/// Returned entries are (clip-relative frame index, measurements).
pub fn collect_measurements<D, B>(
    engine: &mut NormalizationEngine<D, B>,
    frames: &[FrameSnapshot],
    range: ClipRange,
    step: usize,
    measures: &[Measure],
) -> Result<Vec<(usize, Measurements)>>
where
    D: FaceDetector,
    B: BackgroundRemover,
{
    let mut rows = Vec::new();
    for index in range.frames(step) {
        let Some(snapshot) = frames.get(index) else {
            break;
        };
        let frame = engine.restore(snapshot)?;
        rows.push((index - range.begin, measures::analyze(&frame, measures)));
    }
    Ok(rows)
}

/// Writes collected rows as CSV. The header is `frame,time` followed by
/// the enabled item names; values an item did not produce for a frame
/// stay empty.
pub fn write_csv<W: Write>(
    writer: W,
    rows: &[(usize, Measurements)],
    measures: &[Measure],
    frame_rate: f64,
) -> Result<()> {
    let items = measures::enabled_items(measures);

    let mut out = csv::Writer::from_writer(writer);
    let mut header = vec!["frame".to_string(), "time".to_string()];
    header.extend(items.iter().cloned());
    out.write_record(&header)?;

    let seconds_per_frame = if frame_rate > 0.0 {
        1.0 / frame_rate
    } else {
        0.0
    };

    for (frame, values) in rows {
        let time = (*frame as f64 * seconds_per_frame * 100.0).round() / 100.0;
        let mut record = vec![frame.to_string(), format!("{time:.2}")];
        for item in &items {
            record.push(
                values
                    .get(item)
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        out.write_record(&record)?;
    }
    out.flush()?;
    Ok(())
}

/// Replays the clip and writes it to a CSV file in one pass.
pub fn save_csv<D, B>(
    path: &Path,
    engine: &mut NormalizationEngine<D, B>,
    frames: &[FrameSnapshot],
    range: ClipRange,
    step: usize,
    measures: &[Measure],
    frame_rate: f64,
) -> Result<()>
where
    D: FaceDetector,
    B: BackgroundRemover,
{
    let rows = collect_measurements(engine, frames, range, step, measures)?;
    let file = File::create(path)?;
    write_csv(file, &rows, measures, frame_rate)?;
    info!(path = %path.display(), rows = rows.len(), "exported csv");
    Ok(())
}
