//! Keypoint table input.
//!
//! The table is CSV with a header row:
//!
//! ```text
//! frame_id,landmark,x_norm,y_norm,visibility,center_x,center_y,unit_length[,exercise_type,is_correct]
//! ```
//!
//! The label columns are optional and only used for training. Rows that do
//! not deserialize are skipped with a warning; I/O failures abort the read.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::Result;
use crate::frame::KeypointRow;

/// Read keypoint rows from any CSV source.
///
/// # Errors
///
/// Returns [`crate::ClassifyError::Table`] when the underlying reader fails
/// or the header cannot be read.
pub fn read_rows<R: Read>(reader: R) -> Result<Vec<KeypointRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    // Surface header problems before iterating.
    rdr.headers()?;

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (line, record) in rdr.deserialize::<KeypointRow>().enumerate() {
        match record {
            Ok(row) => rows.push(row),
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                warn!(line = line + 2, error = %e, "skipping unreadable keypoint row");
                skipped += 1;
            }
        }
    }

    debug!(rows = rows.len(), skipped, "read keypoint table");
    Ok(rows)
}

/// Read keypoint rows from a CSV file.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn read_table(path: impl AsRef<Path>) -> Result<Vec<KeypointRow>> {
    let file = File::open(path.as_ref())?;
    read_rows(file)
}
