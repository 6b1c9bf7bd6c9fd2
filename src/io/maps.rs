//! Sparse statistical maps, coordinate tables and run manifests.
//!
//! Maps are tab-separated `x y z value` rows in MNI millimetres under a
//! header row. Voxels that are absent from a map are zero.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::workflow::Payload;
use crate::domain::error::WorkflowFailure;
use crate::stats::grid::Grid;

pub const MAP_COLUMNS: [&str; 4] = ["x", "y", "z", "value"];

/// One voxel row of a map file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct MapRow {
    x: f64,
    y: f64,
    z: f64,
    value: f64,
}

/// Tab-separated writer; the caller writes the header row itself
fn tsv_writer(path: &Path) -> Result<csv::Writer<File>, WorkflowFailure> {
    csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)
        .map_err(|e| WorkflowFailure::write(path, e))
}

fn read_error(path: &Path, err: csv::Error) -> WorkflowFailure {
    let message = format!("{}: {}", path.display(), err);
    match err.into_kind() {
        csv::ErrorKind::Io(io) => WorkflowFailure::read(path, io),
        _ => WorkflowFailure::invalid_input(message),
    }
}

/// Write the nonzero, finite voxels of a dense grid map
pub fn write_map(path: &Path, grid: &Grid, values: &[f64]) -> Result<usize, WorkflowFailure> {
    let entries = values
        .iter()
        .enumerate()
        .filter(|(_, v)| **v != 0.0 && v.is_finite())
        .map(|(index, v)| (grid.index_to_mm(index), *v));
    write_entries(path, entries)
}

/// Write `(xyz, value)` rows
pub fn write_entries<I>(path: &Path, entries: I) -> Result<usize, WorkflowFailure>
where
    I: IntoIterator<Item = ([f64; 3], f64)>,
{
    let mut writer = tsv_writer(path)?;
    writer
        .write_record(MAP_COLUMNS)
        .map_err(|e| WorkflowFailure::write(path, e))?;
    let mut rows = 0;
    for ([x, y, z], value) in entries {
        writer
            .serialize(MapRow { x, y, z, value })
            .map_err(|e| WorkflowFailure::write(path, e))?;
        rows += 1;
    }
    writer.flush().map_err(|e| WorkflowFailure::write(path, e))?;
    debug!(path = %path.display(), rows, "wrote map");
    Ok(rows)
}

/// Read a sparse map written by [`write_map`]
pub fn read_map(path: &Path) -> Result<Vec<([f64; 3], f64)>, WorkflowFailure> {
    let file = File::open(path).map_err(|e| WorkflowFailure::read(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(file);
    reader
        .deserialize::<MapRow>()
        .map(|row| {
            row.map(|MapRow { x, y, z, value }| ([x, y, z], value))
                .map_err(|e| read_error(path, e))
        })
        .collect()
}

/// Read `x y z` rows; extra columns are ignored
pub fn read_coordinates(path: &Path) -> Result<Vec<[f64; 3]>, WorkflowFailure> {
    let text = fs::read_to_string(path).map_err(|e| WorkflowFailure::read(path, e))?;
    let coordinates: Vec<[f64; 3]> = numeric_rows(&text, path)?
        .into_iter()
        .map(|(line, values)| match values.as_slice() {
            [x, y, z, ..] => Ok([*x, *y, *z]),
            _ => Err(WorkflowFailure::invalid_input(format!(
                "{}: line {}: expected at least 3 columns",
                path.display(),
                line
            ))),
        })
        .collect::<Result<_, _>>()?;
    if coordinates.is_empty() {
        return Err(WorkflowFailure::invalid_input(format!(
            "{}: no coordinates found",
            path.display()
        )));
    }
    Ok(coordinates)
}

/// Numeric rows of a loosely delimited table. Columns may be split by any
/// whitespace or commas. A non-numeric first row is a header; blank lines and
/// `#` comments are skipped.
fn numeric_rows(text: &str, path: &Path) -> Result<Vec<(usize, Vec<f64>)>, WorkflowFailure> {
    let mut rows = Vec::new();
    let mut seen_content = false;
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed: Result<Vec<f64>, _> = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty())
            .map(str::parse::<f64>)
            .collect();
        match parsed {
            Ok(values) => rows.push((index + 1, values)),
            Err(_) if !seen_content => {}
            Err(e) => {
                return Err(WorkflowFailure::invalid_input(format!(
                    "{}: line {}: {}",
                    path.display(),
                    index + 1,
                    e
                )))
            }
        }
        seen_content = true;
    }
    Ok(rows)
}

/// Output directory, file prefix and the files written by one workflow run
#[derive(Debug)]
pub struct RunOutputs {
    dir: PathBuf,
    prefix: String,
    run_id: Uuid,
    files: Vec<PathBuf>,
}

impl RunOutputs {
    /// Create the output directory if needed
    pub fn create(dir: &Path, prefix: &str) -> Result<Self, WorkflowFailure> {
        fs::create_dir_all(dir).map_err(|e| WorkflowFailure::write(dir, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            run_id: Uuid::new_v4(),
            files: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// `<dir>/<prefix><name>`
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", self.prefix, name))
    }

    /// Write a dense grid map as `<prefix><name>.tsv`
    pub fn write_map(&mut self, name: &str, grid: &Grid, values: &[f64]) -> Result<PathBuf, WorkflowFailure> {
        let path = self.path(&format!("{}.tsv", name));
        write_map(&path, grid, values)?;
        self.files.push(path.clone());
        Ok(path)
    }

    /// Write sparse `(xyz, value)` rows as `<prefix><name>.tsv`
    pub fn write_entries<I>(&mut self, name: &str, entries: I) -> Result<PathBuf, WorkflowFailure>
    where
        I: IntoIterator<Item = ([f64; 3], f64)>,
    {
        let path = self.path(&format!("{}.tsv", name));
        write_entries(&path, entries)?;
        self.files.push(path.clone());
        Ok(path)
    }

    /// Write a tab-separated table as `<prefix><name>.tsv`
    pub fn write_table<I>(&mut self, name: &str, header: &[&str], rows: I) -> Result<PathBuf, WorkflowFailure>
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        let path = self.path(&format!("{}.tsv", name));
        let mut writer = tsv_writer(&path)?;
        writer
            .write_record(header)
            .map_err(|e| WorkflowFailure::write(&path, e))?;
        for row in rows {
            writer
                .write_record(&row)
                .map_err(|e| WorkflowFailure::write(&path, e))?;
        }
        writer.flush().map_err(|e| WorkflowFailure::write(&path, e))?;
        self.files.push(path.clone());
        Ok(path)
    }

    /// Write `<prefix>manifest.json` and return it as the run's payload
    pub fn finish(self, command: &str, summary: Map<String, Value>) -> Result<Payload, WorkflowFailure> {
        let manifest_path = self.path("manifest.json");
        let mut manifest = Map::new();
        manifest.insert("command".to_string(), json!(command));
        manifest.insert("run_id".to_string(), json!(self.run_id.to_string()));
        manifest.insert("output_dir".to_string(), json!(self.dir.display().to_string()));
        manifest.insert(
            "files".to_string(),
            json!(self
                .files
                .iter()
                .map(|f| f.display().to_string())
                .collect::<Vec<_>>()),
        );
        manifest.extend(summary);
        manifest.insert("manifest".to_string(), json!(manifest_path.display().to_string()));

        let payload = Value::Object(manifest);
        let text = serde_json::to_string_pretty(&payload)
            .map_err(|e| WorkflowFailure::write(&manifest_path, e))?;
        fs::write(&manifest_path, text).map_err(|e| WorkflowFailure::write(&manifest_path, e))?;
        info!(command, files = self.files.len(), dir = %self.dir.display(), "results written");
        Ok(payload)
    }
}

/// `<stem>_` of an input file, the default output prefix
pub fn default_prefix(input: &Path) -> String {
    input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| format!("{}_", stem))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::FailureKind;
    use tempfile::TempDir;

    #[test]
    fn test_map_round_trip_keeps_nonzero_voxels() {
        let dir = TempDir::new().unwrap();
        let grid = Grid::mni(20.0);
        let mut values = vec![0.0; grid.len()];
        values[3] = 0.5;
        values[7] = -1.25;
        values[9] = f64::NAN;
        let path = dir.path().join("map.tsv");
        assert_eq!(write_map(&path, &grid, &values).unwrap(), 2);

        let entries = read_map(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (grid.index_to_mm(3), 0.5));
        assert_eq!(entries[1], (grid.index_to_mm(7), -1.25));
    }

    #[test]
    fn test_empty_map_keeps_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.tsv");
        assert_eq!(write_entries(&path, Vec::new()).unwrap(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "x\ty\tz\tvalue\n");
        assert!(read_map(&path).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_map_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("con.tsv");

        fs::write(&path, "x\ty\tz\tvalue\n0\t0\t0\t1.5\n2\t0\t0\n").unwrap();
        let failure = read_map(&path).unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidInput);
        assert!(failure.message.contains("con.tsv"));

        fs::write(&path, "x\ty\tz\tvalue\n0\t0\t0\thigh\n").unwrap();
        assert_eq!(read_map(&path).unwrap_err().kind, FailureKind::InvalidInput);

        let missing = read_map(&dir.path().join("absent.tsv")).unwrap_err();
        assert_eq!(missing.kind, FailureKind::MissingInput);
    }

    #[test]
    fn test_table_fields_are_quoted_when_needed() {
        let dir = TempDir::new().unwrap();
        let mut outputs = RunOutputs::create(dir.path(), "").unwrap();
        let rows = vec![vec!["Smith\t2009".to_string(), "2".to_string()]];
        let path = outputs.write_table("labels", &["experiment", "cluster"], rows).unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(&path)
            .unwrap();
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(&record[0], "Smith\t2009");
        assert_eq!(&record[1], "2");
    }

    #[test]
    fn test_read_coordinates_with_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("baseline.tsv");
        fs::write(&path, "x\ty\tz\n1\t2\t3\n\n# note\n4 5 6 7\n").unwrap();
        assert_eq!(read_coordinates(&path).unwrap(), vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);

        fs::write(&path, "1 2 3\nx y z\n").unwrap();
        assert!(read_coordinates(&path).is_err());
        fs::write(&path, "x y z\n").unwrap();
        assert!(read_coordinates(&path).is_err());
    }

    #[test]
    fn test_run_outputs_manifest() {
        let dir = TempDir::new().unwrap();
        let out_dir = dir.path().join("results");
        let mut outputs = RunOutputs::create(&out_dir, "study_").unwrap();
        let table = outputs
            .write_table("labels", &["experiment", "cluster"], vec![vec!["a".to_string(), "1".to_string()]])
            .unwrap();
        assert_eq!(table, out_dir.join("study_labels.tsv"));

        let mut summary = Map::new();
        summary.insert("n_iters".to_string(), json!(10));
        let payload = outputs.finish("ale", summary).unwrap();

        assert_eq!(payload["command"], "ale");
        assert_eq!(payload["n_iters"], 10);
        assert_eq!(payload["files"].as_array().unwrap().len(), 1);
        let on_disk: Value =
            serde_json::from_str(&fs::read_to_string(out_dir.join("study_manifest.json")).unwrap()).unwrap();
        assert_eq!(on_disk, payload);
    }

    #[test]
    fn test_default_prefix() {
        assert_eq!(default_prefix(Path::new("/data/pain_studies.txt")), "pain_studies_");
    }
}
