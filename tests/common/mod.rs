#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use csv_bulk_import::{
    config::LoadOptions,
    destination::Destination,
    error::ImportError,
    orchestrator::{ImportOrchestrator, ImportReport, ProgressEvent},
};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Writes a headed `id,name` file with `rows` generated rows.
    pub fn write_people(&self, name: &str, rows: usize) -> PathBuf {
        let mut contents = String::from("id,name\n");
        for idx in 1..=rows {
            contents.push_str(&format!("{idx},person{idx}\n"));
        }
        self.write(name, &contents)
    }
}

/// Options for a headed file loaded into `table`.
pub fn options(table: &str) -> LoadOptions {
    LoadOptions {
        first_row_has_column_names: true,
        table: table.to_string(),
        ..LoadOptions::default()
    }
}

/// Runs an import and collects every progress notification.
pub fn run_import(
    destination: &dyn Destination,
    options: &LoadOptions,
    inputs: &[PathBuf],
) -> (Result<ImportReport, ImportError>, Vec<(PathBuf, u64)>) {
    let mut events = Vec::new();
    let mut record = |event: &ProgressEvent<'_>| {
        events.push((event.path.to_path_buf(), event.rows_copied));
    };
    let result = ImportOrchestrator::new(destination, options).run(inputs, &mut record);
    (result, events)
}
