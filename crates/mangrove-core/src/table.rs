//! Tabular sample data as exported by the feature-extraction service:
//! a header row plus string cells, read and written as (optionally
//! compressed) CSV.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compression::{open_reader, StagedWriter};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SampleTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn read_csv(path: &Path) -> Result<SampleTable> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(open_reader(path)?);
        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| PipelineError::data_format(path, e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record.map_err(|e| PipelineError::data_format(path, format!("row {i}: {e}")))?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(SampleTable { columns, rows })
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut staged = StagedWriter::create(path)?;
        {
            let mut writer = csv::Writer::from_writer(&mut staged);
            let to_io = |e: csv::Error| PipelineError::io(path, e.into());
            writer.write_record(&self.columns).map_err(to_io)?;
            for row in &self.rows {
                writer.write_record(row).map_err(to_io)?;
            }
            writer.flush().map_err(|e| PipelineError::io(path, e))?;
        }
        staged.commit()
    }

    /// Concatenate tables, aligning columns by name. The result carries the
    /// union of columns in first-seen order; cells a table lacks are empty.
    pub fn concat(tables: impl IntoIterator<Item = SampleTable>) -> SampleTable {
        let mut out = SampleTable::default();
        let mut index: HashMap<String, usize> = HashMap::new();
        for table in tables {
            let mapping: Vec<usize> = table
                .columns
                .iter()
                .map(|c| {
                    *index.entry(c.clone()).or_insert_with(|| {
                        out.columns.push(c.clone());
                        out.columns.len() - 1
                    })
                })
                .collect();
            for row in table.rows {
                let mut aligned = vec![String::new(); out.columns.len()];
                for (cell, &at) in row.into_iter().zip(&mapping) {
                    aligned[at] = cell;
                }
                out.rows.push(aligned);
            }
        }
        let width = out.columns.len();
        for row in &mut out.rows {
            row.resize(width, String::new());
        }
        out
    }

    /// Keep only the rows at `indices`, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> SampleTable {
        SampleTable {
            columns: self.columns.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// Remove the named columns where present.
    pub fn drop_columns(&mut self, names: &[String]) {
        let keep: Vec<bool> = self.columns.iter().map(|c| !names.contains(c)).collect();
        let filter = |v: &mut Vec<String>| {
            let mut k = keep.iter();
            v.retain(|_| *k.next().unwrap_or(&true));
        };
        filter(&mut self.columns);
        for row in &mut self.rows {
            filter(row);
        }
    }
}
