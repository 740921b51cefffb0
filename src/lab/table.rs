//! Tabular view of workload results.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use super::job::ResultTable;

/// One cell of a [`ResultsTable`].
///
/// Values serialize as themselves, so an error result is `null`. A missing
/// cell serializes as `{"missing": true}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Value(Value),
    /// The job did not run on this message (sampled out or not part of the run).
    Missing,
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Value(value) => value.serialize(serializer),
            Cell::Missing => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("missing", &true)?;
                map.end()
            }
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Value(Value::String(s)) => f.write_str(s),
            Cell::Value(Value::Null) => f.write_str("null"),
            Cell::Value(value) => write!(f, "{}", value),
            Cell::Missing => f.write_str("-"),
        }
    }
}

/// A message-indexed, job-columned table of result values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultsTable {
    pub job_ids: Vec<String>,
    /// `(message_id, cells)`, cells aligned with `job_ids`.
    pub rows: Vec<(String, Vec<Cell>)>,
}

impl ResultsTable {
    /// Builds the table for the given rows and columns.
    ///
    /// Error results have no value and render as `null`.
    pub fn from_results(results: &ResultTable, message_ids: &[String], job_ids: &[String]) -> Self {
        let rows = message_ids
            .iter()
            .map(|message_id| {
                let by_job = results.get(message_id);
                let cells = job_ids
                    .iter()
                    .map(|job_id| match by_job.and_then(|r| r.get(job_id)) {
                        Some(result) => Cell::Value(result.value.clone().unwrap_or(Value::Null)),
                        None => Cell::Missing,
                    })
                    .collect();
                (message_id.clone(), cells)
            })
            .collect();

        Self {
            job_ids: job_ids.to_vec(),
            rows,
        }
    }

    pub fn get(&self, message_id: &str, job_id: &str) -> Option<&Cell> {
        let column = self.job_ids.iter().position(|id| id == job_id)?;
        self.rows
            .iter()
            .find(|(id, _)| id == message_id)
            .and_then(|(_, cells)| cells.get(column))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl fmt::Display for ResultsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<(String, Vec<String>)> = self
            .rows
            .iter()
            .map(|(id, cells)| (id.clone(), cells.iter().map(ToString::to_string).collect()))
            .collect();

        let header = "message_id";
        let first_width = rendered
            .iter()
            .map(|(id, _)| id.chars().count())
            .chain(std::iter::once(header.len()))
            .max()
            .unwrap_or(header.len());
        let widths: Vec<usize> = self
            .job_ids
            .iter()
            .enumerate()
            .map(|(i, job_id)| {
                rendered
                    .iter()
                    .map(|(_, cells)| cells[i].chars().count())
                    .chain(std::iter::once(job_id.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        write!(f, "{:<width$}", header, width = first_width)?;
        for (job_id, width) in self.job_ids.iter().zip(&widths) {
            write!(f, "  {:<width$}", job_id, width = *width)?;
        }
        writeln!(f)?;

        for (id, cells) in &rendered {
            write!(f, "{:<width$}", id, width = first_width)?;
            for (cell, width) in cells.iter().zip(&widths) {
                write!(f, "  {:<width$}", cell, width = *width)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
