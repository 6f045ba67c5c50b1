//! Per-control-cycle CSV report
//!
//! Layout: `"ts"`, then `"Cap_{i}","Share_{i}"` for every VM, then
//! `"y_{m}","yn_{m}","r_{m}","e_{m}"` (estimate, estimate over target, target,
//! relative error) for every target metric, then the three control counters.

use crate::error::Result;
use crate::models::{AppMetric, ControlCounters};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Values of one report row
#[derive(Debug, Clone, Default)]
pub struct ReportRow {
    /// Unix time in seconds
    pub timestamp: i64,
    /// (CPU capacity, CPU share) per VM, in application order
    pub vms: Vec<(f64, f64)>,
    /// (estimate, target, relative error) per target metric, in metric order
    pub metrics: Vec<(f64, f64, f64)>,
    pub counters: ControlCounters,
}

#[derive(Debug)]
pub struct ControlReport {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl ControlReport {
    /// Create (truncating) the report file and write its header
    pub fn create(path: &Path, vm_count: usize, metrics: &[AppMetric]) -> Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);

        let mut header = vec!["\"ts\"".to_string()];
        for i in 0..vm_count {
            header.push(format!("\"Cap_{{{}}}\"", i));
            header.push(format!("\"Share_{{{}}}\"", i));
        }
        for metric in metrics {
            header.push(format!("\"y_{{{}}}\"", metric));
            header.push(format!("\"yn_{{{}}}\"", metric));
            header.push(format!("\"r_{{{}}}\"", metric));
            header.push(format!("\"e_{{{}}}\"", metric));
        }
        header.push("\"# Controls\"".into());
        header.push("\"# Skip Controls\"".into());
        header.push("\"# Fail Controls\"".into());

        writeln!(writer, "{}", header.join(","))?;
        writer.flush()?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_row(&mut self, row: &ReportRow) -> Result<()> {
        let mut fields = vec![row.timestamp.to_string()];
        for (cap, share) in &row.vms {
            fields.push(cap.to_string());
            fields.push(share.to_string());
        }
        for (estimate, target, relative_error) in &row.metrics {
            fields.push(estimate.to_string());
            fields.push((estimate / target).to_string());
            fields.push(target.to_string());
            fields.push(relative_error.to_string());
        }
        fields.push(row.counters.control_count.to_string());
        fields.push(row.counters.control_skip_count.to_string());
        fields.push(row.counters.control_fail_count.to_string());

        writeln!(self.writer, "{}", fields.join(","))?;
        self.writer.flush()?;
        Ok(())
    }
}
