use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Result, WorkflowError};

fn external_pressure_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"external pressure\s*=\s*([-+]?\d+(?:\.\d*)?(?:[eE][-+]?\d+)?)")
            .expect("static regex is valid")
    })
}

/// Layout of a pressure series file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesFormat {
    /// VASP OUTCAR: one `external pressure = X kB` line per ionic step.
    Outcar,
    /// First numeric token of each non-comment line.
    Plain,
}

impl SeriesFormat {
    /// Files named `OUTCAR*` are OUTCARs; anything else is a plain series.
    pub fn for_path(path: &Path) -> Self {
        let is_outcar = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("OUTCAR"));
        if is_outcar {
            SeriesFormat::Outcar
        } else {
            SeriesFormat::Plain
        }
    }
}

/// Reads the time-ordered pressure series from a simulation output file.
///
/// An OUTCAR without any `external pressure` line yields an empty series;
/// its header numbers are never read as pressures.
pub fn read_pressure_series(path: &Path) -> Result<Vec<f64>> {
    if !path.exists() {
        return Err(WorkflowError::missing_output(path, "file does not exist"));
    }
    let text = fs::read_to_string(path)
        .map_err(|e| WorkflowError::missing_output(path, format!("cannot read file: {}", e)))?;
    Ok(parse_pressure_series(&text, SeriesFormat::for_path(path)))
}

pub fn parse_pressure_series(text: &str, format: SeriesFormat) -> Vec<f64> {
    match format {
        SeriesFormat::Outcar => external_pressure_re()
            .captures_iter(text)
            .filter_map(|c| c.get(1)?.as_str().parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .collect(),
        SeriesFormat::Plain => text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| l.split_whitespace().next()?.parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .collect(),
    }
}
