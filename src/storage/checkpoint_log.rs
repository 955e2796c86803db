use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::errors::LUTError;
use crate::storage::point_data::PointData;

///
/// Human readable, tab separated record of every evaluated point.
///
/// The first line holds the number of parameters, the number of QoIs, the
/// parameter names and the QoI names. Each following line holds the real
/// coordinates, the error code, the QoIs and, for points that were predicted
/// before being evaluated, the error estimates.
///
#[derive(Clone, Debug)]
pub struct CheckpointLog
{
    path: PathBuf,
    parameter_names: Vec<String>,
    qoi_names: Vec<String>,
}

impl CheckpointLog
{
    pub fn new(path: impl Into<PathBuf>, parameter_names: Vec<String>, qoi_names: Vec<String>) -> Self
    {
        Self { path: path.into(), parameter_names, qoi_names }
    }

    #[inline]
    pub fn path(&self) -> &Path
    {
        &self.path
    }

    pub fn header(&self) -> String
    {
        let mut fields = vec![self.parameter_names.len().to_string(), self.qoi_names.len().to_string()];
        fields.extend(self.parameter_names.iter().cloned());
        fields.extend(self.qoi_names.iter().cloned());
        fields.join("\t")
    }

    pub fn format_row(x: &[f64], data: &PointData) -> String
    {
        let mut fields: Vec<String> = x.iter().map(f64::to_string).collect();
        fields.push(data.error_code().to_string());
        fields.extend(data.qois().iter().map(f64::to_string));
        if let Some(estimates) = data.error_estimates()
        {
            fields.extend(estimates.iter().map(f64::to_string));
        }
        fields.join("\t")
    }

    ///
    /// Truncate the log and write the header.
    ///
    pub fn reset(&self) -> Result<(), LUTError>
    {
        let mut file = BufWriter::new(File::create(&self.path)?);
        writeln!(file, "{}", self.header())?;
        file.flush()?;
        Ok(())
    }

    ///
    /// Append one line per point. A missing or empty log gets its header
    /// first, so a resumed run can log to a fresh file.
    ///
    pub fn append<'a, I>(&self, rows: I) -> Result<(), LUTError>
    where I: IntoIterator<Item = (&'a [f64], &'a PointData)>
    {
        let needs_header = std::fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let mut file = BufWriter::new(OpenOptions::new().create(true).append(true).open(&self.path)?);
        if needs_header
        {
            writeln!(file, "{}", self.header())?;
        }
        for (x, data) in rows
        {
            writeln!(file, "{}", Self::format_row(x, data))?;
        }
        file.flush()?;
        Ok(())
    }

    ///
    /// Parse the rows of an existing log back into coordinates and data.
    ///
    pub fn read_rows(&self) -> Result<Vec<(Vec<f64>, PointData)>, LUTError>
    {
        let reader = BufReader::new(File::open(&self.path)?);
        let num_inputs = self.parameter_names.len();
        let num_qois = self.qoi_names.len();
        let mut rows = Vec::new();
        for line in reader.lines().skip(1)
        {
            let line = line?;
            if line.trim().is_empty()
            {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != num_inputs + 1 + num_qois && fields.len() != num_inputs + 1 + 2 * num_qois
            {
                return Err(LUTError::DeserializationFailed(format!("malformed log line: {line}")));
            }
            let parse = |s: &str| s.parse::<f64>().map_err(|e| LUTError::DeserializationFailed(e.to_string()));
            let x = fields[..num_inputs].iter().map(|s| parse(*s)).collect::<Result<Vec<_>, _>>()?;
            let error_code = fields[num_inputs].parse::<u32>().map_err(|e| LUTError::DeserializationFailed(e.to_string()))?;
            let qois = fields[num_inputs + 1..num_inputs + 1 + num_qois].iter().map(|s| parse(*s)).collect::<Result<Vec<_>, _>>()?;
            let mut data = PointData::new(qois, error_code);
            if fields.len() > num_inputs + 1 + num_qois
            {
                let estimates = fields[num_inputs + 1 + num_qois..].iter().map(|s| parse(*s)).collect::<Result<Vec<_>, _>>()?;
                data.error_estimates = Some(estimates);
            }
            rows.push((x, data));
        }
        Ok(rows)
    }
}
