//! Reading experiments and writing result tables

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::results::{LrtResults, RankedGene};
use crate::data::{CountMatrix, SampleMetadata, TITLE_COLUMN};
use crate::error::{Result, SplineDeError};
use crate::model::CoefficientTable;

/// Tab if the header line has one, comma otherwise
fn detect_delimiter(path: &Path) -> Result<u8> {
    let mut header = String::new();
    BufReader::new(File::open(path)?).read_line(&mut header)?;
    if header.trim().is_empty() {
        return Err(SplineDeError::EmptyData {
            reason: format!("{} is empty", path.display()),
        });
    }
    Ok(if header.contains('\t') { b'\t' } else { b',' })
}

fn table_reader(path: &Path) -> Result<csv::Reader<File>> {
    let delimiter = detect_delimiter(path)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_path(path)?)
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    let file = BufWriter::new(File::create(path)?);
    Ok(csv::WriterBuilder::new().delimiter(b'\t').from_writer(file))
}

/// Read a count matrix: first column gene IDs, header row sample IDs.
/// CSV or TSV, detected from the header line.
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let mut reader = table_reader(path.as_ref())?;
    let header = reader.headers()?.clone();
    if header.len() < 2 {
        return Err(SplineDeError::InvalidCountMatrix {
            reason: "Not enough columns in header".to_string(),
        });
    }
    let sample_ids: Vec<String> = header.iter().skip(1).map(String::from).collect();
    let n_samples = sample_ids.len();

    let mut gene_ids = Vec::new();
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record?;
        let gene_id = record.get(0).unwrap_or_default().to_string();
        for field in record.iter().skip(1) {
            let value: f64 = field.parse().map_err(|_| SplineDeError::InvalidCountMatrix {
                reason: format!("Invalid count value '{}' for gene {}", field, gene_id),
            })?;
            values.push(value);
        }
        gene_ids.push(gene_id);
    }

    if gene_ids.is_empty() {
        return Err(SplineDeError::EmptyData {
            reason: "No genes found in count matrix".to_string(),
        });
    }

    let counts = Array2::from_shape_vec((gene_ids.len(), n_samples), values).map_err(|e| {
        SplineDeError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    CountMatrix::new(counts, gene_ids, sample_ids)
}

/// Read a sample table: first column sample IDs, every other column is
/// kept as a categorical column (the `title` column among them).
pub fn read_sample_table<P: AsRef<Path>>(path: P) -> Result<SampleMetadata> {
    let mut reader = table_reader(path.as_ref())?;
    let header = reader.headers()?.clone();
    let column_names: Vec<String> = header.iter().skip(1).map(String::from).collect();

    let mut sample_ids = Vec::new();
    let mut columns: Vec<Vec<String>> = vec![Vec::new(); column_names.len()];
    for record in reader.records() {
        let record = record?;
        sample_ids.push(record.get(0).unwrap_or_default().to_string());
        for (column, field) in columns.iter_mut().zip(record.iter().skip(1)) {
            column.push(field.to_string());
        }
    }

    if sample_ids.is_empty() {
        return Err(SplineDeError::EmptyData {
            reason: "No samples found in sample table".to_string(),
        });
    }

    let mut metadata = SampleMetadata::new(sample_ids);
    for (name, values) in column_names.iter().zip(columns) {
        metadata.add_condition(name, values)?;
    }
    Ok(metadata)
}

/// Reorder a sample table to the column order of the count matrix.
/// Samples in the table but not in the counts are dropped.
pub fn align_samples(counts: &CountMatrix, metadata: &SampleMetadata) -> Result<SampleMetadata> {
    let index: HashMap<&str, usize> = metadata
        .sample_ids()
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let order = counts
        .sample_ids()
        .iter()
        .map(|id| {
            index
                .get(id.as_str())
                .copied()
                .ok_or_else(|| SplineDeError::InvalidMetadata {
                    reason: format!("sample '{}' is missing from the sample table", id),
                })
        })
        .collect::<Result<Vec<usize>>>()?;
    if order.len() < metadata.n_samples() {
        log::info!(
            "Ignoring {} sample table rows without counts",
            metadata.n_samples() - order.len()
        );
    }
    metadata.subset(&order)
}

/// Counts and titles in one JSON document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentBundle {
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    /// genes x samples
    pub counts: Vec<Vec<f64>>,
    pub titles: Vec<String>,
}

impl ExperimentBundle {
    pub fn into_experiment(self) -> Result<(CountMatrix, SampleMetadata)> {
        let n_samples = self.sample_ids.len();
        if let Some(row) = self.counts.iter().find(|row| row.len() != n_samples) {
            return Err(SplineDeError::DimensionMismatch {
                expected: format!("{} counts per gene", n_samples),
                got: format!("{} counts per gene", row.len()),
            });
        }
        let n_genes = self.counts.len();
        let flat: Vec<f64> = self.counts.into_iter().flatten().collect();
        let counts = Array2::from_shape_vec((n_genes, n_samples), flat).map_err(|e| {
            SplineDeError::InvalidCountMatrix {
                reason: e.to_string(),
            }
        })?;
        let matrix = CountMatrix::new(counts, self.gene_ids, self.sample_ids.clone())?;
        let mut metadata = SampleMetadata::new(self.sample_ids);
        metadata.add_condition(TITLE_COLUMN, self.titles)?;
        Ok((matrix, metadata))
    }
}

/// Read a JSON experiment bundle `{gene_ids, sample_ids, counts, titles}`
pub fn read_experiment_bundle<P: AsRef<Path>>(path: P) -> Result<(CountMatrix, SampleMetadata)> {
    let reader = BufReader::new(File::open(path)?);
    let bundle: ExperimentBundle = serde_json::from_reader(reader)?;
    bundle.into_experiment()
}

/// Write the significance-ranked table as TSV
pub fn write_ranked<P: AsRef<Path>>(path: P, ranked: &[RankedGene]) -> Result<()> {
    let mut writer = tsv_writer(path.as_ref())?;
    for row in ranked {
        writer.serialize(row)?;
    }
    if ranked.is_empty() {
        writer.write_record(["gene_id", "baseMean", "log2FoldChange", "stat", "pvalue", "padj"])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write every gene's LRT result as TSV
pub fn write_results<P: AsRef<Path>>(path: P, results: &LrtResults) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "# {}", results.description())?;
    writeln!(
        file,
        "gene_id\tbaseMean\tlog2FoldChange\tstat\tpvalue\tpadj\tdispersion\tconverged"
    )?;
    for i in 0..results.n_genes() {
        writeln!(
            file,
            "{}\t{:.6}\t{:.6}\t{:.6}\t{:.6e}\t{:.6e}\t{:.6e}\t{}",
            results.gene_ids[i],
            results.base_means[i],
            results.log2_fold_changes[i],
            results.stat[i],
            results.pvalues[i],
            results.padj[i],
            results.dispersions[i],
            results.converged[i],
        )?;
    }
    file.flush()?;
    Ok(())
}

/// Write the log2 coefficient table (genes x terms) as TSV
pub fn write_coefficients<P: AsRef<Path>>(path: P, table: &CoefficientTable) -> Result<()> {
    let mut writer = tsv_writer(path.as_ref())?;
    let mut header = vec!["gene_id".to_string()];
    header.extend(table.terms().iter().cloned());
    writer.write_record(&header)?;
    for (gene_id, row) in table.gene_ids().iter().zip(table.values().rows()) {
        let mut record = vec![gene_id.clone()];
        record.extend(row.iter().map(|v| format!("{:.6}", v)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
