//! Per-sample covariate table

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{Result, SplineDeError};

/// Sample metadata: categorical factors and numeric covariates per sample.
/// R equivalent: colData(dds)
///
/// The same table carries the raw `title` column, the derived `donor`/`time`
/// columns and the spline basis columns used by the model formulas.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleMetadata {
    sample_ids: Vec<String>,
    /// Categorical columns (column name -> value per sample)
    conditions: HashMap<String, Vec<String>>,
    /// Numeric columns (column name -> value per sample)
    continuous: HashMap<String, Vec<f64>>,
    /// Explicit reference levels; factors without one use the first sorted level
    reference_levels: HashMap<String, String>,
}

impl SampleMetadata {
    pub fn new(sample_ids: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        for id in &sample_ids {
            if !seen.insert(id) {
                log::warn!("Duplicate sample ID detected: '{}'. Sample IDs should be unique.", id);
            }
        }
        Self {
            sample_ids,
            ..Self::default()
        }
    }

    fn check_len(&self, got: usize) -> Result<()> {
        if got != self.sample_ids.len() {
            return Err(SplineDeError::DimensionMismatch {
                expected: format!("{} values", self.sample_ids.len()),
                got: format!("{} values", got),
            });
        }
        Ok(())
    }

    /// Add (or replace) a categorical column
    pub fn add_condition(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        self.check_len(values.len())?;
        self.conditions.insert(name.to_string(), values);
        Ok(())
    }

    /// Add (or replace) a numeric column
    pub fn add_continuous(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        self.check_len(values.len())?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(SplineDeError::InvalidMetadata {
                reason: format!("numeric column '{}' contains non-finite values", name),
            });
        }
        self.continuous.insert(name.to_string(), values);
        Ok(())
    }

    /// Fix the reference level of a factor (default: alphabetically first level)
    pub fn set_reference_level(&mut self, name: &str, level: &str) -> Result<()> {
        let levels = self.levels(name).ok_or_else(|| SplineDeError::InvalidMetadata {
            reason: format!("factor '{}' not found", name),
        })?;
        if !levels.iter().any(|l| l == level) {
            return Err(SplineDeError::UnknownGroup {
                factor: name.to_string(),
                level: level.to_string(),
            });
        }
        self.reference_levels.insert(name.to_string(), level.to_string());
        Ok(())
    }

    pub fn has_condition(&self, name: &str) -> bool {
        self.conditions.contains_key(name)
    }

    pub fn has_continuous(&self, name: &str) -> bool {
        self.continuous.contains_key(name)
    }

    pub fn condition(&self, name: &str) -> Option<&Vec<String>> {
        self.conditions.get(name)
    }

    pub fn continuous(&self, name: &str) -> Option<&Vec<f64>> {
        self.continuous.get(name)
    }

    /// Sorted unique levels of a factor
    pub fn levels(&self, name: &str) -> Option<Vec<String>> {
        self.conditions.get(name).map(|values| {
            let mut unique = values.clone();
            unique.sort();
            unique.dedup();
            unique
        })
    }

    /// Reference level of a factor
    pub fn reference_level(&self, name: &str) -> Option<String> {
        self.reference_levels
            .get(name)
            .cloned()
            .or_else(|| self.levels(name).and_then(|l| l.first().cloned()))
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Sample indices carrying a given factor level
    pub fn samples_with_level(&self, name: &str, level: &str) -> Vec<usize> {
        self.conditions
            .get(name)
            .map(|values| {
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.as_str() == level)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Subset all columns to specific samples
    pub fn subset(&self, sample_indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = sample_indices.iter().find(|&&i| i >= self.n_samples()) {
            return Err(SplineDeError::InvalidMetadata {
                reason: format!("sample index {} out of range ({} samples)", bad, self.n_samples()),
            });
        }
        let new_ids = sample_indices
            .iter()
            .map(|&i| self.sample_ids[i].clone())
            .collect();

        let mut new_meta = SampleMetadata::new(new_ids);

        for (name, values) in &self.conditions {
            let picked = sample_indices.iter().map(|&i| values[i].clone()).collect();
            new_meta.add_condition(name, picked)?;
        }
        for (name, values) in &self.continuous {
            let picked = sample_indices.iter().map(|&i| values[i]).collect();
            new_meta.add_continuous(name, picked)?;
        }
        // A reference level that no longer has samples falls back to the default
        for (name, level) in &self.reference_levels {
            if new_meta.samples_with_level(name, level).is_empty() {
                log::warn!(
                    "Reference level '{}' of '{}' has no samples after subsetting",
                    level, name
                );
            } else {
                new_meta.reference_levels.insert(name.clone(), level.clone());
            }
        }

        Ok(new_meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn donor_metadata() -> SampleMetadata {
        let mut meta = SampleMetadata::new(vec![
            "s1".to_string(),
            "s2".to_string(),
            "s3".to_string(),
            "s4".to_string(),
        ]);
        meta.add_condition(
            "donor",
            vec![
                "1741_006".to_string(),
                "1741_006".to_string(),
                "0904_003".to_string(),
                "0904_003".to_string(),
            ],
        )
        .unwrap();
        meta.add_continuous("time", vec![0.0, 24.0, 0.0, 24.0]).unwrap();
        meta
    }

    #[test]
    fn test_levels_and_reference() {
        let meta = donor_metadata();
        assert_eq!(meta.levels("donor").unwrap(), vec!["0904_003", "1741_006"]);
        assert_eq!(meta.reference_level("donor").unwrap(), "0904_003");
        assert_eq!(meta.samples_with_level("donor", "1741_006"), vec![0, 1]);
    }

    #[test]
    fn test_explicit_reference_level() {
        let mut meta = donor_metadata();
        meta.set_reference_level("donor", "1741_006").unwrap();
        assert_eq!(meta.reference_level("donor").unwrap(), "1741_006");
        assert!(meta.set_reference_level("donor", "9999_999").is_err());
    }

    #[test]
    fn test_subset_keeps_numeric_columns() {
        let meta = donor_metadata();
        let sub = meta.subset(&[1, 3]).unwrap();
        assert_eq!(sub.sample_ids(), &["s2", "s4"]);
        assert_eq!(sub.continuous("time").unwrap(), &vec![24.0, 24.0]);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut meta = donor_metadata();
        assert!(meta.add_continuous("time", vec![1.0]).is_err());
    }
}
