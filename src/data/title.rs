//! Donor and timepoint extraction from free-text sample titles
//!
//! Titles follow `<digits>_<digits>_..._<digits>hr`, e.g. `1741_006_24hr`.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{CountMatrix, SampleMetadata};
use crate::error::{Result, SplineDeError};

lazy_static! {
    static ref DONOR_RE: Regex = Regex::new(r"^(\d+_\d+)").unwrap();
    static ref TIME_RE: Regex = Regex::new(r"(\d+)hr$").unwrap();
}

/// Column holding the raw sample title
pub const TITLE_COLUMN: &str = "title";
/// Derived donor factor column
pub const DONOR_COLUMN: &str = "donor";
/// Derived numeric timepoint column (hours)
pub const TIME_COLUMN: &str = "time";

/// Fields parsed from one sample title. A field is `None` when its pattern
/// does not match.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTitle {
    pub donor: Option<String>,
    pub time: Option<f64>,
}

/// Parse donor id and timepoint (hours) from a sample title
pub fn parse_sample_title(title: &str) -> SampleTitle {
    let title = title.trim();
    let donor = DONOR_RE
        .captures(title)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let time = TIME_RE
        .captures(title)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok());
    SampleTitle { donor, time }
}

/// What to do with samples whose title yields no donor or no timepoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MissingTitlePolicy {
    /// Drop the sample from counts and metadata, with a warning
    #[default]
    Exclude,
    /// Abort with `InvalidMetadata`
    Fail,
}

impl std::str::FromStr for MissingTitlePolicy {
    type Err = SplineDeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "exclude" => Ok(Self::Exclude),
            "fail" => Ok(Self::Fail),
            _ => Err(SplineDeError::InvalidInput {
                reason: format!("unknown missing-title policy '{}' (use exclude or fail)", s),
            }),
        }
    }
}

/// Derive `donor` and `time` columns from the `title` column.
///
/// Returns the counts and metadata restricted to samples with both fields
/// present. The derived columns are never rewritten afterwards.
pub fn annotate_samples(
    counts: &CountMatrix,
    metadata: &SampleMetadata,
    policy: MissingTitlePolicy,
) -> Result<(CountMatrix, SampleMetadata)> {
    if counts.sample_ids() != metadata.sample_ids() {
        return Err(SplineDeError::InvalidMetadata {
            reason: "Sample IDs in counts and metadata do not match".to_string(),
        });
    }
    let titles = metadata
        .condition(TITLE_COLUMN)
        .ok_or_else(|| SplineDeError::InvalidMetadata {
            reason: format!("sample table has no '{}' column", TITLE_COLUMN),
        })?;

    let mut keep = Vec::with_capacity(titles.len());
    let mut donors = Vec::with_capacity(titles.len());
    let mut times = Vec::with_capacity(titles.len());
    let mut unmatched = Vec::new();

    for (i, title) in titles.iter().enumerate() {
        match parse_sample_title(title) {
            SampleTitle {
                donor: Some(donor),
                time: Some(time),
            } => {
                keep.push(i);
                donors.push(donor);
                times.push(time);
            }
            parsed => {
                unmatched.push(format!(
                    "{} ('{}': donor {}, time {})",
                    metadata.sample_ids()[i],
                    title,
                    if parsed.donor.is_some() { "ok" } else { "missing" },
                    if parsed.time.is_some() { "ok" } else { "missing" },
                ));
            }
        }
    }

    if !unmatched.is_empty() {
        match policy {
            MissingTitlePolicy::Fail => {
                return Err(SplineDeError::InvalidMetadata {
                    reason: format!("unparseable sample titles: {}", unmatched.join(", ")),
                });
            }
            MissingTitlePolicy::Exclude => {
                for sample in &unmatched {
                    log::warn!("Excluding sample {}", sample);
                }
            }
        }
    }

    if keep.is_empty() {
        return Err(SplineDeError::EmptyData {
            reason: "no sample title yields both a donor and a timepoint".to_string(),
        });
    }

    let counts = counts.subset_samples(&keep)?;
    let mut metadata = metadata.subset(&keep)?;
    metadata.add_condition(DONOR_COLUMN, donors)?;
    metadata.add_continuous(TIME_COLUMN, times)?;

    log::info!(
        "Annotated {} samples ({} donors)",
        metadata.n_samples(),
        metadata.levels(DONOR_COLUMN).map(|l| l.len()).unwrap_or(0)
    );

    Ok((counts, metadata))
}
