//! spline_deseq: spline-based differential expression for RNA-seq time courses
//!
//! Donor and timepoint are parsed from sample titles, each gene is fitted
//! with a negative binomial GLM carrying a donor-specific natural spline
//! trend, and a likelihood ratio test against a shared-trend model finds
//! genes whose time profile differs between donors.
//!
//! # Example
//!
//! ```ignore
//! use spline_deseq::prelude::*;
//!
//! let counts = read_count_matrix("counts.tsv")?;
//! let samples = read_sample_table("samples.tsv")?;
//! let samples = align_samples(&counts, &samples)?;
//!
//! let analysis = run_spline_analysis(&counts, &samples, &AnalysisConfig::default())?;
//! for gene in analysis.ranked.iter().take(10) {
//!     println!("{}\t{:.3e}", gene.gene_id, gene.padj);
//! }
//! ```

pub mod cli;
pub mod curve;
pub mod data;
pub mod dispersion;
pub mod error;
pub mod filter;
pub mod glm;
pub mod io;
pub mod model;
pub mod normalization;
pub mod plot;
pub mod spline;
pub mod stats;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::curve::{reconstruct_all_curves, reconstruct_curve, CurveLayout, FittedCurve};
    pub use crate::data::{
        annotate_samples, parse_sample_title, CountMatrix, MissingTitlePolicy, SampleMetadata,
        DONOR_COLUMN, TIME_COLUMN, TITLE_COLUMN,
    };
    pub use crate::dispersion::{DispersionParams, TrendFitMethod};
    pub use crate::error::{Result, SplineDeError};
    pub use crate::filter::CountFilter;
    pub use crate::glm::{create_design_matrix, Formula, GlmFitParams};
    pub use crate::io::{
        align_samples, rank_significant, read_count_matrix, read_experiment_bundle,
        read_sample_table, write_coefficients, write_ranked, write_results, LrtResults,
        RankedGene,
    };
    pub use crate::model::{CoefficientTable, ModelFit, ModelFitter, NbinomLrt};
    pub use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    pub use crate::plot::{observed_points, plot_gene_curves, ObservedPoint};
    pub use crate::spline::{linspace, KnotPlacement, NaturalSpline};
    pub use crate::{run_spline_analysis, run_spline_analysis_with, AnalysisConfig, SplineAnalysis};
}

use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use prelude::*;
use spline::append_basis_columns;

/// Pipeline settings. Defaults reproduce the standard analysis: genes with
/// >= 10 reads in >= 5 samples, three natural spline columns without
/// intercept, padj < 0.05.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub filter: CountFilter,
    pub knots: KnotPlacement,
    /// Include the intercept column in the spline basis
    pub intercept: bool,
    /// Basis columns are named `<prefix>1..<prefix>K`
    pub spline_prefix: String,
    /// Adjusted p-value threshold for ranking
    pub alpha: f64,
    /// Points on the dense time grid used for curves
    pub grid_points: usize,
    pub missing_titles: MissingTitlePolicy,
    /// Reference donor of the contrasts; alphabetically first when unset
    pub reference_donor: Option<String>,
    pub fitter: NbinomLrt,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            filter: CountFilter::default(),
            knots: KnotPlacement::default(),
            intercept: false,
            spline_prefix: "fun".to_string(),
            alpha: 0.05,
            grid_points: 200,
            missing_titles: MissingTitlePolicy::default(),
            reference_donor: None,
            fitter: NbinomLrt::default(),
        }
    }
}

/// Output of one pipeline run
#[derive(Debug, Clone)]
pub struct SplineAnalysis {
    /// Counts after title annotation and filtering
    pub counts: CountMatrix,
    /// Annotated covariates, including the basis columns
    pub covariates: SampleMetadata,
    /// Basis fitted on the observed timepoints
    pub spline: NaturalSpline,
    pub basis_names: Vec<String>,
    pub full: Formula,
    pub reduced: Formula,
    pub fit: ModelFit,
    pub layout: CurveLayout,
    /// Genes with padj < alpha, ascending raw p-value
    pub ranked: Vec<RankedGene>,
    pub grid_points: usize,
}

impl SplineAnalysis {
    /// Evenly spaced grid spanning the boundary knots
    pub fn time_grid(&self) -> Vec<f64> {
        let (lo, hi) = self.spline.boundary_knots();
        linspace(lo, hi, self.grid_points)
    }

    /// Fitted curves of one gene for every donor over the time grid
    pub fn curves(&self, gene_id: &str) -> Result<Vec<FittedCurve>> {
        reconstruct_all_curves(
            &self.fit.coefficients,
            &self.layout,
            &self.spline,
            gene_id,
            &self.time_grid(),
        )
    }

    /// Observed normalized expression of one gene
    pub fn observed(&self, gene_id: &str) -> Result<Vec<ObservedPoint>> {
        observed_points(
            &self.counts,
            &self.fit.size_factors,
            &self.covariates,
            gene_id,
            DONOR_COLUMN,
            TIME_COLUMN,
        )
    }

    /// Write the points-and-curves SVG of one gene
    pub fn plot_gene<P: AsRef<Path>>(&self, gene_id: &str, path: P, size: (u32, u32)) -> Result<()> {
        let points = self.observed(gene_id)?;
        let curves = self.curves(gene_id)?;
        plot_gene_curves(path, gene_id, &points, &curves, size)
    }
}

/// Run the whole pipeline with the fitter from `config`
pub fn run_spline_analysis(
    counts: &CountMatrix,
    metadata: &SampleMetadata,
    config: &AnalysisConfig,
) -> Result<SplineAnalysis> {
    run_spline_analysis_with(counts, metadata, config, &config.fitter)
}

/// Run the whole pipeline with any [`ModelFitter`]:
/// annotate titles, filter genes, build the spline basis, fit
/// `~ donor + donor:fun*` against `~ donor + fun*`, rank genes.
pub fn run_spline_analysis_with(
    counts: &CountMatrix,
    metadata: &SampleMetadata,
    config: &AnalysisConfig,
    fitter: &dyn ModelFitter,
) -> Result<SplineAnalysis> {
    if !(config.alpha > 0.0 && config.alpha <= 1.0) {
        return Err(SplineDeError::InvalidInput {
            reason: format!("alpha must be in (0, 1], got {}", config.alpha),
        });
    }

    info!("Parsing donor and timepoint from sample titles");
    let (counts, mut covariates) = annotate_samples(counts, metadata, config.missing_titles)?;
    let counts = config.filter.apply(&counts)?;
    if let Some(donor) = &config.reference_donor {
        covariates.set_reference_level(DONOR_COLUMN, donor)?;
        info!("Reference donor: {}", donor);
    }

    let times = covariates
        .continuous(TIME_COLUMN)
        .ok_or_else(|| SplineDeError::InvalidMetadata {
            reason: format!("no '{}' column after annotation", TIME_COLUMN),
        })?
        .clone();
    let spline = NaturalSpline::from_data(&times, &config.knots, config.intercept)?;
    info!(
        "Natural spline: {} basis columns, interior knots {:?}, boundary {:?}",
        spline.n_basis(),
        spline.knots(),
        spline.boundary_knots()
    );
    let basis_names = append_basis_columns(&mut covariates, &spline, TIME_COLUMN, &config.spline_prefix)?;

    let full = Formula::group_trends(DONOR_COLUMN, &basis_names)?;
    let reduced = Formula::shared_trend(DONOR_COLUMN, &basis_names)?;
    let fit = fitter.fit(&counts, &covariates, &full, &reduced)?;
    let layout = CurveLayout::from_model(&fit.full_design, DONOR_COLUMN, &spline, &basis_names)?;

    let ranked = rank_significant(&fit.results, config.alpha);
    info!(
        "{} of {} genes with padj < {}",
        ranked.len(),
        fit.results.n_genes(),
        config.alpha
    );

    Ok(SplineAnalysis {
        counts,
        covariates,
        spline,
        basis_names,
        full,
        reduced,
        fit,
        layout,
        ranked,
        grid_points: config.grid_points,
    })
}
