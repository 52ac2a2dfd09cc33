//! SVG plot of observed expression and fitted curves per group

use std::path::Path;

use ndarray::{s, Array1};
use plotters::prelude::*;
use serde::{Deserialize, Serialize};

use crate::curve::FittedCurve;
use crate::data::{CountMatrix, SampleMetadata};
use crate::error::{Result, SplineDeError};
use crate::normalization::{log2_normalized, normalized_counts};

/// Pseudocount added to normalized counts before log2
pub const PLOT_PSEUDOCOUNT: f64 = 0.5;

/// One sample of one gene, on the plotting scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedPoint {
    pub level: String,
    pub time: f64,
    /// log2(normalized count + 0.5)
    pub log2_expression: f64,
}

/// Observed points of `gene_id`, grouped by the `group` column and placed
/// at the `time` column
pub fn observed_points(
    counts: &CountMatrix,
    size_factors: &Array1<f64>,
    metadata: &SampleMetadata,
    gene_id: &str,
    group: &str,
    time: &str,
) -> Result<Vec<ObservedPoint>> {
    let gene = counts
        .gene_index(gene_id)
        .ok_or_else(|| SplineDeError::UnknownGene {
            gene_id: gene_id.to_string(),
        })?;
    let levels = metadata
        .condition(group)
        .ok_or_else(|| SplineDeError::InvalidMetadata {
            reason: format!("no factor column '{}'", group),
        })?;
    let times = metadata
        .continuous(time)
        .ok_or_else(|| SplineDeError::InvalidMetadata {
            reason: format!("no numeric column '{}'", time),
        })?;
    if size_factors.len() != counts.n_samples() || levels.len() != counts.n_samples() {
        return Err(SplineDeError::DimensionMismatch {
            expected: format!("{} samples", counts.n_samples()),
            got: format!("{} size factors, {} metadata rows", size_factors.len(), levels.len()),
        });
    }

    let normalized = normalized_counts(counts.counts().slice(s![gene..gene + 1, ..]), size_factors);
    let expression = log2_normalized(&normalized, PLOT_PSEUDOCOUNT);

    Ok(expression
        .row(0)
        .iter()
        .enumerate()
        .map(|(j, &value)| ObservedPoint {
            level: levels[j].clone(),
            time: times[j],
            log2_expression: value,
        })
        .collect())
}

fn plot_error<E: std::fmt::Display>(e: E) -> SplineDeError {
    SplineDeError::Plot {
        reason: e.to_string(),
    }
}

/// Axis range padded by 5% on both sides
fn padded_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo > hi {
        return None;
    }
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 0.5 };
    Some((lo - pad, hi + pad))
}

/// Draw points and curves for one gene into an SVG file, one colour per
/// group level
pub fn plot_gene_curves<P: AsRef<Path>>(
    path: P,
    gene_id: &str,
    points: &[ObservedPoint],
    curves: &[FittedCurve],
    size: (u32, u32),
) -> Result<()> {
    let x_range = padded_range(
        points
            .iter()
            .map(|p| p.time)
            .chain(curves.iter().flat_map(|c| c.times.iter().copied())),
    );
    let y_range = padded_range(
        points
            .iter()
            .map(|p| p.log2_expression)
            .chain(curves.iter().flat_map(|c| c.log2_expression.iter().copied())),
    );
    let ((x_min, x_max), (y_min, y_max)) = match (x_range, y_range) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(SplineDeError::Plot {
                reason: format!("nothing to plot for gene {}", gene_id),
            })
        }
    };

    let mut levels: Vec<&str> = points
        .iter()
        .map(|p| p.level.as_str())
        .chain(curves.iter().map(|c| c.level.as_str()))
        .collect();
    levels.sort_unstable();
    levels.dedup();

    let root = SVGBackend::new(path.as_ref(), size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(gene_id, ("sans-serif", 22))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(55)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .x_desc("time (hr)")
        .y_desc("log2(normalized count + 0.5)")
        .draw()
        .map_err(plot_error)?;

    for (i, level) in levels.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        chart
            .draw_series(
                points
                    .iter()
                    .filter(|p| p.level == *level)
                    .map(|p| Circle::new((p.time, p.log2_expression), 4, color.filled())),
            )
            .map_err(plot_error)?;

        if let Some(curve) = curves.iter().find(|c| c.level == *level) {
            chart
                .draw_series(LineSeries::new(
                    curve
                        .times
                        .iter()
                        .copied()
                        .zip(curve.log2_expression.iter().copied()),
                    color.stroke_width(2),
                ))
                .map_err(plot_error)?
                .label(level.to_string())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
        }
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(plot_error)?;
    root.present().map_err(plot_error)?;
    log::info!("Wrote plot for {} to {}", gene_id, path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn curve(level: &str) -> FittedCurve {
        FittedCurve {
            gene_id: "g1".into(),
            level: level.into(),
            times: vec![0.0, 12.0, 24.0],
            log2_expression: vec![3.0, 4.0, 3.5],
        }
    }

    #[test]
    fn test_observed_points_scale() {
        let counts = CountMatrix::new(
            array![[1.5, 8.0]],
            vec!["g1".into()],
            vec!["s1".into(), "s2".into()],
        )
        .unwrap();
        let mut meta = SampleMetadata::new(vec!["s1".into(), "s2".into()]);
        meta.add_condition("donor", vec!["a".into(), "b".into()]).unwrap();
        meta.add_continuous("time", vec![0.0, 24.0]).unwrap();
        let sf = array![1.0, 2.0];
        let points = observed_points(&counts, &sf, &meta, "g1", "donor", "time").unwrap();
        assert_eq!(points[0].log2_expression, 1.0);
        assert_eq!(points[1].log2_expression, (4.5f64).log2());
        assert_eq!(points[1].level, "b");
        assert!(matches!(
            observed_points(&counts, &sf, &meta, "g9", "donor", "time"),
            Err(SplineDeError::UnknownGene { .. })
        ));
    }

    #[test]
    fn test_writes_svg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g1.svg");
        let points = vec![
            ObservedPoint { level: "a".into(), time: 0.0, log2_expression: 3.1 },
            ObservedPoint { level: "b".into(), time: 24.0, log2_expression: 3.4 },
        ];
        plot_gene_curves(&path, "g1", &points, &[curve("a"), curve("b")], (640, 480)).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("<circle"));
    }

    #[test]
    fn test_empty_plot_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = plot_gene_curves(dir.path().join("x.svg"), "g1", &[], &[], (100, 100));
        assert!(matches!(err, Err(SplineDeError::Plot { .. })));
    }
}
