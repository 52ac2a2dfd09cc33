//! Command-line interface for spline_deseq

use clap::{Args, Parser, Subcommand};

use crate::error::Result;
use crate::spline::KnotPlacement;

#[derive(Parser)]
#[command(name = "spline_deseq")]
#[command(version)]
#[command(about = "Spline-based differential expression for RNA-seq time courses")]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Interior knot selection shared by both subcommands
#[derive(Args, Debug, Clone)]
pub struct KnotArgs {
    /// Interior knots in hours, comma separated
    #[arg(long, value_delimiter = ',', conflicts_with = "df",
        long_help = "Explicit interior knots (hours), comma separated.\n\
            Each knot must lie strictly inside the observed time range.")]
    pub knots: Vec<f64>,

    /// Number of basis columns; knots at equally spaced quantiles [default: 3]
    #[arg(long,
        long_help = "Degrees of freedom of the natural spline.\n\
            R equivalent: ns(time, df = DF). Without --knots or --df,\n\
            three columns are used (two interior knots).")]
    pub df: Option<usize>,

    /// Include an intercept column in the spline basis
    #[arg(long)]
    pub intercept: bool,
}

impl KnotArgs {
    pub fn placement(&self) -> Result<KnotPlacement> {
        if !self.knots.is_empty() {
            return Ok(KnotPlacement::Explicit(self.knots.clone()));
        }
        match self.df {
            Some(df) => KnotPlacement::from_df(df, self.intercept),
            None => Ok(KnotPlacement::default()),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full spline analysis
    #[command(
        long_about = "Run the full spline analysis\n\n\
            Parses donor and timepoint from the sample titles, filters low-count genes,\n\
            fits ~ donor + donor:fun1..K against ~ donor + fun1..K with a negative\n\
            binomial GLM, and writes ranked results, coefficients and curve plots.",
        after_long_help = "\
Examples:
  spline_deseq run -c counts.tsv -s samples.tsv -o out/

  spline_deseq run --bundle experiment.json --df 4 --alpha 0.01 --plot-top 5"
    )]
    Run {
        /// Path to count matrix (CSV or TSV)
        #[arg(short, long, requires = "samples", required_unless_present = "bundle",
            long_help = "Path to count matrix file (CSV or TSV).\n\
                Format: first column = gene IDs, remaining columns = samples.")]
        counts: Option<String>,

        /// Path to sample table (CSV or TSV) with a 'title' column
        #[arg(short, long, requires = "counts",
            long_help = "Path to sample table file (CSV or TSV).\n\
                Format: first column = sample IDs, plus a 'title' column such as\n\
                '1741_006_24hr' from which donor and timepoint are parsed.")]
        samples: Option<String>,

        /// JSON experiment bundle instead of --counts/--samples
        #[arg(short, long, conflicts_with_all = ["counts", "samples"])]
        bundle: Option<String>,

        /// Output directory [default: spline_deseq_out]
        #[arg(short, long, default_value = "spline_deseq_out")]
        output: String,

        /// Adjusted p-value threshold [default: 0.05]
        #[arg(short, long, default_value = "0.05")]
        alpha: f64,

        /// Minimum read count for a sample to support a gene [default: 10]
        #[arg(long, default_value = "10")]
        min_count: f64,

        /// Minimum number of supporting samples [default: 5]
        #[arg(long, default_value = "5")]
        min_samples: usize,

        #[command(flatten)]
        knots: KnotArgs,

        /// Samples with unparseable titles: exclude or fail [default: exclude]
        #[arg(long, default_value = "exclude")]
        missing_titles: String,

        /// Reference donor for the contrasts [default: alphabetically first]
        #[arg(long, value_name = "DONOR",
            long_help = "Donor used as the reference level of the donor factor.\n\
                Offsets are reported as donor_<level>_vs_<DONOR>. Without this,\n\
                the alphabetically first donor is the reference.")]
        reference_donor: Option<String>,

        /// Size factor estimation method: ratio or poscounts [default: ratio]
        #[arg(long, default_value = "ratio")]
        sf_type: String,

        /// Dispersion trend fit: parametric or mean [default: parametric]
        #[arg(long, default_value = "parametric")]
        fit_type: String,

        /// Maximum IRLS iterations [default: 100]
        #[arg(long, default_value = "100")]
        maxit: usize,

        /// Minimum dispersion value [default: 1e-8]
        #[arg(long, default_value = "1e-8")]
        min_disp: f64,

        /// Outlier SD threshold for MAP dispersion shrinkage [default: 2.0]
        #[arg(long, default_value = "2.0")]
        outlier_sd: f64,

        /// Plot curves for the N best-ranked genes [default: 1]
        #[arg(long, default_value = "1")]
        plot_top: usize,

        /// Points on the curve time grid [default: 200]
        #[arg(long, default_value = "200")]
        grid_points: usize,

        /// Number of threads (0 = auto) [default: 0]
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,
    },

    /// Print the natural spline basis for a set of timepoints
    #[command(after_long_help = "\
Examples:
  spline_deseq basis --times 0,2,4,8,12,24,36,48
  spline_deseq basis --times 0,6,12,24,48 --knots 12 --at 0,3,6,9")]
    Basis {
        /// Observed timepoints defining the boundary and quantile knots
        #[arg(long, value_delimiter = ',', required = true)]
        times: Vec<f64>,

        /// Evaluate at these points instead of --times
        #[arg(long, value_delimiter = ',')]
        at: Vec<f64>,

        #[command(flatten)]
        knots: KnotArgs,

        /// Basis column prefix [default: fun]
        #[arg(long, default_value = "fun")]
        prefix: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["spline_deseq", "run", "-c", "c.tsv", "-s", "s.tsv"]).unwrap();
        match cli.command {
            Commands::Run {
                counts,
                alpha,
                min_count,
                min_samples,
                knots,
                plot_top,
                reference_donor,
                ..
            } => {
                assert_eq!(counts.as_deref(), Some("c.tsv"));
                assert_eq!(alpha, 0.05);
                assert_eq!(min_count, 10.0);
                assert_eq!(min_samples, 5);
                assert!(knots.knots.is_empty());
                assert_eq!(knots.df, None);
                assert_eq!(plot_top, 1);
                assert_eq!(reference_donor, None);
                assert_eq!(knots.placement().unwrap(), KnotPlacement::Quantiles(2));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_bundle_conflicts_with_counts() {
        let err = Cli::try_parse_from([
            "spline_deseq", "run", "--bundle", "e.json", "-c", "c.tsv", "-s", "s.tsv",
        ]);
        assert!(err.is_err());
        assert!(Cli::try_parse_from(["spline_deseq", "run"]).is_err());
    }

    #[test]
    fn test_reference_donor_flag() {
        let cli = Cli::try_parse_from([
            "spline_deseq", "run", "--bundle", "e.json", "--reference-donor", "1741_007",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { reference_donor, .. } => {
                assert_eq!(reference_donor.as_deref(), Some("1741_007"))
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_basis_lists() {
        let cli = Cli::try_parse_from([
            "spline_deseq", "-v", "basis", "--times", "0,12,24", "--knots", "6,18",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Basis { times, knots, at, .. } => {
                assert_eq!(times, vec![0.0, 12.0, 24.0]);
                assert_eq!(knots.knots, vec![6.0, 18.0]);
                assert!(at.is_empty());
                assert_eq!(
                    knots.placement().unwrap(),
                    KnotPlacement::Explicit(vec![6.0, 18.0])
                );
            }
            _ => panic!("expected basis"),
        }
    }
}
