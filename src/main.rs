//! spline_deseq command-line interface

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use log::{info, warn, LevelFilter};

use spline_deseq::cli::{Cli, Commands, KnotArgs};
use spline_deseq::prelude::*;

const PLOT_SIZE: (u32, u32) = (900, 600);

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Commands::Run {
            counts,
            samples,
            bundle,
            output,
            alpha,
            min_count,
            min_samples,
            knots,
            missing_titles,
            reference_donor,
            sf_type,
            fit_type,
            maxit,
            min_disp,
            outlier_sd,
            plot_top,
            grid_points,
            threads,
        } => build_config(
            alpha,
            min_count,
            min_samples,
            &knots,
            &missing_titles,
            reference_donor,
            &sf_type,
            &fit_type,
            maxit,
            min_disp,
            outlier_sd,
            grid_points,
        )
        .and_then(|config| {
            let input = match (counts, samples, bundle) {
                (_, _, Some(bundle)) => Input::Bundle(bundle),
                (Some(counts), Some(samples), None) => Input::Tables { counts, samples },
                _ => {
                    return Err(SplineDeError::InvalidInput {
                        reason: "either --bundle or both --counts and --samples are required"
                            .to_string(),
                    })
                }
            };
            run_analysis(&input, Path::new(&output), &config, plot_top, threads)
        }),
        Commands::Basis {
            times,
            at,
            knots,
            prefix,
        } => print_basis(&times, &at, &knots, &prefix),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

enum Input {
    Tables { counts: String, samples: String },
    Bundle(String),
}

#[allow(clippy::too_many_arguments)]
fn build_config(
    alpha: f64,
    min_count: f64,
    min_samples: usize,
    knots: &KnotArgs,
    missing_titles: &str,
    reference_donor: Option<String>,
    sf_type: &str,
    fit_type: &str,
    maxit: usize,
    min_disp: f64,
    outlier_sd: f64,
    grid_points: usize,
) -> Result<AnalysisConfig> {
    let mut config = AnalysisConfig {
        filter: CountFilter::new(min_count, min_samples),
        knots: knots.placement()?,
        intercept: knots.intercept,
        alpha,
        grid_points,
        missing_titles: missing_titles.parse()?,
        reference_donor,
        ..Default::default()
    };
    config.fitter.size_factor_method = sf_type.parse()?;
    config.fitter.fit_type = fit_type.parse()?;
    config.fitter.glm.maxit = maxit;
    config.fitter.dispersion.maxit = maxit;
    config.fitter.dispersion.min_disp = min_disp;
    config.fitter.dispersion.outlier_sd = outlier_sd;
    Ok(config)
}

fn load_input(input: &Input) -> Result<(CountMatrix, SampleMetadata)> {
    match input {
        Input::Tables { counts, samples } => {
            info!("Loading count matrix from: {}", counts);
            let matrix = read_count_matrix(counts)?;
            info!("  {} genes, {} samples", matrix.n_genes(), matrix.n_samples());

            info!("Loading sample table from: {}", samples);
            let table = read_sample_table(samples)?;
            let table = align_samples(&matrix, &table)?;
            Ok((matrix, table))
        }
        Input::Bundle(path) => {
            info!("Loading experiment bundle from: {}", path);
            let (matrix, table) = read_experiment_bundle(path)?;
            info!("  {} genes, {} samples", matrix.n_genes(), matrix.n_samples());
            Ok((matrix, table))
        }
    }
}

fn run_analysis(
    input: &Input,
    output_dir: &Path,
    config: &AnalysisConfig,
    plot_top: usize,
    threads: usize,
) -> Result<()> {
    if threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok();
    }

    let (counts, samples) = load_input(input)?;
    let analysis = run_spline_analysis(&counts, &samples, config)?;

    fs::create_dir_all(output_dir)?;
    let out = |name: &str| -> PathBuf { output_dir.join(name) };

    info!("Writing results to: {}", output_dir.display());
    write_ranked(out("ranked.tsv"), &analysis.ranked)?;
    write_results(out("results.tsv"), &analysis.fit.results)?;
    write_coefficients(out("coefficients.tsv"), &analysis.fit.coefficients)?;

    let run_info = serde_json::json!({
        "config": config,
        "spline": analysis.spline,
        "basis_columns": analysis.basis_names,
        "full_formula": analysis.full,
        "reduced_formula": analysis.reduced,
        "size_factors": analysis.fit.size_factors.to_vec(),
        "sample_ids": analysis.counts.sample_ids(),
    });
    fs::write(out("analysis.json"), serde_json::to_string_pretty(&run_info)?)?;

    if plot_top > 0 {
        if analysis.ranked.is_empty() {
            warn!("No gene with padj < {}, skipping plots", config.alpha);
        }
        for gene in analysis.ranked.iter().take(plot_top) {
            let path = out(&format!("{}.svg", sanitize_file_name(&gene.gene_id)));
            analysis.plot_gene(&gene.gene_id, &path, PLOT_SIZE)?;
        }
    }

    println!("{}", analysis.fit.results.summary(config.alpha));
    Ok(())
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn print_basis(times: &[f64], at: &[f64], knots: &KnotArgs, prefix: &str) -> Result<()> {
    let spline = NaturalSpline::from_data(times, &knots.placement()?, knots.intercept)?;
    let points = if at.is_empty() { times } else { at };
    let basis = spline.basis(points)?;

    info!(
        "Interior knots {:?}, boundary knots {:?}",
        spline.knots(),
        spline.boundary_knots()
    );
    println!("time\t{}", spline.column_names(prefix).join("\t"));
    for (t, row) in points.iter().zip(basis.rows()) {
        let cells: Vec<String> = row.iter().map(|v| format!("{:.6}", v)).collect();
        println!("{}\t{}", t, cells.join("\t"));
    }
    Ok(())
}
