//! Generalized Linear Model fitting for negative binomial data

mod design;
mod fitting;
mod formula;
mod negative_binomial;

pub use design::{check_full_rank, create_design_matrix, DesignColumn, DesignInfo};
pub use fitting::{fit_glm, fit_single_gene, GlmFitParams, GlmFitResult};
pub use formula::Formula;
pub use negative_binomial::{
    dispersion_log_posterior, dispersion_log_posterior_deriv, nb_log_likelihood, nb_mean,
    nb_weight, LogAlphaPrior, MAX_LFC_BETA, MIN_MU,
};
