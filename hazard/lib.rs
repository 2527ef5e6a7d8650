#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod basis;
pub mod distribution;
pub mod quadrature;
pub mod quantile;
pub mod recycle;
pub mod rmst;

#[path = "../shared/math.rs"]
pub mod math;

// Posterior assembly, mode finding and summaries
#[path = "../fit/mod.rs"]
pub mod fit;

pub use basis::{KnotSet, MSplineBasis, basis, default_knots};
pub use distribution::{DistributionError, SurvMSpline, normalize_coefs};
pub use quantile::{quantile, random_variates};
pub use rmst::{mean_survival, rmst};
