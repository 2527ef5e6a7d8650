pub mod data;
pub mod layout;
pub mod likelihood;
pub mod mode;
pub mod model;
pub mod predictor;
pub mod priors;
pub mod summary;
pub mod table;

pub use data::{ModelData, ModelDataBuilder, Observation, ObservationKind};
pub use likelihood::{LogDensity, SurvivalPosterior};
pub use mode::{ModeOptions, ModeResult, find_mode};
pub use model::{FittedHazard, ModelError, ModelSpec};
pub use priors::{Prior, PriorSet};
pub use summary::{Profile, SummaryOptions, summarize};
