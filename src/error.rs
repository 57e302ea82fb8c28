use thiserror::Error;

use crate::ephemeris::Error as EphemerisError;
use crate::filter::Error as FilterError;
use crate::lambda::Error as AmbiguityError;
use crate::pipeline::Error as PipelineError;
use crate::spp::Error as SppError;

/// Errors that can terminate a processing run outright (Config/Input, per §7).
/// Per-epoch degradable failures are represented by the component error types
/// and are never converted into this variant by the pipeline driver.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    #[error("bad option: {0}")]
    Config(String),
    #[error("bad input: {0}")]
    Input(String),
    #[error("ephemeris: {0}")]
    Ephemeris(#[from] EphemerisError),
    #[error("geometry: {0}")]
    Geometry(#[from] crate::geometry::Error),
    #[error("spp: {0}")]
    Spp(#[from] SppError),
    #[error("filter: {0}")]
    Filter(#[from] FilterError),
    #[error("ambiguity: {0}")]
    Ambiguity(#[from] AmbiguityError),
}

impl From<PipelineError> for Error {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Config(msg) => Error::Config(msg),
            PipelineError::Input(msg) => Error::Input(msg),
        }
    }
}
