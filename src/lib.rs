//! Schema-driven netCDF writer for oceanographic glider telemetry.
//!
//! Variables are declared from JSON descriptors, filled one telemetry record
//! at a time, flagged for quality, and summarized into file-level bounds when
//! the file closes. Files can be reopened and appended to.

pub mod bounds;
pub mod clock;
pub mod config;
pub mod derived;
pub mod error;
pub mod format;
pub mod history;
pub mod insert;
pub mod materialize;
pub mod profile;
pub mod qc;
pub mod schema;
pub mod session;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{CompanionRule, GliderConfig, WriterConfig};
pub use derived::{DerivedQuantities, NoDerived};
pub use error::{Error, Result};
pub use format::{Dataset, NcFile, OpenMode};
pub use insert::{Record, Sample};
pub use qc::{QcEngine, QcEvaluator, QcFlag, SeriesEvaluator, QC_FLAGS};
pub use schema::{RegistrationState, Registry, VariableDescriptor};
pub use session::{with_session, GliderSession, SessionBuilder, SessionState};
