//! One open glider file: schema, cursor and finalization.
//!
//! ```no_run
//! use glider_netcdf::{GliderSession, OpenMode, Record};
//!
//! let mut session = GliderSession::builder("usf-bass_profile.nc")
//!     .mode(OpenMode::Write)
//!     .open()?;
//! session.set_segment_id(3)?;
//! session.insert_record(&Record::new().with("timestamp", 1_393_990_217.0))?;
//! session.close()?;
//! # Ok::<(), glider_netcdf::Error>(())
//! ```

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use crate::bounds;
use crate::clock::{Clock, SystemClock};
use crate::config::{InstrumentDescription, JsonMap, WriterConfig};
use crate::derived::{DerivedQuantities, NoDerived};
use crate::error::{Error, Result};
use crate::format::{Attributes, DataType, Dataset, NcFile, OpenMode, Scalar, FILL_VALUE_ATTR};
use crate::history;
use crate::insert::{self, Inserter, Record, Sample};
use crate::profile;
use crate::qc::{QcEngine, QcEvaluator};
use crate::schema::{json_attributes, Registry, VariableDescriptor};

pub const TRAJECTORY: &str = "trajectory";
pub const TRAJECTORY_STRLEN: &str = "traj_strlen";
pub const SEGMENT_ID: &str = "segment_id";
pub const PROFILE_ID: &str = "profile_id";
pub const PLATFORM: &str = "platform";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    /// Open with no time rows yet.
    OpenEmpty,
    OpenStreaming,
}

pub struct SessionBuilder {
    path: PathBuf,
    mode: OpenMode,
    config: WriterConfig,
    schema: BTreeMap<String, VariableDescriptor>,
    qc: QcEngine,
    clock: Box<dyn Clock>,
    derived: Box<dyn DerivedQuantities>,
}

impl SessionBuilder {
    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn config(mut self, config: WriterConfig) -> Self {
        self.config = config;
        self
    }

    /// Descriptors registered when the file opens.
    pub fn schema(mut self, schema: BTreeMap<String, VariableDescriptor>) -> Self {
        self.schema = schema;
        self
    }

    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn derived(mut self, derived: impl DerivedQuantities + 'static) -> Self {
        self.derived = Box::new(derived);
        self
    }

    pub fn evaluator(mut self, key: impl Into<String>, evaluator: impl QcEvaluator + 'static) -> Self {
        self.qc.set_evaluator(key, evaluator);
        self
    }

    /// Open the file, set up the time coordinate, register the schema and
    /// stamp the history.
    ///
    /// # Errors
    ///
    /// - `Error::Io`: the file cannot be created, read or is read-only
    /// - `Error::Corrupt`: an existing file does not decode
    /// - `Error::InvalidDescriptor`: a schema entry cannot be materialized
    pub fn open(self) -> Result<GliderSession> {
        let Self {
            path,
            mode,
            config,
            schema,
            qc,
            clock,
            derived,
        } = self;

        let mut file = NcFile::open(&path, mode)?;
        let ds = file.dataset_mut()?;
        let mut registry = Registry::new(*qc.vocabulary(), config.time_variable.as_str());

        let time = schema
            .get(&config.time_key)
            .cloned()
            .unwrap_or_else(|| VariableDescriptor::time(&config.time_variable));
        if time.name != config.time_variable {
            return Err(Error::invalid_descriptor(
                &config.time_key,
                format!("time variable must be named `{}`", config.time_variable),
            ));
        }
        registry.register(ds, &config.time_key, time)?;
        registry.register_all(ds, &schema, config.lazy_materialize)?;
        history::stamp(&mut ds.attrs, &config.program, clock.now_utc());

        let inserter = Inserter::resume(
            ds,
            &config.time_key,
            &config.time_variable,
            config.companion_rules.clone(),
        );
        log::info!(
            "opened {} ({:?}, {} records)",
            path.display(),
            mode,
            inserter.cursor()
        );

        Ok(GliderSession {
            file: Some(file),
            config,
            registry,
            qc,
            inserter,
            derived,
        })
    }
}

/// A glider file open for writing.
///
/// Dropping an open session finalizes and writes it, logging any failure;
/// call [`close`](Self::close) to see errors.
pub struct GliderSession {
    file: Option<NcFile>,
    config: WriterConfig,
    registry: Registry,
    qc: QcEngine,
    inserter: Inserter,
    derived: Box<dyn DerivedQuantities>,
}

impl GliderSession {
    pub fn builder(path: impl AsRef<Path>) -> SessionBuilder {
        SessionBuilder {
            path: path.as_ref().to_path_buf(),
            mode: OpenMode::Write,
            config: WriterConfig::default(),
            schema: BTreeMap::new(),
            qc: QcEngine::default(),
            clock: Box::new(SystemClock),
            derived: Box::new(NoDerived),
        }
    }

    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        Self::builder(path).mode(mode).open()
    }

    pub fn state(&self) -> SessionState {
        match &self.file {
            None => SessionState::Closed,
            Some(_) if self.inserter.cursor() == 0 => SessionState::OpenEmpty,
            Some(_) => SessionState::OpenStreaming,
        }
    }

    pub fn cursor(&self) -> usize {
        self.inserter.cursor()
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.file.as_ref().map(|f| f.dataset())
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path())
    }

    fn parts(&mut self) -> Result<(&mut Dataset, &mut Registry, &QcEngine)> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::Other, "session is closed")))?;
        Ok((file.dataset_mut()?, &mut self.registry, &self.qc))
    }

    pub fn set_evaluator(&mut self, key: impl Into<String>, evaluator: impl QcEvaluator + 'static) {
        self.qc.set_evaluator(key, evaluator);
    }

    pub fn register(&mut self, key: &str, desc: VariableDescriptor) -> Result<()> {
        let (ds, registry, _) = self.parts()?;
        registry.register(ds, key, desc)
    }

    /// Register descriptors in key order. Honors `lazy_materialize`.
    pub fn register_all(&mut self, descriptors: &BTreeMap<String, VariableDescriptor>) -> Result<()> {
        let lazy = self.config.lazy_materialize;
        let (ds, registry, _) = self.parts()?;
        registry.register_all(ds, descriptors, lazy)
    }

    /// # Errors
    ///
    /// - `Error::UnknownDatatype`: `key` was never registered
    pub fn resolve(&mut self, key: &str) -> Result<&VariableDescriptor> {
        let (ds, registry, _) = self.parts()?;
        registry.resolve(ds, key)
    }

    /// Write one record at the cursor and advance it by one.
    ///
    /// # Errors
    ///
    /// - `Error::MissingTimestamp`: the record has no time value
    /// - `Error::InvalidDescriptor`: a lazily declared descriptor cannot be created
    pub fn insert_record(&mut self, record: &Record) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::Other, "session is closed")))?;
        self.inserter
            .insert_record(file.dataset_mut()?, &mut self.registry, &self.qc, record)
    }

    /// Set file-level attributes in key order.
    pub fn set_global_attributes(&mut self, attributes: &JsonMap) -> Result<()> {
        let (ds, _, _) = self.parts()?;
        for (name, value) in json_attributes("global attributes", attributes).iter() {
            ds.attrs.set(name, value.clone());
        }
        Ok(())
    }

    /// Write `"<glider>-<date>"` into the `trajectory` variable, creating it
    /// on first use.
    pub fn set_trajectory_id(&mut self, glider: &str, trajectory_date: &str) -> Result<()> {
        let id = format!("{glider}-{trajectory_date}");
        let (ds, _, _) = self.parts()?;
        if !ds.contains(TRAJECTORY) {
            ds.add_dimension(TRAJECTORY_STRLEN, Some(id.len().max(1)))?;
            let mut attrs = Attributes::new();
            attrs.set("cf_role", "trajectory_id");
            attrs.set(
                "comment",
                "A trajectory can span multiple data files each containing a single segment.",
            );
            attrs.set(
                "long_name",
                "Unique identifier for each trajectory feature contained in the file",
            );
            ds.add_variable(TRAJECTORY, DataType::Char, &[TRAJECTORY_STRLEN], attrs)?;
        }
        match ds.variable_mut(TRAJECTORY) {
            Some(var) => var.write_text(0, &id),
            None => Ok(()),
        }
    }

    pub fn set_segment_id(&mut self, segment_id: i16) -> Result<()> {
        self.set_id(
            SEGMENT_ID,
            segment_id,
            "Segment ID",
            "Sequential segment number within a trajectory/deployment. A segment corresponds \
             to the set of data collected between 2 gps fixes obtained when the glider surfaces.",
        )
    }

    pub fn set_profile_id(&mut self, profile_id: i16) -> Result<()> {
        self.set_id(
            PROFILE_ID,
            profile_id,
            "Profile ID",
            "Sequential profile number within the current segment. A profile is defined as \
             a single dive or climb",
        )
    }

    fn set_id(&mut self, name: &str, value: i16, long_name: &str, comment: &str) -> Result<()> {
        let (ds, _, _) = self.parts()?;
        if !ds.contains(name) {
            let mut attrs = Attributes::new();
            attrs.set(FILL_VALUE_ATTR, DataType::Short.default_fill());
            attrs.set("comment", comment);
            attrs.set("long_name", long_name);
            attrs.set("observation_type", "calculated");
            attrs.set("valid_max", 999i16);
            attrs.set("valid_min", 1i16);
            ds.add_variable(name, DataType::Short, &[], attrs)?;
        }
        match ds.variable_mut(name) {
            Some(var) => var.write_row(0, Scalar::Short(value)),
            None => Ok(()),
        }
    }

    /// Describe the platform on an attribute-only `platform` variable.
    pub fn set_platform(&mut self, attributes: &JsonMap) -> Result<()> {
        self.set_descriptive(PLATFORM, attributes)
    }

    /// One attribute-only variable per instrument.
    pub fn set_instruments(&mut self, instruments: &[InstrumentDescription]) -> Result<()> {
        for instrument in instruments {
            self.set_descriptive(&instrument.name, &instrument.attrs)?;
        }
        Ok(())
    }

    fn set_descriptive(&mut self, name: &str, attributes: &JsonMap) -> Result<()> {
        let (ds, _, _) = self.parts()?;
        if !ds.contains(name) {
            ds.add_variable(name, DataType::Byte, &[], Attributes::new())?;
        }
        if let Some(var) = ds.variable_mut(name) {
            for (attr, value) in json_attributes(name, attributes).iter() {
                var.attrs.set(attr, value.clone());
            }
        }
        Ok(())
    }

    /// Whether a physical variable exists in the file.
    pub fn contains(&self, name: &str) -> bool {
        self.dataset().map(|ds| ds.contains(name)).unwrap_or(false)
    }

    /// Current value of a non-time variable; `None` while unset.
    pub fn get_scalar(&mut self, key: &str) -> Result<Option<f64>> {
        let (ds, registry, _) = self.parts()?;
        insert::get_scalar(ds, registry, key)
    }

    pub fn set_scalar(&mut self, key: &str, value: impl Into<Sample>) -> Result<()> {
        let (ds, registry, qc) = self.parts()?;
        insert::set_scalar(ds, registry, qc, key, &value.into())
    }

    /// Set values of `keys`, skipping unset and unknown ones.
    pub fn scalar_snapshot(&mut self, keys: &[&str]) -> Result<BTreeMap<String, f64>> {
        let mut values = BTreeMap::new();
        for key in keys {
            match self.get_scalar(key) {
                Ok(Some(value)) => {
                    values.insert(key.to_string(), value);
                }
                Ok(None) => {}
                Err(Error::UnknownDatatype(_)) => log::debug!("{key} not registered, not copied"),
                Err(e) => return Err(e),
            }
        }
        Ok(values)
    }

    /// Write values taken with [`scalar_snapshot`](Self::scalar_snapshot).
    pub fn fill_scalars(&mut self, values: &BTreeMap<String, f64>) -> Result<()> {
        for (key, value) in values {
            self.set_scalar(key, *value)?;
        }
        Ok(())
    }

    /// Write the profile midpoint time and mean position.
    pub fn update_profile_vars(&mut self) -> Result<()> {
        let keys = self.config.profile.clone();
        let time_variable = self.config.time_variable.clone();
        let summary = {
            let (ds, registry, _) = self.parts()?;
            let mut source = |key: &str| match registry.resolve(ds, key) {
                Ok(desc) => Some(desc.name.clone()),
                Err(_) => None,
            };
            let lat = source(&keys.lat_source).unwrap_or_default();
            let lon = source(&keys.lon_source).unwrap_or_default();
            profile::summarize(ds, &time_variable, &lat, &lon)
        };

        for (key, value) in [
            (&keys.time, summary.time),
            (&keys.lat, summary.lat),
            (&keys.lon, summary.lon),
        ] {
            let Some(value) = value else {
                log::debug!("{key}: no valid source values");
                continue;
            };
            match self.set_scalar(key, value) {
                Err(Error::UnknownDatatype(_)) => log::debug!("{key} not registered, skipped"),
                other => other?,
            }
        }
        Ok(())
    }

    /// Recompute bound attributes from the stored data.
    pub fn finalize_bounds(&mut self) -> Result<()> {
        let time_variable = self.config.time_variable.clone();
        let (ds, registry, _) = self.parts()?;
        bounds::finalize_bounds(ds, registry.materialized().map(|(_, d)| d), &time_variable);
        Ok(())
    }

    /// Run the derived-quantity hook. Failures are logged, not returned.
    pub fn finalize_derived(&mut self) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::Other, "session is closed")))?;
        let path = file.path().display().to_string();
        if let Err(e) = self.derived.recalculate(file.dataset_mut()?) {
            log::error!("{path}: derived quantities not updated: {e}");
        }
        Ok(())
    }

    /// Bounds first, then derived quantities.
    pub fn finalize(&mut self) -> Result<()> {
        self.finalize_bounds()?;
        self.finalize_derived()
    }

    /// Write the current state to disk without closing.
    pub fn sync(&mut self) -> Result<()> {
        match self.file.as_mut() {
            Some(file) => file.sync(),
            None => Ok(()),
        }
    }

    /// Finalize and write the file.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }
        let finalized = self.finalize();
        let file = self.file.take();
        let written = match file {
            Some(file) => {
                let path = file.path().display().to_string();
                file.close().map(|()| log::debug!("closed {path}"))
            }
            None => Ok(()),
        };
        finalized.and(written)
    }
}

impl Drop for GliderSession {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(e) = self.finish() {
                log::error!("failed to finalize glider file on drop: {e}");
            }
        }
    }
}

/// Open a session, run `body`, and always finalize and close. The body's
/// error wins over a close error.
pub fn with_session<T>(
    builder: SessionBuilder,
    body: impl FnOnce(&mut GliderSession) -> Result<T>,
) -> Result<T> {
    let mut session = builder.open()?;
    let outcome = body(&mut session);
    let closed = session.close();
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            log::error!("close after failed body also failed: {close_err}");
            Err(e)
        }
    }
}
