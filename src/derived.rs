use crate::error::Result;
use crate::format::Dataset;

/// Recalculation of derived science quantities (salinity, density, ...)
/// after bounds are final. Failures are logged by the session, never raised.
pub trait DerivedQuantities {
    fn recalculate(&mut self, dataset: &mut Dataset) -> Result<()>;
}

/// No derived quantities.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDerived;

impl DerivedQuantities for NoDerived {
    fn recalculate(&mut self, _dataset: &mut Dataset) -> Result<()> {
        Ok(())
    }
}

impl<F> DerivedQuantities for F
where
    F: FnMut(&mut Dataset) -> Result<()>,
{
    fn recalculate(&mut self, dataset: &mut Dataset) -> Result<()> {
        self(dataset)
    }
}
