//! Coordinate strategy: the recorded point, unconditionally.

use crate::error::{Error, Result};
use crate::locate::Evaluation;
use crate::model::chain::LocatorStrategy;

pub(crate) fn evaluate(strategy: &LocatorStrategy) -> Result<Evaluation> {
    let endpoint = strategy
        .metadata
        .endpoint
        .ok_or_else(|| Error::strategy("coordinates", "missing endpoint"))?;

    // The recorded point is always available; the variant's low base weight
    // carries the distrust when scores are compared.
    Ok(Evaluation::hit(None, Some(endpoint), 1.0, 1))
}
