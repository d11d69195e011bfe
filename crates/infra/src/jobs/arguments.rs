//! Job argument (de)serialization.
//!
//! Arguments are stored as JSON. Encoding happens at enqueue time and fails
//! the enqueue; decoding happens right before the body runs and fails the
//! attempt with a `DeserializationError`, which is classified like any other
//! job failure.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use forgejobs_retry::Failure;

/// Arguments could not be encoded at enqueue time.
#[derive(Debug, thiserror::Error)]
#[error("failed to serialize job arguments: {0}")]
pub struct SerializationError(#[from] serde_json::Error);

pub fn serialize_arguments<A>(arguments: &A) -> Result<serde_json::Value, SerializationError>
where
    A: Serialize + ?Sized,
{
    Ok(serde_json::to_value(arguments)?)
}

pub fn deserialize_arguments<A>(value: &serde_json::Value) -> Result<A, Failure>
where
    A: DeserializeOwned,
{
    A::deserialize(value).map_err(|e| Failure::deserialization(e.to_string()))
}
