//! Opaque context snapshots.
//!
//! The queue persists an application context alongside every entry so that
//! delivery events fire with the context that was current at `send` time,
//! even across restarts. The dispatcher only ever sees the pickled bytes;
//! the codec is the application's.

use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PickleError {
    #[error("could not pickle context: {0}")]
    Pickle(String),

    #[error("could not restore context: {0}")]
    Depickle(String),
}

/// Serialize an application context to bytes and back.
///
/// `depickle(pickle(ctx))` must be semantically equivalent to `ctx` for
/// every context the application hands to `send`.
pub trait ContextCodec<C>: Send + Sync {
    fn pickle(&self, ctx: &C) -> Result<Vec<u8>, PickleError>;
    fn depickle(&self, bytes: &[u8]) -> Result<C, PickleError>;
}

/// JSON-backed codec for any serde-serializable context.
pub struct JsonCodec<C> {
    _marker: PhantomData<fn() -> C>,
}

impl<C> JsonCodec<C> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<C> Default for JsonCodec<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ContextCodec<C> for JsonCodec<C>
where
    C: Serialize + DeserializeOwned + Send + Sync,
{
    fn pickle(&self, ctx: &C) -> Result<Vec<u8>, PickleError> {
        serde_json::to_vec(ctx).map_err(|e| PickleError::Pickle(e.to_string()))
    }

    fn depickle(&self, bytes: &[u8]) -> Result<C, PickleError> {
        serde_json::from_slice(bytes).map_err(|e| PickleError::Depickle(e.to_string()))
    }
}
