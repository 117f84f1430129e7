//! Bincode adapter codec
//!
//! `Bin<T>` turns any serde-serializable type into a map value without a
//! hand-written codec. Keys wrapped this way compare through `Ord` on the
//! decoded values (bincode output is not order-preserving).

use bytes::BufMut;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{DiskMapError, Result};

use super::{Key, Value};

/// Wrapper storing `T` via bincode.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Bin<T>(pub T);

impl<T> Bin<T> {
    /// Unwrap the inner value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: Serialize + DeserializeOwned> Value for Bin<T> {
    fn byte_size(&self) -> usize {
        bincode::serialized_size(&self.0).map(|n| n as usize).unwrap_or(0)
    }

    fn encode(&self, buf: &mut impl BufMut) {
        let bytes = bincode::serialize(&self.0).expect("bincode serialization should not fail");
        buf.put_slice(&bytes);
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map(Bin)
            .map_err(|e| DiskMapError::Codec(format!("Bincode deserialization failed: {e}")))
    }
}

impl<T: Serialize + DeserializeOwned + Ord> Key for Bin<T> {}
