//! Shared value types: content hashes and spatial bounds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash as StdHash, Hasher};
use std::str::FromStr;

/// Raw 32-byte BLAKE3 digest
pub type Hash = [u8; 32];

/// Content-addressed identifier of a persisted object
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ObjectId(Hash);

impl ObjectId {
    /// The all-zero id, used where no object is referenced.
    pub const NULL: ObjectId = ObjectId([0u8; 32]);

    pub fn new(bytes: Hash) -> Self {
        ObjectId(bytes)
    }

    /// Hash of arbitrary bytes.
    pub fn for_bytes(data: &[u8]) -> Self {
        ObjectId(*blake3::hash(data).as_bytes())
    }

    /// Hash of a string's UTF-8 bytes.
    pub fn for_string(s: &str) -> Self {
        Self::for_bytes(s.as_bytes())
    }

    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps DAG dumps readable
        write!(f, "ObjectId({})", &self.to_hex()[..12])
    }
}

impl FromStr for ObjectId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut bytes)?;
        Ok(ObjectId(bytes))
    }
}

/// Axis-aligned bounding box attached to spatial entries
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Smallest envelope covering both.
    pub fn expand(&self, other: &Envelope) -> Envelope {
        Envelope {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    fn bits(&self) -> [u64; 4] {
        [
            self.min_x.to_bits(),
            self.min_y.to_bits(),
            self.max_x.to_bits(),
            self.max_y.to_bits(),
        ]
    }
}

// Bitwise equality so envelopes can live in hashed and ordered collections.
impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Envelope {}

impl StdHash for Envelope {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}
