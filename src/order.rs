//! Ordering functions: the canonical sort order over entries and the
//! bucket index each entry falls into at a given depth.
//!
//! A bucket index depends only on the entry and the depth, never on how the
//! tree reached its current shape, so promotion and demotion only move
//! membership around and never rehash anything already placed.

use crate::config::ClusteringConfig;
use crate::graph::NodeId;
use crate::node::Node;
use blake3::Hasher;
use std::fmt;
use unicode_normalization::UnicodeNormalization;

/// Number of bits in a sort key
pub const KEY_BITS: u32 = u64::BITS;

/// Pluggable ordering function for a clustering strategy variant.
///
/// Implementations must keep `sort_key` a pure function of the entry name and
/// `bucket_bits` a pure function of depth.
pub trait ClusteringOrder: Send + Sync + fmt::Debug {
    /// Stable 64-bit key for an entry name. Sets of [`NodeId`] sort by it.
    fn sort_key(&self, name: &str) -> u64;

    /// Maximum entries a position may hold directly before splitting into
    /// buckets. Used verbatim for both promotion and demotion.
    fn normalized_size_limit(&self, depth: usize) -> usize;

    /// Key bits consumed to pick a bucket at `depth` (fan-out is `2^bits`).
    fn bucket_bits(&self, depth: usize) -> u32;

    /// Number of buckets a position at `depth` may have.
    fn max_buckets(&self, depth: usize) -> usize {
        1usize << self.bucket_bits(depth)
    }

    fn compute_id(&self, node: &Node) -> NodeId {
        self.node_id(&node.name)
    }

    /// Identity of the entry called `name`. Names are compared in NFC, so
    /// differently composed spellings of one name share an identity.
    fn node_id(&self, name: &str) -> NodeId {
        let name = normalize_name(name);
        let key = self.sort_key(&name);
        NodeId::new(name, key)
    }

    /// Bucket of `id` at `depth`, taken from the most significant key bits
    /// not consumed by shallower depths. `None` once the key is exhausted;
    /// such entries stay pinned at the position instead of moving deeper.
    fn bucket(&self, id: &NodeId, depth: usize) -> Option<u8> {
        let consumed: u32 = (0..depth).map(|d| self.bucket_bits(d)).sum();
        let bits = self.bucket_bits(depth);
        if bits == 0 || consumed + bits > KEY_BITS {
            return None;
        }
        let shifted = id.key() << consumed;
        Some((shifted >> (KEY_BITS - bits)) as u8)
    }
}

/// Canonical entry-name order: BLAKE3-derived keys, 32 root buckets, 8
/// buckets per deeper level, 512 entries per leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalOrder {
    size_limit: usize,
    root_bits: u32,
    level_bits: u32,
}

impl CanonicalOrder {
    pub const DEFAULT_SIZE_LIMIT: usize = 512;
    pub const DEFAULT_ROOT_BITS: u32 = 5;
    pub const DEFAULT_LEVEL_BITS: u32 = 3;

    pub fn new() -> Self {
        Self {
            size_limit: Self::DEFAULT_SIZE_LIMIT,
            root_bits: Self::DEFAULT_ROOT_BITS,
            level_bits: Self::DEFAULT_LEVEL_BITS,
        }
    }

    /// Non-canonical parameters. Trees built with them are internally
    /// consistent but will not share ids with canonically built trees.
    pub fn with_params(size_limit: usize, root_bits: u32, level_bits: u32) -> Self {
        Self {
            size_limit,
            root_bits,
            level_bits,
        }
    }

    pub fn from_config(config: &ClusteringConfig) -> Self {
        Self::with_params(
            config.size_limit,
            config.root_bucket_bits,
            config.level_bucket_bits,
        )
    }

    /// Deepest depth that still yields a bucket index
    pub fn max_depth(&self) -> usize {
        if KEY_BITS < self.root_bits || self.level_bits == 0 {
            return 0;
        }
        ((KEY_BITS - self.root_bits) / self.level_bits) as usize
    }
}

impl Default for CanonicalOrder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusteringOrder for CanonicalOrder {
    fn sort_key(&self, name: &str) -> u64 {
        let normalized = normalize_name(name);
        let mut hasher = Hasher::new();
        hasher.update(normalized.as_bytes());
        let digest = hasher.finalize();
        let mut key = [0u8; 8];
        key.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_be_bytes(key)
    }

    fn normalized_size_limit(&self, _depth: usize) -> usize {
        self.size_limit
    }

    fn bucket_bits(&self, depth: usize) -> u32 {
        if depth == 0 {
            self.root_bits
        } else {
            self.level_bits
        }
    }
}

/// Normalize an entry name to Unicode NFC so visually identical names
/// hash identically.
pub fn normalize_name(name: &str) -> String {
    name.nfc().collect()
}
