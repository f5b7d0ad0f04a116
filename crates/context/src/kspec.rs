//! The `k` specification: how many retrieved examples to use and in what order.
//!
//! Grammar (underscore-joined): `<int|max>[_skip_<int>][_shuffle][_reverse]`.
//! `0` means zero-shot. Modifiers apply to the selected slice only.
//!
//! ```
//! use lampkit_context::{DocCount, KSpec};
//!
//! let k: KSpec = "5_skip_2_shuffle".parse().unwrap();
//! assert_eq!(k.doc_k, DocCount::Count(5));
//! assert_eq!(k.skip_k, 2);
//! assert!(k.shuffle && !k.reverse);
//! ```

use std::fmt;
use std::str::FromStr;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of examples to take after the skip prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocCount {
    Count(usize),
    /// Everything that remains after the skip prefix.
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KSpec {
    pub doc_k: DocCount,
    pub skip_k: usize,
    pub shuffle: bool,
    pub reverse: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KSpecError {
    #[error("empty k specification")]
    Empty,

    #[error("invalid example count '{0}' (expected an integer or 'max')")]
    InvalidCount(String),

    #[error("'skip' must be followed by an integer in '{0}'")]
    InvalidSkip(String),

    #[error("unexpected token '{token}' in k specification '{spec}'")]
    UnexpectedToken { token: String, spec: String },
}

impl KSpec {
    pub const ZERO_SHOT: KSpec = KSpec {
        doc_k: DocCount::Count(0),
        skip_k: 0,
        shuffle: false,
        reverse: false,
    };

    pub fn is_zero_shot(&self) -> bool {
        self.doc_k == DocCount::Count(0)
    }

    /// Resolved take-count for a ranked list of `len` entries.
    pub fn take_count(&self, len: usize) -> usize {
        match self.doc_k {
            DocCount::Count(n) => n,
            DocCount::Max => len.saturating_sub(self.skip_k),
        }
    }

    /// `ranked[skip_k .. skip_k + doc_k]`, clamped to the list.
    pub fn select<T: Clone>(&self, ranked: &[T]) -> Vec<T> {
        let start = self.skip_k.min(ranked.len());
        let end = start.saturating_add(self.take_count(ranked.len())).min(ranked.len());
        ranked[start..end].to_vec()
    }

    /// Apply the shuffle and reverse modifiers in place.
    ///
    /// Items are permuted whole, so a (text, label) pair stays together.
    /// `seed` makes the shuffle reproducible.
    pub fn reorder<T>(&self, items: &mut [T], seed: Option<u64>) {
        if self.shuffle {
            match seed {
                Some(seed) => items.shuffle(&mut StdRng::seed_from_u64(seed)),
                None => items.shuffle(&mut rand::rng()),
            }
        }
        if self.reverse {
            items.reverse();
        }
    }

    /// Select then reorder.
    pub fn apply<T: Clone>(&self, ranked: &[T], seed: Option<u64>) -> Vec<T> {
        let mut selected = self.select(ranked);
        self.reorder(&mut selected, seed);
        selected
    }
}

impl FromStr for KSpec {
    type Err = KSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim();
        let mut tokens = spec.split('_');

        let doc_k = match tokens.next() {
            None | Some("") => return Err(KSpecError::Empty),
            Some(t) if t.eq_ignore_ascii_case("max") => DocCount::Max,
            Some(t) => DocCount::Count(
                t.parse()
                    .map_err(|_| KSpecError::InvalidCount(t.to_string()))?,
            ),
        };

        let mut k = KSpec {
            doc_k,
            skip_k: 0,
            shuffle: false,
            reverse: false,
        };
        let mut seen_skip = false;

        while let Some(token) = tokens.next() {
            match token {
                "skip" if !seen_skip && !k.shuffle && !k.reverse => {
                    k.skip_k = tokens
                        .next()
                        .and_then(|n| n.parse().ok())
                        .ok_or_else(|| KSpecError::InvalidSkip(spec.to_string()))?;
                    seen_skip = true;
                }
                "shuffle" if !k.shuffle => k.shuffle = true,
                "reverse" if !k.reverse => k.reverse = true,
                other => {
                    return Err(KSpecError::UnexpectedToken {
                        token: other.to_string(),
                        spec: spec.to_string(),
                    });
                }
            }
        }

        Ok(k)
    }
}

impl fmt::Display for KSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.doc_k {
            DocCount::Count(n) => write!(f, "{n}")?,
            DocCount::Max => f.write_str("max")?,
        }
        if self.skip_k > 0 {
            write!(f, "_skip_{}", self.skip_k)?;
        }
        if self.shuffle {
            f.write_str("_shuffle")?;
        }
        if self.reverse {
            f.write_str("_reverse")?;
        }
        Ok(())
    }
}

impl Serialize for KSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for KSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
