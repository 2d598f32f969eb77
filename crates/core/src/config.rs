//! Parser configuration.
//!
//! Loaded by the driver from a TOML file, e.g.
//!
//! ```toml
//! default_pack = 8
//! max_depth = 64
//! ```

use crate::error::{VfrError, VfrResult};
use crate::layout::PACK_ALIGNMENTS;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParserConfig {
    /// Struct packing in effect before any `#pragma pack` and after
    /// `#pragma pack()`.
    pub default_pack: u32,
    /// Maximum nesting of scopes and parenthesized expressions.
    pub max_depth: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            default_pack: 8,
            max_depth: 64,
        }
    }
}

impl ParserConfig {
    /// `default_pack` must be a value `#pragma pack` itself would accept.
    pub fn validate(&self) -> VfrResult<()> {
        if !PACK_ALIGNMENTS.contains(&self.default_pack) {
            return Err(VfrError::config(format!(
                "default_pack must be 1, 2, 4, 8 or 16, got {}",
                self.default_pack
            )));
        }
        Ok(())
    }
}
