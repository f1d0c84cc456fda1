use serde::{Deserialize, Serialize};

/// Chain-level execution parameters.
///
/// These are fixed per chain (usually loaded from the genesis
/// document) and consumed read-only by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Params {
  /// Network identifier bound into every signing payload.
  pub chain_id: String,

  /// Cost in balance units per byte of name + data in the registry.
  pub name_byte_cost: u64,

  /// Multiplier applied to the byte cost for each funded block.
  pub name_block_cost: u64,

  /// Minimum number of blocks a name registration must fund.
  pub min_name_registration_period: u64,

  /// Maximum nesting depth of contract calls.
  pub max_call_depth: usize,
}

impl Default for Params {
  fn default() -> Self {
    Self {
      chain_id: "localnet".into(),
      name_byte_cost: 1,
      name_block_cost: 1,
      min_name_registration_period: 5,
      max_call_depth: 64,
    }
  }
}
