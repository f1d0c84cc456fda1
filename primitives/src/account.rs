use {
  crate::{permissions::AccountPermissions, Address},
  serde::{Deserialize, Serialize},
};

/// Represents the basic unit of state in the ledger.
///
/// An account holds a spendable balance, optionally executable code
/// (empty for plain accounts), a strictly increasing sequence number
/// consumed by transaction inputs, a content hash over its persistent
/// storage, and its permission state.
///
/// Accounts are only ever read and written through the state cache;
/// they are created on first reference by a send, call or
/// contract-creation flow and never destroyed by this core.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
  pub address: Address,
  pub balance: u64,
  /// Executable code. Empty for accounts that are not contracts.
  pub code: Vec<u8>,
  /// Per-account nonce. Each accepted transaction input increments it
  /// by exactly one.
  pub sequence: u64,
  /// Content hash of the account's persistent storage.
  pub storage_root: [u8; 32],
  pub permissions: AccountPermissions,
}

impl Account {
  /// A fresh account with no code and no explicit permissions, as
  /// created when a send or call first references an unknown address.
  pub fn new(address: Address, balance: u64) -> Self {
    Self {
      address,
      balance,
      code: Vec::new(),
      sequence: 0,
      storage_root: [0u8; 32],
      permissions: AccountPermissions::default(),
    }
  }

  pub fn is_contract(&self) -> bool {
    !self.code.is_empty()
  }
}

impl std::fmt::Debug for Account {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Account")
      .field("address", &self.address)
      .field("balance", &self.balance)
      .field("code", &format_args!("[{} bytes]", self.code.len()))
      .field("sequence", &self.sequence)
      .field("storage_root", &hex::encode(self.storage_root))
      .field("permissions", &self.permissions)
      .finish()
  }
}
