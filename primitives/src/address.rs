use {
  ed25519_dalek::PublicKey,
  multihash::{Hasher, Sha3_256},
  serde::{Deserialize, Serialize},
  std::{
    fmt::{Debug, Display},
    ops::Deref,
    str::FromStr,
  },
};

/// Length in bytes of an account address.
pub const ADDRESS_LEN: usize = 20;

/// Represents an address of an account.
///
/// The same type covers user accounts (derived from an ed25519 public
/// key), contract accounts (derived from their creator's address and
/// sequence number) and the small reserved range used by built-in
/// pseudo-contracts and the global permissions account.
#[derive(
  Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
  /// Address of the well-known account whose base permissions supply
  /// default values for any flag other accounts leave unset.
  pub const fn global() -> Self {
    Self([0u8; ADDRESS_LEN])
  }

  /// Builds the fixed address of a built-in pseudo-contract.
  ///
  /// Reserved addresses carry an ASCII tag left-padded with zeros, so
  /// they live in a range no key- or creation-derived address can
  /// collide with.
  pub fn reserved(tag: &[u8]) -> Self {
    assert!(
      !tag.is_empty() && tag.len() <= ADDRESS_LEN - 8,
      "reserved address tag must be 1..={} bytes",
      ADDRESS_LEN - 8
    );
    let mut bytes = [0u8; ADDRESS_LEN];
    bytes[ADDRESS_LEN - tag.len()..].copy_from_slice(tag);
    Self(bytes)
  }

  /// True for addresses in the reserved range (zero prefix), which
  /// includes the global permissions account.
  pub fn is_reserved(&self) -> bool {
    self.0[..8] == [0u8; 8]
  }

  /// Deterministic address of a contract created by this account at
  /// the given sequence number.
  ///
  /// The same (creator, sequence) pair always yields the same address,
  /// so the address of a pending contract creation is known before the
  /// creation executes.
  pub fn derive_contract(&self, sequence: u64) -> Self {
    let mut hasher = Sha3_256::default();
    hasher.update(&self.0);
    hasher.update(&sequence.to_be_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; ADDRESS_LEN];
    bytes.copy_from_slice(&digest[..ADDRESS_LEN]);
    Self(bytes)
  }

  pub fn to_bytes(self) -> [u8; ADDRESS_LEN] {
    self.0
  }
}

impl From<&PublicKey> for Address {
  fn from(pk: &PublicKey) -> Self {
    let mut hasher = Sha3_256::default();
    hasher.update(pk.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; ADDRESS_LEN];
    bytes.copy_from_slice(&digest[..ADDRESS_LEN]);
    Self(bytes)
  }
}

impl AsRef<[u8]> for Address {
  fn as_ref(&self) -> &[u8] {
    &self.0
  }
}

impl Deref for Address {
  type Target = [u8];

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl TryFrom<&[u8]> for Address {
  type Error = std::array::TryFromSliceError;

  fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
    Ok(Self(value.try_into()?))
  }
}

impl Display for Address {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", bs58::encode(self.0).into_string())
  }
}

impl Debug for Address {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "address({})", bs58::encode(self.0).into_string())
  }
}

impl From<Address> for String {
  fn from(addr: Address) -> Self {
    bs58::encode(addr.0).into_string()
  }
}

impl FromStr for Address {
  type Err = bs58::decode::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut bytes = [0u8; ADDRESS_LEN];
    bs58::decode(s).into(&mut bytes)?;
    Ok(Self(bytes))
  }
}

impl TryFrom<&str> for Address {
  type Error = bs58::decode::Error;

  fn try_from(value: &str) -> Result<Self, Self::Error> {
    FromStr::from_str(value)
  }
}
