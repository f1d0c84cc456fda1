use {
  crate::Address,
  serde::{Deserialize, Serialize},
  std::{collections::BTreeSet, fmt::Display},
};

/// A named boolean capability gating one kind of operation.
///
/// The first six flags gate the transaction kinds, the remaining seven
/// gate the reflective permission-management operations. Each flag
/// occupies one bit so a full permission set fits in a single word.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[repr(u64)]
pub enum Flag {
  Send = 1,
  Call = 1 << 1,
  CreateContract = 1 << 2,
  CreateAccount = 1 << 3,
  Bond = 1 << 4,
  Name = 1 << 5,
  HasBase = 1 << 6,
  SetBase = 1 << 7,
  UnsetBase = 1 << 8,
  HasRole = 1 << 9,
  AddRole = 1 << 10,
  RemoveRole = 1 << 11,
  SetGlobal = 1 << 12,
}

impl Flag {
  /// Every known flag bit set.
  pub const ALL_SET: u64 = (1 << 13) - 1;

  pub const fn bit(self) -> u64 {
    self as u64
  }

  /// Recovers a flag from its bit value. Returns `None` for anything
  /// that is not exactly one known flag bit.
  pub fn from_bits(bits: u64) -> Option<Self> {
    Some(match bits {
      b if b == Self::Send.bit() => Self::Send,
      b if b == Self::Call.bit() => Self::Call,
      b if b == Self::CreateContract.bit() => Self::CreateContract,
      b if b == Self::CreateAccount.bit() => Self::CreateAccount,
      b if b == Self::Bond.bit() => Self::Bond,
      b if b == Self::Name.bit() => Self::Name,
      b if b == Self::HasBase.bit() => Self::HasBase,
      b if b == Self::SetBase.bit() => Self::SetBase,
      b if b == Self::UnsetBase.bit() => Self::UnsetBase,
      b if b == Self::HasRole.bit() => Self::HasRole,
      b if b == Self::AddRole.bit() => Self::AddRole,
      b if b == Self::RemoveRole.bit() => Self::RemoveRole,
      b if b == Self::SetGlobal.bit() => Self::SetGlobal,
      _ => return None,
    })
  }

  /// The flag's name as used in pseudo-contract function signatures.
  pub const fn name(self) -> &'static str {
    match self {
      Self::Send => "send",
      Self::Call => "call",
      Self::CreateContract => "createContract",
      Self::CreateAccount => "createAccount",
      Self::Bond => "bond",
      Self::Name => "name",
      Self::HasBase => "hasBase",
      Self::SetBase => "setBase",
      Self::UnsetBase => "unsetBase",
      Self::HasRole => "hasRole",
      Self::AddRole => "addRole",
      Self::RemoveRole => "removeRole",
      Self::SetGlobal => "setGlobal",
    }
  }
}

impl Display for Flag {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.name())
  }
}

/// Tri-state capability bits of one account.
///
/// A flag is *explicit* when its bit is on in `set`; only then does the
/// corresponding bit in `perms` carry its value. A flag that is not
/// explicit is "unset" and defers to the global permissions account —
/// unset is distinct from explicitly false.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct BasePermissions {
  perms: u64,
  set: u64,
}

impl BasePermissions {
  /// All flags explicitly true. Suitable for permissive global
  /// defaults in development genesis states.
  pub const fn allow_all() -> Self {
    Self {
      perms: Flag::ALL_SET,
      set: Flag::ALL_SET,
    }
  }

  /// The account's own value for a flag, or `None` when the flag is
  /// unset and resolution should fall through to the global account.
  pub fn get(&self, flag: Flag) -> Option<bool> {
    if self.set & flag.bit() != 0 {
      Some(self.perms & flag.bit() != 0)
    } else {
      None
    }
  }

  /// Marks the flag explicit and stores its value.
  pub fn set(&mut self, flag: Flag, value: bool) {
    self.set |= flag.bit();
    if value {
      self.perms |= flag.bit();
    } else {
      self.perms &= !flag.bit();
    }
  }

  /// Clears explicitness, reverting the flag to the global fallback.
  pub fn unset(&mut self, flag: Flag) {
    self.set &= !flag.bit();
    self.perms &= !flag.bit();
  }

  pub fn is_explicit(&self, flag: Flag) -> bool {
    self.set & flag.bit() != 0
  }

  /// Builder-style variant of [`set`](Self::set).
  pub fn with(mut self, flag: Flag, value: bool) -> Self {
    self.set(flag, value);
    self
  }
}

/// Permission state embedded in every account: capability bits plus a
/// free-form role set with membership-only semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPermissions {
  pub base: BasePermissions,
  pub roles: BTreeSet<String>,
}

impl AccountPermissions {
  pub fn has_role(&self, role: &str) -> bool {
    self.roles.contains(role)
  }

  /// Inserts a role. Returns false when the role was already present.
  pub fn add_role(&mut self, role: &str) -> bool {
    self.roles.insert(role.to_string())
  }

  /// Removes a role. Returns false when the role was absent.
  pub fn remove_role(&mut self, role: &str) -> bool {
    self.roles.remove(role)
  }
}

/// A permission-management operation with its typed arguments.
///
/// Carried by the permissions transaction kind and, in decoded form, by
/// calls to the permissions pseudo-contract. The read-only queries
/// (hasBase, hasRole) are reachable only through the call path and are
/// not represented here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionOp {
  SetBase {
    target: Address,
    flag: Flag,
    value: bool,
  },
  UnsetBase {
    target: Address,
    flag: Flag,
  },
  SetGlobal {
    flag: Flag,
    value: bool,
  },
  AddRole {
    target: Address,
    role: String,
  },
  RemoveRole {
    target: Address,
    role: String,
  },
}

impl PermissionOp {
  /// The capability an account must hold to perform this operation.
  pub fn required(&self) -> Flag {
    match self {
      Self::SetBase { .. } => Flag::SetBase,
      Self::UnsetBase { .. } => Flag::UnsetBase,
      Self::SetGlobal { .. } => Flag::SetGlobal,
      Self::AddRole { .. } => Flag::AddRole,
      Self::RemoveRole { .. } => Flag::RemoveRole,
    }
  }

  /// The account the operation mutates.
  pub fn target(&self) -> Address {
    match self {
      Self::SetBase { target, .. } => *target,
      Self::UnsetBase { target, .. } => *target,
      Self::SetGlobal { .. } => Address::global(),
      Self::AddRole { target, .. } => *target,
      Self::RemoveRole { target, .. } => *target,
    }
  }
}
