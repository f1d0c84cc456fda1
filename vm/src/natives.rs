use {
  crate::{execution::Exception, permissions, state::StateCache},
  multihash::{Hasher, Sha3_256},
  once_cell::sync::Lazy,
  std::collections::BTreeMap,
  tracing::debug,
  vellum_primitives::{Address, Flag, PermissionOp, ADDRESS_LEN},
};

/// Reserved address of the permissions pseudo-contract.
///
/// Contract code reaches the permission-management operations by
/// issuing a regular CALL against this address; the executor
/// intercepts it before any account lookup happens.
pub static PERMISSIONS_ADDRESS: Lazy<Address> =
  Lazy::new(|| Address::reserved(b"permissions"));

const SELECTOR_LEN: usize = 4;
const WORD_LEN: usize = 32;

/// True when a call target is handled by a built-in pseudo-contract
/// instead of stored contract code.
pub fn is_native(address: &Address) -> bool {
  *address == *PERMISSIONS_ADDRESS
}

/// The seven operations reachable at the permissions pseudo-contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Function {
  HasBase,
  SetBase,
  UnsetBase,
  SetGlobal,
  HasRole,
  AddRole,
  RemoveRole,
}

impl Function {
  const ALL: [Function; 7] = [
    Function::HasBase,
    Function::SetBase,
    Function::UnsetBase,
    Function::SetGlobal,
    Function::HasRole,
    Function::AddRole,
    Function::RemoveRole,
  ];

  /// ASCII signature the 4-byte selector is derived from.
  const fn signature(self) -> &'static str {
    match self {
      Self::HasBase => "hasBase(address,uint64)",
      Self::SetBase => "setBase(address,uint64,bool)",
      Self::UnsetBase => "unsetBase(address,uint64)",
      Self::SetGlobal => "setGlobal(uint64,bool)",
      Self::HasRole => "hasRole(address,string)",
      Self::AddRole => "addRole(address,string)",
      Self::RemoveRole => "removeRole(address,string)",
    }
  }

  /// Number of 32-byte argument words following the selector.
  const fn arity(self) -> usize {
    match self {
      Self::HasBase | Self::UnsetBase | Self::SetGlobal => 2,
      Self::SetBase => 3,
      Self::HasRole | Self::AddRole | Self::RemoveRole => 2,
    }
  }
}

static SELECTORS: Lazy<BTreeMap<[u8; SELECTOR_LEN], Function>> =
  Lazy::new(|| {
    Function::ALL
      .into_iter()
      .map(|f| (selector(f.signature()), f))
      .collect()
  });

fn selector(signature: &str) -> [u8; SELECTOR_LEN] {
  let mut hasher = Sha3_256::default();
  hasher.update(signature.as_bytes());
  let digest = hasher.finalize();
  let mut out = [0u8; SELECTOR_LEN];
  out.copy_from_slice(&digest[..SELECTOR_LEN]);
  out
}

/// A fully decoded call to the permissions pseudo-contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeCall {
  HasBase { target: Address, flag: Flag },
  HasRole { target: Address, role: String },
  Manage(PermissionOp),
}

impl NativeCall {
  /// The capability the calling contract must hold.
  pub fn required(&self) -> Flag {
    match self {
      Self::HasBase { .. } => Flag::HasBase,
      Self::HasRole { .. } => Flag::HasRole,
      Self::Manage(op) => op.required(),
    }
  }
}

/// Decodes a selector plus fixed-width argument words into a call.
pub fn decode(data: &[u8]) -> Result<NativeCall, Exception> {
  if data.len() < SELECTOR_LEN {
    return Err(Exception::Calldata("missing function selector".into()));
  }
  let mut sel = [0u8; SELECTOR_LEN];
  sel.copy_from_slice(&data[..SELECTOR_LEN]);
  let function = *SELECTORS
    .get(&sel)
    .ok_or_else(|| Exception::Calldata(format!("unknown selector {sel:x?}")))?;

  let words = &data[SELECTOR_LEN..];
  if words.len() != function.arity() * WORD_LEN {
    return Err(Exception::Calldata(format!(
      "{} expects {} argument words, got {} bytes",
      function.signature(),
      function.arity(),
      words.len()
    )));
  }
  let word = |i: usize| &words[i * WORD_LEN..(i + 1) * WORD_LEN];

  Ok(match function {
    Function::HasBase => NativeCall::HasBase {
      target: decode_address(word(0))?,
      flag: decode_flag(word(1))?,
    },
    Function::SetBase => NativeCall::Manage(PermissionOp::SetBase {
      target: decode_address(word(0))?,
      flag: decode_flag(word(1))?,
      value: decode_bool(word(2))?,
    }),
    Function::UnsetBase => NativeCall::Manage(PermissionOp::UnsetBase {
      target: decode_address(word(0))?,
      flag: decode_flag(word(1))?,
    }),
    Function::SetGlobal => NativeCall::Manage(PermissionOp::SetGlobal {
      flag: decode_flag(word(0))?,
      value: decode_bool(word(1))?,
    }),
    Function::HasRole => NativeCall::HasRole {
      target: decode_address(word(0))?,
      role: decode_role(word(1))?,
    },
    Function::AddRole => NativeCall::Manage(PermissionOp::AddRole {
      target: decode_address(word(0))?,
      role: decode_role(word(1))?,
    }),
    Function::RemoveRole => NativeCall::Manage(PermissionOp::RemoveRole {
      target: decode_address(word(0))?,
      role: decode_role(word(1))?,
    }),
  })
}

/// Executes a pseudo-contract call on behalf of `caller`.
///
/// The required capability is evaluated against the calling contract's
/// own account, not the original transaction signer, so authorization
/// can be delegated to on-chain logic. Query operations return a
/// 32-byte boolean word, mutations return empty bytes.
pub fn dispatch(
  cache: &mut StateCache,
  caller: &Address,
  data: &[u8],
) -> Result<Vec<u8>, Exception> {
  let call = decode(data)?;
  let caller_account = cache
    .get_account(caller)
    .ok_or(Exception::UnknownAccount(*caller))?;
  let required = call.required();
  if !permissions::authorized(cache, &caller_account, required) {
    return Err(Exception::Permission {
      account: *caller,
      flag: required,
    });
  }
  debug!(caller = %caller, call = ?call, "permissions dispatch");

  match call {
    NativeCall::HasBase { target, flag } => {
      let account = cache
        .get_account(&target)
        .ok_or(Exception::UnknownAccount(target))?;
      let resolved = permissions::resolve(cache, &account.permissions, flag);
      Ok(bool_word(resolved.value).to_vec())
    }
    NativeCall::HasRole { target, role } => {
      let account = cache
        .get_account(&target)
        .ok_or(Exception::UnknownAccount(target))?;
      Ok(bool_word(account.permissions.has_role(&role)).to_vec())
    }
    NativeCall::Manage(op) => {
      apply_op(cache, &op).map_err(Exception::UnknownAccount)?;
      Ok(Vec::new())
    }
  }
}

/// Applies a management operation through the cache. Shared between
/// the transaction path and the call path.
///
/// Returns whether the operation changed anything (only role
/// operations can be no-ops); an `Err` carries the address of a target
/// account that does not exist.
pub(crate) fn apply_op(
  cache: &mut StateCache,
  op: &PermissionOp,
) -> Result<bool, Address> {
  let target = op.target();
  let mut account = cache.get_account(&target).ok_or(target)?;
  let changed = match op {
    PermissionOp::SetBase { flag, value, .. } => {
      account.permissions.base.set(*flag, *value);
      true
    }
    PermissionOp::UnsetBase { flag, .. } => {
      account.permissions.base.unset(*flag);
      true
    }
    PermissionOp::SetGlobal { flag, value } => {
      account.permissions.base.set(*flag, *value);
      true
    }
    PermissionOp::AddRole { role, .. } => account.permissions.add_role(role),
    PermissionOp::RemoveRole { role, .. } => {
      account.permissions.remove_role(role)
    }
  };
  cache.update_account(account);
  Ok(changed)
}

fn decode_address(word: &[u8]) -> Result<Address, Exception> {
  let pad = WORD_LEN - ADDRESS_LEN;
  if word[..pad].iter().any(|b| *b != 0) {
    return Err(Exception::Calldata("address word has nonzero padding".into()));
  }
  Address::try_from(&word[pad..])
    .map_err(|_| Exception::Calldata("malformed address word".into()))
}

fn decode_u64(word: &[u8]) -> Result<u64, Exception> {
  if word[..WORD_LEN - 8].iter().any(|b| *b != 0) {
    return Err(Exception::Calldata("integer word has nonzero padding".into()));
  }
  let mut bytes = [0u8; 8];
  bytes.copy_from_slice(&word[WORD_LEN - 8..]);
  Ok(u64::from_be_bytes(bytes))
}

fn decode_flag(word: &[u8]) -> Result<Flag, Exception> {
  let bits = decode_u64(word)?;
  Flag::from_bits(bits)
    .ok_or_else(|| Exception::Calldata(format!("unknown permission flag {bits:#x}")))
}

fn decode_bool(word: &[u8]) -> Result<bool, Exception> {
  match decode_u64(word)? {
    0 => Ok(false),
    1 => Ok(true),
    other => Err(Exception::Calldata(format!("boolean word holds {other}"))),
  }
}

fn decode_role(word: &[u8]) -> Result<String, Exception> {
  let len = word.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
  if len == 0 {
    return Err(Exception::Calldata("empty role name".into()));
  }
  let role = std::str::from_utf8(&word[..len])
    .map_err(|_| Exception::Calldata("role name is not valid utf-8".into()))?;
  if role.contains('\0') {
    return Err(Exception::Calldata("role name contains nul bytes".into()));
  }
  Ok(role.to_string())
}

fn address_word(address: &Address) -> [u8; WORD_LEN] {
  let mut word = [0u8; WORD_LEN];
  word[WORD_LEN - ADDRESS_LEN..].copy_from_slice(address);
  word
}

fn u64_word(value: u64) -> [u8; WORD_LEN] {
  let mut word = [0u8; WORD_LEN];
  word[WORD_LEN - 8..].copy_from_slice(&value.to_be_bytes());
  word
}

/// Boolean encoded as a 32-byte word, as returned by query operations.
pub fn bool_word(value: bool) -> [u8; WORD_LEN] {
  u64_word(u64::from(value))
}

fn role_word(role: &str) -> [u8; WORD_LEN] {
  let mut word = [0u8; WORD_LEN];
  let bytes = role.as_bytes();
  word[..bytes.len()].copy_from_slice(bytes);
  word
}

fn encode(function: Function, words: &[[u8; WORD_LEN]]) -> Vec<u8> {
  let mut data =
    Vec::with_capacity(SELECTOR_LEN + words.len() * WORD_LEN);
  data.extend_from_slice(&selector(function.signature()));
  for word in words {
    data.extend_from_slice(word);
  }
  data
}

// Call-data builders for each pseudo-contract operation. Role names
// longer than one word are rejected at decode time, so builders do not
// validate them.

pub fn has_base_call(target: &Address, flag: Flag) -> Vec<u8> {
  encode(Function::HasBase, &[address_word(target), u64_word(flag.bit())])
}

pub fn set_base_call(target: &Address, flag: Flag, value: bool) -> Vec<u8> {
  encode(Function::SetBase, &[
    address_word(target),
    u64_word(flag.bit()),
    bool_word(value),
  ])
}

pub fn unset_base_call(target: &Address, flag: Flag) -> Vec<u8> {
  encode(Function::UnsetBase, &[
    address_word(target),
    u64_word(flag.bit()),
  ])
}

pub fn set_global_call(flag: Flag, value: bool) -> Vec<u8> {
  encode(Function::SetGlobal, &[u64_word(flag.bit()), bool_word(value)])
}

pub fn has_role_call(target: &Address, role: &str) -> Vec<u8> {
  encode(Function::HasRole, &[address_word(target), role_word(role)])
}

pub fn add_role_call(target: &Address, role: &str) -> Vec<u8> {
  encode(Function::AddRole, &[address_word(target), role_word(role)])
}

pub fn remove_role_call(target: &Address, role: &str) -> Vec<u8> {
  encode(Function::RemoveRole, &[address_word(target), role_word(role)])
}
