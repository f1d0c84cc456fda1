use {
  crate::state::StateCache,
  vellum_primitives::{Account, AccountPermissions, Address, Flag},
};

/// Outcome of resolving one permission flag for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
  pub value: bool,
  /// False when the value came from the global default account rather
  /// than the account's own explicit bits.
  pub explicit: bool,
}

/// Resolves a flag with a single fallback hop to the global account.
///
/// The global permissions account is an ordinary account reached
/// through the same cache lookup path as any other. Its own flags are
/// expected to be explicit; if one is unset (or the account is missing
/// entirely) the flag resolves to false — there is no further level of
/// defaults to chain to.
pub fn resolve(
  cache: &StateCache,
  perms: &AccountPermissions,
  flag: Flag,
) -> Resolved {
  if let Some(value) = perms.base.get(flag) {
    return Resolved {
      value,
      explicit: true,
    };
  }
  let value = cache
    .get_account(&Address::global())
    .and_then(|global| global.permissions.base.get(flag))
    .unwrap_or(false);
  Resolved {
    value,
    explicit: false,
  }
}

/// Effective permission check used throughout the executor.
pub fn authorized(cache: &StateCache, account: &Account, flag: Flag) -> bool {
  resolve(cache, &account.permissions, flag).value
}
