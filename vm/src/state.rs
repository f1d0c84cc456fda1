use {
  serde::{Deserialize, Serialize},
  std::collections::{BTreeMap, HashMap},
  vellum_primitives::{Account, Address},
};

/// A record in the name registry.
///
/// Name entries are registered and renewed by name transactions and
/// expire at a block height determined by how much the registration
/// paid. They travel through the same state diffs and overlay scopes
/// as accounts, so a rejected transaction rolls its name writes back
/// together with its account writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NameEntry {
  pub name: String,
  pub owner: Address,
  pub data: String,
  /// Block height after which the entry may be claimed by anyone.
  pub expires: u64,
}

/// Represents a change in ledger state.
///
/// State diffs are meant to be accumulated: logically the entire state
/// of the ledger is the result of cumulative application of
/// consecutive diffs. A transaction produces a state diff, blocks
/// produce state diffs which are all their transactions' diffs merged
/// together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDiff {
  accounts: BTreeMap<Address, Account>,
  names: BTreeMap<String, NameEntry>,
}

impl StateDiff {
  /// Inserts or updates an account under a given address.
  ///
  /// If the diff already had an account stored under this address then
  /// the old value is returned, otherwise `None`.
  pub fn set(&mut self, address: Address, account: Account) -> Option<Account> {
    self.accounts.insert(address, account)
  }

  pub fn set_name(&mut self, entry: NameEntry) -> Option<NameEntry> {
    self.names.insert(entry.name.clone(), entry)
  }

  pub fn get(&self, address: &Address) -> Option<&Account> {
    self.accounts.get(address)
  }

  pub fn get_name(&self, name: &str) -> Option<&NameEntry> {
    self.names.get(name)
  }

  /// Merges a diff with a newer diff, last writer wins per address.
  ///
  /// Applying the resulting diff is equivalent to applying the two
  /// merged diffs consecutively on any state store.
  pub fn merge(self, newer: StateDiff) -> StateDiff {
    let mut accounts = self.accounts;
    let mut names = self.names;
    for (addr, acc) in newer.accounts {
      accounts.insert(addr, acc);
    }
    for (name, entry) in newer.names {
      names.insert(name, entry);
    }
    StateDiff { accounts, names }
  }

  /// Iterate over all account changes in the diff, in address order.
  pub fn iter(&self) -> impl Iterator<Item = (&Address, &Account)> {
    self.accounts.iter()
  }

  pub fn is_empty(&self) -> bool {
    self.accounts.is_empty() && self.names.is_empty()
  }
}

/// Read and write surface of a base account store.
///
/// The executor never talks to storage directly; it reads through a
/// [`StateCache`] layered over some implementation of this trait and
/// produces diffs that the store applies atomically.
pub trait State {
  fn get(&self, address: &Address) -> Option<Account>;
  fn get_name(&self, name: &str) -> Option<NameEntry>;
  fn apply(&mut self, diff: StateDiff);
}

impl State for StateDiff {
  fn get(&self, address: &Address) -> Option<Account> {
    self.accounts.get(address).cloned()
  }

  fn get_name(&self, name: &str) -> Option<NameEntry> {
    self.names.get(name).cloned()
  }

  fn apply(&mut self, diff: StateDiff) {
    *self = std::mem::take(self).merge(diff);
  }
}

#[derive(Debug, Default)]
pub struct InMemoryStateStore {
  accounts: HashMap<Address, Account>,
  names: HashMap<String, NameEntry>,
}

impl InMemoryStateStore {
  pub fn iter(&self) -> impl Iterator<Item = (&Address, &Account)> {
    self.accounts.iter()
  }
}

impl State for InMemoryStateStore {
  fn get(&self, address: &Address) -> Option<Account> {
    self.accounts.get(address).cloned()
  }

  fn get_name(&self, name: &str) -> Option<NameEntry> {
    self.names.get(name).cloned()
  }

  fn apply(&mut self, diff: StateDiff) {
    for (addr, acc) in diff.accounts {
      self.accounts.insert(addr, acc);
    }
    for (name, entry) in diff.names {
      self.names.insert(name, entry);
    }
  }
}

/// Handle to one open overlay scope. Scopes close in strict LIFO
/// order; the handle exists so that out-of-order closes are caught
/// instead of silently merging the wrong writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeHandle(usize);

/// Copy-on-write view over a base account store.
///
/// Reads fall through open scopes innermost-first and then to the
/// base; writes always land in the innermost open scope. Nested call
/// scopes shadow their parent until they are either committed (merged
/// into the parent, last writer wins) or discarded (dropped entirely,
/// parent unaffected). The base store is never mutated; the
/// accumulated root scope is extracted with [`into_diff`](Self::into_diff)
/// once execution is done.
pub struct StateCache<'s> {
  base: &'s dyn State,
  scopes: Vec<StateDiff>,
}

impl<'s> StateCache<'s> {
  pub fn new(base: &'s dyn State) -> Self {
    Self {
      base,
      scopes: vec![StateDiff::default()],
    }
  }

  pub fn get_account(&self, address: &Address) -> Option<Account> {
    for scope in self.scopes.iter().rev() {
      if let Some(account) = scope.get(address) {
        return Some(account.clone());
      }
    }
    self.base.get(address)
  }

  pub fn update_account(&mut self, account: Account) {
    let scope = self.innermost();
    scope.set(account.address, account);
  }

  pub fn get_name(&self, name: &str) -> Option<NameEntry> {
    for scope in self.scopes.iter().rev() {
      if let Some(entry) = scope.get_name(name) {
        return Some(entry.clone());
      }
    }
    self.base.get_name(name)
  }

  pub fn update_name(&mut self, entry: NameEntry) {
    let scope = self.innermost();
    scope.set_name(entry);
  }

  /// Begins a child overlay. All writes go to the child until it is
  /// committed or discarded.
  pub fn open_scope(&mut self) -> ScopeHandle {
    self.scopes.push(StateDiff::default());
    ScopeHandle(self.scopes.len() - 1)
  }

  /// Merges the child's writes into its parent, last writer wins.
  pub fn commit_scope(&mut self, handle: ScopeHandle) {
    self.check_innermost(handle);
    let child = self.scopes.remove(handle.0);
    let parent = &mut self.scopes[handle.0 - 1];
    *parent = std::mem::take(parent).merge(child);
  }

  /// Drops the child's writes entirely.
  pub fn discard_scope(&mut self, handle: ScopeHandle) {
    self.check_innermost(handle);
    self.scopes.remove(handle.0);
  }

  /// Number of nested scopes currently open on top of the root scope.
  pub fn depth(&self) -> usize {
    self.scopes.len() - 1
  }

  /// Flattens the root scope into a diff ready to be applied to the
  /// base store. All nested scopes must have been closed.
  pub fn into_diff(mut self) -> StateDiff {
    assert_eq!(
      self.scopes.len(),
      1,
      "cannot flatten a cache with {} unclosed scopes",
      self.scopes.len() - 1
    );
    self.scopes.remove(0)
  }

  fn innermost(&mut self) -> &mut StateDiff {
    let last = self.scopes.len() - 1;
    &mut self.scopes[last]
  }

  fn check_innermost(&self, handle: ScopeHandle) {
    assert!(
      handle.0 > 0 && handle.0 == self.scopes.len() - 1,
      "scope {} closed out of order, innermost open scope is {}",
      handle.0,
      self.scopes.len() - 1
    );
  }
}

#[cfg(test)]
mod tests {
  use {super::*, vellum_primitives::Account};

  fn addr(tag: &[u8]) -> Address {
    Address::reserved(tag)
  }

  #[test]
  fn statediff_smoke() {
    let mut store = InMemoryStateStore::default();
    assert_eq!(store.iter().count(), 0);

    let mut diff = StateDiff::default();
    diff.set(addr(b"a"), Account::new(addr(b"a"), 10));
    diff.set(addr(b"b"), Account::new(addr(b"b"), 20));
    store.apply(diff);

    assert_eq!(store.iter().count(), 2);
    assert_eq!(store.get(&addr(b"a")).unwrap().balance, 10);
    assert_eq!(store.get(&addr(b"b")).unwrap().balance, 20);

    let mut newer = StateDiff::default();
    newer.set(addr(b"a"), Account::new(addr(b"a"), 30));
    store.apply(newer);
    assert_eq!(store.get(&addr(b"a")).unwrap().balance, 30);
  }

  #[test]
  fn merge_is_last_writer_wins() {
    let mut older = StateDiff::default();
    older.set(addr(b"a"), Account::new(addr(b"a"), 1));
    older.set(addr(b"b"), Account::new(addr(b"b"), 2));

    let mut newer = StateDiff::default();
    newer.set(addr(b"a"), Account::new(addr(b"a"), 9));

    let merged = older.merge(newer);
    assert_eq!(merged.get(&addr(b"a")).unwrap().balance, 9);
    assert_eq!(merged.get(&addr(b"b")).unwrap().balance, 2);
  }

  #[test]
  fn cache_reads_through_to_base() {
    let mut store = InMemoryStateStore::default();
    let mut diff = StateDiff::default();
    diff.set(addr(b"a"), Account::new(addr(b"a"), 10));
    store.apply(diff);

    let cache = StateCache::new(&store);
    assert_eq!(cache.get_account(&addr(b"a")).unwrap().balance, 10);
    assert!(cache.get_account(&addr(b"b")).is_none());
  }

  #[test]
  fn committed_scope_becomes_visible_to_parent() {
    let store = InMemoryStateStore::default();
    let mut cache = StateCache::new(&store);

    cache.update_account(Account::new(addr(b"a"), 1));

    let scope = cache.open_scope();
    cache.update_account(Account::new(addr(b"a"), 2));
    cache.update_account(Account::new(addr(b"b"), 3));
    assert_eq!(cache.get_account(&addr(b"a")).unwrap().balance, 2);
    cache.commit_scope(scope);

    assert_eq!(cache.get_account(&addr(b"a")).unwrap().balance, 2);
    assert_eq!(cache.get_account(&addr(b"b")).unwrap().balance, 3);

    let diff = cache.into_diff();
    assert_eq!(diff.get(&addr(b"a")).unwrap().balance, 2);
  }

  #[test]
  fn discarded_scope_leaves_parent_untouched() {
    let store = InMemoryStateStore::default();
    let mut cache = StateCache::new(&store);

    cache.update_account(Account::new(addr(b"a"), 1));

    let scope = cache.open_scope();
    cache.update_account(Account::new(addr(b"a"), 2));
    cache.update_account(Account::new(addr(b"b"), 3));
    cache.discard_scope(scope);

    assert_eq!(cache.get_account(&addr(b"a")).unwrap().balance, 1);
    assert!(cache.get_account(&addr(b"b")).is_none());
  }

  #[test]
  fn scopes_nest() {
    let store = InMemoryStateStore::default();
    let mut cache = StateCache::new(&store);

    let outer = cache.open_scope();
    cache.update_account(Account::new(addr(b"a"), 1));

    let inner = cache.open_scope();
    cache.update_account(Account::new(addr(b"a"), 2));
    assert_eq!(cache.depth(), 2);
    cache.discard_scope(inner);

    assert_eq!(cache.get_account(&addr(b"a")).unwrap().balance, 1);
    cache.commit_scope(outer);
    assert_eq!(cache.get_account(&addr(b"a")).unwrap().balance, 1);
    assert_eq!(cache.depth(), 0);
  }

  #[test]
  #[should_panic(expected = "out of order")]
  fn closing_outer_scope_first_panics() {
    let store = InMemoryStateStore::default();
    let mut cache = StateCache::new(&store);
    let outer = cache.open_scope();
    let _inner = cache.open_scope();
    cache.commit_scope(outer);
  }

  #[test]
  fn name_entries_follow_scopes() {
    let store = InMemoryStateStore::default();
    let mut cache = StateCache::new(&store);

    let scope = cache.open_scope();
    cache.update_name(NameEntry {
      name: "alias".into(),
      owner: addr(b"a"),
      data: "payload".into(),
      expires: 10,
    });
    assert!(cache.get_name("alias").is_some());
    cache.discard_scope(scope);
    assert!(cache.get_name("alias").is_none());
  }
}
