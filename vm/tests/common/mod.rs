use {
  ed25519_dalek::{Keypair, PublicKey, SecretKey},
  multihash::{Hasher, Sha3_256},
  vellum_primitives::{Account, Address, Flag, Transaction},
  vellum_vm::{
    apply_transaction,
    CallEnv,
    CallFrame,
    Ed25519Verifier,
    Environment,
    Error,
    EventLog,
    Exception,
    InMemoryStateStore,
    Interpreter,
    Params,
    State,
    StateCache,
    StateDiff,
  },
};

pub const CHAIN_ID: &str = "testchain";
pub const STARTING_BALANCE: u64 = 1_000_000;

/// Deterministic keypair derived from a string secret.
pub fn keypair(secret: &str) -> Keypair {
  let mut hasher = Sha3_256::default();
  hasher.update(secret.as_bytes());
  let digest = hasher.finalize();
  let secret = SecretKey::from_bytes(&digest[..32]).unwrap();
  let public = PublicKey::from(&secret);
  Keypair { secret, public }
}

pub fn users(n: usize) -> Vec<Keypair> {
  (0..n).map(|i| keypair(&format!("mysecret{i}"))).collect()
}

pub fn address(kp: &Keypair) -> Address {
  Address::from(&kp.public)
}

/// Base state with a zero-permission global account and one funded
/// account per user.
pub fn genesis(users: &[Keypair]) -> InMemoryStateStore {
  let mut store = InMemoryStateStore::default();
  let mut diff = StateDiff::default();
  diff.set(Address::global(), Account::new(Address::global(), 0));
  for kp in users {
    let addr = address(kp);
    diff.set(addr, Account::new(addr, STARTING_BALANCE));
  }
  store.apply(diff);
  store
}

/// Flips one permission flag directly in the base store.
pub fn grant(
  store: &mut InMemoryStateStore,
  addr: &Address,
  flag: Flag,
  value: bool,
) {
  let mut account = store.get(addr).expect("no such account in base state");
  account.permissions.base.set(flag, value);
  let mut diff = StateDiff::default();
  diff.set(*addr, account);
  store.apply(diff);
}

pub fn give_role(store: &mut InMemoryStateStore, addr: &Address, role: &str) {
  let mut account = store.get(addr).expect("no such account in base state");
  account.permissions.add_role(role);
  let mut diff = StateDiff::default();
  diff.set(*addr, account);
  store.apply(diff);
}

/// Installs a contract account with the given code and balance.
pub fn install_contract(
  store: &mut InMemoryStateStore,
  addr: Address,
  code: Vec<u8>,
  balance: u64,
) {
  let mut account = Account::new(addr, balance);
  account.code = code;
  let mut diff = StateDiff::default();
  diff.set(addr, account);
  store.apply(diff);
}

/// Single-opcode interpreter standing in for a real bytecode engine.
///
/// Code layout:
///  - `[0xF1, <20-byte address>]` — forward the call data to that
///    address with 1 unit of value and return the callee's result
///    (empty bytes when the nested call failed);
///  - `[0xF0]` — create a contract whose init code is the call data,
///    returning the new contract's code;
///  - `[0xC0, code...]` as init code — install `code...`;
///  - anything else — no-op returning empty bytes.
pub struct MockVm;

impl Interpreter for MockVm {
  fn execute(
    &self,
    frame: &CallFrame,
    data: &[u8],
    env: &mut dyn CallEnv,
  ) -> Result<Vec<u8>, Exception> {
    if frame.init {
      return match frame.code.first() {
        Some(0xC0) => Ok(frame.code[1..].to_vec()),
        _ => Err(Exception::Fault("unrecognized init code".into())),
      };
    }
    match frame.code.first() {
      Some(0xF1) => {
        let target = frame
          .code
          .get(1..21)
          .and_then(|bytes| Address::try_from(bytes).ok())
          .ok_or_else(|| Exception::Fault("truncated call target".into()))?;
        let (ret, _exception) =
          env.nested_call(frame.callee, Some(target), data, 1, frame.gas / 2);
        Ok(ret)
      }
      Some(0xF0) => {
        let (ret, _exception) =
          env.nested_call(frame.callee, None, data, 1, frame.gas / 2);
        Ok(ret)
      }
      _ => Ok(Vec::new()),
    }
  }
}

/// Code for a contract that forwards its call data to `target`.
pub fn forwarder(target: &Address) -> Vec<u8> {
  let mut code = vec![0xF1];
  code.extend_from_slice(target);
  code
}

/// Code for a factory contract that creates contracts from call data.
pub fn factory() -> Vec<u8> {
  vec![0xF0]
}

/// Wraps contract code into init code the interpreter understands.
pub fn deployable(code: &[u8]) -> Vec<u8> {
  let mut init = vec![0xC0];
  init.extend_from_slice(code);
  init
}

/// Executes one transaction against the store, applying the produced
/// diff. Returns the executor verdict and the collected event log.
pub fn exec(
  store: &mut InMemoryStateStore,
  height: u64,
  tx: &Transaction,
) -> (Result<(), Error>, EventLog) {
  let params = Params {
    chain_id: CHAIN_ID.into(),
    ..Params::default()
  };
  let verifier = Ed25519Verifier;
  let mut events = EventLog::default();
  let mut cache = StateCache::new(&*store);
  let mut env = Environment {
    params: &params,
    height,
    interpreter: &MockVm,
    verifier: &verifier,
    events: &mut events,
  };
  let result = apply_transaction(&mut cache, &mut env, tx);
  let diff = cache.into_diff();
  drop(env);
  store.apply(diff);
  (result, events)
}
