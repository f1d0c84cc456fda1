use {
  crate::{
    events::{CallEvent, EventSink},
    natives,
    params::Params,
    permissions,
    state::{NameEntry, StateCache},
  },
  ed25519_dalek::{PublicKey, Signature, Verifier},
  std::collections::BTreeSet,
  thiserror::Error,
  tracing::{debug, info},
  vellum_primitives::{
    Account,
    Address,
    BondTx,
    CallTx,
    Flag,
    NameTx,
    PermissionOp,
    PermissionsTx,
    SendTx,
    Transaction,
    TxInput,
  },
};

const MAX_NAME_LEN: usize = 64;
const MAX_NAME_DATA_LEN: usize = 1024;

/// Transaction-fatal failures.
///
/// Any of these aborts the whole transaction with zero state change
/// and is reported synchronously to the submitter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
  #[error("unknown input account {0}")]
  UnknownInputAccount(Address),

  #[error("unknown account {0}")]
  UnknownAccount(Address),

  #[error("input public key does not match account address {0}")]
  InvalidPublicKey(Address),

  #[error("invalid signature by account {0}")]
  InvalidSignature(Address),

  #[error("account {account} declared sequence {got}, expected {expected}")]
  BadSequence {
    account: Address,
    expected: u64,
    got: u64,
  },

  #[error("account {account} holds {has} but the transaction needs {needs}")]
  InsufficientFunds {
    account: Address,
    has: u64,
    needs: u64,
  },

  #[error("account {account} is not authorized to {flag}")]
  Unauthorized { account: Address, flag: Flag },

  #[error("input total {inputs} does not match output total {outputs}")]
  UnbalancedSend { inputs: u64, outputs: u64 },

  #[error("transaction moves no funds")]
  EmptyTransfer,

  #[error("duplicate input account {0}")]
  DuplicateInput(Address),

  #[error("unknown call target {0}")]
  UnknownCallTarget(Address),

  #[error("name '{0}' is registered to another owner")]
  NameTaken(String),

  #[error("invalid name registration: {0}")]
  InvalidName(String),

  #[error("amount {amount} does not cover the minimum registration cost {min}")]
  InsufficientNameFunding { amount: u64, min: u64 },

  #[error("account {account} already holds role '{role}'")]
  RoleExists { account: Address, role: String },

  #[error("account {account} does not hold role '{role}'")]
  RoleNotFound { account: Address, role: String },

  #[error("amount overflow")]
  Overflow,
}

/// Call-local failures.
///
/// These are contained to the failing nested call's scope: the scope
/// is discarded, the failure is reported through the event sink, and
/// the enclosing transaction continues unharmed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Exception {
  #[error("account {account} is not authorized to {flag}")]
  Permission { account: Address, flag: Flag },

  #[error("unknown account {0}")]
  UnknownAccount(Address),

  #[error("account {account} holds {has}, cannot transfer {needs}")]
  InsufficientBalance {
    account: Address,
    has: u64,
    needs: u64,
  },

  #[error("call depth limit of {0} exceeded")]
  CallDepth(usize),

  #[error("malformed call data: {0}")]
  Calldata(String),

  #[error("balance overflow")]
  Overflow,

  #[error("execution fault: {0}")]
  Fault(String),
}

/// One invocation of contract code.
#[derive(Debug, Clone)]
pub struct CallFrame {
  pub caller: Address,
  pub callee: Address,
  pub code: Vec<u8>,
  pub value: u64,
  pub gas: u64,
  /// True when running initialization code of a new contract. The
  /// returned bytes become the contract's installed code.
  pub init: bool,
}

/// The bytecode interpreter collaborator.
///
/// The executor hands it a frame and call data; for every CALL or
/// CREATE the code performs, the interpreter calls back through
/// [`CallEnv`] and receives the nested result without ever touching
/// state directly.
pub trait Interpreter {
  fn execute(
    &self,
    frame: &CallFrame,
    data: &[u8],
    env: &mut dyn CallEnv,
  ) -> Result<Vec<u8>, Exception>;
}

/// Callback surface consumed by the interpreter for nested calls.
///
/// `target` of `None` means "create a new contract from `data`". The
/// returned exception, if any, has already been contained: its scope
/// is rolled back and the event is emitted, so the interpreter is free
/// to surface it to the calling code as an ordinary failure result.
pub trait CallEnv {
  fn nested_call(
    &mut self,
    caller: Address,
    target: Option<Address>,
    data: &[u8],
    value: u64,
    gas: u64,
  ) -> (Vec<u8>, Option<Exception>);
}

/// Signature verification collaborator.
pub trait SignatureVerifier {
  fn verify(
    &self,
    payload: &[u8],
    public_key: &PublicKey,
    signature: &Signature,
  ) -> bool;
}

/// Verifier over plain ed25519 signatures.
#[derive(Debug, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
  fn verify(
    &self,
    payload: &[u8],
    public_key: &PublicKey,
    signature: &Signature,
  ) -> bool {
    public_key.verify(payload, signature).is_ok()
  }
}

/// Everything the executor needs besides the state cache.
pub struct Environment<'e> {
  pub params: &'e Params,
  /// Height of the block the transaction executes in.
  pub height: u64,
  pub interpreter: &'e dyn Interpreter,
  pub verifier: &'e dyn SignatureVerifier,
  pub events: &'e mut dyn EventSink,
}

/// Applies one transaction to the cache.
///
/// The whole transaction runs inside its own overlay scope: on any
/// [`Error`] the scope is discarded and the cache is exactly as it was
/// before the call. Call-local exceptions inside nested contract calls
/// do not surface here; they are contained per [`CallEnv`].
pub fn apply_transaction(
  cache: &mut StateCache,
  env: &mut Environment,
  tx: &Transaction,
) -> Result<(), Error> {
  let scope = cache.open_scope();
  let result = match tx {
    Transaction::Send(tx) => apply_send(cache, env, tx),
    Transaction::Call(tx) => apply_call(cache, env, tx),
    Transaction::Name(tx) => apply_name(cache, env, tx),
    Transaction::Bond(tx) => apply_bond(cache, env, tx),
    Transaction::Permissions(tx) => apply_permissions(cache, env, tx),
  };
  match result {
    Ok(()) => {
      cache.commit_scope(scope);
      Ok(())
    }
    Err(e) => {
      cache.discard_scope(scope);
      info!(error = %e, "transaction rejected");
      Err(e)
    }
  }
}

/// Common per-input validation: the account exists, the public key
/// matches the address, the declared sequence is the account's next,
/// the signature covers the payload, and the balance covers the
/// declared amount plus fee.
fn validate_input(
  cache: &StateCache,
  verifier: &dyn SignatureVerifier,
  input: &TxInput,
  payload: &[u8],
  fee: u64,
) -> Result<Account, Error> {
  let account = cache
    .get_account(&input.address)
    .ok_or(Error::UnknownInputAccount(input.address))?;
  if Address::from(&input.public_key) != input.address {
    return Err(Error::InvalidPublicKey(input.address));
  }
  let expected = account.sequence + 1;
  if input.sequence != expected {
    return Err(Error::BadSequence {
      account: input.address,
      expected,
      got: input.sequence,
    });
  }
  match &input.signature {
    Some(signature)
      if verifier.verify(payload, &input.public_key, signature) => {}
    _ => return Err(Error::InvalidSignature(input.address)),
  }
  let needs = input.amount.checked_add(fee).ok_or(Error::Overflow)?;
  if account.balance < needs {
    return Err(Error::InsufficientFunds {
      account: input.address,
      has: account.balance,
      needs,
    });
  }
  Ok(account)
}

fn apply_send(
  cache: &mut StateCache,
  env: &mut Environment,
  tx: &SendTx,
) -> Result<(), Error> {
  if tx.inputs.is_empty() || tx.outputs.is_empty() {
    return Err(Error::EmptyTransfer);
  }
  let payload = tx.signing_payload(&env.params.chain_id);

  let mut seen = BTreeSet::new();
  let mut accounts = Vec::with_capacity(tx.inputs.len());
  let mut in_total: u64 = 0;
  for input in &tx.inputs {
    if !seen.insert(input.address) {
      return Err(Error::DuplicateInput(input.address));
    }
    let account = validate_input(cache, env.verifier, input, &payload, 0)?;
    if !permissions::authorized(cache, &account, Flag::Send) {
      return Err(Error::Unauthorized {
        account: input.address,
        flag: Flag::Send,
      });
    }
    in_total = in_total.checked_add(input.amount).ok_or(Error::Overflow)?;
    accounts.push(account);
  }

  let mut out_total: u64 = 0;
  let mut creates_accounts = false;
  for output in &tx.outputs {
    out_total = out_total.checked_add(output.amount).ok_or(Error::Overflow)?;
    if cache.get_account(&output.address).is_none() {
      creates_accounts = true;
    }
  }
  if in_total != out_total {
    return Err(Error::UnbalancedSend {
      inputs: in_total,
      outputs: out_total,
    });
  }

  // sending to an address nobody has seen yet creates the account, and
  // that requires every input to hold the extra capability
  if creates_accounts {
    for (input, account) in tx.inputs.iter().zip(&accounts) {
      if !permissions::authorized(cache, account, Flag::CreateAccount) {
        return Err(Error::Unauthorized {
          account: input.address,
          flag: Flag::CreateAccount,
        });
      }
    }
  }

  for (input, mut account) in tx.inputs.iter().zip(accounts) {
    account.sequence += 1;
    account.balance -= input.amount;
    cache.update_account(account);
  }
  for output in &tx.outputs {
    let mut account = cache
      .get_account(&output.address)
      .unwrap_or_else(|| Account::new(output.address, 0));
    account.balance = account
      .balance
      .checked_add(output.amount)
      .ok_or(Error::Overflow)?;
    cache.update_account(account);
  }
  debug!(
    inputs = tx.inputs.len(),
    outputs = tx.outputs.len(),
    total = in_total,
    "send applied"
  );
  Ok(())
}

fn apply_call(
  cache: &mut StateCache,
  env: &mut Environment,
  tx: &CallTx,
) -> Result<(), Error> {
  let payload = tx.signing_payload(&env.params.chain_id);
  let account = validate_input(cache, env.verifier, &tx.input, &payload, tx.fee)?;
  let value = tx.value();

  let required = if tx.address.is_some() {
    Flag::Call
  } else {
    Flag::CreateContract
  };
  if !permissions::authorized(cache, &account, required) {
    return Err(Error::Unauthorized {
      account: tx.input.address,
      flag: required,
    });
  }
  if let Some(target) = tx.address {
    if !natives::is_native(&target) && cache.get_account(&target).is_none() {
      return Err(Error::UnknownCallTarget(target));
    }
  }

  // fee and value are charged up front; if execution raises an
  // exception the value is returned but the fee stays spent
  let mut caller = account;
  caller.sequence += 1;
  caller.balance -= value + tx.fee;
  cache.update_account(caller);

  debug!(
    caller = %tx.input.address,
    target = ?tx.address,
    value,
    fee = tx.fee,
    "call"
  );
  let mut ctx = CallContext { cache, env };
  match tx.address {
    Some(target) => {
      ctx.top_call(tx.input.address, target, &tx.data, value, tx.gas_limit)
    }
    None => ctx.top_create(
      tx.input.address,
      tx.input.sequence,
      &tx.data,
      value,
      tx.gas_limit,
    ),
  }
  Ok(())
}

fn apply_name(
  cache: &mut StateCache,
  env: &mut Environment,
  tx: &NameTx,
) -> Result<(), Error> {
  let payload = tx.signing_payload(&env.params.chain_id);
  let account = validate_input(cache, env.verifier, &tx.input, &payload, tx.fee)?;
  if !permissions::authorized(cache, &account, Flag::Name) {
    return Err(Error::Unauthorized {
      account: tx.input.address,
      flag: Flag::Name,
    });
  }
  if tx.name.is_empty() || tx.name.len() > MAX_NAME_LEN {
    return Err(Error::InvalidName(format!(
      "name must be 1..={MAX_NAME_LEN} bytes"
    )));
  }
  if tx.data.len() > MAX_NAME_DATA_LEN {
    return Err(Error::InvalidName(format!(
      "data must be at most {MAX_NAME_DATA_LEN} bytes"
    )));
  }

  let base_cost = ((tx.name.len() + tx.data.len()) as u64)
    .checked_mul(env.params.name_byte_cost)
    .ok_or(Error::Overflow)?;
  let cost_per_block = base_cost
    .checked_mul(env.params.name_block_cost)
    .ok_or(Error::Overflow)?
    .max(1);
  let amount = tx.input.amount;
  let min = env
    .params
    .min_name_registration_period
    .checked_mul(cost_per_block)
    .ok_or(Error::Overflow)?;
  if amount < min {
    return Err(Error::InsufficientNameFunding { amount, min });
  }

  // a live entry is untouchable by anyone but its owner; an expired
  // one may be claimed by whoever pays for it next
  if let Some(entry) = cache.get_name(&tx.name) {
    if entry.expires > env.height && entry.owner != tx.input.address {
      return Err(Error::NameTaken(tx.name.clone()));
    }
  }

  let mut account = account;
  account.sequence += 1;
  account.balance -= amount + tx.fee;
  cache.update_account(account);

  let expires = env
    .height
    .checked_add(amount / cost_per_block)
    .ok_or(Error::Overflow)?;
  cache.update_name(NameEntry {
    name: tx.name.clone(),
    owner: tx.input.address,
    data: tx.data.clone(),
    expires,
  });
  debug!(name = %tx.name, expires, "name registered");
  Ok(())
}

fn apply_bond(
  cache: &mut StateCache,
  env: &mut Environment,
  tx: &BondTx,
) -> Result<(), Error> {
  if tx.inputs.is_empty() {
    return Err(Error::EmptyTransfer);
  }
  let bonder = cache
    .get_account(&tx.bonder)
    .ok_or(Error::UnknownAccount(tx.bonder))?;
  if !permissions::authorized(cache, &bonder, Flag::Bond) {
    return Err(Error::Unauthorized {
      account: tx.bonder,
      flag: Flag::Bond,
    });
  }
  let payload = tx.signing_payload(&env.params.chain_id);

  let mut seen = BTreeSet::new();
  let mut accounts = Vec::with_capacity(tx.inputs.len());
  let mut total: u64 = 0;
  for input in &tx.inputs {
    if !seen.insert(input.address) {
      return Err(Error::DuplicateInput(input.address));
    }
    let account = validate_input(cache, env.verifier, input, &payload, 0)?;
    // a funding input needs Send, unless the input is the bonder
    // itself riding on its own Bond capability
    if input.address != tx.bonder
      && !permissions::authorized(cache, &account, Flag::Send)
    {
      return Err(Error::Unauthorized {
        account: input.address,
        flag: Flag::Send,
      });
    }
    total = total.checked_add(input.amount).ok_or(Error::Overflow)?;
    accounts.push(account);
  }

  for (input, mut account) in tx.inputs.iter().zip(accounts) {
    account.sequence += 1;
    account.balance -= input.amount;
    cache.update_account(account);
  }
  // re-read the bonder, it may have been among the inputs
  let mut bonder = cache
    .get_account(&tx.bonder)
    .ok_or(Error::UnknownAccount(tx.bonder))?;
  bonder.balance = bonder.balance.checked_add(total).ok_or(Error::Overflow)?;
  cache.update_account(bonder);
  debug!(bonder = %tx.bonder, total, "bond applied");
  Ok(())
}

fn apply_permissions(
  cache: &mut StateCache,
  env: &mut Environment,
  tx: &PermissionsTx,
) -> Result<(), Error> {
  let payload = tx.signing_payload(&env.params.chain_id);
  let account = validate_input(cache, env.verifier, &tx.input, &payload, 0)?;
  let required = tx.op.required();
  if !permissions::authorized(cache, &account, required) {
    return Err(Error::Unauthorized {
      account: tx.input.address,
      flag: required,
    });
  }

  let mut account = account;
  account.sequence += 1;
  account.balance -= tx.input.amount;
  cache.update_account(account);

  let changed = natives::apply_op(cache, &tx.op).map_err(Error::UnknownAccount)?;
  match (&tx.op, changed) {
    (PermissionOp::AddRole { target, role }, false) => {
      return Err(Error::RoleExists {
        account: *target,
        role: role.clone(),
      });
    }
    (PermissionOp::RemoveRole { target, role }, false) => {
      return Err(Error::RoleNotFound {
        account: *target,
        role: role.clone(),
      });
    }
    _ => {}
  }
  info!(op = ?tx.op, by = %tx.input.address, "permissions updated");
  Ok(())
}

/// Execution context threaded through contract invocations. Owns the
/// cache for the duration of one top-level call and implements the
/// interpreter's nested-call entry point.
struct CallContext<'a, 'e, 's> {
  cache: &'a mut StateCache<'s>,
  env: &'a mut Environment<'e>,
}

impl CallContext<'_, '_, '_> {
  /// Runs the top-level call of a call transaction. Exceptions here
  /// are not fatal to the transaction: the call scope is rolled back,
  /// the value is refunded and the outcome is reported as an event.
  fn top_call(
    &mut self,
    caller: Address,
    target: Address,
    data: &[u8],
    value: u64,
    gas: u64,
  ) {
    let scope = self.cache.open_scope();
    match self.enter_call(caller, target, data, value, gas) {
      Ok(ret) => {
        self.cache.commit_scope(scope);
        self.emit(target, ret, String::new());
      }
      Err(e) => {
        self.cache.discard_scope(scope);
        self.refund(&caller, value);
        self.emit(target, Vec::new(), e.to_string());
      }
    }
  }

  fn enter_call(
    &mut self,
    caller: Address,
    target: Address,
    data: &[u8],
    value: u64,
    gas: u64,
  ) -> Result<Vec<u8>, Exception> {
    if natives::is_native(&target) {
      return natives::dispatch(self.cache, &caller, data);
    }
    let mut callee = self
      .cache
      .get_account(&target)
      .ok_or(Exception::UnknownAccount(target))?;
    callee.balance =
      callee.balance.checked_add(value).ok_or(Exception::Overflow)?;
    let code = callee.code.clone();
    self.cache.update_account(callee);
    if code.is_empty() {
      return Ok(Vec::new());
    }
    let frame = CallFrame {
      caller,
      callee: target,
      code,
      value,
      gas,
      init: false,
    };
    let interpreter = self.env.interpreter;
    interpreter.execute(&frame, data, self)
  }

  /// Runs the initialization of a new contract created by a call
  /// transaction with no target. The contract address derives from
  /// the input's address and sequence number.
  fn top_create(
    &mut self,
    caller: Address,
    sequence: u64,
    init_code: &[u8],
    value: u64,
    gas: u64,
  ) {
    let child = caller.derive_contract(sequence);
    let scope = self.cache.open_scope();
    self.cache.update_account(Account::new(child, value));
    let frame = CallFrame {
      caller,
      callee: child,
      code: init_code.to_vec(),
      value,
      gas,
      init: true,
    };
    let interpreter = self.env.interpreter;
    match interpreter.execute(&frame, &[], self) {
      Ok(ret) => {
        let mut created = self
          .cache
          .get_account(&child)
          .unwrap_or_else(|| Account::new(child, value));
        created.code = ret.clone();
        self.cache.update_account(created);
        self.cache.commit_scope(scope);
        self.emit(child, ret, String::new());
      }
      Err(e) => {
        self.cache.discard_scope(scope);
        self.refund(&caller, value);
        self.emit(child, Vec::new(), e.to_string());
      }
    }
  }

  fn try_call(
    &mut self,
    caller: Address,
    target: Option<Address>,
    data: &[u8],
    value: u64,
    gas: u64,
  ) -> Result<Vec<u8>, Exception> {
    let mut caller_account = self
      .cache
      .get_account(&caller)
      .ok_or(Exception::UnknownAccount(caller))?;
    match target {
      Some(target) => {
        if !permissions::authorized(self.cache, &caller_account, Flag::Call) {
          return Err(Exception::Permission {
            account: caller,
            flag: Flag::Call,
          });
        }
        if natives::is_native(&target) {
          return natives::dispatch(self.cache, &caller, data);
        }
        if caller_account.balance < value {
          return Err(Exception::InsufficientBalance {
            account: caller,
            has: caller_account.balance,
            needs: value,
          });
        }
        let callee_account = match self.cache.get_account(&target) {
          Some(account) => account,
          None => {
            // calling an address nobody has seen yet creates the
            // account, gated by the caller's own capability
            if !permissions::authorized(
              self.cache,
              &caller_account,
              Flag::CreateAccount,
            ) {
              return Err(Exception::Permission {
                account: caller,
                flag: Flag::CreateAccount,
              });
            }
            Account::new(target, 0)
          }
        };
        let code = callee_account.code.clone();
        if target == caller {
          self.cache.update_account(caller_account);
        } else {
          caller_account.balance -= value;
          let mut callee_account = callee_account;
          callee_account.balance = callee_account
            .balance
            .checked_add(value)
            .ok_or(Exception::Overflow)?;
          self.cache.update_account(caller_account);
          self.cache.update_account(callee_account);
        }
        if code.is_empty() {
          return Ok(Vec::new());
        }
        let frame = CallFrame {
          caller,
          callee: target,
          code,
          value,
          gas,
          init: false,
        };
        let interpreter = self.env.interpreter;
        interpreter.execute(&frame, data, self)
      }
      None => {
        if !permissions::authorized(
          self.cache,
          &caller_account,
          Flag::CreateContract,
        ) {
          return Err(Exception::Permission {
            account: caller,
            flag: Flag::CreateContract,
          });
        }
        if caller_account.balance < value {
          return Err(Exception::InsufficientBalance {
            account: caller,
            has: caller_account.balance,
            needs: value,
          });
        }
        caller_account.sequence += 1;
        caller_account.balance -= value;
        let child =
          caller_account.address.derive_contract(caller_account.sequence);
        self.cache.update_account(caller_account);
        self.cache.update_account(Account::new(child, value));
        let frame = CallFrame {
          caller,
          callee: child,
          code: data.to_vec(),
          value,
          gas,
          init: true,
        };
        let interpreter = self.env.interpreter;
        let ret = interpreter.execute(&frame, &[], self)?;
        let mut created = self
          .cache
          .get_account(&child)
          .unwrap_or_else(|| Account::new(child, value));
        created.code = ret.clone();
        self.cache.update_account(created);
        Ok(ret)
      }
    }
  }

  fn refund(&mut self, address: &Address, value: u64) {
    if value == 0 {
      return;
    }
    if let Some(mut account) = self.cache.get_account(address) {
      account.balance += value;
      self.cache.update_account(account);
    }
  }

  fn emit(&mut self, target: Address, return_data: Vec<u8>, exception: String) {
    debug!(target = %target, ok = exception.is_empty(), "call finished");
    self.env.events.on_call(CallEvent {
      target,
      return_data,
      exception,
    });
  }
}

impl CallEnv for CallContext<'_, '_, '_> {
  fn nested_call(
    &mut self,
    caller: Address,
    target: Option<Address>,
    data: &[u8],
    value: u64,
    gas: u64,
  ) -> (Vec<u8>, Option<Exception>) {
    let event_target = match target {
      Some(target) => target,
      None => self
        .cache
        .get_account(&caller)
        .map(|acc| acc.address.derive_contract(acc.sequence + 1))
        .unwrap_or(caller),
    };
    if self.cache.depth() >= self.env.params.max_call_depth {
      let e = Exception::CallDepth(self.env.params.max_call_depth);
      self.emit(event_target, Vec::new(), e.to_string());
      return (Vec::new(), Some(e));
    }
    let scope = self.cache.open_scope();
    match self.try_call(caller, target, data, value, gas) {
      Ok(ret) => {
        self.cache.commit_scope(scope);
        self.emit(event_target, ret.clone(), String::new());
        (ret, None)
      }
      Err(e) => {
        self.cache.discard_scope(scope);
        self.emit(event_target, Vec::new(), e.to_string());
        (Vec::new(), Some(e))
      }
    }
  }
}
