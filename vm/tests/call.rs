use {
  common::{
    address,
    deployable,
    exec,
    factory,
    forwarder,
    genesis,
    grant,
    install_contract,
    users,
    CHAIN_ID,
    STARTING_BALANCE,
  },
  ed25519_dalek::Keypair,
  vellum_primitives::{Address, CallTx, Flag, Transaction},
  vellum_vm::{Error, State},
};

mod common;

const NOOP_CODE: &[u8] = &[0xAA];

fn call(
  from: &Keypair,
  target: Option<Address>,
  data: Vec<u8>,
  value: u64,
  sequence: u64,
) -> Transaction {
  let mut tx = CallTx::new(from.public, target, data, value, sequence, 10_000, 100);
  tx.sign(CHAIN_ID, from);
  Transaction::Call(tx)
}

#[test]
fn call_requires_call_capability() {
  let users = users(5);
  let mut store = genesis(&users);
  grant(&mut store, &address(&users[1]), Flag::Send, true);
  grant(&mut store, &address(&users[2]), Flag::Call, true);
  grant(&mut store, &address(&users[3]), Flag::CreateContract, true);

  let simple = address(&users[0]).derive_contract(100);
  install_contract(&mut store, simple, NOOP_CODE.to_vec(), 0);

  for kp in [&users[0], &users[1], &users[3]] {
    let (result, _) = exec(&mut store, 1, &call(kp, Some(simple), vec![], 0, 1));
    assert!(matches!(
      result,
      Err(Error::Unauthorized {
        flag: Flag::Call,
        ..
      })
    ));
  }

  // contract creation is gated by its own capability
  for kp in [&users[0], &users[1], &users[2]] {
    let (result, _) = exec(
      &mut store,
      1,
      &call(kp, None, deployable(NOOP_CODE), 0, 1),
    );
    assert!(matches!(
      result,
      Err(Error::Unauthorized {
        flag: Flag::CreateContract,
        ..
      })
    ));
  }
}

#[test]
fn call_with_capability_passes() {
  let users = users(1);
  let mut store = genesis(&users);
  grant(&mut store, &address(&users[0]), Flag::Call, true);

  let simple = address(&users[0]).derive_contract(100);
  install_contract(&mut store, simple, NOOP_CODE.to_vec(), 0);

  let (result, events) =
    exec(&mut store, 1, &call(&users[0], Some(simple), vec![], 7, 1));
  assert!(result.is_ok());
  assert!(!events.last_for(&simple).unwrap().failed());

  // value and fee left the caller, value reached the contract
  assert_eq!(
    store.get(&address(&users[0])).unwrap().balance,
    STARTING_BALANCE - 7 - 100
  );
  assert_eq!(store.get(&simple).unwrap().balance, 7);
}

#[test]
fn nested_call_needs_the_contracts_own_capability() {
  let users = users(1);
  let mut store = genesis(&users);
  grant(&mut store, &address(&users[0]), Flag::Call, true);

  let simple = address(&users[0]).derive_contract(100);
  install_contract(&mut store, simple, NOOP_CODE.to_vec(), 0);

  let caller1 = address(&users[0]).derive_contract(101);
  install_contract(&mut store, caller1, forwarder(&simple), 10_000);

  // the user may call caller1, but caller1 itself holds no call
  // capability: the inner call fails, the outer transaction does not
  let (result, events) =
    exec(&mut store, 1, &call(&users[0], Some(caller1), vec![], 0, 1));
  assert!(result.is_ok());
  assert!(events.last_for(&simple).unwrap().failed());
  assert!(!events.last_for(&caller1).unwrap().failed());

  grant(&mut store, &caller1, Flag::Call, true);
  let (result, events) =
    exec(&mut store, 1, &call(&users[0], Some(caller1), vec![], 0, 2));
  assert!(result.is_ok());
  assert!(!events.last_for(&simple).unwrap().failed());
}

#[test]
fn capability_is_checked_at_every_level_of_the_chain() {
  let users = users(1);
  let mut store = genesis(&users);
  grant(&mut store, &address(&users[0]), Flag::Call, true);

  let simple = address(&users[0]).derive_contract(100);
  install_contract(&mut store, simple, NOOP_CODE.to_vec(), 0);

  let caller1 = address(&users[0]).derive_contract(101);
  install_contract(&mut store, caller1, forwarder(&simple), 10_000);

  let caller2 = address(&users[0]).derive_contract(102);
  install_contract(&mut store, caller2, forwarder(&caller1), 1_000);
  grant(&mut store, &caller2, Flag::Call, true);

  // caller2 may call caller1, but caller1 may not call simple
  let (result, events) =
    exec(&mut store, 1, &call(&users[0], Some(caller2), vec![], 0, 1));
  assert!(result.is_ok());
  assert!(events.last_for(&simple).unwrap().failed());
  assert!(!events.last_for(&caller1).unwrap().failed());

  grant(&mut store, &caller1, Flag::Call, true);
  let (result, events) =
    exec(&mut store, 1, &call(&users[0], Some(caller2), vec![], 0, 2));
  assert!(result.is_ok());
  assert!(!events.last_for(&simple).unwrap().failed());
}

#[test]
fn create_installs_the_returned_code() {
  let users = users(1);
  let mut store = genesis(&users);
  grant(&mut store, &address(&users[0]), Flag::CreateContract, true);

  let (result, events) = exec(
    &mut store,
    1,
    &call(&users[0], None, deployable(NOOP_CODE), 0, 1),
  );
  assert!(result.is_ok());

  let contract = address(&users[0]).derive_contract(1);
  assert!(!events.last_for(&contract).unwrap().failed());
  assert_eq!(store.get(&contract).unwrap().code, NOOP_CODE);
}

#[test]
fn factory_needs_create_contract_capability() {
  let users = users(1);
  let mut store = genesis(&users);
  grant(&mut store, &address(&users[0]), Flag::Call, true);
  grant(&mut store, &address(&users[0]), Flag::CreateContract, true);

  let plant = address(&users[0]).derive_contract(103);
  install_contract(&mut store, plant, factory(), 1_000);

  // the factory contract runs CREATE without holding the capability
  let (result, events) = exec(
    &mut store,
    1,
    &call(&users[0], Some(plant), deployable(&[0xBB]), 0, 1),
  );
  assert!(result.is_ok());
  assert!(events.events().iter().any(|ev| ev.failed()));

  grant(&mut store, &plant, Flag::CreateContract, true);
  let (result, events) = exec(
    &mut store,
    1,
    &call(&users[0], Some(plant), deployable(&[0xBB]), 0, 2),
  );
  assert!(result.is_ok());
  assert!(events.events().iter().all(|ev| !ev.failed()));

  // the created contract is announced through the event log
  let created = events
    .events()
    .iter()
    .find(|ev| ev.target != plant)
    .expect("no creation event");
  assert_eq!(store.get(&created.target).unwrap().code, vec![0xBB]);
}

#[test]
fn nested_call_to_unknown_address_mints_the_account() {
  let users = users(1);
  let mut store = genesis(&users);
  grant(&mut store, &address(&users[0]), Flag::Call, true);

  let stranger = Address::from(&Keypair::generate(&mut rand::thread_rng()).public);
  let caller1 = address(&users[0]).derive_contract(101);
  install_contract(&mut store, caller1, forwarder(&stranger), 1_000);
  grant(&mut store, &caller1, Flag::Call, true);

  // call capability alone cannot mint accounts
  let (result, events) =
    exec(&mut store, 1, &call(&users[0], Some(caller1), vec![], 0, 1));
  assert!(result.is_ok());
  assert!(events.last_for(&stranger).unwrap().failed());
  assert!(store.get(&stranger).is_none());

  grant(&mut store, &caller1, Flag::CreateAccount, true);
  let (result, events) =
    exec(&mut store, 1, &call(&users[0], Some(caller1), vec![], 0, 2));
  assert!(result.is_ok());
  assert!(!events.last_for(&stranger).unwrap().failed());

  // the minted account got the forwarded value and no code
  let minted = store.get(&stranger).unwrap();
  assert_eq!(minted.balance, 1);
  assert!(minted.code.is_empty());
}

#[test]
fn call_to_unknown_target_is_fatal() {
  let users = users(1);
  let mut store = genesis(&users);
  grant(&mut store, &address(&users[0]), Flag::Call, true);

  let nowhere = address(&users[0]).derive_contract(999);
  let (result, _) =
    exec(&mut store, 1, &call(&users[0], Some(nowhere), vec![], 0, 1));
  assert_eq!(result, Err(Error::UnknownCallTarget(nowhere)));
  assert_eq!(
    store.get(&address(&users[0])).unwrap().balance,
    STARTING_BALANCE
  );
}

#[test]
fn runaway_recursion_is_cut_off() {
  let users = users(1);
  let mut store = genesis(&users);
  grant(&mut store, &address(&users[0]), Flag::Call, true);

  // a contract that endlessly calls itself
  let looper = address(&users[0]).derive_contract(104);
  install_contract(&mut store, looper, forwarder(&looper), 1_000);
  grant(&mut store, &looper, Flag::Call, true);

  let (result, events) =
    exec(&mut store, 1, &call(&users[0], Some(looper), vec![], 0, 1));
  assert!(result.is_ok());
  assert!(events
    .events()
    .iter()
    .any(|ev| ev.exception.contains("depth")));
}

#[test]
fn call_to_codeless_account_is_a_plain_transfer() {
  let users = users(2);
  let mut store = genesis(&users);
  grant(&mut store, &address(&users[0]), Flag::Call, true);

  let (result, events) = exec(
    &mut store,
    1,
    &call(&users[0], Some(address(&users[1])), vec![], 25, 1),
  );
  assert!(result.is_ok());
  assert!(!events.last_for(&address(&users[1])).unwrap().failed());
  assert_eq!(
    store.get(&address(&users[1])).unwrap().balance,
    STARTING_BALANCE + 25
  );
}
