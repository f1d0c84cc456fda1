use {
  crate::{Address, PermissionOp},
  ed25519_dalek::{Keypair, PublicKey, Signature, Signer},
  multihash::{Hasher, Sha3_256},
  serde::{Deserialize, Serialize},
};

/// A signed debit authorization against one account.
///
/// The signature covers the enclosing transaction's signing payload,
/// which binds the chain identifier and the input's declared sequence
/// number, so an input can neither be replayed on another chain nor
/// re-submitted once the account's sequence has advanced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxInput {
  pub address: Address,
  pub amount: u64,
  pub sequence: u64,
  pub public_key: PublicKey,
  pub signature: Option<Signature>,
}

impl TxInput {
  pub fn new(public_key: PublicKey, amount: u64, sequence: u64) -> Self {
    Self {
      address: Address::from(&public_key),
      amount,
      sequence,
      public_key,
      signature: None,
    }
  }

  pub fn sign(&mut self, payload: &[u8], keypair: &Keypair) {
    self.signature = Some(keypair.sign(payload));
  }

  /// The signature-free projection hashed into signing payloads.
  fn unsigned(&self) -> (Address, u64, u64) {
    (self.address, self.amount, self.sequence)
  }
}

/// A credit to one account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxOutput {
  pub address: Address,
  pub amount: u64,
}

/// Transfers balance from a set of signed inputs to a set of outputs.
/// Input and output totals must match exactly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SendTx {
  pub inputs: Vec<TxInput>,
  pub outputs: Vec<TxOutput>,
}

impl SendTx {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_input(&mut self, public_key: PublicKey, amount: u64, sequence: u64) {
    self.inputs.push(TxInput::new(public_key, amount, sequence));
  }

  pub fn add_output(&mut self, address: Address, amount: u64) {
    self.outputs.push(TxOutput { address, amount });
  }

  pub fn signing_payload(&self, chain_id: &str) -> Vec<u8> {
    let inputs: Vec<_> = self.inputs.iter().map(TxInput::unsigned).collect();
    payload(chain_id, b"send", &(inputs, &self.outputs))
  }

  pub fn sign_input(&mut self, chain_id: &str, index: usize, keypair: &Keypair) {
    let payload = self.signing_payload(chain_id);
    self.inputs[index].sign(&payload, keypair);
  }
}

/// Invokes contract code, or creates a new contract when `address` is
/// absent. The input amount is the value transferred to the callee (or
/// the initial balance of the created contract); the fee is charged on
/// top of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallTx {
  pub input: TxInput,
  /// Call target. `None` means "create a new contract from `data`".
  pub address: Option<Address>,
  pub gas_limit: u64,
  pub fee: u64,
  /// Call data for a call, initialization code for a creation.
  pub data: Vec<u8>,
}

impl CallTx {
  pub fn new(
    public_key: PublicKey,
    address: Option<Address>,
    data: Vec<u8>,
    amount: u64,
    sequence: u64,
    gas_limit: u64,
    fee: u64,
  ) -> Self {
    Self {
      input: TxInput::new(public_key, amount, sequence),
      address,
      gas_limit,
      fee,
      data,
    }
  }

  /// Value transferred to the callee (the input's declared amount).
  pub fn value(&self) -> u64 {
    self.input.amount
  }

  pub fn signing_payload(&self, chain_id: &str) -> Vec<u8> {
    payload(
      chain_id,
      b"call",
      &(
        self.input.unsigned(),
        self.address,
        self.gas_limit,
        self.fee,
        &self.data,
      ),
    )
  }

  pub fn sign(&mut self, chain_id: &str, keypair: &Keypair) {
    let payload = self.signing_payload(chain_id);
    self.input.sign(&payload, keypair);
  }
}

/// Registers or updates an entry in the name registry. The input
/// amount funds the registration period; the fee is charged on top.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NameTx {
  pub input: TxInput,
  pub name: String,
  pub data: String,
  pub fee: u64,
}

impl NameTx {
  pub fn new(
    public_key: PublicKey,
    name: impl Into<String>,
    data: impl Into<String>,
    amount: u64,
    sequence: u64,
    fee: u64,
  ) -> Self {
    Self {
      input: TxInput::new(public_key, amount, sequence),
      name: name.into(),
      data: data.into(),
      fee,
    }
  }

  pub fn signing_payload(&self, chain_id: &str) -> Vec<u8> {
    payload(
      chain_id,
      b"name",
      &(self.input.unsigned(), &self.name, &self.data, self.fee),
    )
  }

  pub fn sign(&mut self, chain_id: &str, keypair: &Keypair) {
    let payload = self.signing_payload(chain_id);
    self.input.sign(&payload, keypair);
  }
}

/// Moves balance from signed inputs into a designated bonder account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BondTx {
  pub bonder: Address,
  pub inputs: Vec<TxInput>,
}

impl BondTx {
  pub fn new(bonder: Address) -> Self {
    Self {
      bonder,
      inputs: Vec::new(),
    }
  }

  pub fn add_input(&mut self, public_key: PublicKey, amount: u64, sequence: u64) {
    self.inputs.push(TxInput::new(public_key, amount, sequence));
  }

  pub fn signing_payload(&self, chain_id: &str) -> Vec<u8> {
    let inputs: Vec<_> = self.inputs.iter().map(TxInput::unsigned).collect();
    payload(chain_id, b"bond", &(self.bonder, inputs))
  }

  pub fn sign_input(&mut self, chain_id: &str, index: usize, keypair: &Keypair) {
    let payload = self.signing_payload(chain_id);
    self.inputs[index].sign(&payload, keypair);
  }
}

/// Performs one permission-management operation as a first-class
/// transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PermissionsTx {
  pub input: TxInput,
  pub op: PermissionOp,
}

impl PermissionsTx {
  pub fn new(public_key: PublicKey, sequence: u64, op: PermissionOp) -> Self {
    Self {
      input: TxInput::new(public_key, 0, sequence),
      op,
    }
  }

  pub fn signing_payload(&self, chain_id: &str) -> Vec<u8> {
    payload(chain_id, b"permissions", &(self.input.unsigned(), &self.op))
  }

  pub fn sign(&mut self, chain_id: &str, keypair: &Keypair) {
    let payload = self.signing_payload(chain_id);
    self.input.sign(&payload, keypair);
  }
}

/// The five state-mutating operations accepted by the executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Transaction {
  Send(SendTx),
  Call(CallTx),
  Name(NameTx),
  Bond(BondTx),
  Permissions(PermissionsTx),
}

impl Transaction {
  pub fn signing_payload(&self, chain_id: &str) -> Vec<u8> {
    match self {
      Self::Send(tx) => tx.signing_payload(chain_id),
      Self::Call(tx) => tx.signing_payload(chain_id),
      Self::Name(tx) => tx.signing_payload(chain_id),
      Self::Bond(tx) => tx.signing_payload(chain_id),
      Self::Permissions(tx) => tx.signing_payload(chain_id),
    }
  }
}

/// Sha3-256 digest over the chain identifier, a kind tag and the
/// canonical encoding of the signature-free transaction body. This is
/// the message every input signature covers.
fn payload(chain_id: &str, kind: &[u8], body: &impl Serialize) -> Vec<u8> {
  let mut hasher = Sha3_256::default();
  hasher.update(chain_id.as_bytes());
  hasher.update(kind);
  hasher.update(&rmp_serde::to_vec(body).unwrap());
  hasher.finalize().to_vec()
}
