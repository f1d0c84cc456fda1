mod account;
mod address;
mod b58;
mod permissions;
mod transaction;

pub use {
  account::Account,
  address::{Address, ADDRESS_LEN},
  b58::ToBase58String,
  permissions::{AccountPermissions, BasePermissions, Flag, PermissionOp},
  transaction::{
    BondTx,
    CallTx,
    NameTx,
    PermissionsTx,
    SendTx,
    Transaction,
    TxInput,
    TxOutput,
  },
};
