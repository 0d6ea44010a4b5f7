//! UTXO invocation transactions for the target chain.
//!
//! Fees are paid in the network's fee asset: inputs are chosen from the
//! relayer's unspent outputs, change returns to the relayer, and
//! transactions over 1024 bytes carry a size-based priority fee.

use alloy_primitives::B256;
use sha2::{Digest, Sha256};

use crate::chains::wire_hash_from_rpc;
use crate::codec::Sink;
use crate::db::UtxoKey;
use crate::error::{RelayError, Result};
use crate::wallet::{Account, verification_script};

pub const FIXED8: i64 = 100_000_000;

/// The fee asset id, wire (little-endian) order.
pub const FEE_ASSET: [u8; 32] = [
    0xe7, 0x2d, 0x28, 0x69, 0x79, 0xee, 0x6c, 0xb1, 0xb7, 0xe6, 0x5d, 0xfd, 0xdf, 0xb2, 0xe3,
    0x84, 0x10, 0x0b, 0x8d, 0x14, 0x8e, 0x77, 0x58, 0xde, 0x42, 0xe4, 0x16, 0x8b, 0x71, 0x79,
    0x2c, 0x60,
];

const TX_TYPE_INVOCATION: u8 = 0xd1;
const TX_VERSION: u8 = 1;
/// Transactions above this size pay for priority.
const FREE_SIZE_LIMIT: usize = 1024;
/// Serialized witness overhead for a single-signature account.
const WITNESS_SIZE_ESTIMATE: usize = 108;

pub fn fixed8_from_f64(value: f64) -> i64 {
    (value * FIXED8 as f64).round() as i64
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Previous transaction hash, wire order.
    pub prev_hash: [u8; 32],
    pub prev_index: u16,
}

#[derive(Debug, Clone)]
pub struct TxOutput {
    pub asset: [u8; 32],
    pub value: i64,
    pub script_hash: [u8; 20],
}

#[derive(Debug, Clone)]
pub struct Witness {
    pub invocation: Vec<u8>,
    pub verification: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct InvocationTx {
    pub script: Vec<u8>,
    /// Declared system fee, fixed8.
    pub gas: i64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub witnesses: Vec<Witness>,
}

impl InvocationTx {
    pub fn serialize_unsigned(&self) -> Vec<u8> {
        let mut sink = Sink::new();
        sink.write_byte(TX_TYPE_INVOCATION);
        sink.write_byte(TX_VERSION);
        sink.write_var_bytes(&self.script);
        sink.write_u64_le(self.gas as u64);
        sink.write_var_uint(0); // attributes
        sink.write_var_uint(self.inputs.len() as u64);
        for input in &self.inputs {
            sink.write_bytes(&input.prev_hash);
            sink.write_u16_le(input.prev_index);
        }
        sink.write_var_uint(self.outputs.len() as u64);
        for output in &self.outputs {
            sink.write_bytes(&output.asset);
            sink.write_u64_le(output.value as u64);
            sink.write_bytes(&output.script_hash);
        }
        sink.into_bytes()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut sink = Sink::new();
        sink.write_bytes(&self.serialize_unsigned());
        sink.write_var_uint(self.witnesses.len() as u64);
        for witness in &self.witnesses {
            sink.write_var_bytes(&witness.invocation);
            sink.write_var_bytes(&witness.verification);
        }
        sink.into_bytes()
    }

    /// Size once signed, before the witness exists.
    pub fn estimated_size(&self) -> usize {
        self.serialize_unsigned().len() + WITNESS_SIZE_ESTIMATE
    }

    pub fn digest(&self) -> B256 {
        let first = Sha256::digest(self.serialize_unsigned());
        B256::from_slice(&Sha256::digest(first))
    }

    /// Display-form (reversed) transaction hash.
    pub fn hash_hex(&self) -> String {
        let mut bytes = self.digest().0;
        bytes.reverse();
        const_hex::encode(bytes)
    }

    /// Sign with the relayer account and attach the single-signature
    /// witness.
    pub fn sign(&mut self, account: &Account) {
        let signature = account.sign_message(&self.serialize_unsigned());
        let mut invocation = Vec::with_capacity(65);
        invocation.push(signature.len() as u8);
        invocation.extend_from_slice(&signature);
        self.witnesses.push(Witness {
            invocation,
            verification: verification_script(&account.public_key()),
        });
    }
}

/// A spendable fee-asset output.
#[derive(Debug, Clone)]
pub struct SpendableOutput {
    pub key: UtxoKey,
    /// Value in fixed8.
    pub value: i64,
}

#[derive(Debug)]
pub struct BuiltTx {
    pub tx: InvocationTx,
    /// Outputs consumed as inputs, to be marked spent after broadcast.
    pub consumed: Vec<UtxoKey>,
}

/// Choose inputs covering `amount`, smallest first, and the matching
/// change. Fails with [`RelayError::InsufficientFunds`] when the listing
/// cannot cover the amount.
fn select_inputs(
    available: &[SpendableOutput],
    amount: i64,
) -> Result<(Vec<TxInput>, Vec<UtxoKey>, i64)> {
    let mut sorted: Vec<&SpendableOutput> = available.iter().collect();
    sorted.sort_by_key(|output| output.value);

    let mut inputs = Vec::new();
    let mut consumed = Vec::new();
    let mut total = 0i64;
    for output in sorted {
        if total >= amount {
            break;
        }
        inputs.push(TxInput {
            prev_hash: wire_hash_from_rpc(&output.key.txid)?,
            prev_index: output.key.index as u16,
        });
        consumed.push(output.key.clone());
        total += output.value;
    }
    if total < amount {
        return Err(RelayError::InsufficientFunds {
            available: total,
            required: amount,
        });
    }
    Ok((inputs, consumed, total))
}

fn assemble(
    script: &[u8],
    declared_gas: i64,
    fee: i64,
    available: &[SpendableOutput],
    owner: [u8; 20],
) -> Result<BuiltTx> {
    let amount = declared_gas + fee;
    let (inputs, consumed, total) = if amount > 0 {
        select_inputs(available, amount)?
    } else {
        (Vec::new(), Vec::new(), 0)
    };
    let mut outputs = Vec::new();
    let change = total - amount;
    if change > 0 {
        outputs.push(TxOutput {
            asset: FEE_ASSET,
            value: change,
            script_hash: owner,
        });
    }
    Ok(BuiltTx {
        tx: InvocationTx {
            script: script.to_vec(),
            gas: declared_gas,
            inputs,
            outputs,
            witnesses: Vec::new(),
        },
        consumed,
    })
}

/// Fee owed for transactions over the free size limit.
pub fn priority_fee(size: usize) -> i64 {
    if size <= FREE_SIZE_LIMIT {
        return 0;
    }
    let size_fee = size as i64 * fixed8_from_f64(0.00001);
    size_fee.max(fixed8_from_f64(0.001))
}

/// Build an unsigned invocation transaction paying `declared_gas` plus
/// `fee`, re-selecting once when the serialized size crosses into priced
/// territory.
pub fn build_invocation_tx(
    script: &[u8],
    declared_gas: i64,
    fee: i64,
    available: &[SpendableOutput],
    owner: [u8; 20],
) -> Result<BuiltTx> {
    let first = assemble(script, declared_gas, fee, available, owner)?;
    let extra = priority_fee(first.tx.estimated_size());
    if extra == 0 {
        return Ok(first);
    }
    assemble(script, declared_gas, fee + extra, available, owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Source;

    fn spendable(seed: u8, index: i32, value: f64) -> SpendableOutput {
        SpendableOutput {
            key: UtxoKey {
                txid: seed.to_string().repeat(64).chars().take(64).collect(),
                index,
            },
            value: fixed8_from_f64(value),
        }
    }

    #[test]
    fn selects_smallest_outputs_first() {
        let available = vec![
            spendable(3, 0, 5.0),
            spendable(1, 1, 0.5),
            spendable(2, 2, 1.0),
        ];
        let (inputs, consumed, total) =
            select_inputs(&available, fixed8_from_f64(1.2)).unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(consumed[0].index, 1);
        assert_eq!(consumed[1].index, 2);
        assert_eq!(total, fixed8_from_f64(1.5));
    }

    #[test]
    fn insufficient_balance_is_typed() {
        let available = vec![spendable(1, 0, 0.25)];
        let err = select_inputs(&available, fixed8_from_f64(1.0)).unwrap_err();
        match err {
            RelayError::InsufficientFunds {
                available,
                required,
            } => {
                assert_eq!(available, fixed8_from_f64(0.25));
                assert_eq!(required, fixed8_from_f64(1.0));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn change_returns_to_owner() {
        let owner = [0x77u8; 20];
        let built = build_invocation_tx(
            &[0x51],
            0,
            fixed8_from_f64(0.6),
            &[spendable(1, 0, 1.0)],
            owner,
        )
        .unwrap();
        assert_eq!(built.tx.outputs.len(), 1);
        assert_eq!(built.tx.outputs[0].value, fixed8_from_f64(0.4));
        assert_eq!(built.tx.outputs[0].script_hash, owner);
        assert_eq!(built.consumed.len(), 1);
    }

    #[test]
    fn zero_fee_needs_no_inputs() {
        let built =
            build_invocation_tx(&[0x51], 0, 0, &[], [0u8; 20]).unwrap();
        assert!(built.tx.inputs.is_empty());
        assert!(built.tx.outputs.is_empty());
        assert!(built.consumed.is_empty());
    }

    #[test]
    fn priority_fee_kicks_in_past_the_limit() {
        assert_eq!(priority_fee(1024), 0);
        let fee = priority_fee(2000);
        assert_eq!(fee, 2000 * fixed8_from_f64(0.00001));
        // tiny oversize still pays the floor
        assert_eq!(priority_fee(1025), fixed8_from_f64(0.001).max(1025 * 1000));
    }

    #[test]
    fn oversized_script_pays_priority_fee() {
        let script = vec![0x51; 2048];
        let base_fee = fixed8_from_f64(0.1);
        let built = build_invocation_tx(
            &script,
            0,
            base_fee,
            &[spendable(1, 0, 10.0)],
            [0x11; 20],
        )
        .unwrap();
        let expected_fee = base_fee + priority_fee(built.tx.estimated_size());
        let change = built.tx.outputs[0].value;
        assert_eq!(change, fixed8_from_f64(10.0) - expected_fee);
    }

    #[test]
    fn signed_tx_serializes_with_witness() {
        let account = Account::from_secret(&[9u8; 32]).unwrap();
        let mut built = build_invocation_tx(
            &[0x51],
            0,
            fixed8_from_f64(0.001),
            &[spendable(1, 0, 0.002)],
            account.script_hash(),
        )
        .unwrap();
        built.tx.sign(&account);
        let raw = built.tx.serialize();
        let mut source = Source::new(&raw);
        assert_eq!(source.read_byte().unwrap(), TX_TYPE_INVOCATION);
        assert_eq!(source.read_byte().unwrap(), TX_VERSION);
        assert_eq!(source.read_var_bytes().unwrap(), &[0x51]);
        assert_eq!(source.read_u64_le().unwrap(), 0);
        assert_eq!(source.read_var_uint().unwrap(), 0); // attributes
        assert_eq!(source.read_var_uint().unwrap(), 1); // inputs
        source.read_bytes(34).unwrap();
        assert_eq!(source.read_var_uint().unwrap(), 1); // outputs
        source.read_bytes(32 + 8 + 20).unwrap();
        assert_eq!(source.read_var_uint().unwrap(), 1); // witnesses
        assert_eq!(source.read_var_bytes().unwrap().len(), 65);
        assert_eq!(source.read_var_bytes().unwrap().len(), 35);
        assert!(source.is_empty());
        assert_eq!(built.tx.hash_hex().len(), 64);
    }
}
