//! Unspent transaction outputs as supplied by the wallet.

use serde::{Deserialize, Serialize};

/// An unspent output. Read-only input to planning and mining.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// Value in satoshis.
    pub value: u64,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub confirmations: u32,
}

impl Utxo {
    /// Create a UTXO with no address or confirmation data.
    pub fn new(txid: impl Into<String>, vout: u32, value: u64) -> Self {
        Utxo {
            txid: txid.into(),
            vout,
            value,
            address: String::new(),
            confirmations: 0,
        }
    }

    /// The outpoint string `"{txid}:{vout}"`.
    pub fn outpoint(&self) -> String {
        format!("{}:{}", self.txid, self.vout)
    }
}

/// Sum of UTXO values.
pub fn total_value<'a, I>(utxos: I) -> u64
where
    I: IntoIterator<Item = &'a Utxo>,
{
    utxos.into_iter().map(|u| u.value).sum()
}
