use anyhow::{Context, Result, ensure};

/// Words of raw address carried on the wire.
pub const EP_ADDR_WORDS: usize = 6;
/// The raw address budget is fixed at 6 64-bit words (48 bytes). Any
/// provider whose addresses exceed this cannot participate.
pub const MAX_ADDR_LEN: usize = EP_ADDR_WORDS * 8;

const KEY_NAMESPACE: &str = "LCI_KEY";

/// A raw endpoint address, held as 6 big-endian 64-bit words. Shorter
/// provider addresses are zero-padded to the full 48-byte budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawEndpointAddress([u64; EP_ADDR_WORDS]);

impl RawEndpointAddress {
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        ensure!(
            raw.len() <= MAX_ADDR_LEN,
            "endpoint address is {} bytes, budget is {}",
            raw.len(),
            MAX_ADDR_LEN
        );
        let mut padded = [0u8; MAX_ADDR_LEN];
        padded[..raw.len()].copy_from_slice(raw);
        let mut words = [0u64; EP_ADDR_WORDS];
        for (word, chunk) in words.iter_mut().zip(padded.chunks_exact(8)) {
            *word = u64::from_be_bytes(chunk.try_into()?);
        }
        Ok(Self(words))
    }

    pub fn to_bytes(self) -> [u8; MAX_ADDR_LEN] {
        let mut out = [0u8; MAX_ADDR_LEN];
        for (chunk, word) in out.chunks_exact_mut(8).zip(self.0) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        out
    }

    /// Renders the wire record: six fixed-width hex tokens joined by `-`.
    pub fn serialize(&self) -> String {
        self.0
            .iter()
            .map(|word| format!("{:016x}", word))
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Parses a wire record. Strict: exactly six 16-digit hex tokens.
    pub fn deserialize(record: &str) -> Result<Self> {
        let tokens: Vec<&str> = record.split('-').collect();
        ensure!(
            tokens.len() == EP_ADDR_WORDS,
            "address record has {} tokens, expected {}",
            tokens.len(),
            EP_ADDR_WORDS
        );
        let mut words = [0u64; EP_ADDR_WORDS];
        for (word, token) in words.iter_mut().zip(&tokens) {
            ensure!(
                token.len() == 16,
                "address token {:?} is not 16 hex digits",
                token
            );
            *word = u64::from_str_radix(token, 16)
                .with_context(|| format!("parsing address token {:?}", token))?;
        }
        Ok(Self(words))
    }
}

/// The rendezvous key one rank publishes its address under. Unique per
/// device instance and rank across the participant set.
pub fn exchange_key(device_id: u32, rank: usize) -> String {
    format!("{}_{}_{}", KEY_NAMESPACE, device_id, rank)
}
