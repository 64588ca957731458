//! Key hash functions
//!
//! All algorithms reduce to 32 bits; the 64-bit FNV variants are truncated.

use std::fmt;
use std::str::FromStr;

use crate::error::McrouteError;

const FNV_64_INIT: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_64_PRIME: u64 = 0x0000_0100_0000_01b3;
const FNV_32_INIT: u32 = 2_166_136_261;
const FNV_32_PRIME: u32 = 16_777_619;

/// Hash function applied to group keys
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    /// Jenkins one-at-a-time
    #[default]
    Default,
    /// Upper 15 bits of CRC32
    Crc,
    Fnv1_64,
    Fnv1a_64,
    Fnv1_32,
    Fnv1a_32,
}

impl HashAlgorithm {
    pub fn hash(&self, key: &[u8]) -> u32 {
        match self {
            HashAlgorithm::Default => one_at_a_time(key),
            HashAlgorithm::Crc => (crc32fast::hash(key) >> 16) & 0x7fff,
            HashAlgorithm::Fnv1_64 => {
                let mut hash = FNV_64_INIT;
                for &byte in key {
                    hash = hash.wrapping_mul(FNV_64_PRIME);
                    hash ^= byte as u64;
                }
                hash as u32
            }
            HashAlgorithm::Fnv1a_64 => {
                let mut hash = FNV_64_INIT;
                for &byte in key {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(FNV_64_PRIME);
                }
                hash as u32
            }
            HashAlgorithm::Fnv1_32 => {
                let mut hash = FNV_32_INIT;
                for &byte in key {
                    hash = hash.wrapping_mul(FNV_32_PRIME);
                    hash ^= byte as u32;
                }
                hash
            }
            HashAlgorithm::Fnv1a_32 => {
                let mut hash = FNV_32_INIT;
                for &byte in key {
                    hash ^= byte as u32;
                    hash = hash.wrapping_mul(FNV_32_PRIME);
                }
                hash
            }
        }
    }
}

fn one_at_a_time(key: &[u8]) -> u32 {
    let mut value: u32 = 0;
    for &byte in key {
        value = value.wrapping_add(byte as u32);
        value = value.wrapping_add(value << 10);
        value ^= value >> 6;
    }
    value = value.wrapping_add(value << 3);
    value ^= value >> 11;
    value.wrapping_add(value << 15)
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Default => "default",
            HashAlgorithm::Crc => "crc",
            HashAlgorithm::Fnv1_64 => "fnv1_64",
            HashAlgorithm::Fnv1a_64 => "fnv1a_64",
            HashAlgorithm::Fnv1_32 => "fnv1_32",
            HashAlgorithm::Fnv1a_32 => "fnv1a_32",
        };
        f.write_str(name)
    }
}

impl FromStr for HashAlgorithm {
    type Err = McrouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" | "one_at_a_time" => Ok(HashAlgorithm::Default),
            "crc" => Ok(HashAlgorithm::Crc),
            "fnv1_64" => Ok(HashAlgorithm::Fnv1_64),
            "fnv1a_64" => Ok(HashAlgorithm::Fnv1a_64),
            "fnv1_32" => Ok(HashAlgorithm::Fnv1_32),
            "fnv1a_32" => Ok(HashAlgorithm::Fnv1a_32),
            other => Err(McrouteError::Config(format!(
                "unknown hash algorithm '{}'",
                other
            ))),
        }
    }
}
