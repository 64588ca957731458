//! Key Validator
//!
//! Gates every operation before hashing or network activity.
//!
//! ## Rules
//! - Keys are never empty
//! - Binary protocol: at most 250 bytes, any content
//! - Text protocol: at most 250 bytes counting the namespace prefix, and no
//!   control or whitespace bytes (they would split the command line)

use crate::error::{McrouteError, Result};

/// Longest key the binary protocol accepts (caller key, prefix excluded)
pub const MAX_BINARY_KEY_LEN: usize = 250;

/// Longest key the text protocol accepts (prefix included)
pub const MAX_TEXT_KEY_LEN: usize = 250;

/// Wire protocol a context speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    Binary,
    Text,
}

/// Validate a single key for the given mode
pub fn validate(key: &[u8], mode: ProtocolMode) -> Result<()> {
    validate_prefixed(key, 0, mode)
}

/// Validate a key that will be sent behind a `prefix_len`-byte namespace
pub fn validate_prefixed(key: &[u8], prefix_len: usize, mode: ProtocolMode) -> Result<()> {
    validate_length(key, prefix_len, mode)?;
    validate_content(key, mode)
}

/// Emptiness and length checks only
pub fn validate_length(key: &[u8], prefix_len: usize, mode: ProtocolMode) -> Result<()> {
    if key.is_empty() {
        return Err(McrouteError::InvalidKey("key is empty".to_string()));
    }

    match mode {
        ProtocolMode::Binary => {
            if key.len() > MAX_BINARY_KEY_LEN {
                return Err(McrouteError::InvalidKey(format!(
                    "key is {} bytes (max {})",
                    key.len(),
                    MAX_BINARY_KEY_LEN
                )));
            }
        }
        ProtocolMode::Text => {
            if key.len() + prefix_len > MAX_TEXT_KEY_LEN {
                return Err(McrouteError::InvalidKey(format!(
                    "key is {} bytes with prefix (max {})",
                    key.len() + prefix_len,
                    MAX_TEXT_KEY_LEN
                )));
            }
        }
    }
    Ok(())
}

/// Content check only; binary mode accepts any byte
pub fn validate_content(key: &[u8], mode: ProtocolMode) -> Result<()> {
    if mode == ProtocolMode::Binary {
        return Ok(());
    }

    match key.iter().position(|&b| b <= b' ' || b == 0x7f) {
        Some(pos) => Err(McrouteError::InvalidKey(format!(
            "byte 0x{:02x} at offset {} is not allowed in text protocol keys",
            key[pos], pos
        ))),
        None => Ok(()),
    }
}

/// A key plus the optional group key that decides its placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec<'a> {
    pub group_key: Option<&'a [u8]>,
    pub key: &'a [u8],
}

impl<'a> KeySpec<'a> {
    /// Key placed by itself
    pub fn new(key: &'a [u8]) -> Self {
        Self {
            group_key: None,
            key,
        }
    }

    /// Key placed alongside everything sharing `group_key`
    pub fn grouped(group_key: &'a [u8], key: &'a [u8]) -> Self {
        Self {
            group_key: Some(group_key),
            key,
        }
    }

    /// Bytes fed to the hash function
    pub fn placement(&self) -> &'a [u8] {
        self.group_key.unwrap_or(self.key)
    }

    /// Validate both the key and the group key
    pub fn validate(&self, prefix_len: usize, mode: ProtocolMode) -> Result<()> {
        self.validate_with(prefix_len, mode, true)
    }

    /// Validate, optionally skipping the text protocol content check
    pub fn validate_with(
        &self,
        prefix_len: usize,
        mode: ProtocolMode,
        verify_content: bool,
    ) -> Result<()> {
        validate_length(self.key, prefix_len, mode)?;
        if let Some(group_key) = self.group_key {
            validate_length(group_key, 0, mode)?;
        }
        if verify_content {
            validate_content(self.key, mode)?;
            if let Some(group_key) = self.group_key {
                validate_content(group_key, mode)?;
            }
        }
        Ok(())
    }
}
