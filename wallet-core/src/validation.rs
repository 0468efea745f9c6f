use bip39::{Language, Mnemonic};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::models::{Network, SendTransactionParams};
use crate::units::{parse_quantity, Amount};

/// Minimum gas for a plain value transfer.
pub const MIN_GAS_LIMIT: u128 = 21_000;
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Result of a validation rule. `error` is set exactly when `is_valid` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationOutcome {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> WalletResult<()> {
        if self.is_valid {
            return Ok(());
        }
        Err(WalletError::ValidationError(
            self.error.unwrap_or_else(|| "Invalid input".to_string()),
        ))
    }
}

/// Input validation rules for the wallet. Every rule is pure.
#[derive(Debug, Clone)]
pub struct InputValidator {
    address_pattern: Regex,
    mnemonic_word_pattern: Regex,
    hex_data_pattern: Regex,
    endpoint_pattern: Regex,
    script_patterns: Vec<Regex>,
}

impl InputValidator {
    pub fn new() -> WalletResult<Self> {
        let address_pattern = compile(r"^0x[a-fA-F0-9]{40}$")?;
        let mnemonic_word_pattern = compile(r"^[a-z]+$")?;
        let hex_data_pattern = compile(r"^0x([0-9a-fA-F]{2})*$")?;
        let endpoint_pattern = compile(r"^https?://[^\s/$.?#][^\s]*$")?;

        let script_patterns = vec![
            compile(r"(?i)javascript:")?,
            compile(r"(?i)on\w+=")?,
            compile(r"[<>]")?,
        ];

        Ok(InputValidator {
            address_pattern,
            mnemonic_word_pattern,
            hex_data_pattern,
            endpoint_pattern,
            script_patterns,
        })
    }

    pub fn validate_password(&self, password: &str) -> ValidationOutcome {
        if password.is_empty() {
            return ValidationOutcome::invalid("Password is required");
        }

        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return ValidationOutcome::invalid("Password must be at least 8 characters long");
        }

        let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
        let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
        let has_digit = password.chars().any(|c| c.is_ascii_digit());
        if !(has_upper && has_lower && has_digit) {
            return ValidationOutcome::invalid(
                "Password must contain at least one uppercase letter, one lowercase letter, and one number",
            );
        }

        ValidationOutcome::valid()
    }

    /// Shape rules first (12 or 24 lowercase words), then BIP-39 wordlist
    /// membership and checksum.
    pub fn validate_mnemonic(&self, mnemonic: &str) -> ValidationOutcome {
        let words: Vec<&str> = mnemonic.split_whitespace().collect();
        if words.is_empty() {
            return ValidationOutcome::invalid("Mnemonic is required");
        }

        if words.len() != 12 && words.len() != 24 {
            return ValidationOutcome::invalid("Mnemonic must be 12 or 24 words");
        }

        if !words.iter().all(|w| self.mnemonic_word_pattern.is_match(w)) {
            return ValidationOutcome::invalid("Mnemonic contains invalid words");
        }

        match Mnemonic::parse_in_normalized(Language::English, &words.join(" ")) {
            Ok(_) => ValidationOutcome::valid(),
            Err(bip39::Error::InvalidChecksum) => {
                ValidationOutcome::invalid("Mnemonic checksum is invalid")
            }
            Err(_) => ValidationOutcome::invalid("Mnemonic contains invalid words"),
        }
    }

    pub fn validate_address(&self, address: &str) -> ValidationOutcome {
        if address.is_empty() {
            return ValidationOutcome::invalid("Address is required");
        }

        if !self.address_pattern.is_match(address) {
            return ValidationOutcome::invalid("Invalid Ethereum address format");
        }

        ValidationOutcome::valid()
    }

    /// Optional fields are checked only when present and non-empty.
    pub fn validate_transaction(&self, params: &SendTransactionParams) -> ValidationOutcome {
        if params.to.is_empty() {
            return ValidationOutcome::invalid("Transaction recipient is required");
        }

        let recipient = self.validate_address(&params.to);
        if let Some(error) = recipient.error {
            return ValidationOutcome::invalid(format!("Invalid recipient address: {}", error));
        }

        if let Some(amount) = present(&params.amount) {
            if Amount::from_ether_str(amount).is_err() {
                return ValidationOutcome::invalid("Invalid transaction amount");
            }
        }

        if let Some(gas_price) = present(&params.gas_price) {
            if parse_quantity(gas_price).is_err() {
                return ValidationOutcome::invalid("Invalid gas price");
            }
        }

        if let Some(gas_limit) = present(&params.gas_limit) {
            match parse_quantity(gas_limit) {
                Ok(limit) if limit >= MIN_GAS_LIMIT => {}
                _ => return ValidationOutcome::invalid("Invalid gas limit (minimum 21000)"),
            }
        }

        if let Some(data) = present(&params.data) {
            if !self.hex_data_pattern.is_match(data) {
                return ValidationOutcome::invalid("Transaction data must be 0x-prefixed hex");
            }
        }

        ValidationOutcome::valid()
    }

    pub fn validate_network(&self, network: &Network) -> ValidationOutcome {
        if network.id.trim().is_empty() {
            return ValidationOutcome::invalid("Network id is required");
        }

        if network.name.trim().is_empty() {
            return ValidationOutcome::invalid("Network name is required");
        }

        if network.chain_id == 0 {
            return ValidationOutcome::invalid("Chain id must be positive");
        }

        if !self.endpoint_pattern.is_match(&network.rpc_endpoint) {
            return ValidationOutcome::invalid("Invalid RPC endpoint");
        }

        if let Some(api) = &network.explorer_api_url {
            if !self.endpoint_pattern.is_match(api) {
                return ValidationOutcome::invalid("Invalid explorer API endpoint");
            }
        }

        ValidationOutcome::valid()
    }

    pub fn require_password(&self, password: &str) -> WalletResult<()> {
        self.validate_password(password).into_result()
    }

    pub fn require_mnemonic(&self, mnemonic: &str) -> WalletResult<()> {
        self.validate_mnemonic(mnemonic).into_result()
    }

    pub fn require_address(&self, address: &str) -> WalletResult<()> {
        self.validate_address(address).into_result()
    }

    pub fn require_transaction(&self, params: &SendTransactionParams) -> WalletResult<()> {
        self.validate_transaction(params).into_result()
    }

    pub fn require_network(&self, network: &Network) -> WalletResult<()> {
        self.validate_network(network).into_result()
    }

    /// Strip markup, `javascript:` and inline handlers from display text.
    pub fn sanitize_input(&self, input: &str) -> String {
        self.script_patterns
            .iter()
            .fold(input.to_string(), |acc, pattern| {
                pattern.replace_all(&acc, "").into_owned()
            })
            .trim()
            .to_string()
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new().expect("Failed to create InputValidator")
    }
}

fn compile(pattern: &str) -> WalletResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| WalletError::ValidationError(format!("Invalid pattern {}: {}", pattern, e)))
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
