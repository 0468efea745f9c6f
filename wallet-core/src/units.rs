use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};

/// An amount of native currency held as wei.
///
/// Fixed-point only; ether strings are parsed digit by digit so no float
/// rounding ever reaches a signed transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount {
    wei: u128,
}

impl Amount {
    pub const DECIMALS: usize = 18;
    pub const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;
    pub const WEI_PER_GWEI: u128 = 1_000_000_000;

    pub const fn from_wei(wei: u128) -> Self {
        Amount { wei }
    }

    pub fn from_gwei(gwei: u128) -> WalletResult<Self> {
        gwei.checked_mul(Self::WEI_PER_GWEI)
            .map(Self::from_wei)
            .ok_or_else(|| invalid("Amount overflow"))
    }

    /// Parse a decimal ether string such as `"1.5"` or `"0.000000000000000001"`.
    pub fn from_ether_str(amount: &str) -> WalletResult<Self> {
        let amount = amount.trim();
        if amount.is_empty() {
            return Err(invalid("Amount cannot be empty"));
        }

        let (whole, fraction) = match amount.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (amount, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid("Invalid number format"));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("Invalid number format"));
        }
        if fraction.len() > Self::DECIMALS {
            return Err(invalid("Too many decimal places"));
        }

        let whole_wei = if whole.is_empty() {
            0
        } else {
            whole
                .parse::<u128>()
                .map_err(|_| invalid("Amount overflow"))?
                .checked_mul(Self::WEI_PER_ETHER)
                .ok_or_else(|| invalid("Amount overflow"))?
        };

        let fraction_wei = if fraction.is_empty() {
            0
        } else {
            format!("{:0<18}", fraction)
                .parse::<u128>()
                .map_err(|_| invalid("Invalid fractional part"))?
        };

        whole_wei
            .checked_add(fraction_wei)
            .map(Self::from_wei)
            .ok_or_else(|| invalid("Amount overflow"))
    }

    pub fn wei(&self) -> u128 {
        self.wei
    }

    /// Full-precision ether string with trailing zeros trimmed.
    pub fn to_ether_string(&self) -> String {
        let whole = self.wei / Self::WEI_PER_ETHER;
        let fractional = self.wei % Self::WEI_PER_ETHER;

        if fractional == 0 {
            whole.to_string()
        } else {
            let frac_str = format!("{:018}", fractional);
            format!("{}.{}", whole, frac_str.trim_end_matches('0'))
        }
    }

    pub fn to_quantity(&self) -> String {
        to_quantity(self.wei)
    }

    pub fn is_zero(&self) -> bool {
        self.wei == 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ETH", self.to_ether_string())
    }
}

impl FromStr for Amount {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::from_ether_str(s)
    }
}

/// Parse a JSON-RPC quantity. Accepts `0x`-prefixed hex or plain decimal.
pub fn parse_quantity(value: &str) -> WalletResult<u128> {
    let value = value.trim();
    if let Some(hex_digits) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        if hex_digits.is_empty() {
            return Ok(0);
        }
        return u128::from_str_radix(hex_digits, 16)
            .map_err(|_| invalid(&format!("Invalid hex quantity: {}", value)));
    }

    value
        .parse::<u128>()
        .map_err(|_| invalid(&format!("Invalid quantity: {}", value)))
}

/// Format a quantity the way JSON-RPC expects: `0x`-prefixed, no leading zeros.
pub fn to_quantity(value: u128) -> String {
    format!("0x{:x}", value)
}

fn invalid(msg: &str) -> WalletError {
    WalletError::ValidationError(msg.to_string())
}
