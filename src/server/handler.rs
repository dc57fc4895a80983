//! Command handlers
//!
//! The state a processor mutates lives in a handler the processor owns.
//! Handlers never see ids or retransmissions; suppressing duplicate side
//! effects is the processor's job.

use tracing::debug;

use crate::core::CommandError;
use crate::core::constants::{
    COMMAND_DEPOSIT, COMMAND_GET, COMMAND_SET, COMMAND_WITHDRAW, DEFAULT_VALUE,
};

/// Application state behind a request processor.
pub trait CommandHandler {
    /// Check that `command`/`value` can be applied, without side effects.
    ///
    /// A malformed request (`CommandError::is_malformed`) is rejected at the
    /// transport before it is accepted.
    fn validate(&self, command: &str, value: &str) -> Result<(), CommandError>;

    /// Apply the command and return the result value.
    fn apply(&mut self, command: &str, value: &str) -> Result<String, CommandError>;

    /// Current state as seen by `command`, used to answer a duplicate that
    /// has no recorded result.
    fn snapshot(&self, command: &str) -> String;
}

/// Single shared value read by `get` and replaced by `set`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueStore {
    value: String,
}

impl ValueStore {
    /// Create a store holding `value`.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Current value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl Default for ValueStore {
    fn default() -> Self {
        Self::new(DEFAULT_VALUE)
    }
}

impl CommandHandler for ValueStore {
    fn validate(&self, command: &str, _value: &str) -> Result<(), CommandError> {
        match command {
            COMMAND_GET | COMMAND_SET => Ok(()),
            other => Err(CommandError::Unsupported(other.to_owned())),
        }
    }

    fn apply(&mut self, command: &str, value: &str) -> Result<String, CommandError> {
        self.validate(command, value)?;
        if command == COMMAND_SET {
            debug!(value, "value replaced");
            self.value = value.to_owned();
        }
        Ok(self.value.clone())
    }

    fn snapshot(&self, _command: &str) -> String {
        self.value.clone()
    }
}

/// Integer balance moved by `deposit` and `withdraw`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    balance: i64,
}

impl Ledger {
    /// Create a ledger with an opening balance.
    pub fn new(balance: i64) -> Self {
        Self { balance }
    }

    /// Current balance.
    pub fn balance(&self) -> i64 {
        self.balance
    }

    fn amount(command: &str, value: &str) -> Result<i64, CommandError> {
        value
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|amount| *amount >= 0)
            .ok_or_else(|| CommandError::InvalidValue {
                command: command.to_owned(),
                value: value.to_owned(),
            })
    }
}

impl CommandHandler for Ledger {
    fn validate(&self, command: &str, value: &str) -> Result<(), CommandError> {
        match command {
            COMMAND_DEPOSIT | COMMAND_WITHDRAW => Self::amount(command, value).map(|_| ()),
            other => Err(CommandError::Unsupported(other.to_owned())),
        }
    }

    fn apply(&mut self, command: &str, value: &str) -> Result<String, CommandError> {
        self.validate(command, value)?;
        let amount = Self::amount(command, value)?;

        if command == COMMAND_WITHDRAW {
            if amount > self.balance {
                return Err(CommandError::Refused("insufficient funds".into()));
            }
            self.balance -= amount;
        } else {
            self.balance = self
                .balance
                .checked_add(amount)
                .ok_or_else(|| CommandError::Refused("balance overflow".into()))?;
        }

        debug!(command, amount, balance = self.balance, "ledger updated");
        Ok(self.balance.to_string())
    }

    fn snapshot(&self, _command: &str) -> String {
        self.balance.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_store_default() {
        let mut store = ValueStore::default();
        assert_eq!(store.apply("get", "").unwrap(), DEFAULT_VALUE);
    }

    #[test]
    fn test_value_store_set_replaces() {
        let mut store = ValueStore::default();
        assert_eq!(store.apply("set", "hi").unwrap(), "hi");
        assert_eq!(store.apply("set", "hi").unwrap(), "hi");
        assert_eq!(store.value(), "hi");
        assert_eq!(store.snapshot("get"), "hi");
    }

    #[test]
    fn test_value_store_unknown_command() {
        let store = ValueStore::default();
        let err = store.validate("append", "x").unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_ledger_deposit_withdraw() {
        let mut ledger = Ledger::default();
        assert_eq!(ledger.apply("deposit", "100").unwrap(), "100");
        assert_eq!(ledger.apply("withdraw", " 30 ").unwrap(), "70");
        assert_eq!(ledger.balance(), 70);
    }

    #[test]
    fn test_ledger_overdraw_refused() {
        let mut ledger = Ledger::new(10);
        let err = ledger.apply("withdraw", "11").unwrap_err();

        assert_eq!(err, CommandError::Refused("insufficient funds".into()));
        assert!(!err.is_malformed());
        assert_eq!(ledger.balance(), 10);
    }

    #[test]
    fn test_ledger_rejects_non_integer() {
        let ledger = Ledger::default();
        assert!(ledger.validate("deposit", "ten").unwrap_err().is_malformed());
        assert!(ledger.validate("deposit", "-5").unwrap_err().is_malformed());
        assert!(ledger.validate("get", "").unwrap_err().is_malformed());
    }
}
