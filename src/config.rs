//! Model sizing knobs.
//!
//! Two integers parameterise the model: the socket count and the cardinality
//! of the symbolic value domain. Three sockets and two values are enough to
//! witness single-writer violations in buggy protocol variants; larger
//! numbers multiply the state space without adding new races.

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::types::SocketId;
use crate::types::Value;

/// Default socket count.
pub const DEFAULT_SOCKETS: u8 = 3;
/// Default value-domain cardinality.
pub const DEFAULT_VALUES: u8 = 2;
/// Largest supported socket count; beyond this the state space is
/// intractable anyway.
pub const MAX_SOCKETS: u8 = 8;
/// Largest supported value-domain cardinality.
pub const MAX_VALUES: u8 = 8;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A knob was set to a value outside its supported range.
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        /// Name of the knob (environment variable).
        key: &'static str,
        /// The rejected raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// The two model knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of sockets in the machine.
    pub sockets: u8,
    /// Cardinality of the symbolic value domain.
    pub values: u8,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            sockets: DEFAULT_SOCKETS,
            values: DEFAULT_VALUES,
        }
    }
}

impl ModelConfig {
    /// Build a validated configuration.
    pub fn new(sockets: u8, values: u8) -> Result<Self, ConfigError> {
        let config = Self { sockets, values };
        config.validate()?;
        Ok(config)
    }

    /// Load from `C3D_SOCKETS` and `C3D_VALUES`, with defaults for anything
    /// unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let sockets = read_env("C3D_SOCKETS", DEFAULT_SOCKETS)?;
        let values = read_env("C3D_VALUES", DEFAULT_VALUES)?;
        Self::new(sockets, values)
    }

    /// Check both knobs against their supported ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sockets < 2 || self.sockets > MAX_SOCKETS {
            return Err(ConfigError::InvalidValue {
                key: "C3D_SOCKETS",
                value: self.sockets.to_string(),
                reason: format!("must be in 2..={MAX_SOCKETS}"),
            });
        }
        if self.values < 1 || self.values > MAX_VALUES {
            return Err(ConfigError::InvalidValue {
                key: "C3D_VALUES",
                value: self.values.to_string(),
                reason: format!("must be in 1..={MAX_VALUES}"),
            });
        }
        Ok(())
    }

    /// Per-node mailbox capacity implied by the socket count.
    pub fn mailbox_capacity(&self) -> usize {
        2 * self.sockets as usize + 1
    }

    /// Every socket identifier in the machine.
    pub fn socket_ids(&self) -> impl Iterator<Item = SocketId> {
        (0..self.sockets).map(SocketId)
    }

    /// Every value in the symbolic domain.
    pub fn value_domain(&self) -> impl Iterator<Item = Value> {
        (0..self.values).map(Value)
    }
}

fn read_env(key: &'static str, default: u8) -> Result<u8, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<u8>().map_err(|e| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
            reason: format!("must be a small integer: {e}"),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_three_sockets_two_values() {
        let config = ModelConfig::default();
        assert_eq!(config.sockets, 3);
        assert_eq!(config.values, 2);
        assert!(config.validate().is_ok());
        assert_eq!(config.mailbox_capacity(), 7);
    }

    #[test]
    fn single_socket_is_rejected() {
        let err = ModelConfig::new(1, 2).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "C3D_SOCKETS",
                ..
            }
        ));
    }

    #[test]
    fn empty_value_domain_is_rejected() {
        let err = ModelConfig::new(3, 0).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "C3D_VALUES",
                ..
            }
        ));
    }

    #[test]
    fn domains_enumerate_in_order() {
        let config = ModelConfig::default();
        let sockets: Vec<SocketId> = config.socket_ids().collect();
        assert_eq!(sockets, vec![SocketId(0), SocketId(1), SocketId(2)]);
        let values: Vec<Value> = config.value_domain().collect();
        assert_eq!(values, vec![Value(0), Value(1)]);
    }
}
