pub use ethereum_consensus::serde::as_str;

use ethereum_consensus::{
    primitives::{Hash32, Root},
    ssz::prelude::U256,
};
use serde::{Deserialize, Deserializer, Serializer};

pub fn parse_hash32(data: &str) -> Option<Hash32> {
    let data = data.strip_prefix("0x").unwrap_or(data);
    let bytes = hex::decode(data).ok()?;
    Hash32::try_from(bytes.as_slice()).ok()
}

pub fn parse_root(data: &str) -> Option<Root> {
    let data = data.strip_prefix("0x").unwrap_or(data);
    let bytes = hex::decode(data).ok()?;
    Root::try_from(bytes.as_slice()).ok()
}

pub fn root_hex(root: &Root) -> String {
    format!("0x{}", hex::encode(root.as_ref()))
}

// Engine API quantities are 0x-prefixed, minimal-length hex.
pub mod u64_hex {
    use super::*;

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let data = <String>::deserialize(deserializer)?;
        let data = data.strip_prefix("0x").unwrap_or(&data);
        u64::from_str_radix(data, 16).map_err(serde::de::Error::custom)
    }
}

pub mod u256_hex {
    use super::*;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        let bytes = value.to_bytes_le();
        let significant = bytes.iter().rposition(|b| *b != 0).map(|i| i + 1).unwrap_or(0);
        let mut repr = String::from("0x");
        if significant == 0 {
            repr.push('0');
        } else {
            let mut leading = true;
            for byte in bytes[..significant].iter().rev() {
                if leading {
                    repr.push_str(&format!("{byte:x}"));
                    leading = false;
                } else {
                    repr.push_str(&format!("{byte:02x}"));
                }
            }
        }
        serializer.serialize_str(&repr)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = <String>::deserialize(deserializer)?;
        U256::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Quantities {
        #[serde(with = "u64_hex")]
        count: u64,
        #[serde(with = "u256_hex")]
        value: U256,
    }

    #[test]
    fn test_hex_quantity_round_trip() {
        let quantities = Quantities { count: 0x1c9c380, value: U256::from(1_000_000_123u64) };
        let repr = serde_json::to_string(&quantities).unwrap();
        assert_eq!(repr, r#"{"count":"0x1c9c380","value":"0x3b9aca7b"}"#);
        let recovered: Quantities = serde_json::from_str(&repr).unwrap();
        assert_eq!(recovered, quantities);
    }

    #[test]
    fn test_zero_quantities() {
        let quantities = Quantities { count: 0, value: U256::from(0u64) };
        let repr = serde_json::to_string(&quantities).unwrap();
        assert_eq!(repr, r#"{"count":"0x0","value":"0x0"}"#);
        let recovered: Quantities = serde_json::from_str(&repr).unwrap();
        assert_eq!(recovered, quantities);
    }
}
