//! core types shared by pool, controller and elector messages

use core::fmt;
use scale_codec::{Decode, Encode};
use scale_info::TypeInfo;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// amount in the smallest currency unit
pub type Amount = u128;

/// profit or loss of a round
pub type SignedAmount = i128;

/// unix time in seconds
pub type Timestamp = u64;

/// elector query identifier (zero means "no confirmation requested")
pub type QueryId = u64;

/// one coin in smallest units
pub const COIN: Amount = 1_000_000_000;

/// largest value of a 24-bit field (interest rate)
pub const MAX_U24: u32 = (1 << 24) - 1;

/// largest value of a 48-bit field (time offsets)
pub const MAX_U48: u64 = (1 << 48) - 1;

macro_rules! bytes32 {
    ($name:ident) => {
        #[derive(Clone, Copy, Encode, Decode, TypeInfo, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub const fn zero() -> Self {
                Self([0u8; 32])
            }

            pub fn from_raw(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; 32]
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}..)", stringify!($name), &self.to_hex()[..8])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                let raw = hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
                let bytes: [u8; 32] = raw
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
                Ok(Self(bytes))
            }
        }
    };
}

bytes32!(H256);
bytes32!(Address);
bytes32!(PublicKey);

impl H256 {
    /// blake3 of arbitrary bytes
    pub fn digest(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }
}

impl Address {
    /// deterministic address of a contract from its init data
    pub fn derive<T: Encode>(domain: &[u8], init: &T) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(domain);
        hasher.update(&init.encode());
        Self(*hasher.finalize().as_bytes())
    }

    /// bit `index` counted from the most significant bit of byte 0
    pub fn bit(&self, index: usize) -> bool {
        (self.0[index / 8] >> (7 - index % 8)) & 1 == 1
    }
}

/// 64-byte signature over the elector payload, opaque to the pool
#[derive(Clone, Copy, Debug, Encode, Decode, TypeInfo, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; 64])
    }
}

impl Signature {
    pub fn from_raw(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_order() {
        let mut raw = [0u8; 32];
        raw[0] = 0b1000_0001;
        raw[1] = 0b0100_0000;
        let addr = Address(raw);

        assert!(addr.bit(0));
        assert!(!addr.bit(1));
        assert!(addr.bit(7));
        assert!(addr.bit(9));
        assert!(!addr.bit(255));
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = Address::derive(b"controller", &(1u32, Address::from_raw([7u8; 32])));
        let b = Address::derive(b"controller", &(1u32, Address::from_raw([7u8; 32])));
        let c = Address::derive(b"controller", &(2u32, Address::from_raw([7u8; 32])));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hex_serde() {
        let addr = Address::from_raw([0xab; 32]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));

        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);

        let prefixed: Address = serde_json::from_str(&format!("\"0x{}\"", "ab".repeat(32))).unwrap();
        assert_eq!(prefixed, addr);
    }
}
