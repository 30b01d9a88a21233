use std::fmt;

use thiserror::Error;

/// The hardened-key bit flag defined by BIP-32 (2^31).
pub const HARDENED_FLAG: u32 = 0x8000_0000;

const JUNCTION_LEN: usize = 4;
const PURPOSE: u32 = 44;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid_data: {len} bytes is not a whole number of junctions")]
    InvalidData { len: usize },
    #[error("invalid_junction: {0}")]
    InvalidJunction(String),
}

/// Byte order of each serialized junction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn u32_bytes(self, value: u32) -> [u8; 4] {
        match self {
            Self::Little => value.to_le_bytes(),
            Self::Big => value.to_be_bytes(),
        }
    }

    pub fn u16_bytes(self, value: u16) -> [u8; 2] {
        match self {
            Self::Little => value.to_le_bytes(),
            Self::Big => value.to_be_bytes(),
        }
    }

    pub fn read_u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            Self::Little => u32::from_le_bytes(bytes),
            Self::Big => u32::from_be_bytes(bytes),
        }
    }
}

/// Which of the trailing standard junctions are hardened.
///
/// `HardenedTail` derives `44'/coin'/account'/0'/0'`, `SoftTail` derives
/// `44'/coin'/account'/0/0`. Device apps disagree on this, so every target
/// application names its own variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardJunctions {
    HardenedTail,
    SoftTail,
}

/// Serialization settings for one target application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathEncoding {
    pub byte_order: ByteOrder,
    pub standard: StandardJunctions,
}

impl PathEncoding {
    pub const fn new(byte_order: ByteOrder, standard: StandardJunctions) -> Self {
        Self {
            byte_order,
            standard,
        }
    }

    /// Builds and serializes the standard five-junction path.
    pub fn build(self, coin_type: u32, account_index: u32) -> Vec<u8> {
        PathBuilder::new()
            .appending_standard_junctions(coin_type, account_index, self.standard)
            .build()
            .encode(self.byte_order)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Junction {
    Hardened(u32),
    Soft(u32),
}

impl Junction {
    pub fn index(self) -> u32 {
        match self {
            Self::Hardened(index) | Self::Soft(index) => index,
        }
    }

    pub fn is_hardened(self) -> bool {
        matches!(self, Self::Hardened(_))
    }

    /// The 32-bit value written on the wire.
    pub fn raw(self) -> u32 {
        match self {
            Self::Hardened(index) => index | HARDENED_FLAG,
            Self::Soft(index) => index,
        }
    }

    pub fn from_raw(raw: u32) -> Self {
        if raw & HARDENED_FLAG != 0 {
            Self::Hardened(raw & !HARDENED_FLAG)
        } else {
            Self::Soft(raw)
        }
    }
}

impl fmt::Display for Junction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hardened(index) => write!(f, "//{index}"),
            Self::Soft(index) => write!(f, "/{index}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivationPath {
    junctions: Vec<Junction>,
}

impl DerivationPath {
    pub fn new(junctions: Vec<Junction>) -> Self {
        Self { junctions }
    }

    pub fn junctions(&self) -> &[Junction] {
        &self.junctions
    }

    pub fn encode(&self, order: ByteOrder) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.junctions.len() * JUNCTION_LEN);
        for junction in &self.junctions {
            bytes.extend_from_slice(&order.u32_bytes(junction.raw()));
        }
        bytes
    }

    pub fn decode(bytes: &[u8], order: ByteOrder) -> Result<Self, PathError> {
        if !bytes.len().is_multiple_of(JUNCTION_LEN) {
            return Err(PathError::InvalidData { len: bytes.len() });
        }
        let junctions = bytes
            .chunks_exact(JUNCTION_LEN)
            .map(|chunk| {
                let raw = order.read_u32([chunk[0], chunk[1], chunk[2], chunk[3]]);
                Junction::from_raw(raw)
            })
            .collect();
        Ok(Self { junctions })
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for junction in &self.junctions {
            write!(f, "{junction}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathBuilder {
    junctions: Vec<Junction>,
}

impl PathBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(mut self, junction: Junction) -> Self {
        self.junctions.push(junction);
        self
    }

    pub fn appending_standard_junctions(
        self,
        coin_type: u32,
        account_index: u32,
        standard: StandardJunctions,
    ) -> Self {
        let builder = self
            .append(Junction::Hardened(PURPOSE))
            .append(Junction::Hardened(coin_type))
            .append(Junction::Hardened(account_index));
        match standard {
            StandardJunctions::HardenedTail => builder
                .append(Junction::Hardened(0))
                .append(Junction::Hardened(0)),
            StandardJunctions::SoftTail => {
                builder.append(Junction::Soft(0)).append(Junction::Soft(0))
            }
        }
    }

    pub fn build(self) -> DerivationPath {
        DerivationPath::new(self.junctions)
    }
}

/// Parses `//44//354//0/0/0` style junction text into serialized chaincodes.
///
/// `//` prefixes a hardened junction and `/` a soft one; indices must be
/// decimal and below 2^31.
pub fn convert_to_chaincodes_data(path: &str, order: ByteOrder) -> Result<Vec<u8>, PathError> {
    Ok(parse_junctions(path)?.encode(order))
}

/// Renders serialized chaincodes back into junction text.
pub fn convert_from_chaincodes_data(data: &[u8], order: ByteOrder) -> Result<String, PathError> {
    Ok(DerivationPath::decode(data, order)?.to_string())
}

fn parse_junctions(path: &str) -> Result<DerivationPath, PathError> {
    let mut rest = path.trim();
    if rest.is_empty() {
        return Err(PathError::InvalidJunction("path is empty".to_string()));
    }

    let mut junctions = Vec::new();
    while !rest.is_empty() {
        let (hardened, tail) = if let Some(tail) = rest.strip_prefix("//") {
            (true, tail)
        } else if let Some(tail) = rest.strip_prefix('/') {
            (false, tail)
        } else {
            return Err(PathError::InvalidJunction(format!(
                "expected '/' or '//' at '{rest}' in '{path}'"
            )));
        };

        let end = tail.find('/').unwrap_or(tail.len());
        let segment = &tail[..end];
        let index = segment.parse::<u32>().map_err(|_| {
            PathError::InvalidJunction(format!("invalid segment '{segment}' in '{path}'"))
        })?;
        if index >= HARDENED_FLAG {
            return Err(PathError::InvalidJunction(format!(
                "segment '{segment}' is out of range (must be < 2^31)"
            )));
        }

        junctions.push(if hardened {
            Junction::Hardened(index)
        } else {
            Junction::Soft(index)
        });
        rest = &tail[end..];
    }

    Ok(DerivationPath::new(junctions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn standard_path_is_five_junctions() {
        let path = PathBuilder::new()
            .appending_standard_junctions(354, 0, StandardJunctions::HardenedTail)
            .build();
        let bytes = path.encode(ByteOrder::Little);
        assert_eq!(bytes.len(), 20);
        for chunk in bytes.chunks_exact(4) {
            let raw = u32::from_le_bytes(chunk.try_into().unwrap());
            assert_ne!(raw & HARDENED_FLAG, 0);
        }
        assert_eq!(&bytes[4..8], &(354 | HARDENED_FLAG).to_le_bytes());
    }

    #[test]
    fn soft_tail_sets_flag_only_on_hardened_junctions() {
        let path = PathBuilder::new()
            .appending_standard_junctions(60, 3, StandardJunctions::SoftTail)
            .build();
        let bytes = path.encode(ByteOrder::Big);
        assert_eq!(bytes.len(), 20);
        let flags: Vec<bool> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_be_bytes(chunk.try_into().unwrap()) & HARDENED_FLAG != 0)
            .collect();
        assert_eq!(flags, vec![true, true, true, false, false]);
        assert_eq!(&bytes[8..12], &(3 | HARDENED_FLAG).to_be_bytes());
    }

    #[test]
    fn byte_order_is_explicit() {
        let little = PathEncoding::new(ByteOrder::Little, StandardJunctions::HardenedTail);
        let big = PathEncoding::new(ByteOrder::Big, StandardJunctions::HardenedTail);
        assert_eq!(&little.build(354, 0)[..4], &[0x2c, 0x00, 0x00, 0x80]);
        assert_eq!(&big.build(354, 0)[..4], &[0x80, 0x00, 0x00, 0x2c]);
    }

    #[test]
    fn converts_junction_text() {
        let data = convert_to_chaincodes_data("//44//354//0/0/0", ByteOrder::Little).unwrap();
        assert_eq!(data.len(), 20);
        assert_eq!(&data[..4], &(44 | HARDENED_FLAG).to_le_bytes());
        assert_eq!(&data[12..16], &0u32.to_le_bytes());
        assert_eq!(
            convert_from_chaincodes_data(&data, ByteOrder::Little).unwrap(),
            "//44//354//0/0/0"
        );
    }

    #[test]
    fn rejects_partial_junction_bytes() {
        assert_eq!(
            convert_from_chaincodes_data(&[0, 1, 2, 3, 4, 5], ByteOrder::Little),
            Err(PathError::InvalidData { len: 6 })
        );
    }

    #[test]
    fn rejects_malformed_text() {
        for path in ["", "44//0", "//abc", "//44///0", "//2147483648"] {
            assert!(
                matches!(
                    convert_to_chaincodes_data(path, ByteOrder::Little),
                    Err(PathError::InvalidJunction(_))
                ),
                "accepted '{path}'"
            );
        }
    }

    proptest! {
        #[test]
        fn text_roundtrip(
            junctions in proptest::collection::vec((any::<bool>(), 0u32..HARDENED_FLAG), 1..8),
            big in any::<bool>(),
        ) {
            let path: String = junctions
                .iter()
                .map(|(hardened, index)| {
                    if *hardened { format!("//{index}") } else { format!("/{index}") }
                })
                .collect();
            let order = if big { ByteOrder::Big } else { ByteOrder::Little };
            let data = convert_to_chaincodes_data(&path, order).unwrap();
            prop_assert_eq!(convert_from_chaincodes_data(&data, order).unwrap(), path);
        }
    }
}
