//! Byte availability: where each shellcode byte already sits in read-only
//! code.
//!
//! The import mode cannot write arbitrary values, only copy bytes that
//! exist somewhere in the binary. For every byte of the wanted image the
//! resolver records the first address holding that value, or nothing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A block of read-only bytes mapped at `addr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRegion {
    pub addr: u64,
    pub bytes: Vec<u8>,
}

impl CodeRegion {
    pub fn new(addr: u64, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            addr,
            bytes: bytes.into(),
        }
    }

    /// Address of the first occurrence of `value`.
    pub fn find(&self, value: u8) -> Option<u64> {
        self.bytes
            .iter()
            .position(|&b| b == value)
            .map(|pos| self.addr + pos as u64)
    }
}

/// One byte of the wanted image and where to copy it from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Octet {
    pub value: u8,
    pub addr: Option<u64>,
}

/// Resolved image, in shellcode order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OctetSequence {
    octets: Vec<Octet>,
}

impl OctetSequence {
    /// Resolve every byte of `shellcode` against `regions`, searched in the
    /// order given.
    pub fn locate(shellcode: &[u8], regions: &[CodeRegion]) -> Self {
        let mut cache: HashMap<u8, Option<u64>> = HashMap::new();
        let octets = shellcode
            .iter()
            .map(|&value| {
                let addr = *cache
                    .entry(value)
                    .or_insert_with(|| regions.iter().find_map(|r| r.find(value)));
                Octet { value, addr }
            })
            .collect::<Vec<_>>();

        let found = octets.iter().filter(|o| o.addr.is_some()).count();
        log::debug!(
            "located {}/{} shellcode byte(s) in {} region(s)",
            found,
            octets.len(),
            regions.len()
        );
        Self { octets }
    }

    pub fn from_octets(octets: Vec<Octet>) -> Self {
        Self { octets }
    }

    /// Every byte has a source address.
    pub fn is_ready(&self) -> bool {
        self.octets.iter().all(|o| o.addr.is_some())
    }

    /// Offsets of bytes without a source address.
    pub fn missing(&self) -> impl Iterator<Item = (usize, &Octet)> {
        self.octets
            .iter()
            .enumerate()
            .filter(|(_, o)| o.addr.is_none())
    }

    pub fn first_missing(&self) -> Option<(usize, &Octet)> {
        self.missing().next()
    }

    pub fn len(&self) -> usize {
        self.octets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.octets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Octet> {
        self.octets.iter()
    }

    /// The image as raw bytes.
    pub fn bytes(&self) -> Vec<u8> {
        self.octets.iter().map(|o| o.value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_wins() {
        let regions = [
            CodeRegion::new(0x1000, vec![0x90, 0x31, 0xc0, 0x31]),
            CodeRegion::new(0x2000, vec![0x31, 0xcd, 0x80]),
        ];
        let seq = OctetSequence::locate(&[0x31, 0xc0, 0xcd, 0x80], &regions);
        assert!(seq.is_ready());
        let addrs: Vec<_> = seq.iter().map(|o| o.addr.unwrap()).collect();
        assert_eq!(addrs, vec![0x1001, 0x1002, 0x2001, 0x2002]);
    }

    #[test]
    fn missing_bytes_are_reported_in_order() {
        let regions = [CodeRegion::new(0x1000, vec![0x90])];
        let seq = OctetSequence::locate(&[0x90, 0x0f, 0x90, 0x05], &regions);
        assert!(!seq.is_ready());
        let missing: Vec<_> = seq.missing().map(|(i, o)| (i, o.value)).collect();
        assert_eq!(missing, vec![(1, 0x0f), (3, 0x05)]);
        assert_eq!(seq.first_missing().map(|(i, _)| i), Some(1));
    }

    #[test]
    fn empty_image_is_ready() {
        let seq = OctetSequence::locate(&[], &[]);
        assert!(seq.is_ready());
        assert!(seq.is_empty());
    }

    #[test]
    fn bytes_round_trip() {
        let regions = [CodeRegion::new(0x1000, (0u8..=255).collect::<Vec<_>>())];
        let shellcode = b"\x31\xc0\x50\x68//sh";
        let seq = OctetSequence::locate(shellcode, &regions);
        assert_eq!(seq.len(), shellcode.len());
        assert_eq!(seq.bytes(), shellcode);
        assert_eq!(seq.iter().next().unwrap().addr, Some(0x1031));
    }
}
