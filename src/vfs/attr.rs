//! Attribute blocks
//!
//! An attribute block is the payload of a single data value: the fields
//! selected by an [`AttrMask`], in ascending bit order, densely packed
//! little-endian with no alignment. The name, when selected, comes last and
//! is NUL-terminated.

use thiserror::Error;

use super::types::{AttrMask, ObjectType};

/// Fixed-width fields in packing order, with their width in bytes
const FIXED_FIELDS: [(AttrMask, usize); 9] = [
    (AttrMask::MTIME, 8),
    (AttrMask::ACCESS, 4),
    (AttrMask::TYPE, 4),
    (AttrMask::SIZE, 8),
    (AttrMask::CTIME, 8),
    (AttrMask::ATIME, 8),
    (AttrMask::RTIME, 8),
    (AttrMask::DISKSIZE, 8),
    (AttrMask::DISKFREE, 8),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttrError {
    /// Mask selects a field the caller did not set.
    #[error("attribute {0:?} selected but not set")]
    Missing(AttrMask),

    /// Block ends before all selected fields.
    #[error("attribute block truncated at offset {offset}, {needed} more bytes needed")]
    Truncated { offset: usize, needed: usize },

    #[error("attribute name contains an interior NUL byte")]
    InteriorNul,
}

/// Decoded attribute block. `None` means not selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pub mtime: Option<u64>,
    pub access: Option<u32>,
    pub object_type: Option<ObjectType>,
    pub size: Option<u64>,
    pub ctime: Option<u64>,
    pub atime: Option<u64>,
    pub rtime: Option<u64>,
    pub disk_size: Option<u64>,
    pub disk_free: Option<u64>,
    pub name: Option<String>,
}

impl Attributes {
    /// Fields that are set
    pub fn mask(&self) -> AttrMask {
        let mut mask = AttrMask::empty();
        for ((bit, _), value) in FIXED_FIELDS.iter().zip(self.fixed_values()) {
            mask.set(*bit, value.is_some());
        }
        mask.set(AttrMask::NAME, self.name.is_some());
        mask
    }

    /// Size of the block `pack(mask)` produces
    pub fn encoded_len(&self, mask: AttrMask) -> usize {
        let fixed: usize = FIXED_FIELDS
            .iter()
            .filter(|(bit, _)| mask.contains(*bit))
            .map(|(_, width)| width)
            .sum();
        let name = match (&self.name, mask.contains(AttrMask::NAME)) {
            (Some(name), true) => name.len() + 1,
            _ => 0,
        };
        fixed + name
    }

    /// Pack the fields selected by `mask`. Unknown mask bits are ignored.
    pub fn pack(&self, mask: AttrMask) -> Result<Vec<u8>, AttrError> {
        let mut out = Vec::with_capacity(self.encoded_len(mask));

        let values = self.fixed_values();
        for ((bit, width), value) in FIXED_FIELDS.into_iter().zip(values) {
            if !mask.contains(bit) {
                continue;
            }
            let value = value.ok_or(AttrError::Missing(bit))?;
            out.extend_from_slice(&value.to_le_bytes()[..width]);
        }

        if mask.contains(AttrMask::NAME) {
            let name = self.name.as_deref().ok_or(AttrError::Missing(AttrMask::NAME))?;
            if name.as_bytes().contains(&0) {
                return Err(AttrError::InteriorNul);
            }
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }

        Ok(out)
    }

    /// Unpack a block produced for `mask`.
    ///
    /// A name without terminator runs to the end of the block; hosts
    /// truncate it when the reply buffer was too small.
    pub fn unpack(mask: AttrMask, block: &[u8]) -> Result<Self, AttrError> {
        let mut attrs = Self::default();
        let mut offset = 0;

        for (index, (bit, width)) in FIXED_FIELDS.into_iter().enumerate() {
            if !mask.contains(bit) {
                continue;
            }
            let bytes = block
                .get(offset..offset + width)
                .ok_or_else(|| AttrError::Truncated {
                    offset,
                    needed: offset + width - block.len(),
                })?;
            let mut raw = [0u8; 8];
            raw[..width].copy_from_slice(bytes);
            attrs.set_fixed(index, u64::from_le_bytes(raw));
            offset += width;
        }

        if mask.contains(AttrMask::NAME) {
            let rest = &block[offset..];
            let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            attrs.name = Some(String::from_utf8_lossy(&rest[..end]).into_owned());
        }

        Ok(attrs)
    }

    /// Fixed-width values in [`FIXED_FIELDS`] order
    fn fixed_values(&self) -> [Option<u64>; 9] {
        [
            self.mtime,
            self.access.map(u64::from),
            self.object_type.map(|t| t as u64),
            self.size,
            self.ctime,
            self.atime,
            self.rtime,
            self.disk_size,
            self.disk_free,
        ]
    }

    fn set_fixed(&mut self, index: usize, value: u64) {
        match index {
            0 => self.mtime = Some(value),
            1 => self.access = Some(value as u32),
            2 => self.object_type = Some(ObjectType::from_u32(value as u32)),
            3 => self.size = Some(value),
            4 => self.ctime = Some(value),
            5 => self.atime = Some(value),
            6 => self.rtime = Some(value),
            7 => self.disk_size = Some(value),
            8 => self.disk_free = Some(value),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packing_order() {
        let attrs = Attributes {
            mtime: Some(0x1122_3344_5566_7788),
            object_type: Some(ObjectType::File),
            size: Some(10),
            name: Some("a.txt".into()),
            ..Default::default()
        };
        let mask = AttrMask::NAME | AttrMask::SIZE | AttrMask::TYPE | AttrMask::MTIME;
        let block = attrs.pack(mask).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&10u64.to_le_bytes());
        expected.extend_from_slice(b"a.txt\0");
        assert_eq!(block, expected);
        assert_eq!(block.len(), attrs.encoded_len(mask));

        assert_eq!(Attributes::unpack(mask, &block).unwrap(), attrs);
    }

    #[test]
    fn test_pack_subset() {
        let attrs = Attributes {
            mtime: Some(5),
            access: Some(0o644),
            size: Some(3),
            ..Default::default()
        };
        let block = attrs.pack(AttrMask::ACCESS).unwrap();
        assert_eq!(block, 0o644u32.to_le_bytes());
        assert_eq!(attrs.mask(), AttrMask::MTIME | AttrMask::ACCESS | AttrMask::SIZE);
    }

    #[test]
    fn test_pack_missing_field() {
        let attrs = Attributes {
            size: Some(1),
            ..Default::default()
        };
        assert_eq!(
            attrs.pack(AttrMask::SIZE | AttrMask::CTIME),
            Err(AttrError::Missing(AttrMask::CTIME))
        );
    }

    #[test]
    fn test_unpack_truncated() {
        let block = [0u8; 10];
        let err = Attributes::unpack(AttrMask::MTIME | AttrMask::SIZE, &block).unwrap_err();
        assert_eq!(err, AttrError::Truncated { offset: 8, needed: 6 });
    }

    #[test]
    fn test_unpack_unterminated_name() {
        let mut block = 2u32.to_le_bytes().to_vec();
        block.extend_from_slice(b"dir");
        let attrs = Attributes::unpack(AttrMask::TYPE | AttrMask::NAME, &block).unwrap();
        assert_eq!(attrs.object_type, Some(ObjectType::Dir));
        assert_eq!(attrs.name.as_deref(), Some("dir"));
    }

    #[test]
    fn test_unknown_type_value() {
        let block = 42u32.to_le_bytes();
        let attrs = Attributes::unpack(AttrMask::TYPE, &block).unwrap();
        assert_eq!(attrs.object_type, Some(ObjectType::Unknown));
    }
}
