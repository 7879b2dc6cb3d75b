/// Where a section starts, both in memory and in the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SectionLocation {
    /// RVA of the first byte of the section
    pub relative_virtual_address: u32,
    /// File offset of the first byte of the section
    pub pointer_to_raw_data: u32,
}

impl SectionLocation {
    /// Creates a new location
    #[must_use]
    pub const fn new(relative_virtual_address: u32, pointer_to_raw_data: u32) -> Self {
        SectionLocation {
            relative_virtual_address,
            pointer_to_raw_data,
        }
    }

    /// The location `offset` bytes into the section
    #[must_use]
    pub const fn offset_by(self, offset: u32) -> Self {
        SectionLocation {
            relative_virtual_address: self.relative_virtual_address + offset,
            pointer_to_raw_data: self.pointer_to_raw_data + offset,
        }
    }
}
