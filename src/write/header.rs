//! Optional-header parameters of an image under construction.

use crate::{
    headers::{
        Characteristics, CoffHeader, DllCharacteristics, Machine, PEHeader, SectionHeader,
        Subsystem, DOS_STUB_SIZE, PE_SIGNATURE_SIZE,
    },
    utils::is_power_of_two,
    Result,
};

const MIN_FILE_ALIGNMENT: u32 = 512;
const MAX_FILE_ALIGNMENT: u32 = 64 * 1024;

/// Header fields of an image to be written by [`crate::PEBuilder`].
///
/// Every setter validates its argument on its own, so an invalid value is rejected at the call
/// that introduces it. The width of the optional header (PE32 or PE32+) follows from the
/// [`Machine`].
///
/// # Examples
///
/// ```rust
/// use dotpe::{headers::Machine, PEHeaderBuilder};
///
/// let header = PEHeaderBuilder::create_executable_header()
///     .with_machine(Machine::Amd64)
///     .with_alignments(0x200, 0x1000)?;
/// assert!(!header.is_32_bit());
/// assert_eq!(header.section_alignment(), 0x1000);
/// # Ok::<(), dotpe::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PEHeaderBuilder {
    machine: Machine,
    section_alignment: u32,
    file_alignment: u32,
    image_base: u64,
    major_linker_version: u8,
    minor_linker_version: u8,
    major_operating_system_version: u16,
    minor_operating_system_version: u16,
    major_image_version: u16,
    minor_image_version: u16,
    major_subsystem_version: u16,
    minor_subsystem_version: u16,
    subsystem: Subsystem,
    dll_characteristics: DllCharacteristics,
    image_characteristics: Characteristics,
    size_of_stack_reserve: u64,
    size_of_stack_commit: u64,
    size_of_heap_reserve: u64,
    size_of_heap_commit: u64,
}

impl Default for PEHeaderBuilder {
    fn default() -> Self {
        PEHeaderBuilder {
            machine: Machine::Unknown,
            section_alignment: 0x2000,
            file_alignment: 0x200,
            image_base: 0x0040_0000,
            major_linker_version: 48,
            minor_linker_version: 0,
            major_operating_system_version: 4,
            minor_operating_system_version: 0,
            major_image_version: 0,
            minor_image_version: 0,
            major_subsystem_version: 4,
            minor_subsystem_version: 0,
            subsystem: Subsystem::WindowsCui,
            dll_characteristics: DllCharacteristics::DYNAMIC_BASE
                | DllCharacteristics::NX_COMPATIBLE
                | DllCharacteristics::NO_SEH
                | DllCharacteristics::TERMINAL_SERVER_AWARE,
            image_characteristics: Characteristics::DLL,
            size_of_stack_reserve: 0x0010_0000,
            size_of_stack_commit: 0x1000,
            size_of_heap_reserve: 0x0010_0000,
            size_of_heap_commit: 0x1000,
        }
    }
}

impl PEHeaderBuilder {
    /// Default header parameters
    #[must_use]
    pub fn new() -> PEHeaderBuilder {
        Self::default()
    }

    /// Header of an executable image (`.exe`)
    #[must_use]
    pub fn create_executable_header() -> PEHeaderBuilder {
        Self::default().with_image_characteristics(Characteristics::EXECUTABLE_IMAGE)
    }

    /// Header of a library image (`.dll`)
    #[must_use]
    pub fn create_library_header() -> PEHeaderBuilder {
        Self::default()
            .with_image_characteristics(Characteristics::EXECUTABLE_IMAGE | Characteristics::DLL)
    }

    /// Sets the target machine
    #[must_use]
    pub fn with_machine(mut self, machine: Machine) -> Self {
        self.machine = machine;
        self
    }

    /// Sets file and section alignment.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if `file_alignment` is not a power of two
    /// between 512 and 64K, or `section_alignment` is not a power of two at least as large as
    /// `file_alignment`.
    pub fn with_alignments(mut self, file_alignment: u32, section_alignment: u32) -> Result<Self> {
        if is_power_of_two(u64::from(file_alignment)).is_none()
            || !(MIN_FILE_ALIGNMENT..=MAX_FILE_ALIGNMENT).contains(&file_alignment)
        {
            return Err(invalid_argument!(
                "file_alignment",
                "0x{:X} must be a power of two between 512 and 64K",
                file_alignment
            ));
        }

        if section_alignment < file_alignment
            || is_power_of_two(u64::from(section_alignment)).is_none()
        {
            return Err(invalid_argument!(
                "section_alignment",
                "0x{:X} must be a power of two not smaller than the file alignment 0x{:X}",
                section_alignment,
                file_alignment
            ));
        }

        self.file_alignment = file_alignment;
        self.section_alignment = section_alignment;
        Ok(self)
    }

    /// Sets the preferred load address
    #[must_use]
    pub fn with_image_base(mut self, image_base: u64) -> Self {
        self.image_base = image_base;
        self
    }

    /// Sets the linker version
    #[must_use]
    pub fn with_linker_version(mut self, major: u8, minor: u8) -> Self {
        self.major_linker_version = major;
        self.minor_linker_version = minor;
        self
    }

    /// Sets the required operating system version
    #[must_use]
    pub fn with_operating_system_version(mut self, major: u16, minor: u16) -> Self {
        self.major_operating_system_version = major;
        self.minor_operating_system_version = minor;
        self
    }

    /// Sets the image version
    #[must_use]
    pub fn with_image_version(mut self, major: u16, minor: u16) -> Self {
        self.major_image_version = major;
        self.minor_image_version = minor;
        self
    }

    /// Sets the subsystem and its required version
    #[must_use]
    pub fn with_subsystem(mut self, subsystem: Subsystem, major: u16, minor: u16) -> Self {
        self.subsystem = subsystem;
        self.major_subsystem_version = major;
        self.minor_subsystem_version = minor;
        self
    }

    /// Sets the DLL characteristics
    #[must_use]
    pub fn with_dll_characteristics(mut self, characteristics: DllCharacteristics) -> Self {
        self.dll_characteristics = characteristics;
        self
    }

    /// Sets the COFF image characteristics
    #[must_use]
    pub fn with_image_characteristics(mut self, characteristics: Characteristics) -> Self {
        self.image_characteristics = characteristics;
        self
    }

    /// Sets stack reserve and commit sizes
    #[must_use]
    pub fn with_stack(mut self, reserve: u64, commit: u64) -> Self {
        self.size_of_stack_reserve = reserve;
        self.size_of_stack_commit = commit;
        self
    }

    /// Sets heap reserve and commit sizes
    #[must_use]
    pub fn with_heap(mut self, reserve: u64, commit: u64) -> Self {
        self.size_of_heap_reserve = reserve;
        self.size_of_heap_commit = commit;
        self
    }

    /// Returns `true` if the image gets a PE32 optional header
    #[must_use]
    pub fn is_32_bit(&self) -> bool {
        !self.machine.is_64_bit()
    }

    /// Size of DOS stub, PE signature, COFF header, optional header and `section_count`
    /// section headers, before file alignment.
    #[must_use]
    pub fn size_of_pe_headers(&self, section_count: usize) -> usize {
        DOS_STUB_SIZE
            + PE_SIGNATURE_SIZE
            + CoffHeader::SIZE
            + PEHeader::size(self.is_32_bit())
            + SectionHeader::SIZE * section_count
    }

    /// Target machine
    #[must_use]
    pub fn machine(&self) -> Machine {
        self.machine
    }

    /// Section alignment
    #[must_use]
    pub fn section_alignment(&self) -> u32 {
        self.section_alignment
    }

    /// File alignment
    #[must_use]
    pub fn file_alignment(&self) -> u32 {
        self.file_alignment
    }

    /// Preferred load address
    #[must_use]
    pub fn image_base(&self) -> u64 {
        self.image_base
    }

    /// Linker version as `(major, minor)`
    #[must_use]
    pub fn linker_version(&self) -> (u8, u8) {
        (self.major_linker_version, self.minor_linker_version)
    }

    /// Operating system version as `(major, minor)`
    #[must_use]
    pub fn operating_system_version(&self) -> (u16, u16) {
        (
            self.major_operating_system_version,
            self.minor_operating_system_version,
        )
    }

    /// Image version as `(major, minor)`
    #[must_use]
    pub fn image_version(&self) -> (u16, u16) {
        (self.major_image_version, self.minor_image_version)
    }

    /// Subsystem version as `(major, minor)`
    #[must_use]
    pub fn subsystem_version(&self) -> (u16, u16) {
        (self.major_subsystem_version, self.minor_subsystem_version)
    }

    /// Subsystem
    #[must_use]
    pub fn subsystem(&self) -> Subsystem {
        self.subsystem
    }

    /// DLL characteristics
    #[must_use]
    pub fn dll_characteristics(&self) -> DllCharacteristics {
        self.dll_characteristics
    }

    /// COFF image characteristics
    #[must_use]
    pub fn image_characteristics(&self) -> Characteristics {
        self.image_characteristics
    }

    /// Stack reserve and commit sizes
    #[must_use]
    pub fn stack(&self) -> (u64, u64) {
        (self.size_of_stack_reserve, self.size_of_stack_commit)
    }

    /// Heap reserve and commit sizes
    #[must_use]
    pub fn heap(&self) -> (u64, u64) {
        (self.size_of_heap_reserve, self.size_of_heap_commit)
    }
}
