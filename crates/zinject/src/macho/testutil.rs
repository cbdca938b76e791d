//! Synthetic Mach-O images for unit tests.

pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_ID_DYLIB: u32 = 0xd;

const MH_EXECUTE: u32 = 0x2;
const MH_DYLIB: u32 = 0x6;

/// Builds a little-endian Mach-O with one `__TEXT` segment and dylib commands.
pub struct MachOBuilder {
    is_64: bool,
    filetype: u32,
    id: Option<String>,
    dylibs: Vec<(u32, String)>,
    text_offset: Option<usize>,
    zerofill_offset: Option<usize>,
}

impl MachOBuilder {
    pub const DEFAULT_TEXT_OFFSET: usize = 0x400;
    const TEXT_SIZE: usize = 0x40;

    pub fn new() -> Self {
        Self {
            is_64: true,
            filetype: MH_EXECUTE,
            id: None,
            dylibs: Vec::new(),
            text_offset: Some(Self::DEFAULT_TEXT_OFFSET),
            zerofill_offset: None,
        }
    }

    pub fn thirty_two_bit(mut self) -> Self {
        self.is_64 = false;
        self
    }

    /// Make the image an `MH_DYLIB` with the given install name.
    pub fn dylib_id(mut self, id: &str) -> Self {
        self.filetype = MH_DYLIB;
        self.id = Some(id.to_string());
        self
    }

    pub fn dylib(mut self, path: &str) -> Self {
        self.dylibs.push((super::LC_LOAD_DYLIB, path.to_string()));
        self
    }

    pub fn weak_dylib(mut self, path: &str) -> Self {
        self.dylibs.push((super::LC_LOAD_WEAK_DYLIB, path.to_string()));
        self
    }

    pub fn text_offset(mut self, offset: usize) -> Self {
        self.text_offset = Some(offset);
        self
    }

    /// Place `__text` right after the load commands.
    pub fn no_padding(mut self) -> Self {
        self.text_offset = None;
        self
    }

    pub fn zerofill_section_at(mut self, offset: usize) -> Self {
        self.zerofill_offset = Some(offset);
        self
    }

    fn align(&self) -> usize {
        if self.is_64 {
            8
        } else {
            4
        }
    }

    fn dylib_command(&self, cmd: u32, path: &str) -> Vec<u8> {
        let align = self.align();
        let size = (24 + path.len() + 1).div_ceil(align) * align;
        let mut out = Vec::with_capacity(size);
        for v in [cmd, size as u32, 24, 2, 0x10000, 0x10000] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(path.as_bytes());
        out.resize(size, 0);
        out
    }

    fn section(&self, name: &str, offset: usize, flags: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&name16(name));
        out.extend_from_slice(&name16("__TEXT"));
        if self.is_64 {
            out.extend_from_slice(&(0x1_0000_0000u64 + offset as u64).to_le_bytes());
            out.extend_from_slice(&(Self::TEXT_SIZE as u64).to_le_bytes());
        } else {
            out.extend_from_slice(&(0x4000u32 + offset as u32).to_le_bytes());
            out.extend_from_slice(&(Self::TEXT_SIZE as u32).to_le_bytes());
        }
        // offset, align, reloff, nreloc, flags, reserved1, reserved2
        for v in [offset as u32, 2, 0, 0, flags, 0, 0] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        if self.is_64 {
            out.extend_from_slice(&0u32.to_le_bytes());
        }
        out
    }

    fn segment(&self, text_offset: usize, total: usize) -> Vec<u8> {
        let mut sections = vec![self.section("__text", text_offset, 0x8000_0400)];
        if let Some(off) = self.zerofill_offset {
            sections.push(self.section("__bss", off, 0x1));
        }
        let nsects = sections.len() as u32;
        let mut out = Vec::new();
        if self.is_64 {
            let cmdsize = 72 + 80 * sections.len();
            out.extend_from_slice(&LC_SEGMENT_64.to_le_bytes());
            out.extend_from_slice(&(cmdsize as u32).to_le_bytes());
            out.extend_from_slice(&name16("__TEXT"));
            out.extend_from_slice(&0x1_0000_0000u64.to_le_bytes());
            out.extend_from_slice(&0x4000u64.to_le_bytes());
            out.extend_from_slice(&0u64.to_le_bytes());
            out.extend_from_slice(&(total as u64).to_le_bytes());
        } else {
            let cmdsize = 56 + 68 * sections.len();
            out.extend_from_slice(&LC_SEGMENT.to_le_bytes());
            out.extend_from_slice(&(cmdsize as u32).to_le_bytes());
            out.extend_from_slice(&name16("__TEXT"));
            out.extend_from_slice(&0x4000u32.to_le_bytes());
            out.extend_from_slice(&0x4000u32.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&(total as u32).to_le_bytes());
        }
        for v in [5u32, 5, nsects, 0] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for s in sections {
            out.extend_from_slice(&s);
        }
        out
    }

    pub fn build(self) -> Vec<u8> {
        let header_size = if self.is_64 { 32 } else { 28 };
        let nsects = 1 + usize::from(self.zerofill_offset.is_some());
        let segment_size = if self.is_64 {
            72 + 80 * nsects
        } else {
            56 + 68 * nsects
        };

        let mut commands: Vec<Vec<u8>> = Vec::new();
        if let Some(id) = &self.id {
            commands.push(self.dylib_command(LC_ID_DYLIB, id));
        }
        for (cmd, path) in &self.dylibs {
            commands.push(self.dylib_command(*cmd, path));
        }
        let sizeofcmds = segment_size + commands.iter().map(Vec::len).sum::<usize>();
        let lc_end = header_size + sizeofcmds;

        let text_offset = self.text_offset.unwrap_or(lc_end);
        assert!(text_offset >= lc_end, "text offset overlaps load commands");
        let total = text_offset + Self::TEXT_SIZE;

        let mut out = Vec::with_capacity(total);
        let (magic, cputype, cpusubtype) = if self.is_64 {
            (0xfeed_facfu32, 0x0100_000cu32, 0u32)
        } else {
            (0xfeed_faceu32, 12, 9)
        };
        let ncmds = 1 + commands.len() as u32;
        for v in [magic, cputype, cpusubtype, self.filetype, ncmds, sizeofcmds as u32, 0x0020_0085] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        if self.is_64 {
            out.extend_from_slice(&0u32.to_le_bytes());
        }
        out.extend_from_slice(&self.segment(text_offset, total));
        for c in commands {
            out.extend_from_slice(&c);
        }
        out.resize(text_offset, 0);
        // ret; ret; ...
        while out.len() < total {
            out.extend_from_slice(&[0xc0, 0x03, 0x5f, 0xd6]);
        }
        out
    }
}

/// Wrap thin images into a 32-bit fat container.
pub fn fat(slices: &[Vec<u8>]) -> Vec<u8> {
    const ALIGN: usize = 0x1000;
    let mut out = Vec::new();
    out.extend_from_slice(&0xcafe_babeu32.to_be_bytes());
    out.extend_from_slice(&(slices.len() as u32).to_be_bytes());

    let mut offset = ALIGN;
    let mut placed = Vec::new();
    for slice in slices {
        let cputype = u32::from_le_bytes(slice[4..8].try_into().unwrap());
        let cpusubtype = u32::from_le_bytes(slice[8..12].try_into().unwrap());
        for v in [cputype, cpusubtype, offset as u32, slice.len() as u32, 12] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        placed.push(offset);
        offset = (offset + slice.len()).div_ceil(ALIGN) * ALIGN;
    }
    for (slice, at) in slices.iter().zip(placed) {
        out.resize(at, 0);
        out.extend_from_slice(slice);
    }
    out
}

fn name16(name: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..name.len()].copy_from_slice(name.as_bytes());
    out
}
