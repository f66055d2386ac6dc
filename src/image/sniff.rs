//! CPU architecture detection from binary headers.
//!
//! Probes, in order: ELF, PE, and the Linux arm64 boot image header.

use crate::error::{BimaError, Result};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";
const EM_386: u16 = 3;
const EM_ARM: u16 = 40;
const EM_X86_64: u16 = 62;
const EM_AARCH64: u16 = 183;

const IMAGE_FILE_MACHINE_I386: u16 = 0x014c;
const IMAGE_FILE_MACHINE_AMD64: u16 = 0x8664;
const IMAGE_FILE_MACHINE_ARM64: u16 = 0xaa64;

/// Bytes read from the head of the file; PE headers sit well within this.
const HEADER_LIMIT: u64 = 64 * 1024;
const DOS_HEADER_LEN: usize = 64;
const ARM64_IMAGE_MAGIC: &[u8; 4] = b"ARM\x64";
const ARM64_IMAGE_MAGIC_OFFSET: usize = 56;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Amd64,
    Arm64,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn detect_architecture(path: &Path) -> Result<Architecture> {
    let file = File::open(path).map_err(|e| BimaError::io(path, e))?;
    let mut header = Vec::new();
    file.take(HEADER_LIMIT)
        .read_to_end(&mut header)
        .map_err(|e| BimaError::io(path, e))?;

    if let Some(arch) = probe_elf(&header) {
        return arch;
    }
    if let Some(arch) = probe_pe(&header) {
        return arch;
    }
    if header.len() < DOS_HEADER_LEN {
        return Err(BimaError::io(
            path,
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "file is shorter than a DOS header",
            ),
        ));
    }
    if is_arm64_boot_image(&header) {
        return Ok(Architecture::Arm64);
    }
    Err(BimaError::UnknownArchitecture {
        machine: "unrecognized binary format".to_string(),
    })
}

/// `None` when `header` is not an ELF file
fn probe_elf(header: &[u8]) -> Option<Result<Architecture>> {
    if header.len() < 20 || &header[..4] != ELF_MAGIC || !matches!(header[4], 1 | 2) {
        return None;
    }
    let raw = [header[18], header[19]];
    let machine = match header[5] {
        1 => u16::from_le_bytes(raw),
        2 => u16::from_be_bytes(raw),
        _ => return None,
    };
    Some(match machine {
        EM_ARM | EM_AARCH64 => Ok(Architecture::Arm64),
        EM_386 | EM_X86_64 => Ok(Architecture::Amd64),
        other => Err(BimaError::UnknownArchitecture {
            machine: format!("ELF machine {:#x}", other),
        }),
    })
}

/// `None` when `header` is not a PE file
fn probe_pe(header: &[u8]) -> Option<Result<Architecture>> {
    if header.len() < DOS_HEADER_LEN || &header[..2] != b"MZ" {
        return None;
    }
    let offset = u32::from_le_bytes(header[0x3c..0x40].try_into().ok()?) as usize;
    let pe = header.get(offset..offset.checked_add(6)?)?;
    if &pe[..4] != b"PE\0\0" {
        return None;
    }
    Some(match u16::from_le_bytes([pe[4], pe[5]]) {
        IMAGE_FILE_MACHINE_ARM64 => Ok(Architecture::Arm64),
        IMAGE_FILE_MACHINE_AMD64 | IMAGE_FILE_MACHINE_I386 => Ok(Architecture::Amd64),
        other => Err(BimaError::UnknownArchitecture {
            machine: format!("PE machine {:#x}", other),
        }),
    })
}

fn is_arm64_boot_image(header: &[u8]) -> bool {
    let magic = ARM64_IMAGE_MAGIC_OFFSET..ARM64_IMAGE_MAGIC_OFFSET + ARM64_IMAGE_MAGIC.len();
    &header[..2] == b"MZ" && header.get(magic) == Some(&ARM64_IMAGE_MAGIC[..])
}
