// Reparse point buffer decoding
//
// Layout of REPARSE_DATA_BUFFER for the symbolic-link case:
//
//     offset  size  field
//          0     4  ReparseTag
//          4     2  ReparseDataLength
//          6     2  Reserved
//          8     2  SubstituteNameOffset   )
//         10     2  SubstituteNameLength   )  SymbolicLinkReparseBuffer
//         12     2  PrintNameOffset        )
//         14     2  PrintNameLength        )
//         16     4  Flags                  )
//         20     -  PathBuffer (UTF-16LE)  )
//
// Name offsets are relative to the start of PathBuffer, name lengths are
// in bytes. Every read below is bounds-checked; a truncated buffer is a
// corrupted link, never an out-of-range read.

use crate::error::ResolveError;
use crate::prefix;
use log::trace;

pub const IO_REPARSE_TAG_MOUNT_POINT: u32 = 0xA000_0003;
pub const IO_REPARSE_TAG_SYMLINK: u32 = 0xA000_000C;

/// Largest reparse buffer the filesystem will hand out.
pub const MAXIMUM_REPARSE_DATA_BUFFER_SIZE: usize = 16 * 1024;

/// Flags bit marking a link target as relative to the link's directory.
pub const SYMLINK_FLAG_RELATIVE: u32 = 0x0000_0001;

const OFFSET_REPARSE_TAG: usize = 0;
const OFFSET_DATA_LENGTH: usize = 4;
const OFFSET_SUB_NAME_OFFSET: usize = 8;
const OFFSET_SUB_NAME_LENGTH: usize = 10;
const OFFSET_PRINT_NAME_OFFSET: usize = 12;
const OFFSET_PRINT_NAME_LENGTH: usize = 14;
const OFFSET_FLAGS: usize = 16;
const OFFSET_PATH_BUFFER: usize = 20;

/// Decoded symbolic-link reparse record.
#[derive(Debug, Clone)]
pub struct LinkTarget {
    /// Reparse tag the record carried; always the symbolic-link tag.
    pub tag: u32,
    /// Substitute name with the NT object prefix stripped.
    pub target: String,
    /// Display name as stored; falls back to the substitute name.
    pub print_name: String,
    /// True when the target is relative to the link's own directory.
    pub is_relative: bool,
    /// Reparse data bytes the record claims to occupy.
    pub data_length: u16,
}

/// The reparse tag of a raw buffer.
pub fn reparse_tag(data: &[u8]) -> Result<u32, ResolveError> {
    read_u32(data, OFFSET_REPARSE_TAG)
}

/// Decode a raw reparse buffer into a symbolic-link target.
///
/// Rejects non-symlink tags (mount points included) as `NotALink`, odd or
/// out-of-range name extents as `CorruptedLink` and an empty decoded
/// target as `InvalidLinkTarget`. Performs no I/O.
pub fn decode(data: &[u8]) -> Result<LinkTarget, ResolveError> {
    let tag = reparse_tag(data)?;
    if tag != IO_REPARSE_TAG_SYMLINK {
        trace!("reparse tag 0x{tag:08X} is not a symbolic link");
        return Err(ResolveError::NotALink(format!("reparse tag 0x{tag:08X}")));
    }

    let data_length = read_u16(data, OFFSET_DATA_LENGTH)?;
    let name_offset = read_u16(data, OFFSET_SUB_NAME_OFFSET)? as usize;
    let name_length = read_u16(data, OFFSET_SUB_NAME_LENGTH)? as usize;
    // the name is UTF-16, its byte length must be even
    if name_length % 2 != 0 {
        return Err(ResolveError::CorruptedLink);
    }
    let flags = read_u32(data, OFFSET_FLAGS)?;

    let start = OFFSET_PATH_BUFFER + name_offset;
    let raw = data
        .get(start..start + name_length)
        .ok_or(ResolveError::CorruptedLink)?;
    let substitute = parse_utf16le_string(raw)?;

    let print_name = decode_print_name(data).unwrap_or_else(|| substitute.clone());

    let target = prefix::strip_prefix(&substitute);
    if target.is_empty() {
        return Err(ResolveError::InvalidLinkTarget);
    }
    trace!("decoded link target {target:?} (relative: {})", flags & SYMLINK_FLAG_RELATIVE != 0);

    Ok(LinkTarget {
        tag,
        target,
        print_name,
        is_relative: flags & SYMLINK_FLAG_RELATIVE != 0,
        data_length,
    })
}

// The print name is informational; a malformed one falls back to the
// substitute name instead of failing the decode.
fn decode_print_name(data: &[u8]) -> Option<String> {
    let offset = read_u16(data, OFFSET_PRINT_NAME_OFFSET).ok()? as usize;
    let length = read_u16(data, OFFSET_PRINT_NAME_LENGTH).ok()? as usize;
    if length == 0 || length % 2 != 0 {
        return None;
    }
    let start = OFFSET_PATH_BUFFER + offset;
    let raw = data.get(start..start + length)?;
    parse_utf16le_string(raw).ok()
}

/// Build a symbolic-link reparse buffer. The dual of `decode`; used by the
/// in-memory filesystem and by tests.
pub fn build_symlink_buffer(substitute: &str, print_name: &str, relative: bool) -> Vec<u8> {
    let sub: Vec<u8> = utf16le_bytes(substitute);
    let prn: Vec<u8> = utf16le_bytes(print_name);

    let data_length = (OFFSET_PATH_BUFFER - OFFSET_SUB_NAME_OFFSET + sub.len() + prn.len()) as u16;
    let mut buffer = Vec::with_capacity(OFFSET_PATH_BUFFER + sub.len() + prn.len());
    buffer.extend_from_slice(&IO_REPARSE_TAG_SYMLINK.to_le_bytes());
    buffer.extend_from_slice(&data_length.to_le_bytes());
    buffer.extend_from_slice(&0u16.to_le_bytes()); // Reserved
    buffer.extend_from_slice(&0u16.to_le_bytes()); // SubstituteNameOffset
    buffer.extend_from_slice(&(sub.len() as u16).to_le_bytes());
    buffer.extend_from_slice(&(sub.len() as u16).to_le_bytes()); // PrintNameOffset
    buffer.extend_from_slice(&(prn.len() as u16).to_le_bytes());
    let flags: u32 = if relative { SYMLINK_FLAG_RELATIVE } else { 0 };
    buffer.extend_from_slice(&flags.to_le_bytes());
    buffer.extend_from_slice(&sub);
    buffer.extend_from_slice(&prn);
    buffer
}

fn utf16le_bytes(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, ResolveError> {
    let bytes = data
        .get(offset..offset + 2)
        .ok_or(ResolveError::CorruptedLink)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, ResolveError> {
    let bytes = data
        .get(offset..offset + 4)
        .ok_or(ResolveError::CorruptedLink)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Parse a UTF-16LE byte slice.
fn parse_utf16le_string(data: &[u8]) -> Result<String, ResolveError> {
    if data.len() % 2 != 0 {
        return Err(ResolveError::CorruptedLink);
    }
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| ResolveError::CorruptedLink)
}
