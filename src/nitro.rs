//! Nitro container primitives shared by the BMD0 and BCA0 readers: the
//! chunked container header and the "3D info" record list, an array of N
//! offset-addressed records decoded through an injected closure.

use nom::{
    bytes::complete::take,
    multi::count,
    number::complete::{le_u16, le_u32},
    Parser,
};

use crate::{
    error::NitroError,
    nom_helpers::{at, slice_from, IResult},
};

pub const NITRO_NAME_LENGTH: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerHeader {
    pub stamp: [u8; 4],
    pub byte_order: u16,
    pub version: u16,
    pub file_size: u32,
    pub header_size: u16,
    /// Absolute offsets of the container's sections.
    pub section_offsets: Vec<u32>,
}

fn container_header(i: &[u8]) -> IResult<ContainerHeader> {
    let (i, stamp) = take(4usize)(i)?;
    let (i, byte_order) = le_u16(i)?;
    let (i, version) = le_u16(i)?;
    let (i, file_size) = le_u32(i)?;
    let (i, header_size) = le_u16(i)?;
    let (i, num_sections) = le_u16(i)?;
    let (i, section_offsets) = count(le_u32, num_sections as usize).parse(i)?;

    Ok((
        i,
        ContainerHeader {
            stamp: [stamp[0], stamp[1], stamp[2], stamp[3]],
            byte_order,
            version,
            file_size,
            header_size,
            section_offsets,
        },
    ))
}

/// Reads the container header and validates the stamp and section count.
pub fn parse_container(
    start: &[u8],
    expected_stamp: &'static str,
    max_sections: u16,
) -> Result<ContainerHeader, NitroError> {
    let (_, header) = container_header(start).map_err(|_| NitroError::Parse)?;

    if header.stamp != expected_stamp.as_bytes() {
        return Err(NitroError::WrongStamp {
            expected: expected_stamp,
            found: ascii_string(&header.stamp),
        });
    }

    let found = header.section_offsets.len() as u16;
    if found > max_sections {
        return Err(NitroError::TooManySections {
            found,
            max: max_sections,
        });
    }
    if header.section_offsets.is_empty() {
        return Err(NitroError::MissingSection);
    }

    Ok(header)
}

/// Validates the 4-character block stamp at an absolute offset.
pub fn expect_stamp(
    start: &[u8],
    offset: usize,
    expected: &'static str,
) -> Result<(), NitroError> {
    let (_, stamp) = at(start, offset, take(4usize)).map_err(|_| NitroError::Parse)?;

    if stamp != expected.as_bytes() {
        return Err(NitroError::WrongStamp {
            expected,
            found: ascii_string(stamp),
        });
    }

    Ok(())
}

/// A decoded "3D info" record list: one entry and one name per record.
#[derive(Debug, Clone, PartialEq)]
pub struct Info3d<T> {
    pub entries: Vec<T>,
    pub names: Vec<String>,
}

impl<T> Info3d<T> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Consumes the record count and the unknown block preceding the records,
/// leaving the input at the first record.
fn info_prelude(i: &[u8]) -> IResult<usize> {
    let (i, _dummy) = take(1usize)(i)?;
    let (i, num) = nom::number::complete::le_u8(i)?;
    let (i, _section_size) = le_u16(i)?;
    let (i, _unknown_header_size) = le_u16(i)?;
    let (i, _unknown_section_size) = le_u16(i)?;
    let (i, _constant) = le_u32(i)?;
    let (i, _unknowns) = count(le_u32, num as usize).parse(i)?;
    let (i, _info_header_size) = le_u16(i)?;
    let (i, _info_section_size) = le_u16(i)?;

    Ok((i, num as usize))
}

/// Walks a "3D info" record list at `offset`. `decode` receives the whole
/// buffer, the current record offset, the list's base offset and the record
/// index, and returns the decoded record plus the offset of the record that
/// follows it.
pub fn read_3d_info<T, E: From<NitroError>>(
    start: &[u8],
    offset: usize,
    mut decode: impl FnMut(&[u8], usize, usize, usize) -> Result<(T, usize), E>,
) -> Result<Info3d<T>, E> {
    let base = offset;
    let (i, _) = slice_from(start, offset).map_err(|_| NitroError::Parse)?;
    let (rest, num) = info_prelude(i).map_err(|_| NitroError::Parse)?;

    // first record offset, recovered from how much the prelude consumed
    let mut cursor = start.len() - rest.len();

    let mut entries = Vec::with_capacity(num);
    for index in 0..num {
        let (entry, next) = decode(start, cursor, base, index)?;
        entries.push(entry);
        cursor = next;
    }

    let mut names = Vec::with_capacity(num);
    for _ in 0..num {
        let (_, raw) =
            at(start, cursor, take(NITRO_NAME_LENGTH)).map_err(|_| NitroError::Parse)?;
        names.push(ascii_string(raw));
        cursor += NITRO_NAME_LENGTH;
    }

    Ok(Info3d { entries, names })
}

/// Printable-ASCII prefix of a fixed-width name field, NUL terminated.
pub fn ascii_string(raw: &[u8]) -> String {
    raw.iter()
        .take_while(|&&c| (32..127).contains(&c))
        .map(|&c| c as char)
        .collect()
}
