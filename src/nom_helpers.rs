use nom::{
    combinator::map,
    error::{Error, ErrorKind},
    number::complete::{le_i16, le_i32},
    IResult as _IResult, Parser,
};

pub type IResult<'a, T> = _IResult<&'a [u8], T>;

/// One unit in the formats' signed fixed-point encoding (12 fractional bits).
pub const Q12_ONE: f32 = 4096.0;

/// Signed 32-bit Q12 fixed-point.
pub fn q12_i32(i: &[u8]) -> IResult<f32> {
    map(le_i32, |v| v as f32 / Q12_ONE).parse(i)
}

/// Signed 16-bit Q12 fixed-point.
pub fn q12_i16(i: &[u8]) -> IResult<f32> {
    map(le_i16, |v| f32::from(v) / Q12_ONE).parse(i)
}

/// Re-slices the whole buffer at an absolute offset. Fails instead of
/// panicking when the offset lands past the end of the buffer; every
/// offset-addressed jump in the decoders goes through here.
pub fn slice_from(start: &[u8], offset: usize) -> IResult<&[u8]> {
    if offset > start.len() {
        return Err(nom::Err::Error(Error::new(start, ErrorKind::Eof)));
    }

    Ok((&start[offset..], &start[offset..]))
}

/// Runs a parser at an absolute offset into the buffer.
pub fn at<'a, T>(
    start: &'a [u8],
    offset: usize,
    mut f: impl Parser<&'a [u8], Output = T, Error = Error<&'a [u8]>>,
) -> IResult<'a, T> {
    let (i, _) = slice_from(start, offset)?;
    f.parse(i)
}

#[cfg(test)]
mod test {
    use super::*;
    use nom::number::complete::le_u16;

    #[test]
    fn q12_round_trip() {
        // values small enough to be exact in f32
        for n in [0i32, 1, -1, 17, 4096, -4096, 0x12345, -0x12345, 1 << 23] {
            let bytes = n.to_le_bytes();
            let (_, v) = q12_i32(&bytes).unwrap();
            assert_eq!((v * Q12_ONE).round() as i32, n);
        }
    }

    #[test]
    fn q12_i16_round_trip() {
        for n in [0i16, 1, -1, 4096, -4096, i16::MAX, i16::MIN] {
            let bytes = n.to_le_bytes();
            let (_, v) = q12_i16(&bytes).unwrap();
            assert_eq!((v * Q12_ONE).round() as i16, n);
        }
    }

    #[test]
    fn slice_from_rejects_out_of_bounds() {
        let buf = [0u8; 4];
        assert!(slice_from(&buf, 4).is_ok());
        assert!(slice_from(&buf, 5).is_err());
    }

    #[test]
    fn at_runs_at_offset() {
        let buf = [0u8, 0, 0x34, 0x12];
        let (_, v) = at(&buf, 2, le_u16).unwrap();
        assert_eq!(v, 0x1234);

        assert!(at(&buf, 3, le_u16).is_err());
    }
}
