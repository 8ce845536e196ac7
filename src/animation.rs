//! Decoder for the `BCA0`/`JNT0` bone animation container: per-bone
//! translate/rotate/scale channel groups, each a constant or a compressed
//! sampled curve, sharing one bone index space with the model's objects.

use std::{ffi::OsStr, fs::OpenOptions, io::Read, path::Path};

use glam::{Mat3, Vec3};
use nom::{
    bytes::complete::take,
    multi::count,
    number::complete::{le_u16, le_u32},
};

use crate::{
    error::NsbcaError,
    nitro::{self, ascii_string, Info3d},
    nom_helpers::{at, q12_i16, q12_i32, Q12_ONE},
    types::mat3_from_rows,
};

pub const BCA0_STAMP: &str = "BCA0";
pub const JNT0_STAMP: &str = "JNT0";

/// Playback speed multiplier per curve-header speed bucket. Index 3 is not
/// defined by the format and is rejected.
const SPEEDS: [f32; 3] = [1.0, 0.5, 0.25];

/// A decoded `BCA0` animation container.
#[derive(Debug, Clone, PartialEq)]
pub struct Nsbca {
    pub animations: Info3d<Animation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Animation {
    pub stamp: String,
    pub num_frames: u16,
    /// Flag word of unknown purpose; a value of 3 enables the `extra_frames`
    /// diagnostic on curve headers.
    pub unknown: u32,
    /// Offsets of the two rotation side tables, relative to the animation.
    pub pivot_table_offset: u32,
    pub matrix_table_offset: u32,
    /// One entry per bone, in the model's object order.
    pub bones: Vec<AnimatedBone>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimatedBone {
    pub flag: u16,
    pub translate: Option<[Channel<f32>; 3]>,
    pub rotate: Option<Channel<RotationSample>>,
    pub scale: Option<[Channel<ScalePair>; 3]>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Channel<T> {
    Constant(T),
    Curve { info: CurveInfo, samples: Vec<T> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveInfo {
    pub start_frame: u16,
    pub end_frame: u16,
    /// Samples are 16-bit instead of 32-bit. Not meaningful for rotation.
    pub half_size: bool,
    pub speed: f32,
    /// Sample data offset, relative to the animation.
    pub data_offset: u32,
    /// `num_frames - end_frame` when the animation's unknown flag is 3.
    /// Preserved for diagnostics, never used for sample counts.
    pub extra_frames: i32,
}

impl CurveInfo {
    pub fn sample_count(&self) -> usize {
        let span = f32::from(self.end_frame) - f32::from(self.start_frame);
        (span * self.speed).ceil() as usize
    }

    fn sample_width(&self) -> usize {
        if self.half_size {
            2
        } else {
            4
        }
    }
}

/// The two-value scale encoding; most files store the same value twice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalePair {
    pub s1: f32,
    pub s2: f32,
}

/// One decoded rotation sample, resolved through the animation's side
/// tables.
#[derive(Debug, Clone, PartialEq)]
pub enum RotationSample {
    /// Constrained two-parameter rotation, 6-byte table entry.
    Pivot { param: u16, a: f32, b: f32 },
    /// Orthonormal basis reconstructed from packed 13-bit fields; the third
    /// row is derived as `v1 x v2`, not stored.
    Matrix(Mat3),
}

/// Header fields the channel decoders need to resolve table and sample
/// offsets.
struct AnimContext {
    base: usize,
    pivot_table_offset: u32,
    matrix_table_offset: u32,
    num_frames: u16,
    unknown: u32,
}

impl Nsbca {
    pub fn open_from_bytes(bytes: &[u8]) -> Result<Nsbca, NsbcaError> {
        parse_nsbca(bytes)
    }

    pub fn open_from_file(path: impl AsRef<OsStr> + AsRef<Path>) -> Result<Nsbca, NsbcaError> {
        let mut file = OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|op| NsbcaError::IOError {
                source: op,
                path: AsRef::<Path>::as_ref(&path).to_path_buf(),
            })?;
        let mut bytes = vec![];

        file.read_to_end(&mut bytes)
            .map_err(|op| NsbcaError::IOError {
                source: op,
                path: AsRef::<Path>::as_ref(&path).to_path_buf(),
            })?;

        Self::open_from_bytes(&bytes)
    }
}

pub fn parse_nsbca(start: &[u8]) -> Result<Nsbca, NsbcaError> {
    let container = nitro::parse_container(start, BCA0_STAMP, 1)?;
    let main_off = container.section_offsets[0] as usize;

    nitro::expect_stamp(start, main_off, JNT0_STAMP)?;

    let animations =
        nitro::read_3d_info::<_, NsbcaError>(start, main_off + 8, |view, off, _base, _index| {
            let (_, rel) = at(view, off, le_u32).map_err(|_| NsbcaError::ParseAnimations)?;
            let animation = parse_animation(view, main_off + rel as usize)?;
            Ok((animation, off + 4))
        })?;

    Ok(Nsbca { animations })
}

fn parse_animation(start: &[u8], base: usize) -> Result<Animation, NsbcaError> {
    let (_, (stamp, num_frames, num_objects, unknown, pivot_table_offset, matrix_table_offset)) =
        at(
            start,
            base,
            (take(4usize), le_u16, le_u16, le_u32, le_u32, le_u32),
        )
        .map_err(|_| NsbcaError::ParseHeader)?;

    // 3-character stamp with a skipped byte in second position
    let stamp = ascii_string(&[stamp[0], stamp[2], stamp[3]]);

    let ctx = AnimContext {
        base,
        pivot_table_offset,
        matrix_table_offset,
        num_frames,
        unknown,
    };

    let mut bones = Vec::with_capacity(num_objects as usize);
    for index in 0..num_objects as usize {
        let (_, rel) = at(start, base + 0x14 + index * 2, le_u16)
            .map_err(|_| NsbcaError::ParseHeader)?;
        bones.push(parse_bone(start, base + rel as usize, &ctx)?);
    }

    Ok(Animation {
        stamp,
        num_frames,
        unknown,
        pivot_table_offset,
        matrix_table_offset,
        bones,
    })
}

/// Per-bone transform record. The flag word (`--zyx-Sr-RZYX-T-` layout)
/// selects channel-group presence and, per axis, constant versus curve.
fn parse_bone(start: &[u8], record: usize, ctx: &AnimContext) -> Result<AnimatedBone, NsbcaError> {
    let (_, flag) = at(start, record, le_u16).map_err(|_| NsbcaError::ParseTransforms)?;
    let mut offset = record + 4;

    let translate = if (flag >> 1) & 1 == 0 {
        let x = translate_axis(start, &mut offset, flag, 0, ctx)?;
        let y = translate_axis(start, &mut offset, flag, 1, ctx)?;
        let z = translate_axis(start, &mut offset, flag, 2, ctx)?;
        Some([x, y, z])
    } else {
        None
    };

    let rotate = if (flag >> 6) & 1 == 0 {
        if (flag >> 8) & 1 != 0 {
            let sample = rotation_sample(start, offset, ctx)?;
            // a constant rotation record reserves 4 bytes for its 2-byte
            // sample
            offset += 4;
            Some(Channel::Constant(sample))
        } else {
            let info = curve_info(start, offset, ctx)?;
            offset += 8;

            let mut cursor = ctx.base + info.data_offset as usize;
            let mut samples = Vec::with_capacity(info.sample_count());
            for _ in 0..info.sample_count() {
                samples.push(rotation_sample(start, cursor, ctx)?);
                // rotation samples are always 2 bytes; half_size does not
                // apply
                cursor += 2;
            }
            Some(Channel::Curve { info, samples })
        }
    } else {
        None
    };

    let scale = if (flag >> 9) & 1 == 0 {
        let x = scale_axis(start, &mut offset, flag, 0, ctx)?;
        let y = scale_axis(start, &mut offset, flag, 1, ctx)?;
        let z = scale_axis(start, &mut offset, flag, 2, ctx)?;
        Some([x, y, z])
    } else {
        None
    };

    Ok(AnimatedBone {
        flag,
        translate,
        rotate,
        scale,
    })
}

fn translate_axis(
    start: &[u8],
    offset: &mut usize,
    flag: u16,
    axis: usize,
    ctx: &AnimContext,
) -> Result<Channel<f32>, NsbcaError> {
    if (flag >> (3 + axis)) & 1 != 0 {
        let (_, value) = at(start, *offset, q12_i32)
            .map_err(|_| out_of_bounds(start, *offset))?;
        *offset += 4;
        return Ok(Channel::Constant(value));
    }

    let info = curve_info(start, *offset, ctx)?;
    *offset += 8;

    let mut cursor = ctx.base + info.data_offset as usize;
    let mut samples = Vec::with_capacity(info.sample_count());
    for _ in 0..info.sample_count() {
        samples.push(q12_sample(start, cursor, info.half_size)?);
        cursor += info.sample_width();
    }

    Ok(Channel::Curve { info, samples })
}

fn scale_axis(
    start: &[u8],
    offset: &mut usize,
    flag: u16,
    axis: usize,
    ctx: &AnimContext,
) -> Result<Channel<ScalePair>, NsbcaError> {
    if (flag >> (11 + axis)) & 1 != 0 {
        let (_, (s1, s2)) = at(start, *offset, (q12_i32, q12_i32))
            .map_err(|_| out_of_bounds(start, *offset))?;
        *offset += 8;
        return Ok(Channel::Constant(ScalePair { s1, s2 }));
    }

    let info = curve_info(start, *offset, ctx)?;
    *offset += 8;

    let width = info.sample_width();
    let mut cursor = ctx.base + info.data_offset as usize;
    let mut samples = Vec::with_capacity(info.sample_count());
    for _ in 0..info.sample_count() {
        let s1 = q12_sample(start, cursor, info.half_size)?;
        let s2 = q12_sample(start, cursor + width, info.half_size)?;
        samples.push(ScalePair { s1, s2 });
        cursor += 2 * width;
    }

    Ok(Channel::Curve { info, samples })
}

/// 8-byte curve header: start frame, a packed end-frame/size/speed word and
/// the sample data offset.
fn curve_info(start: &[u8], offset: usize, ctx: &AnimContext) -> Result<CurveInfo, NsbcaError> {
    let (_, (start_frame, packed, data_offset)) = at(start, offset, (le_u16, le_u16, le_u32))
        .map_err(|_| NsbcaError::ParseTransforms)?;

    let end_frame = packed & 0x0FFF;
    let half_size = (packed >> 12) & 3 != 0;
    let bucket = (packed >> 14) & 3;
    let speed = *SPEEDS
        .get(bucket as usize)
        .ok_or(NsbcaError::SpeedBucket { index: bucket as u8 })?;

    let extra_frames = if ctx.unknown == 3 {
        i32::from(ctx.num_frames) - i32::from(end_frame)
    } else {
        0
    };

    Ok(CurveInfo {
        start_frame,
        end_frame,
        half_size,
        speed,
        data_offset,
        extra_frames,
    })
}

fn q12_sample(start: &[u8], offset: usize, half_size: bool) -> Result<f32, NsbcaError> {
    let parsed = if half_size {
        at(start, offset, q12_i16)
    } else {
        at(start, offset, q12_i32)
    };
    let (_, value) = parsed.map_err(|_| out_of_bounds(start, offset))?;
    Ok(value)
}

/// Decodes one 2-byte rotation sample through the animation's side tables:
/// bit 15 selects the table, bits 0-14 index into it.
fn rotation_sample(
    start: &[u8],
    offset: usize,
    ctx: &AnimContext,
) -> Result<RotationSample, NsbcaError> {
    let (_, dat) = at(start, offset, le_u16).map_err(|_| out_of_bounds(start, offset))?;
    let index = (dat & 0x7FFF) as usize;

    if dat >> 15 != 0 {
        // pivot table, 6-byte stride
        let entry = ctx.base + ctx.pivot_table_offset as usize + index * 6;
        let (_, (param, a, b)) = at(start, entry, (le_u16, q12_i16, q12_i16))
            .map_err(|_| out_of_bounds(start, entry))?;
        return Ok(RotationSample::Pivot { param, a, b });
    }

    // matrix table, 10-byte stride: five words carrying two packed basis
    // vectors of 13-bit components
    let entry = ctx.base + ctx.matrix_table_offset as usize + index * 10;
    let (_, d) = at(start, entry, count(le_u16, 5)).map_err(|_| out_of_bounds(start, entry))?;

    // the sixth component is interleaved through the low 3 bits of all five
    // words
    let i6 = ((d[4] & 7) << 12) | ((d[0] & 7) << 9) | ((d[1] & 7) << 6) | ((d[2] & 7) << 3)
        | (d[3] & 7);

    let v1 = Vec3::new(sign13(d[0] >> 3), sign13(d[1] >> 3), sign13(d[2] >> 3)) / Q12_ONE;
    let v2 = Vec3::new(sign13(d[3] >> 3), sign13(d[4] >> 3), sign13(i6)) / Q12_ONE;
    let v3 = v1.cross(v2);

    Ok(RotationSample::Matrix(mat3_from_rows(v1, v2, v3)))
}

/// Two's-complement sign extension of a packed 13-bit field.
fn sign13(v: u16) -> f32 {
    if v & 0x1000 != 0 {
        f32::from(v) - 8192.0
    } else {
        f32::from(v)
    }
}

fn out_of_bounds(start: &[u8], offset: usize) -> NsbcaError {
    NsbcaError::OutOfBounds {
        offset,
        len: start.len(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fixture::Buf;

    fn context() -> AnimContext {
        AnimContext {
            base: 0,
            pivot_table_offset: 0,
            matrix_table_offset: 0,
            num_frames: 0,
            unknown: 0,
        }
    }

    #[test]
    fn sample_count_law() {
        let info = CurveInfo {
            start_frame: 0,
            end_frame: 10,
            half_size: false,
            speed: 0.5,
            data_offset: 0,
            extra_frames: 0,
        };
        assert_eq!(info.sample_count(), 5);
    }

    #[test]
    fn speed_bucket_three_is_rejected() {
        let mut buf = Buf::new();
        buf.u16(0); // start frame
        buf.u16((3 << 14) | 10); // undefined speed bucket
        buf.u32(0);

        assert!(matches!(
            curve_info(buf.as_slice(), 0, &context()),
            Err(NsbcaError::SpeedBucket { index: 3 })
        ));
    }

    #[test]
    fn extra_frames_is_diagnostic_only() {
        let mut buf = Buf::new();
        buf.u16(0);
        buf.u16(10);
        buf.u32(0);

        let mut ctx = context();
        ctx.num_frames = 25;
        ctx.unknown = 3;
        let info = curve_info(buf.as_slice(), 0, &ctx).unwrap();
        assert_eq!(info.extra_frames, 15);
        assert_eq!(info.sample_count(), 10);

        ctx.unknown = 0;
        let info = curve_info(buf.as_slice(), 0, &ctx).unwrap();
        assert_eq!(info.extra_frames, 0);
    }

    #[test]
    fn sign13_extends() {
        assert_eq!(sign13(0), 0.0);
        assert_eq!(sign13(4096), -4096.0);
        assert_eq!(sign13(0x1FFF), -1.0);
        assert_eq!(sign13(4095), 4095.0);
    }

    #[test]
    fn rotation_matrix_third_row_is_the_cross_product() {
        // 4096 sign-extends to -4096, so this is a half turn about z:
        // v1 = -x, v2 = -y, and the derived row must be +z
        let mut buf = Buf::new();
        buf.u16(0); // the sample itself: matrix mode, index 0
        buf.u16(4096 << 3); // d1
        buf.u16(0); // d2
        buf.u16(0); // d3
        buf.u16(0); // d4
        buf.u16(4096 << 3); // d5

        let mut ctx = context();
        ctx.matrix_table_offset = 2;
        let sample = rotation_sample(buf.as_slice(), 0, &ctx).unwrap();

        match sample {
            RotationSample::Matrix(m) => {
                assert_eq!(m.row(0), Vec3::NEG_X);
                assert_eq!(m.row(1), Vec3::NEG_Y);
                assert_eq!(m.row(2), Vec3::Z);
                assert_eq!(m.row(2), m.row(0).cross(m.row(1)));
            }
            other => panic!("expected matrix, got {other:?}"),
        }
    }

    #[test]
    fn rotation_matrix_interleaved_component() {
        // all six components -1/4096: high bits 0x1FFF everywhere, low bits
        // chosen so the scattered sixth component also reassembles to 0x1FFF
        let mut buf = Buf::new();
        buf.u16(0);
        for _ in 0..4 {
            buf.u16((0x1FFF << 3) | 7); // d1..d4
        }
        buf.u16((0x1FFF << 3) | 1); // d5 carries the sixth component's sign bit

        let mut ctx = context();
        ctx.matrix_table_offset = 2;
        let sample = rotation_sample(buf.as_slice(), 0, &ctx).unwrap();

        match sample {
            RotationSample::Matrix(m) => {
                let c = -1.0 / 4096.0;
                assert_eq!(m.row(0), Vec3::splat(c));
                assert_eq!(m.row(1), Vec3::splat(c));
                // parallel basis vectors, so the derived row degenerates
                assert_eq!(m.row(2), Vec3::ZERO);
            }
            other => panic!("expected matrix, got {other:?}"),
        }
    }

    #[test]
    fn rotation_pivot_sample() {
        let mut buf = Buf::new();
        buf.u16(0x8001); // pivot mode, index 1
        buf.pad_to(2 + 6); // skip entry 0
        buf.u16(42); // param
        buf.i16(4096); // a
        buf.i16(-2048); // b

        let mut ctx = context();
        ctx.pivot_table_offset = 2;
        let sample = rotation_sample(buf.as_slice(), 0, &ctx).unwrap();
        assert_eq!(
            sample,
            RotationSample::Pivot {
                param: 42,
                a: 1.0,
                b: -0.5
            }
        );
    }

    #[test]
    fn rotation_table_out_of_bounds() {
        let mut buf = Buf::new();
        buf.u16(0x8005); // pivot index far past the buffer

        let mut ctx = context();
        ctx.pivot_table_offset = 2;
        assert!(matches!(
            rotation_sample(buf.as_slice(), 0, &ctx),
            Err(NsbcaError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn constant_scale_reads_adjacent_pair() {
        let mut buf = Buf::new();
        buf.i32(4096); // s1
        buf.i32(8192); // s2

        let mut offset = 0;
        let channel =
            scale_axis(buf.as_slice(), &mut offset, 1 << 11, 0, &context()).unwrap();
        assert_eq!(offset, 8);
        assert_eq!(channel, Channel::Constant(ScalePair { s1: 1.0, s2: 2.0 }));
    }

    #[test]
    fn translate_curve_half_size() {
        let mut buf = Buf::new();
        buf.u16(0); // start frame
        buf.u16((1 << 12) | 4); // half size, end frame 4
        buf.u32(8); // data offset
        for v in [4096i16, 2048, 1024, 512] {
            buf.i16(v);
        }

        let mut offset = 0;
        let channel = translate_axis(buf.as_slice(), &mut offset, 0, 0, &context()).unwrap();
        assert_eq!(offset, 8);
        match channel {
            Channel::Curve { info, samples } => {
                assert!(info.half_size);
                assert_eq!(samples, vec![1.0, 0.5, 0.25, 0.125]);
            }
            other => panic!("expected curve, got {other:?}"),
        }
    }

    #[test]
    fn scale_curve_full_width_pairs() {
        let mut buf = Buf::new();
        buf.u16(2); // start frame
        buf.u16(4); // end frame 4, full width, speed 1 -> 2 samples
        buf.u32(8);
        buf.i32(4096);
        buf.i32(8192);
        buf.i32(-4096);
        buf.i32(-8192);

        let mut offset = 0;
        let channel = scale_axis(buf.as_slice(), &mut offset, 0, 0, &context()).unwrap();
        match channel {
            Channel::Curve { samples, .. } => {
                assert_eq!(
                    samples,
                    vec![
                        ScalePair { s1: 1.0, s2: 2.0 },
                        ScalePair { s1: -1.0, s2: -2.0 },
                    ]
                );
            }
            other => panic!("expected curve, got {other:?}"),
        }
    }

    #[test]
    fn bone_with_constant_channels() {
        // every channel group present, every axis constant
        let flag = (0b111 << 3) | (1 << 8) | (0b111 << 11);

        let mut buf = Buf::new();
        buf.u16(flag);
        buf.u16(0); // padding
        buf.i32(4096); // translate x
        buf.i32(8192); // translate y
        buf.i32(-4096); // translate z
        buf.u16(0x8000); // rotation sample: pivot index 0
        buf.u16(0); // reserved half of the constant rotation
        for _ in 0..3 {
            buf.i32(4096); // s1
            buf.i32(4096); // s2
        }
        // pivot table entry 0
        let table = buf.len();
        buf.u16(7);
        buf.i16(0);
        buf.i16(0);

        let ctx = AnimContext {
            base: 0,
            pivot_table_offset: table as u32,
            matrix_table_offset: 0,
            num_frames: 0,
            unknown: 0,
        };
        let bone = parse_bone(buf.as_slice(), 0, &ctx).unwrap();

        assert_eq!(bone.flag, flag);
        assert_eq!(
            bone.translate,
            Some([
                Channel::Constant(1.0),
                Channel::Constant(2.0),
                Channel::Constant(-1.0),
            ])
        );
        assert_eq!(
            bone.rotate,
            Some(Channel::Constant(RotationSample::Pivot {
                param: 7,
                a: 0.0,
                b: 0.0
            }))
        );
        assert_eq!(
            bone.scale,
            Some([
                Channel::Constant(ScalePair { s1: 1.0, s2: 1.0 }),
                Channel::Constant(ScalePair { s1: 1.0, s2: 1.0 }),
                Channel::Constant(ScalePair { s1: 1.0, s2: 1.0 }),
            ])
        );
    }

    #[test]
    fn bone_with_absent_groups() {
        let flag = (1 << 1) | (1 << 6) | (1 << 9);
        let mut buf = Buf::new();
        buf.u16(flag);
        buf.u16(0);

        let bone = parse_bone(buf.as_slice(), 0, &context()).unwrap();
        assert_eq!(bone.translate, None);
        assert_eq!(bone.rotate, None);
        assert_eq!(bone.scale, None);
    }
}
