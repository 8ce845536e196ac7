use bitflags::bitflags;
use glam::{Mat3, Mat4, Vec3};

use crate::nitro::Info3d;

/// A decoded `BMD0` model container. All data is owned; the input buffer is
/// not referenced after decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Nsbmd {
    pub models: Info3d<Model>,
    /// Absolute offset of the embedded `BTX0` texture section, when present.
    /// Pixel decoding is left to the texture layer.
    pub texture_section: Option<usize>,
    pub has_billboards: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub header: ModelHeader,
    pub objects: Info3d<Object>,
    pub polygons: Info3d<Polygon>,
    pub materials: Info3d<Material>,
    pub textures: Info3d<TextureBinding>,
    pub palettes: Info3d<PaletteBinding>,
    /// Ordered, replayable result of the bone bytecode.
    pub commands: Vec<Command>,
    pub warnings: Vec<DecodeWarning>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelHeader {
    pub block_size: u32,
    pub bones_offset: usize,
    pub materials_offset: usize,
    pub poly_start_offset: usize,
    pub poly_end_offset: usize,
    pub num_objects: u8,
    pub num_materials: u8,
    pub num_polys: u8,
    pub max_stack: u8,
    pub scale: f32,
    /// Usually the inverse of `scale`.
    pub down_scale: f32,
    pub num_verts: u16,
    pub num_surfaces: u16,
    pub num_triangles: u16,
    pub num_quads: u16,
    pub bbox_x: f32,
    pub bbox_y: f32,
    pub bbox_z: f32,
    pub bbox_width: f32,
    pub bbox_height: f32,
    pub bbox_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BillboardMode {
    #[default]
    None,
    Full,
    YAxis,
}

/// How a bone's rotation is stored in its transform record.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectRotation {
    Identity,
    /// Constrained two-parameter rotation used for hinge and billboard bones:
    /// a +/-1 pinned at the cell picked by `mode`, `a` and `b` mirrored into
    /// the remaining quadrant under the `neg` sign bits.
    Pivot {
        a: f32,
        b: f32,
        mode: u8,
        neg: u8,
        matrix: Mat3,
    },
    Full(Mat3),
}

impl ObjectRotation {
    pub fn matrix(&self) -> Mat3 {
        match self {
            Self::Identity => Mat3::IDENTITY,
            Self::Pivot { matrix, .. } => *matrix,
            Self::Full(matrix) => *matrix,
        }
    }
}

/// A bone in the transform hierarchy. `parent` and `visible` stay at their
/// defaults until the bone bytecode runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub flag: u16,
    pub visible: bool,
    pub parent: Option<u8>,
    pub billboard_mode: BillboardMode,
    pub translate: Vec3,
    pub rotation: ObjectRotation,
    pub scale: Vec3,
    /// Composed local transform: translate * rotation * scale.
    pub local: Mat4,
}

/// A polygon's opaque display list plus the bindings the bone bytecode
/// assigns to it. After interpretation both bindings are set exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub display_list: Vec<u8>,
    /// Absolute offset the display list was lifted from.
    pub display_list_offset: usize,
    pub material: Option<u8>,
    pub stack_slot: Option<usize>,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WrapFlags: u16 {
        const REPEAT_X = 1;
        const REPEAT_Y = 1 << 1;
        const FLIP_X = 1 << 2;
        const FLIP_Y = 1 << 3;
    }
}

/// Texture-coordinate transform selected by the material flag word. The
/// custom full-matrix mode is rejected at decode time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TexcoordTransform {
    Identity,
    Scale { s: f32, t: f32 },
}

impl TexcoordTransform {
    pub fn matrix(&self) -> Mat3 {
        match self {
            Self::Identity => Mat3::IDENTITY,
            Self::Scale { s, t } => Mat3::from_diagonal(Vec3::new(*s, *t, 1.0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub poly_attrib: u32,
    pub flags: u16,
    pub width: u32,
    pub height: u32,
    pub wrap: WrapFlags,
    pub texcoord: TexcoordTransform,
    /// Raw cull mode bits from the polygon attribute word.
    pub cull_mode: u8,
    /// Opacity in [0, 1]; a raw value of zero encodes opaque.
    pub alpha: f32,
    pub texture: Option<usize>,
    pub palette: Option<usize>,
    pub texture_name: Option<String>,
    pub palette_name: Option<String>,
}

/// A named texture slot and the materials that reference it.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureBinding {
    pub materials: Vec<u8>,
}

/// A named palette slot and the materials that reference it.
#[derive(Debug, Clone, PartialEq)]
pub struct PaletteBinding {
    pub materials: Vec<u8>,
}

/// One step of the bone bytecode's replayable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Multiply the stack with `object`'s matrix under `parent` and store the
    /// result at `stack_slot`, optionally restoring from `restore_slot` first.
    Bind {
        object: u8,
        parent: u8,
        stack_slot: usize,
        restore_slot: Option<usize>,
    },
    /// Preserve the matrix at `from` in a fresh slot before it is overwritten.
    CopySlot { from: usize, to: usize },
}

/// Recoverable oddities collected while decoding; the affected unit is left
/// in a clearly degraded state instead of aborting the whole model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeWarning {
    /// Opcode 0x09. The skinning equation is not implemented; the opcode is
    /// recorded and skipped with no state change.
    SkinningEquation { offset: usize },
}

/// Builds a matrix from its rows; the formats store matrices row-major while
/// glam is column-major.
pub(crate) fn mat3_from_rows(r0: Vec3, r1: Vec3, r2: Vec3) -> Mat3 {
    Mat3::from_cols(
        Vec3::new(r0.x, r1.x, r2.x),
        Vec3::new(r0.y, r1.y, r2.y),
        Vec3::new(r0.z, r1.z, r2.z),
    )
}
