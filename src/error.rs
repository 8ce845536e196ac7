use std::path::PathBuf;

/// Failures in the Nitro container structures shared by both formats.
#[derive(Debug, thiserror::Error)]
pub enum NitroError {
    #[error("wrong stamp: expected {expected}, found {found}")]
    WrongStamp {
        expected: &'static str,
        found: String,
    },
    #[error("too many sections: found {found}, at most {max} allowed")]
    TooManySections { found: u16, max: u16 },
    #[error("container declares no sections")]
    MissingSection,
    #[error("failed to parse container structures")]
    Parse,
}

#[derive(Debug, thiserror::Error)]
pub enum NsbmdError {
    #[error("invalid container: {0}")]
    Container(#[from] NitroError),
    #[error("failed to parse model header")]
    ParseHeader,
    #[error("failed to parse objects")]
    ParseObjects,
    #[error("failed to parse polygons")]
    ParsePolygons,
    #[error("failed to parse materials")]
    ParseMaterials,
    #[error("failed to parse texture bindings")]
    ParseTextureBindings,
    #[error("failed to parse palette bindings")]
    ParsePaletteBindings,
    #[error("object pivot mode {mode} is out of range")]
    BadPivotMode { mode: u8 },
    #[error("unsupported texture matrix mode {mode} in material {material}")]
    UnsupportedTexMatrixMode { mode: u8, material: usize },
    #[error("material list references material {index} but there are only {count}")]
    BadMaterialIndex { index: usize, count: usize },
    #[error("bone opcode references object {index} but there are only {count}")]
    BadObjectIndex { index: usize, count: usize },
    #[error("bone opcode references polygon {index} but there are only {count}")]
    BadPolygonIndex { index: usize, count: usize },
    #[error("unknown bone opcode 0x{opcode:02x} at offset 0x{offset:x}")]
    UnknownOpcode { opcode: u8, offset: usize },
    #[error("bone opcode at offset 0x{offset:x} runs past the end of the buffer")]
    TruncatedOpcode { offset: usize },
    #[error("material bind at offset 0x{offset:x} before any bone was placed in the stack")]
    BindWithoutBone { offset: usize },
    #[error("draw at offset 0x{offset:x} before any material was bound")]
    DrawWithoutMaterial { offset: usize },
    #[error("matrix stack slot allocation passed the ceiling of {ceiling}")]
    StackSlotCeiling { ceiling: usize },
    #[error("offset 0x{offset:x} is out of bounds (buffer is 0x{len:x} bytes)")]
    OutOfBounds { offset: usize, len: usize },
    #[error("cannot read file `{path}`: {source}")]
    IOError {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum NsbcaError {
    #[error("invalid container: {0}")]
    Container(#[from] NitroError),
    #[error("failed to parse animations")]
    ParseAnimations,
    #[error("failed to parse animation header")]
    ParseHeader,
    #[error("failed to parse bone transforms")]
    ParseTransforms,
    #[error("curve speed bucket {index} is not defined by the format")]
    SpeedBucket { index: u8 },
    #[error("offset 0x{offset:x} is out of bounds (buffer is 0x{len:x} bytes)")]
    OutOfBounds { offset: usize, len: usize },
    #[error("cannot read file `{path}`: {source}")]
    IOError {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}
