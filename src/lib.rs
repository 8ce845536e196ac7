//! Decoders for the Nitro binary model (`BMD0`/`MDL0`) and bone animation
//! (`BCA0`/`JNT0`) containers.
//!
//! Both readers take the whole file as a byte slice and decode it in one
//! pass into owned plain data. Display lists are lifted out verbatim;
//! texture pixel data and rendering are out of scope.
pub mod error;

mod animation;
mod bones;
#[cfg(test)]
mod fixture;
mod nitro;
mod nom_helpers;
mod parser;
mod types;

pub use animation::{
    parse_nsbca, AnimatedBone, Animation, Channel, CurveInfo, Nsbca, RotationSample, ScalePair,
    BCA0_STAMP, JNT0_STAMP,
};
pub use bones::MAX_STACK_SLOTS;
pub use nitro::{Info3d, NITRO_NAME_LENGTH};
pub use nom_helpers::Q12_ONE;
pub use parser::{parse_nsbmd, BMD0_STAMP, MDL0_STAMP};
pub use types::*;
