use std::{ffi::OsStr, fs::OpenOptions, io::Read, path::Path};

use glam::{Mat4, Vec3};
use nom::{
    bytes::complete::take,
    combinator::map,
    multi::count,
    number::complete::{le_u16, le_u32, le_u8},
    Parser,
};

use crate::{
    bones::interpret_bones,
    error::NsbmdError,
    nitro,
    nom_helpers::{at, q12_i16, q12_i32, IResult},
    types::{
        mat3_from_rows, Material, Model, ModelHeader, Nsbmd, Object, ObjectRotation,
        PaletteBinding, Polygon, TexcoordTransform, TextureBinding, WrapFlags,
    },
};

pub const BMD0_STAMP: &str = "BMD0";
pub const MDL0_STAMP: &str = "MDL0";

impl Nsbmd {
    pub fn open_from_bytes(bytes: &[u8]) -> Result<Nsbmd, NsbmdError> {
        parse_nsbmd(bytes)
    }

    pub fn open_from_file(path: impl AsRef<OsStr> + AsRef<Path>) -> Result<Nsbmd, NsbmdError> {
        let mut file = OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|op| NsbmdError::IOError {
                source: op,
                path: AsRef::<Path>::as_ref(&path).to_path_buf(),
            })?;
        let mut bytes = vec![];

        file.read_to_end(&mut bytes)
            .map_err(|op| NsbmdError::IOError {
                source: op,
                path: AsRef::<Path>::as_ref(&path).to_path_buf(),
            })?;

        Self::open_from_bytes(&bytes)
    }
}

pub fn parse_nsbmd(start: &[u8]) -> Result<Nsbmd, NsbmdError> {
    let container = nitro::parse_container(start, BMD0_STAMP, 2)?;

    let main_off = container.section_offsets[0] as usize;
    let texture_section = container.section_offsets.get(1).map(|&off| off as usize);

    nitro::expect_stamp(start, main_off, MDL0_STAMP)?;

    let mut has_billboards = false;
    let models =
        nitro::read_3d_info::<_, NsbmdError>(start, main_off + 8, |view, off, _base, _index| {
            let (_, rel) = at(view, off, le_u32).map_err(|_| NsbmdError::ParseHeader)?;
            let model = parse_model(view, main_off + rel as usize, &mut has_billboards)?;
            Ok((model, off + 4))
        })?;

    Ok(Nsbmd {
        models,
        texture_section,
        has_billboards,
    })
}

fn parse_model(
    start: &[u8],
    base: usize,
    has_billboards: &mut bool,
) -> Result<Model, NsbmdError> {
    let (_, header) =
        at(start, base, model_header(base)).map_err(|_| NsbmdError::ParseHeader)?;

    let mut objects =
        nitro::read_3d_info::<_, NsbmdError>(start, base + 0x40, |view, off, info_base, _| {
            let (_, rel) = at(view, off, le_u32).map_err(|_| NsbmdError::ParseObjects)?;
            let object = parse_object(view, info_base + rel as usize)?;
            Ok((object, off + 4))
        })?;

    let mut polygons = nitro::read_3d_info::<_, NsbmdError>(
        start,
        header.poly_start_offset,
        |view, off, info_base, _| {
            let (_, rel) = at(view, off, le_u32).map_err(|_| NsbmdError::ParsePolygons)?;
            let polygon = parse_polygon(view, info_base + rel as usize)?;
            Ok((polygon, off + 4))
        },
    )?;

    // material records are addressed relative to the materials block, not to
    // the info list that follows its two binding-table offsets
    let materials_offset = header.materials_offset;
    let mut materials = nitro::read_3d_info::<_, NsbmdError>(
        start,
        materials_offset + 4,
        |view, off, _base, index| {
            let (_, rel) = at(view, off, le_u32).map_err(|_| NsbmdError::ParseMaterials)?;
            let material = parse_material(view, materials_offset + rel as usize, index)?;
            Ok((material, off + 4))
        },
    )?;

    let (_, tex_list_rel) =
        at(start, materials_offset, le_u16).map_err(|_| NsbmdError::ParseTextureBindings)?;
    let (_, pal_list_rel) = at(start, materials_offset + 2, le_u16)
        .map_err(|_| NsbmdError::ParsePaletteBindings)?;

    let textures = nitro::read_3d_info::<_, NsbmdError>(
        start,
        materials_offset + tex_list_rel as usize,
        |view, off, _base, _| {
            let (_, materials) = parse_binding(view, off, materials_offset)
                .map_err(|_| NsbmdError::ParseTextureBindings)?;
            Ok((TextureBinding { materials }, off + 4))
        },
    )?;
    let palettes = nitro::read_3d_info::<_, NsbmdError>(
        start,
        materials_offset + pal_list_rel as usize,
        |view, off, _base, _| {
            let (_, materials) = parse_binding(view, off, materials_offset)
                .map_err(|_| NsbmdError::ParsePaletteBindings)?;
            Ok((PaletteBinding { materials }, off + 4))
        },
    )?;

    // cross-link texture and palette names onto the materials they feed
    for (index, binding) in textures.entries.iter().enumerate() {
        for &mat in &binding.materials {
            let material = material_mut(&mut materials.entries, mat)?;
            material.texture = Some(index);
            material.texture_name = textures.names.get(index).cloned();
        }
    }
    for (index, binding) in palettes.entries.iter().enumerate() {
        for &mat in &binding.materials {
            let material = material_mut(&mut materials.entries, mat)?;
            material.palette = Some(index);
            material.palette_name = palettes.names.get(index).cloned();
        }
    }

    let program = interpret_bones(
        start,
        header.bones_offset,
        header.materials_offset,
        &mut objects.entries,
        &mut polygons.entries,
        header.max_stack,
    )?;

    if objects
        .entries
        .iter()
        .any(|object| object.billboard_mode != crate::types::BillboardMode::None)
    {
        *has_billboards = true;
    }

    Ok(Model {
        header,
        objects,
        polygons,
        materials,
        textures,
        palettes,
        commands: program.commands,
        warnings: program.warnings,
    })
}

fn material_mut(materials: &mut [Material], index: u8) -> Result<&mut Material, NsbmdError> {
    let count = materials.len();
    materials
        .get_mut(index as usize)
        .ok_or(NsbmdError::BadMaterialIndex {
            index: index as usize,
            count,
        })
}

/// Fixed 0x38-byte model header; the section offsets are stored relative to
/// the model base and absolutized here.
fn model_header(base: usize) -> impl FnMut(&[u8]) -> IResult<ModelHeader> {
    move |i| {
        map(
            (
                (le_u32, le_u32, le_u32, le_u32, le_u32),
                (take(3usize), le_u8, le_u8, le_u8, le_u8, le_u8),
                (q12_i32, q12_i32),
                (le_u16, le_u16, le_u16, le_u16),
                count(q12_i16, 6),
            ),
            |(
                (block_size, bones, materials, poly_start, poly_end),
                (_unknown, num_objects, num_materials, num_polys, max_stack, _pad),
                (scale, down_scale),
                (num_verts, num_surfaces, num_triangles, num_quads),
                bbox,
            )| ModelHeader {
                block_size,
                bones_offset: base + bones as usize,
                materials_offset: base + materials as usize,
                poly_start_offset: base + poly_start as usize,
                poly_end_offset: base + poly_end as usize,
                num_objects,
                num_materials,
                num_polys,
                max_stack,
                scale,
                down_scale,
                num_verts,
                num_surfaces,
                num_triangles,
                num_quads,
                bbox_x: bbox[0],
                bbox_y: bbox[1],
                bbox_z: bbox[2],
                bbox_width: bbox[3],
                bbox_height: bbox[4],
                bbox_depth: bbox[5],
            },
        )
        .parse(i)
    }
}

/// Per-bone transform record. The flag word (`nnnn.psrt` layout) selects
/// which of translation, pivot or full rotation, and scale are stored; the
/// cursor advances by exactly what each present field consumes.
fn parse_object(start: &[u8], record: usize) -> Result<Object, NsbmdError> {
    let oob = |_| NsbmdError::ParseObjects;

    let (_, flag) = at(start, record, le_u16).map_err(oob)?;
    // first term of the full rotation matrix, stored ahead of the branches
    let (_, rot_term1) = at(start, record + 2, q12_i16).map_err(oob)?;

    let mut offset = record;

    let translate = if flag & 1 == 0 {
        let (_, axes) = at(start, offset + 4, count(q12_i32, 3)).map_err(oob)?;
        offset += 0xC;
        Vec3::from_slice(&axes)
    } else {
        Vec3::ZERO
    };

    let pivot = if flag & 8 != 0 {
        let mode = ((flag >> 4) & 15) as u8;
        let neg = ((flag >> 8) & 15) as u8;
        let (_, (a, b)) = at(start, offset + 4, (q12_i16, q12_i16)).map_err(oob)?;
        offset += 4;

        if mode > 8 {
            return Err(NsbmdError::BadPivotMode { mode });
        }

        Some(ObjectRotation::Pivot {
            a,
            b,
            mode,
            neg,
            matrix: pivot_matrix(mode, neg, a, b),
        })
    } else {
        None
    };

    let scale = if flag & 4 == 0 {
        let (_, axes) = at(start, offset + 4, count(q12_i32, 3)).map_err(oob)?;
        offset += 0xC;
        Vec3::from_slice(&axes)
    } else {
        Vec3::ONE
    };

    let rotation = match pivot {
        Some(rotation) => rotation,
        None if flag & 2 == 0 => {
            // full matrix: rot_term1 plus eight more Q12 terms, row-major
            let (_, rest) = at(start, offset + 4, count(q12_i16, 8)).map_err(oob)?;
            ObjectRotation::Full(mat3_from_rows(
                Vec3::new(rot_term1, rest[0], rest[1]),
                Vec3::new(rest[2], rest[3], rest[4]),
                Vec3::new(rest[5], rest[6], rest[7]),
            ))
        }
        None => ObjectRotation::Identity,
    };

    let local = Mat4::from_translation(translate)
        * Mat4::from_mat3(rotation.matrix())
        * Mat4::from_scale(scale);

    Ok(Object {
        flag,
        visible: true,
        parent: None,
        billboard_mode: Default::default(),
        translate,
        rotation,
        scale,
        local,
    })
}

/// Builds the constrained two-parameter rotation: a +/-1 pinned at the cell
/// picked by `mode` (flat row-major index), with `a` and `b` mirrored into
/// the four off-diagonal cells of the remaining quadrant.
fn pivot_matrix(mode: u8, neg: u8, a: f32, b: f32) -> glam::Mat3 {
    let mut m = [0.0f32; 9];
    let mode = mode as usize;

    m[mode] = if neg & 1 != 0 { -1.0 } else { 1.0 };

    let horiz = mode % 3;
    let vert = mode / 3;
    let left = usize::from(horiz == 0);
    let top = 3 * usize::from(vert == 0);
    let right = if horiz == 2 { 1 } else { 2 };
    let btm = 3 * if vert == 2 { 1 } else { 2 };

    m[left + top] = a;
    m[right + top] = b;
    m[left + btm] = if neg & 2 != 0 { -b } else { b };
    m[right + btm] = if neg & 4 != 0 { -a } else { a };

    mat3_from_rows(
        Vec3::new(m[0], m[1], m[2]),
        Vec3::new(m[3], m[4], m[5]),
        Vec3::new(m[6], m[7], m[8]),
    )
}

/// Polygon record: locates the display list and lifts it out untouched.
fn parse_polygon(start: &[u8], record: usize) -> Result<Polygon, NsbmdError> {
    let oob = |_| NsbmdError::ParsePolygons;

    let (_, dl_rel) = at(start, record + 8, le_u32).map_err(oob)?;
    let (_, dl_len) = at(start, record + 0xC, le_u32).map_err(oob)?;

    let dl_start = record + dl_rel as usize;
    let (_, display_list) = at(start, dl_start, take(dl_len as usize)).map_err(oob)?;

    Ok(Polygon {
        display_list: display_list.to_vec(),
        display_list_offset: dl_start,
        material: None,
        stack_slot: None,
    })
}

fn parse_material(start: &[u8], record: usize, index: usize) -> Result<Material, NsbmdError> {
    let oob = |_| NsbmdError::ParseMaterials;

    let (_, poly_attrib) = at(start, record + 12, le_u32).map_err(oob)?;
    let (_, flags) = at(start, record + 22, le_u16).map_err(oob)?;

    // texture scaling payload starts at +44
    let texcoord = match (flags >> 14) & 3 {
        0 => TexcoordTransform::Identity,
        1 => {
            let (_, (s, t)) = at(start, record + 44, (q12_i32, q12_i32)).map_err(oob)?;
            TexcoordTransform::Scale { s, t }
        }
        mode => {
            return Err(NsbmdError::UnsupportedTexMatrixMode {
                mode: mode as u8,
                material: index,
            })
        }
    };

    let alpha_raw = (poly_attrib >> 16) & 31;

    Ok(Material {
        poly_attrib,
        flags,
        width: 8 << ((flags >> 4) & 7),
        height: 8 << ((flags >> 7) & 7),
        wrap: WrapFlags::from_bits_truncate(flags & 0xF),
        texcoord,
        cull_mode: ((poly_attrib >> 6) & 3) as u8,
        // a raw zero encodes opaque
        alpha: if alpha_raw == 0 {
            1.0
        } else {
            alpha_raw as f32 / 31.0
        },
        texture: None,
        palette: None,
        texture_name: None,
        palette_name: None,
    })
}

/// Texture/palette binding record: an offset to a byte array of material
/// indices plus its length.
fn parse_binding(start: &[u8], record: usize, materials_offset: usize) -> IResult<Vec<u8>> {
    let (_, list_rel) = at(start, record, le_u16)?;
    let (_, num) = at(start, record + 2, le_u8)?;
    let (i, list) = at(start, materials_offset + list_rel as usize, take(num as usize))?;

    Ok((i, list.to_vec()))
}
