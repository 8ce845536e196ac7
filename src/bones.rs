//! Bone bytecode interpreter. Executes the opcode stream between the bone
//! and material sections, producing the ordered bind/copy command list and
//! assigning matrix stack slots, parents, visibility and billboard modes to
//! the already-decoded objects and polygons.

use nom::number::complete::le_u8;

use crate::{
    error::NsbmdError,
    nom_helpers::at,
    types::{BillboardMode, Command, DecodeWarning, Object, Polygon},
};

/// Slots past the declared stack depth are allocated on demand; the format
/// gives no upper bound for them, so growth stops here.
pub const MAX_STACK_SLOTS: usize = 256;

pub(crate) struct BoneProgram {
    pub commands: Vec<Command>,
    pub warnings: Vec<DecodeWarning>,
}

/// Scratch state owned by one interpreter run and discarded with it.
struct Interp {
    /// Next overflow slot; slots below the declared stack depth are the
    /// stack proper.
    free_slot: usize,
    /// Slots that a polygon has been bound to.
    bound: [bool; MAX_STACK_SLOTS],
    /// Pending 0x03 override, consumed by the next material bind.
    force_id: Option<usize>,
    /// Slot of the most recent bind command.
    last_bind_slot: Option<usize>,
    /// Material of the most recent explicit material bind, reused by 0x05.
    last_material: Option<u8>,
}

impl Interp {
    fn alloc_slot(&mut self) -> Result<usize, NsbmdError> {
        if self.free_slot >= MAX_STACK_SLOTS {
            return Err(NsbmdError::StackSlotCeiling {
                ceiling: MAX_STACK_SLOTS,
            });
        }

        let slot = self.free_slot;
        self.free_slot += 1;
        Ok(slot)
    }

    /// Clears `stack_slot` for an incoming bind. When the slot still feeds
    /// previously processed polygons, its old matrix is parked in a fresh
    /// slot and those polygons are retargeted there, so the bind never
    /// silently overwrites a bound matrix.
    fn release_slot(
        &mut self,
        polygons: &mut [Polygon],
        stack_slot: usize,
        commands: &mut Vec<Command>,
    ) -> Result<(), NsbmdError> {
        if !self.bound[stack_slot] {
            return Ok(());
        }

        let mut dest = self.alloc_slot()?;
        while self.bound[dest] {
            dest = self.alloc_slot()?;
        }

        for polygon in polygons.iter_mut() {
            if polygon.stack_slot == Some(stack_slot) {
                polygon.stack_slot = Some(dest);
            }
        }
        self.bound[dest] = true;
        self.bound[stack_slot] = false;
        commands.push(Command::CopySlot {
            from: stack_slot,
            to: dest,
        });
        Ok(())
    }

    fn bind_polygon(
        &mut self,
        polygons: &mut [Polygon],
        poly: u8,
        material: u8,
        offset: usize,
    ) -> Result<(), NsbmdError> {
        let slot = self
            .force_id
            .take()
            .or(self.last_bind_slot)
            .ok_or(NsbmdError::BindWithoutBone { offset })?;
        self.bound[slot] = true;

        let polygon = polygon_mut(polygons, poly)?;
        polygon.stack_slot = Some(slot);
        polygon.material = Some(material);
        Ok(())
    }
}

fn object_mut(objects: &mut [Object], index: u8) -> Result<&mut Object, NsbmdError> {
    let count = objects.len();
    objects
        .get_mut(index as usize)
        .ok_or(NsbmdError::BadObjectIndex {
            index: index as usize,
            count,
        })
}

fn polygon_mut(polygons: &mut [Polygon], index: u8) -> Result<&mut Polygon, NsbmdError> {
    let count = polygons.len();
    polygons
        .get_mut(index as usize)
        .ok_or(NsbmdError::BadPolygonIndex {
            index: index as usize,
            count,
        })
}

fn operand(start: &[u8], offset: &mut usize) -> Result<u8, NsbmdError> {
    let (_, v) = at(start, *offset, le_u8).map_err(|_| NsbmdError::TruncatedOpcode {
        offset: *offset,
    })?;
    *offset += 1;
    Ok(v)
}

pub(crate) fn interpret_bones(
    start: &[u8],
    bones_offset: usize,
    materials_offset: usize,
    objects: &mut [Object],
    polygons: &mut [Polygon],
    max_stack: u8,
) -> Result<BoneProgram, NsbmdError> {
    let mut offset = bones_offset;
    let mut state = Interp {
        free_slot: max_stack as usize,
        bound: [false; MAX_STACK_SLOTS],
        force_id: None,
        last_bind_slot: None,
        last_material: None,
    };
    let mut commands = Vec::new();
    let mut warnings = Vec::new();

    // bounded by the material section, so always terminates
    while offset < materials_offset {
        let op_offset = offset;
        let opcode = operand(start, &mut offset)?;

        match opcode {
            // no-op / end-of-stream marker
            0x00 | 0x01 => {}
            0x02 => {
                let node = operand(start, &mut offset)?;
                let vis = operand(start, &mut offset)?;
                object_mut(objects, node)?.visible = vis != 0;
            }
            0x03 => {
                let id = operand(start, &mut offset)?;
                state.force_id = Some(id as usize);
            }
            // bind material to polygon at the current bind target
            0x04 | 0x24 | 0x44 => {
                let material = operand(start, &mut offset)?;
                let _reserved = operand(start, &mut offset)?;
                let poly = operand(start, &mut offset)?;
                state.last_material = Some(material);
                state.bind_polygon(polygons, poly, material, op_offset)?;
            }
            // draw: same binding, reusing the last bound material
            0x05 => {
                let poly = operand(start, &mut offset)?;
                let material = state
                    .last_material
                    .ok_or(NsbmdError::DrawWithoutMaterial { offset: op_offset })?;
                state.bind_polygon(polygons, poly, material, op_offset)?;
            }
            // bind object to parent without an explicit stack id
            0x06 => {
                let object = operand(start, &mut offset)?;
                let parent = operand(start, &mut offset)?;
                let _reserved = operand(start, &mut offset)?;

                object_mut(objects, object)?.parent = Some(parent);

                let stack_slot = state.alloc_slot()?;
                state.release_slot(polygons, stack_slot, &mut commands)?;
                state.last_bind_slot = Some(stack_slot);
                commands.push(Command::Bind {
                    object,
                    parent,
                    stack_slot,
                    restore_slot: None,
                });
            }
            // bind object to parent at an explicit stack id
            0x26 | 0x46 | 0x66 => {
                let object = operand(start, &mut offset)?;
                let parent = operand(start, &mut offset)?;
                let _reserved = operand(start, &mut offset)?;
                let id = operand(start, &mut offset)? as usize;

                let (stack_slot, restore_slot) = match opcode {
                    // the id operand is a restore id; the actual target is a
                    // fresh overflow slot
                    0x46 => (state.alloc_slot()?, Some(id)),
                    0x66 => {
                        let restore = operand(start, &mut offset)? as usize;
                        (id, Some(restore))
                    }
                    _ => (id, None),
                };

                object_mut(objects, object)?.parent = Some(parent);

                state.release_slot(polygons, stack_slot, &mut commands)?;
                state.last_bind_slot = Some(stack_slot);
                commands.push(Command::Bind {
                    object,
                    parent,
                    stack_slot,
                    restore_slot,
                });
            }
            0x07 => {
                let object = operand(start, &mut offset)?;
                object_mut(objects, object)?.billboard_mode = BillboardMode::Full;
            }
            0x08 => {
                let object = operand(start, &mut offset)?;
                object_mut(objects, object)?.billboard_mode = BillboardMode::YAxis;
            }
            // skinning equation, unimplemented
            0x09 => warnings.push(DecodeWarning::SkinningEquation { offset: op_offset }),
            // pairing-region markers, structural only
            0x0B | 0x2B => {}
            opcode => {
                return Err(NsbmdError::UnknownOpcode {
                    opcode,
                    offset: op_offset,
                })
            }
        }
    }

    Ok(BoneProgram { commands, warnings })
}
