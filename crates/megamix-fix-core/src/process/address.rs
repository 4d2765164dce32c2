//! Operand address resolution for matched instructions

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::process::ReadMemory;

/// How an instruction operand encodes the address it references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperandKind {
    /// 32-bit displacement relative to the end of the operand
    #[default]
    RipRelative,
    /// 64-bit absolute address embedded in the instruction
    Absolute,
}

/// Resolve the address referenced by the operand at `instruction + operand_offset`.
///
/// The instruction address must come from a successful scan; nothing beyond
/// page protection guards the read.
pub fn resolve<R: ReadMemory>(
    reader: &R,
    instruction: u64,
    operand_offset: usize,
    kind: OperandKind,
) -> Result<u64> {
    let operand = instruction + operand_offset as u64;
    match kind {
        OperandKind::RipRelative => {
            let displacement = reader.read_i32(operand)?;
            Ok((operand + 4).wrapping_add_signed(displacement as i64))
        }
        OperandKind::Absolute => reader.read_u64(operand),
    }
}
