//! Register snapshot handed to intercept handlers

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// One 128-bit XMM register
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Xmm([u8; 16]);

impl Xmm {
    pub fn from_f32s(lanes: [f32; 4]) -> Self {
        let mut bytes = [0u8; 16];
        for (chunk, lane) in bytes.chunks_exact_mut(4).zip(lanes) {
            chunk.copy_from_slice(&lane.to_le_bytes());
        }
        Self(bytes)
    }

    /// Read single-precision lane `lane` (0..4)
    pub fn f32(&self, lane: usize) -> f32 {
        let start = lane * 4;
        f32::from_le_bytes([
            self.0[start],
            self.0[start + 1],
            self.0[start + 2],
            self.0[start + 3],
        ])
    }

    pub fn set_f32(&mut self, lane: usize, value: f32) {
        let start = lane * 4;
        self.0[start..start + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// CPU state saved by the trampoline, lowest address first.
///
/// The layout mirrors the push order of the trampoline prologue: the XMM
/// block sits at the stack pointer, followed by the general-purpose registers
/// in reverse push order and RFLAGS last. Changes made by a handler are
/// loaded back into the CPU before the displaced code runs.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct Registers {
    pub xmm: [Xmm; 16],
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub rflags: u64,
}

/// Size of the XMM save area below the general-purpose registers
pub const XMM_AREA_SIZE: usize = 16 * 16;

/// General-purpose registers a handler may address by name
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Gpr {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl Registers {
    pub fn gpr(&self, reg: Gpr) -> u64 {
        match reg {
            Gpr::Rax => self.rax,
            Gpr::Rbx => self.rbx,
            Gpr::Rcx => self.rcx,
            Gpr::Rdx => self.rdx,
            Gpr::Rsi => self.rsi,
            Gpr::Rdi => self.rdi,
            Gpr::Rbp => self.rbp,
            Gpr::R8 => self.r8,
            Gpr::R9 => self.r9,
            Gpr::R10 => self.r10,
            Gpr::R11 => self.r11,
            Gpr::R12 => self.r12,
            Gpr::R13 => self.r13,
            Gpr::R14 => self.r14,
            Gpr::R15 => self.r15,
        }
    }

    pub fn set_gpr(&mut self, reg: Gpr, value: u64) {
        let slot = match reg {
            Gpr::Rax => &mut self.rax,
            Gpr::Rbx => &mut self.rbx,
            Gpr::Rcx => &mut self.rcx,
            Gpr::Rdx => &mut self.rdx,
            Gpr::Rsi => &mut self.rsi,
            Gpr::Rdi => &mut self.rdi,
            Gpr::Rbp => &mut self.rbp,
            Gpr::R8 => &mut self.r8,
            Gpr::R9 => &mut self.r9,
            Gpr::R10 => &mut self.r10,
            Gpr::R11 => &mut self.r11,
            Gpr::R12 => &mut self.r12,
            Gpr::R13 => &mut self.r13,
            Gpr::R14 => &mut self.r14,
            Gpr::R15 => &mut self.r15,
        };
        *slot = value;
    }
}
