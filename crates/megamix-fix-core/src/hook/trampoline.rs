//! Code generation for mid-function hooks.
//!
//! Everything in here is pure byte manipulation so it can be exercised on any
//! host. The installer feeds it the live code bytes and the address of a freshly
//! allocated executable page.

use iced_x86::code_asm::*;
use iced_x86::{Code, Decoder, DecoderOptions, IcedError, Instruction};

use crate::error::{Error, Result};
use crate::hook::registers::XMM_AREA_SIZE;

/// Length of the `jmp rel32` written over a hook site
pub const JUMP_PATCH_LEN: usize = 5;

/// Longest x86-64 instruction; reads of the hook site are sized for this
pub const MAX_INSTRUCTION_LEN: usize = 15;

const SAVED_GPRS: [AsmRegister64; 15] = [
    rax, rbx, rcx, rdx, rsi, rdi, rbp, r8, r9, r10, r11, r12, r13, r14, r15,
];

const SAVED_XMMS: [AsmRegisterXmm; 16] = [
    xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8, xmm9, xmm10, xmm11, xmm12, xmm13,
    xmm14, xmm15,
];

/// Whole instructions starting at `ip` that cover at least `min_len` bytes.
///
/// Fails if the bytes run out or an undecodable instruction is hit before
/// enough bytes are covered.
pub fn displaced_instructions(code: &[u8], ip: u64, min_len: usize) -> Result<Vec<Instruction>> {
    let mut decoder = Decoder::with_ip(64, code, ip, DecoderOptions::NONE);
    let mut instructions = Vec::new();
    let mut covered = 0;

    while covered < min_len {
        if !decoder.can_decode() {
            return Err(Error::hook_failed(
                ip,
                format!("Ran out of code after {} of {} bytes", covered, min_len),
            ));
        }

        let instruction = decoder.decode();
        if instruction.code() == Code::INVALID {
            return Err(Error::hook_failed(
                ip,
                format!("Undecodable instruction at {:#x}", instruction.ip()),
            ));
        }

        covered += instruction.len();
        instructions.push(instruction);
    }

    Ok(instructions)
}

/// Total byte length of a run of decoded instructions
pub fn displaced_len(instructions: &[Instruction]) -> usize {
    instructions.iter().map(Instruction::len).sum()
}

/// Assemble the trampoline placed at `trampoline_ip`.
///
/// Layout: save RFLAGS, the general-purpose registers and XMM0-15, call
/// `dispatch(registers, context)` on an aligned stack with shadow space,
/// restore everything, run the relocated displaced instructions and jump back
/// to the first byte after them.
pub fn build_trampoline(
    trampoline_ip: u64,
    dispatch: u64,
    context: u64,
    displaced: &[Instruction],
) -> Result<Vec<u8>> {
    let asm_err = |e: IcedError| Error::hook_failed(trampoline_ip, e.to_string());

    let first = displaced
        .first()
        .ok_or_else(|| Error::hook_failed(trampoline_ip, "No displaced instructions"))?;
    let resume = first.ip() + displaced_len(displaced) as u64;

    let mut a = CodeAssembler::new(64).map_err(asm_err)?;

    a.pushfq().map_err(asm_err)?;
    for reg in SAVED_GPRS {
        a.push(reg).map_err(asm_err)?;
    }
    a.sub(rsp, XMM_AREA_SIZE as i32).map_err(asm_err)?;
    for (i, reg) in SAVED_XMMS.into_iter().enumerate() {
        a.movdqu(xmmword_ptr(rsp + (i * 16) as i32), reg)
            .map_err(asm_err)?;
    }

    // rbx is non-volatile, so it carries the unaligned stack pointer across the call
    a.mov(rcx, rsp).map_err(asm_err)?;
    a.mov(rdx, context).map_err(asm_err)?;
    a.mov(rbx, rsp).map_err(asm_err)?;
    a.and(rsp, -16).map_err(asm_err)?;
    a.sub(rsp, 0x20).map_err(asm_err)?;
    a.mov(rax, dispatch).map_err(asm_err)?;
    a.call(rax).map_err(asm_err)?;
    a.mov(rsp, rbx).map_err(asm_err)?;

    for (i, reg) in SAVED_XMMS.into_iter().enumerate() {
        a.movdqu(reg, xmmword_ptr(rsp + (i * 16) as i32))
            .map_err(asm_err)?;
    }
    a.add(rsp, XMM_AREA_SIZE as i32).map_err(asm_err)?;
    for reg in SAVED_GPRS.into_iter().rev() {
        a.pop(reg).map_err(asm_err)?;
    }
    a.popfq().map_err(asm_err)?;

    for instruction in displaced {
        a.add_instruction(*instruction).map_err(asm_err)?;
    }
    a.jmp(resume).map_err(asm_err)?;

    a.assemble(trampoline_ip).map_err(asm_err)
}

/// `jmp rel32` from `from` to `to`, NOP-padded to `len` bytes
pub fn jump_patch(from: u64, to: u64, len: usize) -> Result<Vec<u8>> {
    if len < JUMP_PATCH_LEN {
        return Err(Error::hook_failed(
            from,
            format!("Patch of {} bytes cannot hold a jump", len),
        ));
    }

    let displacement = to as i64 - (from as i64 + JUMP_PATCH_LEN as i64);
    let displacement = i32::try_from(displacement).map_err(|_| {
        Error::hook_failed(from, format!("Jump target {:#x} is out of rel32 range", to))
    })?;

    let mut bytes = Vec::with_capacity(len);
    bytes.push(0xE9);
    bytes.extend_from_slice(&displacement.to_le_bytes());
    bytes.resize(len, 0x90);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use iced_x86::{Mnemonic, Register};

    const SITE: u64 = 0x1_4000_1000;
    const TRAMPOLINE: u64 = 0x1_4010_0000;

    fn decode_all(code: &[u8], ip: u64) -> Vec<Instruction> {
        Decoder::with_ip(64, code, ip, DecoderOptions::NONE)
            .into_iter()
            .collect()
    }

    #[test]
    fn test_displaced_covers_whole_instructions() {
        // push rbp; mov rbp, rsp; sub rsp, 0x20; ret
        let code = [0x55, 0x48, 0x89, 0xE5, 0x48, 0x83, 0xEC, 0x20, 0xC3];
        let displaced = displaced_instructions(&code, SITE, JUMP_PATCH_LEN).unwrap();

        assert_eq!(displaced.len(), 3);
        assert_eq!(displaced_len(&displaced), 8);
        assert_eq!(displaced[2].mnemonic(), Mnemonic::Sub);
    }

    #[test]
    fn test_displaced_rejects_invalid_and_short_code() {
        // 0x06 (push es) does not exist in 64-bit mode
        assert!(displaced_instructions(&[0x06, 0x90, 0x90, 0x90, 0x90], SITE, 5).is_err());
        assert!(displaced_instructions(&[0x90, 0x90], SITE, 5).is_err());
    }

    #[test]
    fn test_trampoline_relocates_rip_relative_operand() {
        // lea rcx, [rip+0x10]; nop
        let code = [0x48, 0x8D, 0x0D, 0x10, 0x00, 0x00, 0x00, 0x90];
        let displaced = displaced_instructions(&code, SITE, JUMP_PATCH_LEN).unwrap();
        assert_eq!(displaced_len(&displaced), 7);

        let bytes = build_trampoline(TRAMPOLINE, 0x7FF0_0000_1000, 0xABCD, &displaced).unwrap();
        let decoded = decode_all(&bytes, TRAMPOLINE);

        let lea = decoded
            .iter()
            .find(|i| i.mnemonic() == Mnemonic::Lea)
            .expect("relocated lea");
        assert_eq!(lea.op0_register(), Register::RCX);
        assert_eq!(lea.ip_rel_memory_address(), SITE + 7 + 0x10);

        let last = decoded.last().unwrap();
        assert_eq!(last.mnemonic(), Mnemonic::Jmp);
        assert_eq!(last.near_branch_target(), SITE + 7);
    }

    #[test]
    fn test_trampoline_saves_and_restores_state() {
        let code = [0x48, 0x8B, 0xC1, 0x48, 0x8B, 0xD0]; // mov rax, rcx; mov rdx, rax
        let displaced = displaced_instructions(&code, SITE, JUMP_PATCH_LEN).unwrap();

        let bytes = build_trampoline(TRAMPOLINE, 0x7FF0_0000_1000, 0xABCD, &displaced).unwrap();
        let decoded = decode_all(&bytes, TRAMPOLINE);
        let mnemonics: Vec<Mnemonic> = decoded.iter().map(Instruction::mnemonic).collect();

        assert_eq!(mnemonics[0], Mnemonic::Pushfq);
        assert_eq!(
            mnemonics.iter().filter(|m| **m == Mnemonic::Push).count(),
            SAVED_GPRS.len()
        );
        assert_eq!(
            mnemonics.iter().filter(|m| **m == Mnemonic::Pop).count(),
            SAVED_GPRS.len()
        );
        assert_eq!(
            mnemonics.iter().filter(|m| **m == Mnemonic::Movdqu).count(),
            32
        );
        assert_eq!(
            mnemonics.iter().filter(|m| **m == Mnemonic::Call).count(),
            1
        );
        assert!(mnemonics.contains(&Mnemonic::Popfq));

        // The handler context is loaded into rdx as an immediate
        assert!(decoded.iter().any(|i| i.mnemonic() == Mnemonic::Mov
            && i.op0_register() == Register::RDX
            && i.immediate64() == 0xABCD));
    }

    #[test]
    fn test_trampoline_requires_instructions() {
        assert!(build_trampoline(TRAMPOLINE, 0x1000, 0, &[]).is_err());
    }

    #[test]
    fn test_jump_patch_encoding() {
        let bytes = jump_patch(0x1000, 0x2000, 7).unwrap();
        assert_eq!(bytes, vec![0xE9, 0xFB, 0x0F, 0x00, 0x00, 0x90, 0x90]);

        let backward = jump_patch(0x2000, 0x1000, 5).unwrap();
        let rel = i32::from_le_bytes([backward[1], backward[2], backward[3], backward[4]]);
        assert_eq!(rel, 0x1000 - 0x2005);
    }

    #[test]
    fn test_jump_patch_rejects_out_of_range() {
        assert!(jump_patch(0x1000, 0x1_0000_2000, 5).is_err());
        assert!(jump_patch(0x1000, 0x2000, 4).is_err());
    }
}
