//! EJTAG Processor Access engine.
//!
//! In debug mode the core executes its handler out of dmseg, and every
//! fetch, load or store that lands there stalls the pipeline until the
//! probe services it. [`exec`] is that service loop: it feeds code words,
//! supplies input parameters, absorbs output parameters and simulates the
//! register-save stack, until the target fetches the debug vector a second
//! time (one full pass through the handler).
//!
//! The MIPS32 pipeline executes the instruction after a branch (one delay
//! slot) before the branch takes effect. The snippets below place their
//! NOPs and loop-carried instructions accordingly; they are wire-
//! compatible with known-working handlers and must not be "cleaned up".

use super::ejtag::{
    EjtagError, MipsEjtag, EJTAG_INST_ADDRESS, EJTAG_INST_DATA,
};
use super::instructions::*;
use crate::core::AccessSize;

/// Debug vector: all handler code is fetched from here.
pub const PRACC_TEXT: u32 = 0xFF20_0200;
/// Probe-simulated register-save stack. Not target memory: the pointer
/// never moves, reads and writes pop/push the probe-side buffer.
pub const PRACC_STACK: u32 = 0xFF20_4000;
/// Input parameter window.
pub const PRACC_PARAM_IN: u32 = 0xFF20_2000;
/// Output parameter window.
pub const PRACC_PARAM_OUT: u32 = 0xFF20_2800;

/// Depth of the probe-side register-save stack.
const STACK_DEPTH: usize = 32;

/// Largest block moved per handler pass by the 32-bit loops.
const BLOCK_WORDS: usize = 0x400;

struct PraccContext<'a> {
    param_in: &'a mut [u32],
    param_out: &'a mut [u32],
    code: &'a [u32],
    stack: [u32; STACK_DEPTH],
    stack_offset: usize,
}

impl PraccContext<'_> {
    /// Resolve the word to feed a processor read at `address`.
    fn resolve_read(&mut self, address: u32) -> Result<u32, EjtagError> {
        if let Some(offset) = word_offset(address, PRACC_PARAM_IN, self.param_in.len()) {
            Ok(self.param_in[offset])
        } else if let Some(offset) = word_offset(address, PRACC_PARAM_OUT, self.param_out.len()) {
            Ok(self.param_out[offset])
        } else if let Some(offset) = word_offset(address, PRACC_TEXT, self.code.len()) {
            Ok(self.code[offset])
        } else if address == PRACC_STACK {
            if self.stack_offset == 0 {
                return Err(EjtagError::StackUnderflow);
            }
            self.stack_offset -= 1;
            Ok(self.stack[self.stack_offset])
        } else {
            tracing::error!("error reading unexpected address {:#010x}", address);
            Err(EjtagError::UnexpectedAddress(address))
        }
    }

    /// Absorb a processor write of `data` at `address`.
    fn dispatch_write(&mut self, address: u32, data: u32) -> Result<(), EjtagError> {
        if let Some(offset) = word_offset(address, PRACC_PARAM_IN, self.param_in.len()) {
            self.param_in[offset] = data;
        } else if let Some(offset) = word_offset(address, PRACC_PARAM_OUT, self.param_out.len()) {
            self.param_out[offset] = data;
        } else if address == PRACC_STACK {
            if self.stack_offset >= STACK_DEPTH {
                return Err(EjtagError::StackOverflow);
            }
            self.stack[self.stack_offset] = data;
            self.stack_offset += 1;
        } else {
            tracing::error!("error writing unexpected address {:#010x}", address);
            return Err(EjtagError::UnexpectedAddress(address));
        }
        Ok(())
    }
}

fn word_offset(address: u32, base: u32, len: usize) -> Option<usize> {
    if address < base {
        return None;
    }
    let offset = ((address - base) / 4) as usize;
    (offset < len).then_some(offset)
}

fn wait_for_pracc(ejtag: &mut MipsEjtag) -> Result<super::ejtag::EjtagCtrl, EjtagError> {
    let base = ejtag.ejtag_ctrl;
    let ctrl = ejtag.control_scan(base)?;
    if !ctrl.pracc() {
        tracing::debug!("no processor memory access in progress");
        return Err(EjtagError::PrAccNotPending);
    }
    Ok(ctrl)
}

/// Let the target consume the serviced access: drop PrAcc, then give it a
/// few clocks to advance.
fn finish_access(ejtag: &mut MipsEjtag) -> Result<(), EjtagError> {
    let ack = ejtag.ejtag_ctrl & !(1 << 18);
    ejtag.control_scan(ack)?;
    ejtag.add_clocks(5)?;
    ejtag.execute_queue()
}

/// Run one pass of an injected handler.
///
/// Services the target's dmseg accesses until the debug vector is fetched
/// a second time (with `cycle`) or after a single access (without, used to
/// feed a lone `DERET`). The probe-side stack must balance over the pass.
pub fn exec(
    ejtag: &mut MipsEjtag,
    code: &[u32],
    param_in: &mut [u32],
    param_out: &mut [u32],
    cycle: bool,
) -> Result<(), EjtagError> {
    let mut ctx = PraccContext {
        param_in,
        param_out,
        code,
        stack: [0; STACK_DEPTH],
        stack_offset: 0,
    };
    let mut vector_fetches = 0u32;

    loop {
        let ctrl = wait_for_pracc(ejtag)?;

        ejtag.set_instr(EJTAG_INST_ADDRESS)?;
        let address = ejtag.drscan_32(0)?;

        if ctrl.prnw() {
            // Processor write: pull the word, release the core, dispatch.
            ejtag.set_instr(EJTAG_INST_DATA)?;
            let data = ejtag.drscan_32(0)?;
            finish_access(ejtag)?;
            ctx.dispatch_write(address, data)?;
        } else {
            // The handler branches back to the vector when it is done; the
            // second vector fetch is the exit signal.
            if address == PRACC_TEXT {
                if vector_fetches > 0 {
                    break;
                }
                vector_fetches += 1;
            }

            let data = ctx.resolve_read(address)?;
            ejtag.set_instr(EJTAG_INST_DATA)?;
            ejtag.drscan_32(data)?;
            finish_access(ejtag)?;
        }

        if !cycle {
            break;
        }
    }

    if ctx.stack_offset != 0 {
        tracing::warn!("PrAcc stack not zero on exit");
    }

    Ok(())
}

/// Read a block of memory through the target, element size 1, 2 or 4
/// bytes. Results are packed little endian into `buffer`.
pub fn read_mem(
    ejtag: &mut MipsEjtag,
    address: u32,
    size: AccessSize,
    count: u32,
    buffer: &mut [u8],
) -> Result<(), EjtagError> {
    match size {
        AccessSize::Byte => read_mem8(ejtag, address, count, buffer)?,
        AccessSize::Half => {
            let mut halves = vec![0u16; count as usize];
            read_mem16(ejtag, address, count, &mut halves)?;
            for (chunk, half) in buffer.chunks_exact_mut(2).zip(&halves) {
                chunk.copy_from_slice(&half.to_le_bytes());
            }
        }
        AccessSize::Word => {
            let mut words = vec![0u32; count as usize];
            if count == 1 {
                words[0] = read_u32(ejtag, address)?;
            } else {
                read_mem32(ejtag, address, count, &mut words)?;
            }
            for (chunk, word) in buffer.chunks_exact_mut(4).zip(&words) {
                chunk.copy_from_slice(&word.to_le_bytes());
            }
        }
    }
    Ok(())
}

/// Write a block of memory through the target; `buffer` is little endian.
pub fn write_mem(
    ejtag: &mut MipsEjtag,
    address: u32,
    size: AccessSize,
    count: u32,
    buffer: &[u8],
) -> Result<(), EjtagError> {
    match size {
        AccessSize::Byte => write_mem8(ejtag, address, count, buffer),
        AccessSize::Half => {
            let halves: Vec<u16> = buffer
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes(c.try_into().unwrap()))
                .collect();
            write_mem16(ejtag, address, count, &halves)
        }
        AccessSize::Word => {
            let words: Vec<u32> = buffer
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                .collect();
            if count == 1 {
                write_u32(ejtag, address, words[0])
            } else {
                write_mem32(ejtag, address, &words)
            }
        }
    }
}

/// Word-block read: address and word count through `PARAM_IN`, data back
/// through `PARAM_OUT`, at most [`BLOCK_WORDS`] per handler pass.
pub fn read_mem32(
    ejtag: &mut MipsEjtag,
    mut address: u32,
    count: u32,
    buffer: &mut [u32],
) -> Result<(), EjtagError> {
    let code = [
        /* start: */
        build_mtc0(15, cp0::DESAVE, 0),              // move $15 to COP0 DeSave
        build_lui(15, upper16(PRACC_STACK)),         // $15 = PRACC_STACK
        build_ori(15, 15, lower16(PRACC_STACK)),
        build_sw(8, 0, 15),                          // sw $8,($15)
        build_sw(9, 0, 15),                          // sw $9,($15)
        build_sw(10, 0, 15),                         // sw $10,($15)
        build_sw(11, 0, 15),                         // sw $11,($15)
        build_lui(8, upper16(PRACC_PARAM_IN)),       // $8 = PRACC_PARAM_IN
        build_ori(8, 8, lower16(PRACC_PARAM_IN)),
        build_lw(9, 0, 8),                           // $9 = mem[$8]; read addr
        build_lw(10, 4, 8),                          // $10 = mem[$8 + 4]; read count
        build_lui(11, upper16(PRACC_PARAM_OUT)),     // $11 = PRACC_PARAM_OUT
        build_ori(11, 11, lower16(PRACC_PARAM_OUT)),
        MIPS32_NOP,
        /* loop: */
        build_beq(0, 10, 9),                         // beq $0, $10, end
        MIPS32_NOP,
        build_lw(8, 0, 9),                           // lw $8,0($9)
        build_sw(8, 0, 11),                          // sw $8,0($11)
        build_addi(10, 10, neg16(1)),                // $10--
        build_addi(9, 9, 4),                         // $9 += 4
        build_addi(11, 11, 4),                       // $11 += 4
        MIPS32_NOP,
        build_b(neg16(9)),                           // b loop
        MIPS32_NOP,
        /* end: */
        build_lw(11, 0, 15),                         // lw $11,($15)
        build_lw(10, 0, 15),                         // lw $10,($15)
        build_lw(9, 0, 15),                          // lw $9,($15)
        build_lw(8, 0, 15),                          // lw $8,($15)
        build_mfc0(15, cp0::DESAVE, 0),              // move COP0 DeSave to $15
        MIPS32_NOP,
        build_b(neg16(31)),                          // b start
        MIPS32_NOP,
    ];

    let mut done = 0usize;
    let mut remaining = count as usize;
    while remaining > 0 {
        let block = remaining.min(BLOCK_WORDS);
        let mut param_in = [address, block as u32];
        exec(
            ejtag,
            &code,
            &mut param_in,
            &mut buffer[done..done + block],
            true,
        )?;
        remaining -= block;
        address += (block * 4) as u32;
        done += block;
    }
    Ok(())
}

/// Fast single-word read; parameters addressed with 16-bit offsets off the
/// stack pointer.
pub fn read_u32(ejtag: &mut MipsEjtag, address: u32) -> Result<u32, EjtagError> {
    let code = [
        /* start: */
        build_mtc0(15, cp0::DESAVE, 0),                           // move $15 to COP0 DeSave
        build_lui(15, upper16(PRACC_STACK)),                      // $15 = PRACC_STACK
        build_ori(15, 15, lower16(PRACC_STACK)),
        build_sw(8, 0, 15),                                       // sw $8,($15)
        build_lw(8, neg16(PRACC_STACK - PRACC_PARAM_IN), 15),     // $8 = param_in[0] (address)
        build_lw(8, 0, 8),                                        // $8 = mem[$8]
        build_sw(8, neg16(PRACC_STACK - PRACC_PARAM_OUT), 15),    // param_out[0] = $8
        build_lw(8, 0, 15),                                       // lw $8,($15)
        build_b(neg16(9)),                                        // b start
        build_mfc0(15, cp0::DESAVE, 0),                           // delay slot: restore $15
        MIPS32_NOP,
    ];

    let mut param_in = [address];
    let mut param_out = [0u32];
    exec(ejtag, &code, &mut param_in, &mut param_out, true)?;
    Ok(param_out[0])
}

/// Halfword-block read; each halfword comes back in its own output word.
pub fn read_mem16(
    ejtag: &mut MipsEjtag,
    address: u32,
    count: u32,
    buffer: &mut [u16],
) -> Result<(), EjtagError> {
    let code = [
        /* start: */
        build_mtc0(15, cp0::DESAVE, 0),
        build_lui(15, upper16(PRACC_STACK)),
        build_ori(15, 15, lower16(PRACC_STACK)),
        build_sw(8, 0, 15),
        build_sw(9, 0, 15),
        build_sw(10, 0, 15),
        build_sw(11, 0, 15),
        build_lui(8, upper16(PRACC_PARAM_IN)),
        build_ori(8, 8, lower16(PRACC_PARAM_IN)),
        build_lw(9, 0, 8),                           // read addr
        build_lw(10, 4, 8),                          // read count
        build_lui(11, upper16(PRACC_PARAM_OUT)),
        build_ori(11, 11, lower16(PRACC_PARAM_OUT)),
        MIPS32_NOP,
        /* loop: */
        build_beq(0, 10, 9),                         // beq $0, $10, end
        MIPS32_NOP,
        build_lhu(8, 0, 9),                          // lhu $8,0($9)
        build_sw(8, 0, 11),                          // sw $8,0($11)
        build_addi(10, 10, neg16(1)),                // $10--
        build_addi(9, 9, 2),                         // $9 += 2
        build_addi(11, 11, 4),                       // $11 += 4
        MIPS32_NOP,
        build_b(neg16(9)),                           // b loop
        MIPS32_NOP,
        /* end: */
        build_lw(11, 0, 15),
        build_lw(10, 0, 15),
        build_lw(9, 0, 15),
        build_lw(8, 0, 15),
        build_mfc0(15, cp0::DESAVE, 0),
        MIPS32_NOP,
        build_b(neg16(31)),                          // b start
        MIPS32_NOP,
    ];

    let mut param_in = [address, count];
    let mut param_out = vec![0u32; count as usize];
    exec(ejtag, &code, &mut param_in, &mut param_out, true)?;
    for (half, word) in buffer.iter_mut().zip(&param_out) {
        *half = *word as u16;
    }
    Ok(())
}

/// Byte-block read; each byte comes back in its own output word.
pub fn read_mem8(
    ejtag: &mut MipsEjtag,
    address: u32,
    count: u32,
    buffer: &mut [u8],
) -> Result<(), EjtagError> {
    let code = [
        /* start: */
        build_mtc0(15, cp0::DESAVE, 0),
        build_lui(15, upper16(PRACC_STACK)),
        build_ori(15, 15, lower16(PRACC_STACK)),
        build_sw(8, 0, 15),
        build_sw(9, 0, 15),
        build_sw(10, 0, 15),
        build_sw(11, 0, 15),
        build_lui(8, upper16(PRACC_PARAM_IN)),
        build_ori(8, 8, lower16(PRACC_PARAM_IN)),
        build_lw(9, 0, 8),                           // read addr
        build_lw(10, 4, 8),                          // read count
        build_lui(11, upper16(PRACC_PARAM_OUT)),
        build_ori(11, 11, lower16(PRACC_PARAM_OUT)),
        MIPS32_NOP,
        /* loop: */
        build_beq(0, 10, 9),                         // beq $0, $10, end
        MIPS32_NOP,
        build_lbu(8, 0, 9),                          // lbu $8,0($9)
        build_sw(8, 0, 11),                          // sw $8,0($11)
        build_addi(10, 10, neg16(1)),                // $10--
        build_addi(9, 9, 1),                         // $9 += 1
        build_addi(11, 11, 4),                       // $11 += 4
        MIPS32_NOP,
        build_b(neg16(9)),                           // b loop
        MIPS32_NOP,
        /* end: */
        build_lw(11, 0, 15),
        build_lw(10, 0, 15),
        build_lw(9, 0, 15),
        build_lw(8, 0, 15),
        build_mfc0(15, cp0::DESAVE, 0),
        MIPS32_NOP,
        build_b(neg16(31)),                          // b start
        MIPS32_NOP,
    ];

    let mut param_in = [address, count];
    let mut param_out = vec![0u32; count as usize];
    exec(ejtag, &code, &mut param_in, &mut param_out, true)?;
    for (byte, word) in buffer.iter_mut().zip(&param_out) {
        *byte = *word as u8;
    }
    Ok(())
}

/// Word-block write; the destination pointer doubles as the loop counter
/// (the last address travels in `$10`).
pub fn write_mem32(ejtag: &mut MipsEjtag, address: u32, buffer: &[u32]) -> Result<(), EjtagError> {
    let code = [
        /* start: */
        build_mtc0(15, cp0::DESAVE, 0),
        build_lui(15, upper16(PRACC_STACK)),
        build_ori(15, 15, lower16(PRACC_STACK)),
        build_sw(8, 0, 15),
        build_sw(9, 0, 15),
        build_sw(10, 0, 15),
        build_sw(11, 0, 15),
        build_addi(8, 15, neg16(PRACC_STACK - PRACC_PARAM_IN)), // $8 = PRACC_PARAM_IN
        build_lw(9, 0, 8),                           // load write addr to $9
        build_lw(10, 4, 8),                          // load last address to $10
        build_addi(8, 8, 8),                         // $8 += 8, beginning of data
        /* loop: */
        build_lw(11, 0, 8),                          // lw $11,0($8)
        build_sw(11, 0, 9),                          // sw $11,0($9)
        build_addi(9, 9, 4),                         // $9 += 4
        build_bne(10, 9, neg16(4)),                  // bne $10, $9, loop
        build_addi(8, 8, 4),                         // delay slot: $8 += 4
        /* end: */
        build_lw(11, 0, 15),
        build_lw(10, 0, 15),
        build_lw(9, 0, 15),
        build_lw(8, 0, 15),
        build_b(neg16(21)),                          // b start
        build_mfc0(15, cp0::DESAVE, 0),              // delay slot: restore $15
        MIPS32_NOP,                                  // never executed
    ];

    let mut param_in = Vec::with_capacity(buffer.len() + 2);
    param_in.push(address);
    param_in.push(address + (buffer.len() * 4) as u32); // last address
    param_in.extend_from_slice(buffer);

    exec(ejtag, &code, &mut param_in, &mut [], true)
}

/// Fast single-word write.
pub fn write_u32(ejtag: &mut MipsEjtag, address: u32, value: u32) -> Result<(), EjtagError> {
    let code = [
        /* start: */
        build_mtc0(15, cp0::DESAVE, 0),
        build_lui(15, upper16(PRACC_STACK)),
        build_ori(15, 15, lower16(PRACC_STACK)),
        build_sw(8, 0, 15),
        build_sw(9, 0, 15),
        build_lw(8, neg16((PRACC_STACK - PRACC_PARAM_IN) - 4), 15), // $8 = param_in[1] (data)
        build_lw(9, neg16(PRACC_STACK - PRACC_PARAM_IN), 15),       // $9 = param_in[0] (address)
        build_sw(8, 0, 9),                                          // sw $8,0($9)
        build_lw(9, 0, 15),
        build_lw(8, 0, 15),
        build_b(neg16(11)),                                         // b start
        build_mfc0(15, cp0::DESAVE, 0),                             // delay slot: restore $15
        MIPS32_NOP,
    ];

    let mut param_in = [address, value];
    exec(ejtag, &code, &mut param_in, &mut [], true)
}

/// Halfword-block write; one halfword per input word after the header.
pub fn write_mem16(
    ejtag: &mut MipsEjtag,
    address: u32,
    count: u32,
    buffer: &[u16],
) -> Result<(), EjtagError> {
    let code = [
        /* start: */
        build_mtc0(15, cp0::DESAVE, 0),
        build_lui(15, upper16(PRACC_STACK)),
        build_ori(15, 15, lower16(PRACC_STACK)),
        build_sw(8, 0, 15),
        build_sw(9, 0, 15),
        build_sw(10, 0, 15),
        build_sw(11, 0, 15),
        build_lui(8, upper16(PRACC_PARAM_IN)),
        build_ori(8, 8, lower16(PRACC_PARAM_IN)),
        build_lw(9, 0, 8),                           // load write addr to $9
        build_lw(10, 4, 8),                          // load write count to $10
        build_addi(8, 8, 8),                         // $8 += 8
        MIPS32_NOP,
        /* loop: */
        build_beq(0, 10, 9),                         // beq $0, $10, end
        MIPS32_NOP,
        build_lw(11, 0, 8),                          // lw $11,0($8)
        build_sh(11, 0, 9),                          // sh $11,0($9)
        build_addi(10, 10, neg16(1)),                // $10--
        build_addi(9, 9, 2),                         // $9 += 2
        build_addi(8, 8, 4),                         // $8 += 4
        MIPS32_NOP,
        build_b(neg16(9)),                           // b loop
        MIPS32_NOP,
        /* end: */
        build_lw(11, 0, 15),
        build_lw(10, 0, 15),
        build_lw(9, 0, 15),
        build_lw(8, 0, 15),
        build_mfc0(15, cp0::DESAVE, 0),
        MIPS32_NOP,
        build_b(neg16(30)),                          // b start
        MIPS32_NOP,
    ];

    let mut param_in = Vec::with_capacity(count as usize + 2);
    param_in.push(address);
    param_in.push(count);
    param_in.extend(buffer.iter().map(|&h| h as u32));

    exec(ejtag, &code, &mut param_in, &mut [], true)
}

/// Byte-block write; one byte per input word after the header.
pub fn write_mem8(
    ejtag: &mut MipsEjtag,
    address: u32,
    count: u32,
    buffer: &[u8],
) -> Result<(), EjtagError> {
    let code = [
        /* start: */
        build_mtc0(15, cp0::DESAVE, 0),
        build_lui(15, upper16(PRACC_STACK)),
        build_ori(15, 15, lower16(PRACC_STACK)),
        build_sw(8, 0, 15),
        build_sw(9, 0, 15),
        build_sw(10, 0, 15),
        build_sw(11, 0, 15),
        build_lui(8, upper16(PRACC_PARAM_IN)),
        build_ori(8, 8, lower16(PRACC_PARAM_IN)),
        build_lw(9, 0, 8),                           // load write addr to $9
        build_lw(10, 4, 8),                          // load write count to $10
        build_addi(8, 8, 8),                         // $8 += 8
        MIPS32_NOP,
        /* loop: */
        build_beq(0, 10, 9),                         // beq $0, $10, end
        MIPS32_NOP,
        build_lw(11, 0, 8),                          // lw $11,0($8)
        build_sb(11, 0, 9),                          // sb $11,0($9)
        build_addi(10, 10, neg16(1)),                // $10--
        build_addi(9, 9, 1),                         // $9 += 1
        build_addi(8, 8, 4),                         // $8 += 4
        MIPS32_NOP,
        build_b(neg16(9)),                           // b loop
        MIPS32_NOP,
        /* end: */
        build_lw(11, 0, 15),
        build_lw(10, 0, 15),
        build_lw(9, 0, 15),
        build_lw(8, 0, 15),
        build_mfc0(15, cp0::DESAVE, 0),
        MIPS32_NOP,
        build_b(neg16(30)),                          // b start
        MIPS32_NOP,
    ];

    let mut param_in = Vec::with_capacity(count as usize + 2);
    param_in.push(address);
    param_in.push(count);
    param_in.extend(buffer.iter().map(|&b| b as u32));

    exec(ejtag, &code, &mut param_in, &mut [], true)
}

/// Restore all 38 registers from a context image (wire order `$0..$31`,
/// status, lo, hi, badvaddr, cause, pc-as-DEPC).
pub fn write_regs(ejtag: &mut MipsEjtag, regs: &[u32; 38]) -> Result<(), EjtagError> {
    let code = [
        /* start: */
        build_lui(2, upper16(PRACC_PARAM_IN)),       // $2 = PRACC_PARAM_IN
        build_ori(2, 2, lower16(PRACC_PARAM_IN)),
        build_lw(1, 4, 2),                           // lw $1,1*4($2)
        build_lw(15, 15 * 4, 2),                     // lw $15,15*4($2)
        build_mtc0(15, cp0::DESAVE, 0),              // move $15 to COP0 DeSave
        build_lui(15, upper16(PRACC_STACK)),         // $15 = PRACC_STACK
        build_ori(15, 15, lower16(PRACC_STACK)),
        build_sw(1, 0, 15),                          // sw $1,($15)
        build_lui(1, upper16(PRACC_PARAM_IN)),       // $1 = PRACC_PARAM_IN
        build_ori(1, 1, lower16(PRACC_PARAM_IN)),
        build_lw(3, 3 * 4, 1),
        build_lw(4, 4 * 4, 1),
        build_lw(5, 5 * 4, 1),
        build_lw(6, 6 * 4, 1),
        build_lw(7, 7 * 4, 1),
        build_lw(8, 8 * 4, 1),
        build_lw(9, 9 * 4, 1),
        build_lw(10, 10 * 4, 1),
        build_lw(11, 11 * 4, 1),
        build_lw(12, 12 * 4, 1),
        build_lw(13, 13 * 4, 1),
        build_lw(14, 14 * 4, 1),
        build_lw(16, 16 * 4, 1),
        build_lw(17, 17 * 4, 1),
        build_lw(18, 18 * 4, 1),
        build_lw(19, 19 * 4, 1),
        build_lw(20, 20 * 4, 1),
        build_lw(21, 21 * 4, 1),
        build_lw(22, 22 * 4, 1),
        build_lw(23, 23 * 4, 1),
        build_lw(24, 24 * 4, 1),
        build_lw(25, 25 * 4, 1),
        build_lw(26, 26 * 4, 1),
        build_lw(27, 27 * 4, 1),
        build_lw(28, 28 * 4, 1),
        build_lw(29, 29 * 4, 1),
        build_lw(30, 30 * 4, 1),
        build_lw(31, 31 * 4, 1),
        build_lw(2, 32 * 4, 1),
        build_mtc0(2, cp0::STATUS, 0),               // move $2 to status
        build_lw(2, 33 * 4, 1),
        build_mtlo(2),                               // move $2 to lo
        build_lw(2, 34 * 4, 1),
        build_mthi(2),                               // move $2 to hi
        build_lw(2, 35 * 4, 1),
        build_mtc0(2, cp0::BADVADDR, 0),             // move $2 to badvaddr
        build_lw(2, 36 * 4, 1),
        build_mtc0(2, cp0::CAUSE, 0),                // move $2 to cause
        build_lw(2, 37 * 4, 1),
        build_mtc0(2, cp0::DEPC, 0),                 // move $2 to pc
        build_lw(2, 2 * 4, 1),
        build_lw(1, 0, 15),                          // lw $1,($15)
        build_mfc0(15, cp0::DESAVE, 0),              // move COP0 DeSave to $15
        MIPS32_NOP,
        build_b(neg16(55)),                          // b start
        MIPS32_NOP,
    ];

    let mut param_in = *regs;
    exec(ejtag, &code, &mut param_in, &mut [], true)
}

/// Save all 38 registers into a context image (same wire order as
/// [`write_regs`]).
pub fn read_regs(ejtag: &mut MipsEjtag) -> Result<[u32; 38], EjtagError> {
    let code = [
        /* start: */
        build_mtc0(2, cp0::DESAVE, 0),               // move $2 to COP0 DeSave
        build_lui(2, upper16(PRACC_PARAM_OUT)),      // $2 = PRACC_PARAM_OUT
        build_ori(2, 2, lower16(PRACC_PARAM_OUT)),
        build_sw(0, 0, 2),                           // sw $0,0*4($2)
        build_sw(1, 4, 2),                           // sw $1,1*4($2)
        build_sw(15, 15 * 4, 2),                     // sw $15,15*4($2)
        build_mfc0(2, cp0::DESAVE, 0),               // move COP0 DeSave to $2
        build_mtc0(15, cp0::DESAVE, 0),              // move $15 to COP0 DeSave
        build_lui(15, upper16(PRACC_STACK)),         // $15 = PRACC_STACK
        build_ori(15, 15, lower16(PRACC_STACK)),
        build_sw(1, 0, 15),                          // sw $1,($15)
        build_sw(2, 0, 15),                          // sw $2,($15)
        build_lui(1, upper16(PRACC_PARAM_OUT)),      // $1 = PRACC_PARAM_OUT
        build_ori(1, 1, lower16(PRACC_PARAM_OUT)),
        build_sw(2, 2 * 4, 1),
        build_sw(3, 3 * 4, 1),
        build_sw(4, 4 * 4, 1),
        build_sw(5, 5 * 4, 1),
        build_sw(6, 6 * 4, 1),
        build_sw(7, 7 * 4, 1),
        build_sw(8, 8 * 4, 1),
        build_sw(9, 9 * 4, 1),
        build_sw(10, 10 * 4, 1),
        build_sw(11, 11 * 4, 1),
        build_sw(12, 12 * 4, 1),
        build_sw(13, 13 * 4, 1),
        build_sw(14, 14 * 4, 1),
        build_sw(16, 16 * 4, 1),
        build_sw(17, 17 * 4, 1),
        build_sw(18, 18 * 4, 1),
        build_sw(19, 19 * 4, 1),
        build_sw(20, 20 * 4, 1),
        build_sw(21, 21 * 4, 1),
        build_sw(22, 22 * 4, 1),
        build_sw(23, 23 * 4, 1),
        build_sw(24, 24 * 4, 1),
        build_sw(25, 25 * 4, 1),
        build_sw(26, 26 * 4, 1),
        build_sw(27, 27 * 4, 1),
        build_sw(28, 28 * 4, 1),
        build_sw(29, 29 * 4, 1),
        build_sw(30, 30 * 4, 1),
        build_sw(31, 31 * 4, 1),
        build_mfc0(2, cp0::STATUS, 0),               // move status to $2
        build_sw(2, 32 * 4, 1),
        build_mflo(2),                               // move lo to $2
        build_sw(2, 33 * 4, 1),
        build_mfhi(2),                               // move hi to $2
        build_sw(2, 34 * 4, 1),
        build_mfc0(2, cp0::BADVADDR, 0),             // move badvaddr to $2
        build_sw(2, 35 * 4, 1),
        build_mfc0(2, cp0::CAUSE, 0),                // move cause to $2
        build_sw(2, 36 * 4, 1),
        build_mfc0(2, cp0::DEPC, 0),                 // move pc to $2
        build_sw(2, 37 * 4, 1),
        build_lw(2, 0, 15),                          // lw $2,($15)
        build_lw(1, 0, 15),                          // lw $1,($15)
        build_mfc0(15, cp0::DESAVE, 0),              // move COP0 DeSave to $15
        MIPS32_NOP,
        build_b(neg16(60)),                          // b start
        MIPS32_NOP,
    ];

    let mut regs = [0u32; 38];
    exec(ejtag, &code, &mut [], &mut regs, true)?;
    Ok(regs)
}
