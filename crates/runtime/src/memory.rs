// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Simulated memory: a small global area followed by a downward-growing stack.
//!
//! ```text
//! 0            GLOBAL_BASE          STACK_BASE                 top
//! | reserved   | globals ...        | <- stack grows down ---- |
//! ```
//!
//! Stack slots are carved top-down in allocation order and aligned to their
//! element size, so a slot allocated after another sits directly below it
//! and writing past its end reaches the earlier slot.

use crate::error::{RuntimeError, RuntimeResult};

/// Addresses below this are never valid.
const GLOBAL_BASE: u64 = 16;
/// Size of the global area.
const GLOBAL_AREA: u64 = 240;
const STACK_BASE: u64 = GLOBAL_BASE + GLOBAL_AREA;

/// Byte-addressable little-endian memory.
pub struct Memory {
    bytes: Vec<u8>,
    next_global: u64,
    sp: u64,
}

impl Memory {
    pub fn new(stack_size: usize) -> Self {
        let size = STACK_BASE as usize + stack_size;
        Self {
            bytes: vec![0; size],
            next_global: GLOBAL_BASE,
            sp: size as u64,
        }
    }

    /// Reserve `size` bytes in the global area.
    pub fn allocate_global(&mut self, size: u32) -> RuntimeResult<u64> {
        let address = align_up(self.next_global, 8);
        let end = address + u64::from(size);
        if end > STACK_BASE {
            return Err(RuntimeError::OutOfBounds { address, size });
        }
        self.next_global = end;
        Ok(address)
    }

    /// Carve a stack slot of `size` bytes aligned to `align`.
    pub fn allocate_stack(&mut self, size: u64, align: u64) -> RuntimeResult<u64> {
        let overflow = RuntimeError::StackOverflow { requested: size };
        let address = self.sp.checked_sub(size).ok_or(overflow.clone())? & !(align.max(1) - 1);
        if address < STACK_BASE {
            return Err(overflow);
        }
        self.sp = address;
        Ok(address)
    }

    /// Current stack pointer, used to pop a frame.
    pub fn stack_pointer(&self) -> u64 {
        self.sp
    }

    pub fn reset_stack_pointer(&mut self, sp: u64) {
        self.sp = sp;
    }

    /// Read `size` bytes (at most 8) as a little-endian integer.
    pub fn read(&self, address: u64, size: u32) -> RuntimeResult<u64> {
        let range = self.range(address, size)?;
        Ok(self.bytes[range]
            .iter()
            .rev()
            .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte)))
    }

    /// Write the low `size` bytes (at most 8) of `value`.
    pub fn write(&mut self, address: u64, size: u32, value: u64) -> RuntimeResult<()> {
        let range = self.range(address, size)?;
        let bytes = value.to_le_bytes();
        self.bytes[range].copy_from_slice(&bytes[..size as usize]);
        Ok(())
    }

    pub fn fill(&mut self, address: u64, len: u64, byte: u8) -> RuntimeResult<()> {
        let range = self.span(address, len)?;
        self.bytes[range].fill(byte);
        Ok(())
    }

    /// Copy `len` bytes; overlapping ranges behave like `memmove`.
    pub fn copy(&mut self, dst: u64, src: u64, len: u64) -> RuntimeResult<()> {
        let src = self.span(src, len)?;
        let dst = self.span(dst, len)?;
        self.bytes.copy_within(src, dst.start);
        Ok(())
    }

    fn range(&self, address: u64, size: u32) -> RuntimeResult<std::ops::Range<usize>> {
        if size > 8 {
            return Err(RuntimeError::OutOfBounds { address, size });
        }
        self.span(address, u64::from(size))
    }

    fn span(&self, address: u64, len: u64) -> RuntimeResult<std::ops::Range<usize>> {
        let out_of_bounds = || RuntimeError::OutOfBounds {
            address,
            size: u32::try_from(len).unwrap_or(u32::MAX),
        };
        let end = address.checked_add(len).ok_or_else(out_of_bounds)?;
        if address < GLOBAL_BASE || end > self.bytes.len() as u64 {
            return Err(out_of_bounds());
        }
        Ok(address as usize..end as usize)
    }
}

fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_slots_sit_below_earlier_ones() {
        let mut memory = Memory::new(256);
        let canary = memory.allocate_stack(8, 8).unwrap();
        let buffer = memory.allocate_stack(16, 1).unwrap();
        assert_eq!(buffer + 16, canary);

        // Overflowing the buffer by one word clobbers the canary.
        memory.write(canary, 8, 0xdead_beef).unwrap();
        memory.fill(buffer, 24, 0x41).unwrap();
        assert_eq!(memory.read(canary, 8).unwrap(), 0x4141_4141_4141_4141);
    }

    #[test]
    fn test_little_endian_round_trip() {
        let mut memory = Memory::new(64);
        let slot = memory.allocate_stack(8, 8).unwrap();
        memory.write(slot, 4, 0x1122_3344_5566).unwrap();
        assert_eq!(memory.read(slot, 4).unwrap(), 0x3344_5566);
        assert_eq!(memory.read(slot, 1).unwrap(), 0x66);
    }

    #[test]
    fn test_bounds() {
        let mut memory = Memory::new(32);
        assert!(matches!(memory.read(0, 8), Err(RuntimeError::OutOfBounds { .. })));
        assert!(matches!(
            memory.allocate_stack(64, 8),
            Err(RuntimeError::StackOverflow { requested: 64 })
        ));
        let top = memory.stack_pointer();
        assert!(memory.read(top, 1).is_err());
    }

    #[test]
    fn test_stack_pointer_restores_frame() {
        let mut memory = Memory::new(64);
        let sp = memory.stack_pointer();
        memory.allocate_stack(32, 8).unwrap();
        memory.reset_stack_pointer(sp);
        assert_eq!(memory.allocate_stack(8, 8).unwrap(), sp - 8);
    }
}
