//! Diagnostic-only types carried forward from `original_source/core/sys/xsk.c`
//! that have no behavioral effect on the datapath itself (SPEC_FULL.md §3).
//!
//! `AllocationTag` mirrors the original's `POOLTAG_*` constants (pool tags
//! attached to every `ExAllocatePoolWithTag` call, used by WinDbg's `!poolused`
//! to attribute live allocations back to this driver). `UmemMapping` mirrors
//! `UMEM_MAPPING`'s `{Mdl, SystemAddress, DmaAddress}` union: whichever
//! addressing scheme the enabled TX extension (VA/LA/MDL, spec §4.6) actually
//! uses, for both the primary UMEM mapping and any `BounceBuffer` mapping.
//! `BounceAllocationSource` mirrors `ALLOCATION_SOURCE`, recording which of
//! the two bounce-allocation code paths in spec §4.4's TX bind-work paragraph
//! actually fired.

/// Pool tag attached to an allocation site, for diagnostic logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AllocationTag {
    /// `POOLTAG_RING`: shared-ring backing storage (`RingStorage`).
    Ring,
    /// `POOLTAG_UMEM`: UMEM bookkeeping.
    Umem,
    /// `POOLTAG_BOUNCE`: bounce-buffer backing storage.
    Bounce,
    /// `POOLTAG_XSK`: the socket object itself.
    Xsk,
}

impl AllocationTag {
    /// The four-character tag as the original would pass it to
    /// `ExAllocatePoolWithTag` (little-endian `u32`, read as ASCII).
    pub const fn fourcc(self) -> [u8; 4] {
        match self {
            AllocationTag::Ring => *b"gniR",
            AllocationTag::Umem => *b"memU",
            AllocationTag::Bounce => *b"cnoB",
            AllocationTag::Xsk => *b"ksX ",
        }
    }
}

/// The addressing scheme used to hand a UMEM-relative (or bounce-relative)
/// chunk to the XDP TX queue, mirroring whichever extension the TX queue
/// advertised at bind time (spec §4.4 "queries enabled extensions", §4.6
/// "populate each enabled extension").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UmemMapping {
    /// `VirtualAddress` extension: `system_address + base`.
    VirtualAddress(usize),
    /// `LogicalAddress` extension: `dma_address + base`.
    LogicalAddress(u64),
    /// `MDL` extension: the mapping MDL with `mdl_offset = base`.
    Mdl { mdl_offset: u64 },
}

impl UmemMapping {
    /// Translate a completed frame's mapping-relative address back to a
    /// UMEM-relative one (spec §4.6 "Completion reap": "subtract the
    /// appropriate mapping base for the enabled extension").
    pub fn umem_relative_address(self, reported: u64) -> u64 {
        match self {
            UmemMapping::VirtualAddress(system_base) => reported.wrapping_sub(system_base as u64),
            UmemMapping::LogicalAddress(dma_base) => reported.wrapping_sub(dma_base),
            // The MDL extension already reports `mdl_offset`, which *is* the
            // UMEM-relative base (spec §4.6 "MDL: use the MDL-offset field
            // directly").
            UmemMapping::Mdl { mdl_offset } => mdl_offset,
        }
    }
}

/// Which code path produced a socket's bounce-buffer backing memory (spec
/// §4.4 "attempts to create a common buffer directly over the UMEM MDL;
/// falls back to allocating a DMA common buffer as the bounce buffer").
/// Surfaced through `GET_SOCKOPT` for diagnostics only; does not change
/// `BounceBuffer`'s behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BounceAllocationSource {
    /// No bounce buffer was needed for this socket's TX binding.
    NotAllocated,
    /// DMA adapter mapped the existing UMEM MDL directly; no separate
    /// staging buffer exists beyond what `BounceBuffer` itself allocates.
    MappedUmemMdl,
    /// DMA adapter could not map the UMEM MDL and allocated a separate
    /// common buffer instead.
    DmaCommonBuffer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_recovers_umem_relative_address() {
        assert_eq!(UmemMapping::VirtualAddress(0x1000).umem_relative_address(0x1040), 0x40);
        assert_eq!(UmemMapping::LogicalAddress(0x8000_0000).umem_relative_address(0x8000_1000), 0x1000);
        assert_eq!(UmemMapping::Mdl { mdl_offset: 0x2000 }.umem_relative_address(0xdead), 0x2000);
    }

    #[test]
    fn allocation_tags_are_four_bytes() {
        assert_eq!(AllocationTag::Ring.fourcc().len(), 4);
    }
}
