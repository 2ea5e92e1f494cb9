use std::collections::BTreeMap;

use crate::{
    Fcram, MemoryError, MemoryPermission, MemoryState, RegionAllocator, HEAP_VADDR,
    HEAP_VADDR_END, LINEAR_HEAP_VADDR, PAGE_MASK, PAGE_SIZE, USER_SPACE_VADDR_END,
};

/// One contiguous range of mapped virtual memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vma {
    pub base: u32,
    pub size: u32,
    pub state: MemoryState,
    pub permissions: MemoryPermission,
}

/// Result of a layout query. Neighbouring ranges sharing state and permissions are merged,
/// regardless of their physical backing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub base_address: u32,
    pub size: u32,
    pub permission: MemoryPermission,
    pub state: MemoryState,
}

/// Per-process virtual address space.
///
/// A page table maps virtual pages onto FCRAM frames; the VMA map mirrors it at range
/// granularity for layout queries and protection changes. The two are kept consistent: every
/// mapped page lies inside exactly one VMA.
#[derive(Debug, Default)]
pub struct AddressSpace {
    // virtual page index -> FCRAM frame offset (page-aligned)
    pages: BTreeMap<u32, u32>,
    // keyed by base address
    vmas: BTreeMap<u32, Vma>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the page containing `vaddr` is mapped.
    pub fn is_valid(&self, vaddr: u32) -> bool {
        self.pages.contains_key(&(vaddr / PAGE_SIZE))
    }

    /// FCRAM offset backing `vaddr`, if mapped.
    pub fn translate(&self, vaddr: u32) -> Option<u32> {
        let frame = self.pages.get(&(vaddr / PAGE_SIZE))?;
        Some(frame + (vaddr & PAGE_MASK))
    }

    /// Maps `frames` (one FCRAM frame offset per page) starting at `vaddr`.
    pub fn map(
        &mut self,
        vaddr: u32,
        frames: &[u32],
        state: MemoryState,
        permissions: MemoryPermission,
    ) -> Result<(), MemoryError> {
        if vaddr & PAGE_MASK != 0 {
            return Err(MemoryError::MisalignedAddress { addr: vaddr });
        }
        let size = (frames.len() as u32) * PAGE_SIZE;
        vaddr
            .checked_add(size)
            .filter(|&end| end <= USER_SPACE_VADDR_END)
            .ok_or(MemoryError::InvalidAddress { addr: vaddr })?;
        for i in 0..frames.len() as u32 {
            if self.pages.contains_key(&(vaddr / PAGE_SIZE + i)) {
                return Err(MemoryError::AlreadyMapped {
                    addr: vaddr + i * PAGE_SIZE,
                });
            }
        }
        for (i, &frame) in frames.iter().enumerate() {
            self.pages.insert(vaddr / PAGE_SIZE + i as u32, frame);
        }
        self.vmas.insert(
            vaddr,
            Vma {
                base: vaddr,
                size,
                state,
                permissions,
            },
        );
        Ok(())
    }

    /// Unmaps `[vaddr, vaddr + size)` and returns the FCRAM frames that backed it, in page
    /// order, so the caller can return them to a region allocator.
    pub fn unmap(&mut self, vaddr: u32, size: u32) -> Result<Vec<u32>, MemoryError> {
        self.check_unmap_range(vaddr, size)?;
        self.carve(vaddr, size);
        let keys: Vec<u32> = self
            .vmas
            .range(vaddr..vaddr + size)
            .map(|(&base, _)| base)
            .collect();
        for base in keys {
            self.vmas.remove(&base);
        }
        let mut frames = Vec::with_capacity((size / PAGE_SIZE) as usize);
        for page in vaddr / PAGE_SIZE..(vaddr + size) / PAGE_SIZE {
            frames.push(self.pages.remove(&page).expect("page checked as mapped"));
        }
        Ok(frames)
    }

    /// Changes the permissions of `[vaddr, vaddr + size)`, splitting VMAs as needed.
    pub fn reprotect(
        &mut self,
        vaddr: u32,
        size: u32,
        permissions: MemoryPermission,
    ) -> Result<(), MemoryError> {
        self.check_unmap_range(vaddr, size)?;
        self.carve(vaddr, size);
        for (_, vma) in self.vmas.range_mut(vaddr..vaddr + size) {
            vma.permissions = permissions;
        }
        Ok(())
    }

    /// Changes the state of `[vaddr, vaddr + size)`, splitting VMAs as needed.
    pub fn set_state(
        &mut self,
        vaddr: u32,
        size: u32,
        state: MemoryState,
    ) -> Result<(), MemoryError> {
        self.check_unmap_range(vaddr, size)?;
        self.carve(vaddr, size);
        for (_, vma) in self.vmas.range_mut(vaddr..vaddr + size) {
            vma.state = state;
        }
        Ok(())
    }

    /// Layout query at `vaddr`: the containing range with compatible neighbours merged, or the
    /// surrounding free gap if nothing is mapped there.
    pub fn query(&self, vaddr: u32) -> Result<MemoryInfo, MemoryError> {
        if vaddr >= USER_SPACE_VADDR_END {
            return Err(MemoryError::InvalidAddress { addr: vaddr });
        }
        match self.vma_containing(vaddr) {
            Some(vma) => {
                let mut base = vma.base;
                let mut end = vma.base + vma.size;
                // Walk outwards over contiguous VMAs with the same state and permissions.
                while let Some((_, prev)) = self.vmas.range(..base).next_back() {
                    if prev.base + prev.size != base
                        || prev.state != vma.state
                        || prev.permissions != vma.permissions
                    {
                        break;
                    }
                    base = prev.base;
                }
                while let Some((_, next)) = self.vmas.range(end..).next() {
                    if next.base != end
                        || next.state != vma.state
                        || next.permissions != vma.permissions
                    {
                        break;
                    }
                    end = next.base + next.size;
                }
                Ok(MemoryInfo {
                    base_address: base,
                    size: end - base,
                    permission: vma.permissions,
                    state: vma.state,
                })
            }
            None => {
                let gap_base = self
                    .vmas
                    .range(..=vaddr)
                    .next_back()
                    .map(|(_, vma)| vma.base + vma.size)
                    .unwrap_or(0);
                let gap_end = self
                    .vmas
                    .range(vaddr..)
                    .next()
                    .map(|(&base, _)| base)
                    .unwrap_or(USER_SPACE_VADDR_END);
                Ok(MemoryInfo {
                    base_address: gap_base,
                    size: gap_end - gap_base,
                    permission: MemoryPermission::NONE,
                    state: MemoryState::Free,
                })
            }
        }
    }

    pub fn read8(&self, fcram: &Fcram, vaddr: u32) -> Result<u8, MemoryError> {
        let mut buf = [0u8; 1];
        self.read_block(fcram, vaddr, &mut buf)?;
        Ok(buf[0])
    }

    pub fn read32(&self, fcram: &Fcram, vaddr: u32) -> Result<u32, MemoryError> {
        if vaddr % 4 != 0 {
            return Err(MemoryError::MisalignedAddress { addr: vaddr });
        }
        let mut buf = [0u8; 4];
        self.read_block(fcram, vaddr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read64(&self, fcram: &Fcram, vaddr: u32) -> Result<u64, MemoryError> {
        if vaddr % 8 != 0 {
            return Err(MemoryError::MisalignedAddress { addr: vaddr });
        }
        let mut buf = [0u8; 8];
        self.read_block(fcram, vaddr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn write8(&self, fcram: &mut Fcram, vaddr: u32, value: u8) -> Result<(), MemoryError> {
        self.write_block(fcram, vaddr, &[value])
    }

    pub fn write32(&self, fcram: &mut Fcram, vaddr: u32, value: u32) -> Result<(), MemoryError> {
        if vaddr % 4 != 0 {
            return Err(MemoryError::MisalignedAddress { addr: vaddr });
        }
        self.write_block(fcram, vaddr, &value.to_le_bytes())
    }

    pub fn write64(&self, fcram: &mut Fcram, vaddr: u32, value: u64) -> Result<(), MemoryError> {
        if vaddr % 8 != 0 {
            return Err(MemoryError::MisalignedAddress { addr: vaddr });
        }
        self.write_block(fcram, vaddr, &value.to_le_bytes())
    }

    pub fn read_block(
        &self,
        fcram: &Fcram,
        vaddr: u32,
        buf: &mut [u8],
    ) -> Result<(), MemoryError> {
        self.check_access_range(vaddr, buf.len())?;
        let mut vaddr = vaddr;
        let mut buf = buf;
        while !buf.is_empty() {
            let chunk = ((PAGE_SIZE - (vaddr & PAGE_MASK)) as usize).min(buf.len());
            let offset = self.translate(vaddr).expect("range checked as mapped");
            let (head, tail) = buf.split_at_mut(chunk);
            fcram.read(offset, head);
            vaddr += chunk as u32;
            buf = tail;
        }
        Ok(())
    }

    pub fn write_block(
        &self,
        fcram: &mut Fcram,
        vaddr: u32,
        data: &[u8],
    ) -> Result<(), MemoryError> {
        self.check_access_range(vaddr, data.len())?;
        let mut vaddr = vaddr;
        let mut data = data;
        while !data.is_empty() {
            let chunk = ((PAGE_SIZE - (vaddr & PAGE_MASK)) as usize).min(data.len());
            let offset = self.translate(vaddr).expect("range checked as mapped");
            fcram.write(offset, &data[..chunk]);
            vaddr += chunk as u32;
            data = &data[chunk..];
        }
        Ok(())
    }

    pub fn zero_block(&self, fcram: &mut Fcram, vaddr: u32, len: u32) -> Result<(), MemoryError> {
        self.check_access_range(vaddr, len as usize)?;
        let mut vaddr = vaddr;
        let mut remaining = len;
        while remaining > 0 {
            let chunk = (PAGE_SIZE - (vaddr & PAGE_MASK)).min(remaining);
            let offset = self.translate(vaddr).expect("range checked as mapped");
            fcram.zero(offset, chunk);
            vaddr += chunk;
            remaining -= chunk;
        }
        Ok(())
    }

    /// Reads a NUL-terminated string of at most `max_len` bytes starting at `vaddr`.
    pub fn read_cstring(
        &self,
        fcram: &Fcram,
        vaddr: u32,
        max_len: u32,
    ) -> Result<String, MemoryError> {
        let mut bytes = Vec::new();
        for i in 0..max_len {
            let byte = self.read8(fcram, vaddr + i)?;
            if byte == 0 {
                break;
            }
            bytes.push(byte);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Commits heap pages so that `[target, target + size)` is fully mapped, drawing backing
    /// from `region`. Pages already committed are left untouched.
    pub fn heap_allocate(
        &mut self,
        region: &mut RegionAllocator,
        target: u32,
        size: u32,
        permissions: MemoryPermission,
    ) -> Result<u32, MemoryError> {
        let end = target
            .checked_add(size)
            .ok_or(MemoryError::InvalidAddress { addr: target })?;
        if target < HEAP_VADDR || end > HEAP_VADDR_END {
            return Err(MemoryError::InvalidAddress { addr: target });
        }
        let missing: Vec<u32> = (target / PAGE_SIZE..end / PAGE_SIZE)
            .filter(|page| !self.pages.contains_key(page))
            .collect();
        let mut frames = Vec::with_capacity(missing.len());
        for _ in &missing {
            match region.allocate(PAGE_SIZE) {
                Some(frame) => frames.push(frame),
                None => {
                    for frame in frames {
                        region.free(frame, PAGE_SIZE);
                    }
                    return Err(MemoryError::OutOfMemory { needed: size });
                }
            }
        }
        for (&page, frame) in missing.iter().zip(frames) {
            self.pages.insert(page, frame);
            self.vmas.insert(
                page * PAGE_SIZE,
                Vma {
                    base: page * PAGE_SIZE,
                    size: PAGE_SIZE,
                    state: MemoryState::Private,
                    permissions,
                },
            );
        }
        Ok(target)
    }

    /// Releases committed heap pages back to `region`.
    pub fn heap_free(
        &mut self,
        region: &mut RegionAllocator,
        target: u32,
        size: u32,
    ) -> Result<(), MemoryError> {
        if target < HEAP_VADDR || target.saturating_add(size) > HEAP_VADDR_END {
            return Err(MemoryError::InvalidAddress { addr: target });
        }
        for frame in self.unmap(target, size)? {
            region.free(frame, PAGE_SIZE);
        }
        Ok(())
    }

    /// Allocates a contiguous block in the linear heap. The linear heap is identity-offset
    /// against FCRAM, so the chosen virtual address is `LINEAR_HEAP_VADDR` plus the physical
    /// offset of the backing block.
    pub fn linear_allocate(
        &mut self,
        region: &mut RegionAllocator,
        target: u32,
        size: u32,
        permissions: MemoryPermission,
    ) -> Result<u32, MemoryError> {
        let offset = if target == 0 {
            region
                .allocate(size)
                .ok_or(MemoryError::OutOfMemory { needed: size })?
        } else {
            if target < LINEAR_HEAP_VADDR {
                return Err(MemoryError::InvalidAddress { addr: target });
            }
            region
                .allocate_at(target - LINEAR_HEAP_VADDR, size)
                .ok_or(MemoryError::InvalidAddress { addr: target })?
        };
        let vaddr = LINEAR_HEAP_VADDR + offset;
        let frames: Vec<u32> = (0..size / PAGE_SIZE).map(|i| offset + i * PAGE_SIZE).collect();
        match self.map(vaddr, &frames, MemoryState::Continuous, permissions) {
            Ok(()) => Ok(vaddr),
            Err(err) => {
                region.free(offset, size);
                Err(err)
            }
        }
    }

    /// Releases a linear-heap block back to `region`.
    pub fn linear_free(
        &mut self,
        region: &mut RegionAllocator,
        target: u32,
        size: u32,
    ) -> Result<(), MemoryError> {
        if target < LINEAR_HEAP_VADDR {
            return Err(MemoryError::InvalidAddress { addr: target });
        }
        self.unmap(target, size)?;
        region.free(target - LINEAR_HEAP_VADDR, size);
        Ok(())
    }

    /// Maps `[dst, dst + size)` as an alias of the already-mapped `[src, src + size)`. The
    /// source range's state becomes `Aliased`, the destination's `Alias`.
    pub fn alias(
        &mut self,
        src: u32,
        dst: u32,
        size: u32,
        permissions: MemoryPermission,
    ) -> Result<(), MemoryError> {
        self.check_unmap_range(src, size)?;
        let frames: Vec<u32> = (0..size / PAGE_SIZE)
            .map(|i| {
                self.translate(src + i * PAGE_SIZE)
                    .expect("range checked as mapped")
            })
            .collect();
        self.map(dst, &frames, MemoryState::Alias, permissions)?;
        self.set_state(src, size, MemoryState::Aliased)?;
        Ok(())
    }

    /// Reverses [`AddressSpace::alias`]: unmaps the alias range and restores the source state.
    pub fn unalias(&mut self, src: u32, dst: u32, size: u32) -> Result<(), MemoryError> {
        self.unmap(dst, size)?;
        self.set_state(src, size, MemoryState::Private)?;
        Ok(())
    }

    fn vma_containing(&self, vaddr: u32) -> Option<&Vma> {
        let (_, vma) = self.vmas.range(..=vaddr).next_back()?;
        (vaddr < vma.base + vma.size).then_some(vma)
    }

    // Requires a page-aligned, fully-mapped range.
    fn check_unmap_range(&self, vaddr: u32, size: u32) -> Result<(), MemoryError> {
        if vaddr & PAGE_MASK != 0 {
            return Err(MemoryError::MisalignedAddress { addr: vaddr });
        }
        if size & PAGE_MASK != 0 {
            return Err(MemoryError::MisalignedSize { size });
        }
        let end = vaddr
            .checked_add(size)
            .filter(|&end| end <= USER_SPACE_VADDR_END)
            .ok_or(MemoryError::InvalidAddress { addr: vaddr })?;
        for page in vaddr / PAGE_SIZE..end / PAGE_SIZE {
            if !self.pages.contains_key(&page) {
                return Err(MemoryError::NotMapped {
                    addr: page * PAGE_SIZE,
                });
            }
        }
        Ok(())
    }

    fn check_access_range(&self, vaddr: u32, len: usize) -> Result<(), MemoryError> {
        if len == 0 {
            return Ok(());
        }
        let end = (vaddr as u64) + len as u64;
        if end > USER_SPACE_VADDR_END as u64 {
            return Err(MemoryError::InvalidAddress { addr: vaddr });
        }
        let mut page = vaddr / PAGE_SIZE;
        let last = ((end.max(1) - 1) / PAGE_SIZE as u64) as u32;
        while page <= last {
            if !self.pages.contains_key(&page) {
                return Err(MemoryError::NotMapped {
                    addr: page * PAGE_SIZE,
                });
            }
            page += 1;
        }
        Ok(())
    }

    // Splits VMAs so that `base` and `base + size` fall on VMA boundaries.
    fn carve(&mut self, base: u32, size: u32) {
        self.split_at(base);
        self.split_at(base + size);
    }

    fn split_at(&mut self, addr: u32) {
        let Some(vma) = self.vma_containing(addr).copied() else {
            return;
        };
        if vma.base == addr {
            return;
        }
        let head_size = addr - vma.base;
        self.vmas.insert(
            vma.base,
            Vma {
                size: head_size,
                ..vma
            },
        );
        self.vmas.insert(
            addr,
            Vma {
                base: addr,
                size: vma.size - head_size,
                ..vma
            },
        );
    }
}
