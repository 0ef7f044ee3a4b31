//! Synchronization primitives.

use crate::error::Result;
use ash::vk;

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// One fence per frame slot.
///
/// Per-frame uniform buffers are shared by the clipmap draw of every slot,
/// so before the CPU rewrites them it waits on every fence except the one
/// owned by the slot being recorded, which the frame loop already waited on.
pub struct FrameFences {
    fences: Vec<vk::Fence>,
    current: usize,
}

impl FrameFences {
    /// Create signaled fences for `frames_in_flight` slots.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, frames_in_flight: usize) -> Result<Self> {
        let mut fences = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            fences.push(create_fence(device, true)?);
        }
        Ok(Self::from_fences(fences))
    }

    /// Wrap existing fences.
    pub fn from_fences(fences: Vec<vk::Fence>) -> Self {
        Self { fences, current: 0 }
    }

    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    /// Current frame slot.
    pub fn current_frame(&self) -> usize {
        self.current
    }

    /// Fence owned by the current slot.
    pub fn current(&self) -> Option<vk::Fence> {
        self.fences.get(self.current).copied()
    }

    /// Advance to the next slot.
    pub fn advance(&mut self) {
        if !self.fences.is_empty() {
            self.current = (self.current + 1) % self.fences.len();
        }
    }

    /// Fences of every slot other than `current`.
    pub fn fences_to_wait(&self, current: usize) -> Vec<vk::Fence> {
        self.fences
            .iter()
            .enumerate()
            .filter(|&(slot, _)| slot != current)
            .map(|(_, &fence)| fence)
            .collect()
    }

    /// Block until every other slot has finished with shared resources.
    ///
    /// # Safety
    /// The device must be valid.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn wait_others(&self, device: &ash::Device) -> Result<()> {
        let fences = self.fences_to_wait(self.current);
        if !fences.is_empty() {
            device.wait_for_fences(&fences, true, u64::MAX)?;
        }
        Ok(())
    }

    /// Destroy all fences.
    ///
    /// # Safety
    /// The device must be valid and no fence may be pending.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        for &fence in &self.fences {
            device.destroy_fence(fence, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn fences(count: u64) -> FrameFences {
        FrameFences::from_fences((1..=count).map(vk::Fence::from_raw).collect())
    }

    #[test]
    fn waits_on_every_other_slot() {
        let fences = fences(3);
        let waited: Vec<u64> = fences.fences_to_wait(1).iter().map(|f| f.as_raw()).collect();
        assert_eq!(waited, vec![1, 3]);
    }

    #[test]
    fn single_slot_waits_on_nothing() {
        assert!(fences(1).fences_to_wait(0).is_empty());
    }

    #[test]
    fn advance_wraps() {
        let mut fences = fences(2);
        assert_eq!(fences.current().map(|f| f.as_raw()), Some(1));
        fences.advance();
        assert_eq!(fences.current_frame(), 1);
        fences.advance();
        assert_eq!(fences.current_frame(), 0);
    }
}
