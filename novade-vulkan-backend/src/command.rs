//! The single command batch.
//!
//! All recording goes into one primary command buffer. A batch is opened
//! lazily by the first operation that records, closed and submitted by
//! `present` (or an explicit flush), and at most one submission is in flight:
//! reopening waits for the previous submission's fence.

use std::sync::Arc;

use ash::{vk, Device};
use tracing::{error, trace};

use crate::error::{Result, VkResultExt};

/// Lifecycle of the command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum BatchState {
    /// Nothing recorded and nothing pending on the GPU.
    #[default]
    Idle,
    /// Between `begin` and `end`.
    Recording,
    /// Submitted; the fence signals when the GPU is done with it.
    InFlight,
}

impl BatchState {
    pub(crate) fn is_open(self) -> bool {
        self == BatchState::Recording
    }

    /// Whether opening a new batch must first wait for the previous submission.
    pub(crate) fn must_wait(self) -> bool {
        self == BatchState::InFlight
    }

    /// State after an attempted submission.
    pub(crate) fn after_submit(submitted: bool) -> BatchState {
        if submitted {
            BatchState::InFlight
        } else {
            BatchState::Idle
        }
    }
}

pub struct CommandBatch {
    device: Arc<Device>,
    queue: vk::Queue,
    pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    /// Signalled by the presenting submission, waited on by `vkQueuePresentKHR`.
    pub present_semaphore: vk::Semaphore,
    state: BatchState,
}

impl CommandBatch {
    pub fn new(device: Arc<Device>, queue: vk::Queue, queue_family: u32) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .vk_context("vkCreateCommandPool")?;

        // From here on a failure must not leak the pool, so build the rest
        // into a closure and clean up on error.
        let rest = || -> Result<(vk::CommandBuffer, vk::Fence, vk::Semaphore)> {
            let alloc_info = vk::CommandBufferAllocateInfo::builder()
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_pool(pool)
                .command_buffer_count(1);
            let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
                .vk_context("vkAllocateCommandBuffers")?[0];

            let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
            let fence = unsafe { device.create_fence(&fence_info, None) }
                .vk_context("vkCreateFence")?;

            let semaphore_info = vk::SemaphoreCreateInfo::builder();
            match unsafe { device.create_semaphore(&semaphore_info, None) } {
                Ok(semaphore) => Ok((command_buffer, fence, semaphore)),
                Err(result) => {
                    unsafe { device.destroy_fence(fence, None) };
                    Err(result).vk_context("vkCreateSemaphore")
                }
            }
        };

        match rest() {
            Ok((command_buffer, fence, present_semaphore)) => Ok(Self {
                device,
                queue,
                pool,
                command_buffer,
                fence,
                present_semaphore,
                state: BatchState::Idle,
            }),
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                Err(e)
            }
        }
    }

    /// Opens a batch unless one is already open.
    ///
    /// Blocks until the previous submission has finished executing.
    pub fn ensure_open(&mut self) -> Result<()> {
        if self.state.is_open() {
            return Ok(());
        }

        if self.state.must_wait() {
            unsafe { self.device.wait_for_fences(&[self.fence], true, u64::MAX) }
                .vk_context("vkWaitForFences")?;
            self.state = BatchState::Idle;
        }

        unsafe {
            self.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
        }
        .vk_context("vkResetCommandBuffer")?;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(self.command_buffer, &begin_info) }
            .vk_context("vkBeginCommandBuffer")?;

        self.state = BatchState::Recording;
        trace!("Command batch opened");
        Ok(())
    }

    /// Ends recording and submits. With `signal_present` the presentation
    /// semaphore is signalled as well. Does nothing if no batch is open.
    pub fn close_and_submit(&mut self, signal_present: bool) -> Result<()> {
        if !self.state.is_open() {
            return Ok(());
        }

        if let Err(result) = unsafe { self.device.end_command_buffer(self.command_buffer) } {
            self.state = BatchState::Idle;
            return Err(result).vk_context("vkEndCommandBuffer");
        }

        let submitted = self.submit(signal_present);
        self.state = BatchState::after_submit(submitted.is_ok());
        trace!(signal_present, "Command batch submitted");
        submitted
    }

    fn submit(&self, signal_present: bool) -> Result<()> {
        // Only an in-flight batch is ever waited on. A failed submit below
        // leaves the fence unsignalled, but the batch then goes back to idle.
        unsafe { self.device.reset_fences(&[self.fence]) }.vk_context("vkResetFences")?;

        let command_buffers = [self.command_buffer];
        let signal_semaphores = [self.present_semaphore];
        let mut submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
        if signal_present {
            submit_info = submit_info.signal_semaphores(&signal_semaphores);
        }

        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info.build()], self.fence)
        }
        .vk_context("vkQueueSubmit")
    }

    /// Submits whatever has been recorded, without signalling presentation.
    pub fn flush(&mut self) {
        if let Err(e) = self.close_and_submit(false) {
            error!("Failed to flush command batch: {e}");
        }
    }
}

impl Drop for CommandBatch {
    fn drop(&mut self) {
        unsafe {
            if self.state.must_wait() {
                if let Err(e) = self.device.wait_for_fences(&[self.fence], true, u64::MAX) {
                    error!("vkWaitForFences failed during teardown: {e}");
                }
            }
            self.device.destroy_semaphore(self.present_semaphore, None);
            self.device.destroy_fence(self.fence, None);
            // Frees the command buffer with it.
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_in_flight_batches_block_reopening() {
        assert!(!BatchState::Idle.must_wait());
        assert!(!BatchState::Recording.must_wait());
        assert!(BatchState::InFlight.must_wait());
    }

    #[test]
    fn failed_submission_never_leaves_a_fence_to_wait_on() {
        assert_eq!(BatchState::after_submit(true), BatchState::InFlight);
        assert_eq!(BatchState::after_submit(false), BatchState::Idle);
        assert!(!BatchState::after_submit(false).must_wait());
    }

    #[test]
    fn new_batches_start_closed() {
        let state = BatchState::default();
        assert_eq!(state, BatchState::Idle);
        assert!(!state.is_open());
        assert!(BatchState::Recording.is_open());
    }
}
