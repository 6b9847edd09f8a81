//! Timeline synchronisation: [`SubmitToken`] and [`TimelineSemaphore`].
//!
//! Every queue role owns a timeline semaphore inside the
//! [`Context`]. Each successful submission on a role signals the next value
//! of that timeline and hands back a [`SubmitToken`] naming it. Tokens are
//! waited on from the host with [`Context::wait`], or from another
//! submission by passing them as waits to
//! [`CommandBuffer::submit`](crate::command::CommandBuffer::submit).
//!
//! [`TimelineSemaphore`] is a standalone timeline owned by the caller, for
//! host-driven signalling.

use std::rc::Rc;

use ash::vk;
use thiserror::Error;

use crate::command::retire;
use crate::context::Context;
use crate::queue::QueueRole;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("Token {token:?} was never submitted (last submitted value {last})")]
    NotSubmitted { token: SubmitToken, last: u64 },

    #[error("Semaphore wait timed out")]
    Timeout,

    #[error("Vulkan error waiting for semaphore: {0}")]
    Vulkan(vk::Result),
}

impl From<vk::Result> for WaitError {
    fn from(result: vk::Result) -> Self {
        if result == vk::Result::TIMEOUT {
            WaitError::Timeout
        } else {
            WaitError::Vulkan(result)
        }
    }
}

#[derive(Debug, Error)]
pub enum SemaphoreError {
    #[error("Vulkan error creating semaphore: {0}")]
    Create(vk::Result),

    #[error("Timeline values only increase: {requested} is not above {current}")]
    NotIncreasing { current: u64, requested: u64 },

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("Vulkan error on semaphore: {0}")]
    Vulkan(vk::Result),
}

// ---------------------------------------------------------------------------
// SubmitToken
// ---------------------------------------------------------------------------

/// Names the completion of one submission: the value its queue role's
/// timeline reaches when the work is done.
///
/// Tokens of the same role order by submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubmitToken {
    pub role: QueueRole,
    pub value: u64,
}

impl Context {
    /// Block until the work behind `token` has completed.
    pub fn wait(&self, token: SubmitToken) -> Result<(), WaitError> {
        let timeline = self.timeline(token.role);
        let last = timeline.last_signaled.get();
        if token.value > last {
            return Err(WaitError::NotSubmitted { token, last });
        }

        let _span = tracing::debug_span!(
            "wait_submit_token",
            role = token.role.name(),
            value = token.value
        )
        .entered();
        // SAFETY: the semaphore is a timeline owned by this context.
        unsafe {
            self.device().wait_raw_semaphore(
                timeline.semaphore,
                token.value,
                u64::MAX,
            )
        }?;
        self.retire_completed(token.role)?;
        Ok(())
    }

    /// Whether the work behind `token` has completed, without blocking.
    pub fn is_complete(&self, token: SubmitToken) -> Result<bool, WaitError> {
        let timeline = self.timeline(token.role);
        let last = timeline.last_signaled.get();
        if token.value > last {
            return Err(WaitError::NotSubmitted { token, last });
        }
        let completed = self.retire_completed(token.role)?;
        Ok(completed >= token.value)
    }

    /// Move the role's finished command buffers back to its free list and
    /// return the timeline's current value.
    pub(crate) fn retire_completed(
        &self,
        role: QueueRole,
    ) -> Result<u64, vk::Result> {
        // SAFETY: the semaphore is a timeline owned by this context.
        let completed = unsafe {
            self.device()
                .get_raw_semaphore_counter_value(self.timeline(role).semaphore)
        }?;
        let pool = self.pool(role);
        retire(
            &mut pool.in_flight.borrow_mut(),
            &mut pool.free.borrow_mut(),
            completed,
        );
        Ok(completed)
    }
}

// ---------------------------------------------------------------------------
// TimelineSemaphore
// ---------------------------------------------------------------------------

/// A caller-owned timeline semaphore.
pub struct TimelineSemaphore {
    ctx: Rc<Context>,
    handle: vk::Semaphore,
}

impl std::fmt::Debug for TimelineSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineSemaphore")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl TimelineSemaphore {
    pub fn new(
        ctx: &Rc<Context>,
        initial_value: u64,
        name: Option<&str>,
    ) -> Result<Self, SemaphoreError> {
        // SAFETY: the context's device has timelineSemaphore enabled.
        let handle =
            unsafe { ctx.device().create_raw_timeline_semaphore(initial_value) }
                .map_err(SemaphoreError::Create)?;
        if let Some(name) = name {
            ctx.name_object(handle, name);
        }
        Ok(Self {
            ctx: Rc::clone(ctx),
            handle,
        })
    }

    pub fn value(&self) -> Result<u64, SemaphoreError> {
        // SAFETY: handle is a timeline semaphore owned by self.
        unsafe { self.ctx.device().get_raw_semaphore_counter_value(self.handle) }
            .map_err(SemaphoreError::Vulkan)
    }

    /// Block until the counter reaches `value`.
    pub fn wait(&self, value: u64) -> Result<(), SemaphoreError> {
        let _span =
            tracing::debug_span!("wait_timeline_semaphore", value).entered();
        // SAFETY: handle is a timeline semaphore owned by self.
        unsafe {
            self.ctx
                .device()
                .wait_raw_semaphore(self.handle, value, u64::MAX)
        }
        .map_err(|e| SemaphoreError::Wait(e.into()))
    }

    /// Set the counter to `value` from the host.
    pub fn signal(&self, value: u64) -> Result<(), SemaphoreError> {
        let current = self.value()?;
        if value <= current {
            return Err(SemaphoreError::NotIncreasing {
                current,
                requested: value,
            });
        }
        // SAFETY: handle is a timeline semaphore owned by self and `value`
        // exceeds its current value.
        unsafe { self.ctx.device().signal_raw_semaphore(self.handle, value) }
            .map_err(SemaphoreError::Vulkan)
    }

    pub fn raw_semaphore(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        tracing::debug!("Dropping timeline semaphore {:?}", self.handle);
        // SAFETY: handle was created from this context's device. No pending
        // GPU work may reference it.
        unsafe { self.ctx.device().destroy_raw_semaphore(self.handle) };
    }
}
