//! Queue roles and queue-family discovery.
//!
//! Work is submitted on one of three logical roles ([`QueueRole`]). A
//! device may expose fewer hardware families than roles, in which case
//! roles alias: dedicated roles fall back to a more general family and
//! the graphics family is the universal fallback.
//!
//! [`resolve_queue_families`] implements that policy over the raw
//! `VkQueueFamilyProperties` list and is used both by
//! [`Context::new`](crate::context::Context::new) when the caller does not
//! supply indices and by the headless bootstrap in
//! [`instance`](crate::instance).

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueDiscoveryError {
    #[error("No queue family supports graphics, compute and transfer")]
    NoGraphicsFamily,
}

/// The logical category of work a command buffer is recorded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueueRole {
    Graphics,
    Compute,
    Transfer,
}

impl QueueRole {
    pub const ALL: [QueueRole; 3] =
        [QueueRole::Graphics, QueueRole::Compute, QueueRole::Transfer];

    /// Dense index used for per-role arrays.
    pub const fn index(self) -> usize {
        match self {
            QueueRole::Graphics => 0,
            QueueRole::Compute => 1,
            QueueRole::Transfer => 2,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            QueueRole::Graphics => "graphics",
            QueueRole::Compute => "compute",
            QueueRole::Transfer => "transfer",
        }
    }
}

/// Queue family index for every role. Roles may share a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    pub fn get(&self, role: QueueRole) -> u32 {
        match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Compute => self.compute,
            QueueRole::Transfer => self.transfer,
        }
    }

    /// Distinct family indices in role order.
    ///
    /// Vulkan requires the family list of a `CONCURRENT` resource to be
    /// unique, so this is what resources pass as
    /// `pQueueFamilyIndices`.
    pub fn unique(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(3);
        for role in QueueRole::ALL {
            let family = self.get(role);
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }

    /// `CONCURRENT` when resources must be visible to more than one
    /// family, `EXCLUSIVE` otherwise.
    pub fn sharing_mode(&self) -> vk::SharingMode {
        if self.unique().len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        }
    }
}

/// One queue handle per role. Aliased roles carry the same handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueHandles {
    pub graphics: vk::Queue,
    pub compute: vk::Queue,
    pub transfer: vk::Queue,
}

impl QueueHandles {
    pub fn get(&self, role: QueueRole) -> vk::Queue {
        match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Compute => self.compute,
            QueueRole::Transfer => self.transfer,
        }
    }
}

/// Graphics and compute families implicitly support transfer operations
/// even when the driver does not report the bit.
fn effective_flags(flags: vk::QueueFlags) -> vk::QueueFlags {
    if flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE) {
        flags | vk::QueueFlags::TRANSFER
    } else {
        flags
    }
}

/// Pick a family for each role.
///
/// * graphics: the first family with graphics, compute and transfer.
/// * compute: the first family with compute and transfer but no
///   graphics, else the graphics family.
/// * transfer: the first transfer-only family, else the compute family.
pub fn resolve_queue_families(
    families: &[vk::QueueFamilyProperties],
) -> Result<QueueFamilies, QueueDiscoveryError> {
    use vk::QueueFlags as Q;

    let mut graphics = None;
    let mut compute = None;
    let mut transfer = None;

    for (idx, props) in families.iter().enumerate() {
        if props.queue_count == 0 {
            continue;
        }
        let idx = idx as u32;
        let flags = effective_flags(props.queue_flags);
        if flags.contains(Q::GRAPHICS | Q::COMPUTE | Q::TRANSFER) {
            graphics.get_or_insert(idx);
        } else if flags.contains(Q::COMPUTE | Q::TRANSFER) {
            compute.get_or_insert(idx);
        } else if flags.contains(Q::TRANSFER) {
            transfer.get_or_insert(idx);
        }
    }

    let graphics = graphics.ok_or(QueueDiscoveryError::NoGraphicsFamily)?;
    let compute = compute.unwrap_or(graphics);
    let transfer = transfer.unwrap_or(compute);

    Ok(QueueFamilies {
        graphics,
        compute,
        transfer,
    })
}

/// The operations each role's family supports, indexed by
/// [`QueueRole::index`]. A family index outside `families` supports
/// nothing.
pub fn role_capabilities(
    roles: &QueueFamilies,
    families: &[vk::QueueFamilyProperties],
) -> [vk::QueueFlags; 3] {
    QueueRole::ALL.map(|role| {
        families
            .get(roles.get(role) as usize)
            .map_or(vk::QueueFlags::empty(), |props| {
                effective_flags(props.queue_flags)
            })
    })
}
