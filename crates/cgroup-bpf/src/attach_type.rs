use strum::{Display, EnumCount, EnumIter, EnumString};

/// Hook points where a chain of programs can be attached to a cgroup.
///
/// Every cgroup has one attachment list and one effective chain for each
/// variant, so this enum is also used to index those per-hook arrays.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumCount, EnumIter, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum AttachType {
    /// Packets received by a socket of the cgroup
    InetIngress,
    /// Packets sent by a socket of the cgroup
    InetEgress,
    /// Creation of an inet socket
    InetSockCreate,
    /// Socket operations (connection setup, retransmit timers, ...)
    SockOps,
}

impl AttachType {
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}
