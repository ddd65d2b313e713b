//! Port catalog and availability probing.
//!
//! The catalog is a fixed list of named, non-overlapping port ranges above
//! the well-known range and below the OS dynamic range, so ports chosen from
//! it rarely collide with ephemeral client ports. [`PortAllocator`] walks the
//! catalog and asks the OS which ports are currently free.
//!
//! # Example
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use conduit_net::ports::PortAllocator;
//!
//! let allocator = PortAllocator::default();
//! if let Some(port) = allocator.find_available(Ipv4Addr::LOCALHOST) {
//!     println!("port {port} is free");
//! }
//! ```

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::ops::RangeInclusive;

use conduit_core::logging::targets;

/// A named, inclusive range of ports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PortRange {
    /// Catalog name of the range.
    pub name: &'static str,
    /// First port in the range.
    pub min: u16,
    /// Last port in the range.
    pub max: u16,
}

impl PortRange {
    /// Create a range. `min` must not exceed `max`.
    pub const fn new(name: &'static str, min: u16, max: u16) -> Self {
        Self { name, min, max }
    }

    /// Whether `port` lies in the range.
    pub fn contains(&self, port: u16) -> bool {
        (self.min..=self.max).contains(&port)
    }

    /// Number of ports in the range.
    pub fn len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        usize::from(self.max - self.min) + 1
    }

    /// Whether the range is empty. Catalog ranges never are.
    pub fn is_empty(&self) -> bool {
        self.max < self.min
    }

    /// Iterate the ports in ascending order.
    pub fn iter(&self) -> RangeInclusive<u16> {
        self.min..=self.max
    }

    /// Whether two ranges share any port.
    pub fn overlaps(&self, other: &PortRange) -> bool {
        self.min <= other.max && other.min <= self.max
    }
}

/// The built-in catalog, in ascending order.
pub const PORT_CATALOG: &[PortRange] = &[
    PortRange::new("unassigned-29170", 29170, 29998),
    PortRange::new("unassigned-38866", 38866, 39680),
    PortRange::new("unassigned-41798", 41798, 42507),
    PortRange::new("unassigned-46337", 46337, 46997),
    PortRange::new("unassigned-48620", 48620, 49150),
];

/// Selects ports from a catalog, optionally filtered by OS availability.
#[derive(Clone, Copy, Debug)]
pub struct PortAllocator {
    catalog: &'static [PortRange],
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(PORT_CATALOG)
    }
}

impl PortAllocator {
    /// Create an allocator over a custom catalog.
    pub fn new(catalog: &'static [PortRange]) -> Self {
        Self { catalog }
    }

    /// The catalog ranges.
    pub fn ranges(&self) -> &'static [PortRange] {
        self.catalog
    }

    /// Look up a range by name.
    pub fn range(&self, name: &str) -> Option<&'static PortRange> {
        self.catalog.iter().find(|range| range.name == name)
    }

    /// Every catalog port, range by range.
    pub fn ports(&self) -> impl Iterator<Item = u16> + 'static {
        self.catalog.iter().flat_map(PortRange::iter)
    }

    /// Probe whether `port` can currently be bound on `address`.
    ///
    /// The answer is only a snapshot: another process may take the port
    /// before the caller binds it.
    pub fn is_available(address: Ipv4Addr, port: u16) -> bool {
        TcpListener::bind(SocketAddrV4::new(address, port)).is_ok()
    }

    /// Catalog ports that are currently free on `address`, lazily probed.
    pub fn available_ports(&self, address: Ipv4Addr) -> impl Iterator<Item = u16> + 'static {
        self.ports()
            .filter(move |&port| Self::is_available(address, port))
    }

    /// The first free catalog port on `address`.
    pub fn find_available(&self, address: Ipv4Addr) -> Option<u16> {
        let port = self.available_ports(address).next();
        tracing::debug!(target: targets::PORTS, %address, ?port, "probed port catalog");
        port
    }

    /// The first free port on `address` in the named range.
    pub fn find_available_in(&self, name: &str, address: Ipv4Addr) -> Option<u16> {
        self.range(name)?
            .iter()
            .find(|&port| Self::is_available(address, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::is_reserved_port;

    #[test]
    fn test_catalog_ranges_are_well_formed() {
        for range in PORT_CATALOG {
            assert!(range.min <= range.max, "{} is inverted", range.name);
            assert!(!is_reserved_port(range.min), "{} is reserved", range.name);
            assert!(!range.is_empty());
        }
    }

    #[test]
    fn test_catalog_ranges_do_not_overlap() {
        for (i, a) in PORT_CATALOG.iter().enumerate() {
            for b in &PORT_CATALOG[i + 1..] {
                assert!(!a.overlaps(b), "{} overlaps {}", a.name, b.name);
            }
        }
    }

    #[test]
    fn test_catalog_names_are_unique() {
        let allocator = PortAllocator::default();
        for range in PORT_CATALOG {
            assert_eq!(allocator.range(range.name), Some(range));
        }
    }

    #[test]
    fn test_range_len_and_contains() {
        let range = PortRange::new("test", 46337, 46997);
        assert_eq!(range.len(), 661);
        assert!(range.contains(46337));
        assert!(range.contains(46997));
        assert!(!range.contains(46998));
        assert_eq!(range.iter().count(), range.len());
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let range = PortRange::new("inverted", 46997, 46337);
        assert!(range.is_empty());
        assert_eq!(range.len(), 0);
        assert_eq!(range.iter().count(), range.len());

        let single = PortRange::new("single", 46400, 46400);
        assert!(!single.is_empty());
        assert_eq!(single.len(), 1);
    }
}
