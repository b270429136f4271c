use std::fmt;
use std::iter::FusedIterator;
use std::net::Ipv4Addr;
use std::str::FromStr;

use super::{split_contiguous, PartitionError};

/// The addressable hosts of an IPv4 network
///
/// Host bits in the parsed address are ignored. Network and broadcast addresses are
/// excluded for prefixes up to /30; a /31 yields both of its addresses and a /32
/// yields its single address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRange {
    network: Ipv4Addr,
    prefix: u8,
    first_host: u32,
    host_count: u64,
}

impl HostRange {
    /// Build a host range from a network address and prefix length
    pub fn new(address: Ipv4Addr, prefix: u8) -> Result<Self, PartitionError> {
        if prefix > 32 {
            return Err(PartitionError::invalid_network(
                format!("{address}/{prefix}"),
                "prefix length must be between 0 and 32",
            ));
        }

        let mask = prefix_to_mask(prefix);
        let network = u32::from(address) & mask;
        let block = 1u64 << (32 - u32::from(prefix));

        let (first_host, host_count) = match prefix {
            32 => (network, 1),
            31 => (network, 2),
            _ => (network + 1, block - 2),
        };

        Ok(Self {
            network: Ipv4Addr::from(network),
            prefix,
            first_host,
            host_count,
        })
    }

    /// Parse CIDR notation, e.g. `"192.168.1.0/24"` or `"10.0.0.0/255.255.0.0"`
    pub fn parse(cidr: &str) -> Result<Self, PartitionError> {
        let (address, mask) = cidr
            .split_once('/')
            .ok_or_else(|| PartitionError::invalid_network(cidr, "expected address/mask"))?;
        Self::from_parts(address, mask)
    }

    /// Build a host range from an address and a mask given either as a prefix length
    /// (`"24"`) or as a dotted netmask (`"255.255.255.0"`)
    pub fn from_parts(address: &str, mask: &str) -> Result<Self, PartitionError> {
        let input = format!("{address}/{mask}");
        let address = Ipv4Addr::from_str(address.trim())
            .map_err(|e| PartitionError::invalid_network(&input, e.to_string()))?;

        let mask = mask.trim();
        let prefix = if mask.contains('.') {
            let netmask = Ipv4Addr::from_str(mask)
                .map_err(|e| PartitionError::invalid_network(&input, e.to_string()))?;
            netmask_to_prefix(netmask)
                .ok_or_else(|| PartitionError::invalid_network(&input, "netmask is not contiguous"))?
        } else {
            mask.parse::<u8>()
                .map_err(|e| PartitionError::invalid_network(&input, e.to_string()))?
        };

        Self::new(address, prefix)
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Number of addressable hosts
    pub fn host_count(&self) -> u64 {
        self.host_count
    }

    /// Every host, in address order, lazily
    pub fn hosts(&self) -> AddressSlice {
        AddressSlice::new(self.first_host, self.host_count)
    }

    /// Split the hosts into exactly `fanout` contiguous lazy slices
    pub fn split(&self, fanout: usize) -> Result<Vec<AddressSlice>, PartitionError> {
        let slices = split_contiguous(self.host_count, fanout)?
            .into_iter()
            .map(|range| {
                // Offsets stay below 2^32 so the start fits the address space
                AddressSlice::new(self.first_host + range.start as u32, range.end - range.start)
            })
            .collect();
        Ok(slices)
    }
}

impl fmt::Display for HostRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for HostRange {
    type Err = PartitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn prefix_to_mask(prefix: u8) -> u32 {
    match prefix {
        0 => 0,
        p => u32::MAX << (32 - u32::from(p)),
    }
}

fn netmask_to_prefix(netmask: Ipv4Addr) -> Option<u8> {
    let bits = u32::from(netmask);
    let prefix = bits.leading_ones();
    (bits.checked_shl(prefix).unwrap_or(0) == 0).then_some(prefix as u8)
}

/// A lazy, contiguous run of IPv4 addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSlice {
    next: u64,
    end: u64,
}

impl AddressSlice {
    fn new(start: u32, len: u64) -> Self {
        let next = u64::from(start);
        Self {
            next,
            end: next + len,
        }
    }

    /// First address not yet yielded, if any remain
    pub fn first(&self) -> Option<Ipv4Addr> {
        (self.next < self.end).then(|| Ipv4Addr::from(self.next as u32))
    }

    pub fn is_empty(&self) -> bool {
        self.next >= self.end
    }
}

impl Iterator for AddressSlice {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Self::Item> {
        let address = self.first()?;
        self.next += 1;
        Some(address)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for AddressSlice {}

impl FusedIterator for AddressSlice {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_c_host_count() {
        let range = HostRange::parse("192.168.1.77/24").unwrap();
        assert_eq!(range.network(), Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(range.host_count(), 254);

        let mut hosts = range.hosts();
        assert_eq!(hosts.next(), Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(hosts.last(), Some(Ipv4Addr::new(192, 168, 1, 254)));
    }

    #[test]
    fn test_split_into_five_contiguous_slices() {
        let range = HostRange::parse("192.168.1.0/24").unwrap();
        let slices = range.split(5).unwrap();

        let sizes: Vec<usize> = slices.iter().map(ExactSizeIterator::len).collect();
        assert_eq!(sizes, vec![51, 51, 51, 51, 50]);

        let rebuilt: Vec<Ipv4Addr> = slices.into_iter().flatten().collect();
        let expected: Vec<Ipv4Addr> = range.hosts().collect();
        assert_eq!(rebuilt, expected);
    }

    #[test]
    fn test_dotted_netmask() {
        let by_mask = HostRange::from_parts("10.1.2.3", "255.255.0.0").unwrap();
        let by_prefix = HostRange::from_parts("10.1.0.0", "16").unwrap();
        assert_eq!(by_mask, by_prefix);
        assert_eq!(by_mask.host_count(), 65_534);
        assert_eq!(by_mask.to_string(), "10.1.0.0/16");
    }

    #[test]
    fn test_point_to_point_and_single_host() {
        let p2p = HostRange::parse("10.0.0.4/31").unwrap();
        assert_eq!(
            p2p.hosts().collect::<Vec<_>>(),
            vec![Ipv4Addr::new(10, 0, 0, 4), Ipv4Addr::new(10, 0, 0, 5)]
        );

        let single = HostRange::parse("10.0.0.9/32").unwrap();
        assert_eq!(single.hosts().collect::<Vec<_>>(), vec![Ipv4Addr::new(10, 0, 0, 9)]);
    }

    #[test]
    fn test_small_range_yields_empty_trailing_slices() {
        let range = HostRange::parse("10.0.0.0/30").unwrap();
        let slices = range.split(5).unwrap();
        assert_eq!(slices.len(), 5);
        assert_eq!(slices[0].first(), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(slices[1].first(), Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert!(slices[2..].iter().all(AddressSlice::is_empty));
    }

    #[test]
    fn test_whole_address_space_stays_lazy() {
        let range = HostRange::parse("0.0.0.0/0").unwrap();
        assert_eq!(range.host_count(), (1u64 << 32) - 2);

        let slices = range.split(5).unwrap();
        assert_eq!(slices[0].first(), Some(Ipv4Addr::new(0, 0, 0, 1)));
        assert_eq!(slices.iter().map(|s| s.len() as u64).sum::<u64>(), range.host_count());
    }

    #[test]
    fn test_invalid_networks() {
        assert!(HostRange::parse("192.168.1.0").is_err());
        assert!(HostRange::parse("192.168.1.0/33").is_err());
        assert!(HostRange::parse("300.1.1.1/24").is_err());
        assert!(HostRange::from_parts("10.0.0.0", "255.0.255.0").is_err());
        assert!(HostRange::from_parts("10.0.0.0", "abc").is_err());
    }
}
