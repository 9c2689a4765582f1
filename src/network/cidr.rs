//! IPv4 CIDR blocks

use crate::StackError;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 network in CIDR notation, e.g. `10.0.0.0/16`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    /// Create a block, rejecting host bits outside the prefix
    pub fn new(network: Ipv4Addr, prefix: u8) -> Result<Self, StackError> {
        let text = format!("{}/{}", network, prefix);
        if prefix > 32 {
            return Err(StackError::cidr(text, "prefix must be at most 32"));
        }
        if u32::from(network) & !mask(prefix) != 0 {
            return Err(StackError::cidr(text, "address has host bits set"));
        }
        Ok(Self { network, prefix })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Number of addresses in the block
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & mask(self.prefix) == u32::from(self.network)
    }

    /// The first `count` blocks of length `new_prefix` inside this one
    pub fn subnets(&self, new_prefix: u8, count: usize) -> Result<Vec<Ipv4Cidr>, StackError> {
        if new_prefix < self.prefix || new_prefix > 32 {
            return Err(StackError::cidr(
                self.to_string(),
                format!("cannot carve /{} blocks", new_prefix),
            ));
        }

        let available = 1u64 << u32::from(new_prefix - self.prefix);
        if count as u64 > available {
            return Err(StackError::cidr(
                self.to_string(),
                format!("only {} /{} blocks fit, {} requested", available, new_prefix, count),
            ));
        }

        let base = u64::from(u32::from(self.network));
        let step = 1u64 << (32 - u32::from(new_prefix));
        (0..count as u64)
            .map(|i| {
                let start = u32::try_from(base + i * step).map_err(|_| {
                    StackError::cidr(self.to_string(), "subnet range overflows IPv4")
                })?;
                Ipv4Cidr::new(Ipv4Addr::from(start), new_prefix)
            })
            .collect()
    }

    /// Split into `count` equal blocks, using the smallest prefix that fits
    ///
    /// `count` is rounded up to a power of two, so three blocks out of a
    /// `/16` are `/18`s and the last quarter stays unallocated.
    pub fn subdivide(&self, count: usize) -> Result<Vec<Ipv4Cidr>, StackError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let bits = count.next_power_of_two().trailing_zeros();
        let new_prefix = u32::from(self.prefix) + bits;
        if new_prefix > 32 {
            return Err(StackError::cidr(
                self.to_string(),
                format!("too small for {} blocks", count),
            ));
        }
        self.subnets(new_prefix as u8, count)
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

impl FromStr for Ipv4Cidr {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| StackError::cidr(s, "expected address/prefix"))?;
        let addr: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|_| StackError::cidr(s, "invalid IPv4 address"))?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .map_err(|_| StackError::cidr(s, "invalid prefix length"))?;
        Self::new(addr, prefix)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}
