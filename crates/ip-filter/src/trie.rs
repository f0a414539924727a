use std::net::IpAddr;

use ipnet::IpNet;

/// A binary prefix trie over IP networks.
///
/// Nodes live in a flat arena indexed by `u32`; IPv4 and IPv6 networks hang
/// off separate roots so a v4 entry can never match a v6 address.
pub struct NetworkTrie {
    nodes: Vec<Node>,
    root_v4: u32,
    root_v6: u32,
    entries: usize,
}

#[derive(Default)]
struct Node {
    children: [Option<u32>; 2],
    terminal: bool,
}

/// Left-align an address in a `u128` so bit 0 is always the MSB.
fn address_bits(addr: IpAddr) -> (u128, u8) {
    match addr {
        IpAddr::V4(v4) => ((u32::from(v4) as u128) << 96, 32),
        IpAddr::V6(v6) => (u128::from(v6), 128),
    }
}

fn bit_at(bits: u128, index: u8) -> usize {
    ((bits >> (127 - index as u32)) & 1) as usize
}

impl NetworkTrie {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default(), Node::default()],
            root_v4: 0,
            root_v6: 1,
            entries: 0,
        }
    }

    fn root_for(&self, addr: IpAddr) -> u32 {
        match addr {
            IpAddr::V4(_) => self.root_v4,
            IpAddr::V6(_) => self.root_v6,
        }
    }

    /// Insert a network. Returns `false` if the exact network was already present.
    pub fn insert(&mut self, network: IpNet) -> bool {
        let network = network.trunc();
        let (bits, _) = address_bits(network.network());
        let mut current = self.root_for(network.network());

        for index in 0..network.prefix_len() {
            let bit = bit_at(bits, index);
            current = match self.nodes[current as usize].children[bit] {
                Some(next) => next,
                None => {
                    let next = self.nodes.len() as u32;
                    self.nodes.push(Node::default());
                    self.nodes[current as usize].children[bit] = Some(next);
                    next
                }
            };
        }

        let node = &mut self.nodes[current as usize];
        if node.terminal {
            return false;
        }
        node.terminal = true;
        self.entries += 1;
        true
    }

    /// Returns `true` if any inserted network contains `addr`.
    pub fn contains(&self, addr: IpAddr) -> bool {
        let (bits, width) = address_bits(addr);
        let mut current = self.root_for(addr);

        for index in 0..=width {
            let node = &self.nodes[current as usize];
            if node.terminal {
                return true;
            }
            if index == width {
                break;
            }
            match node.children[bit_at(bits, index)] {
                Some(next) => current = next,
                None => return false,
            }
        }

        false
    }

    /// Number of distinct networks inserted.
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

impl Default for NetworkTrie {
    fn default() -> Self {
        Self::new()
    }
}
