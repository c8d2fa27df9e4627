use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Signed 64-bit ring position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub i64);

impl Token {
    /// First 8 bytes of SHA-256, big-endian
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        Token(i64::from_be_bytes(head))
    }
}

/// Consistent-hash ring; each node owns `vnodes_per_node` positions.
#[derive(Debug)]
pub struct TokenRing {
    positions: BTreeMap<Token, NodeId>,
    node_count: usize,
}

impl TokenRing {
    pub fn new(node_count: usize, vnodes_per_node: usize) -> Self {
        let node_count = node_count.max(1);
        let vnodes_per_node = vnodes_per_node.max(1);

        let mut positions = BTreeMap::new();
        for node in 0..node_count {
            for vnode in 0..vnodes_per_node {
                let token = Token::of(format!("node-{node}/vnode-{vnode}").as_bytes());
                positions.insert(token, NodeId(node));
            }
        }

        Self {
            positions,
            node_count,
        }
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Owner is the first position at or after `token`, wrapping to the start of the ring.
    pub fn owner(&self, token: Token) -> NodeId {
        self.positions
            .range(token..)
            .next()
            .or_else(|| self.positions.iter().next())
            .map(|(_, node)| *node)
            .unwrap_or(NodeId(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_node_owns_everything() {
        let ring = TokenRing::new(1, 4);
        for t in [i64::MIN, -1, 0, 1, i64::MAX] {
            assert_eq!(ring.owner(Token(t)), NodeId(0));
        }
    }

    #[test]
    fn test_wraps_past_last_position() {
        let ring = TokenRing::new(3, 4);
        let last = *ring.positions.keys().next_back().unwrap();
        let first_owner = *ring.positions.values().next().unwrap();

        if last.0 < i64::MAX {
            assert_eq!(ring.owner(Token(last.0 + 1)), first_owner);
        }
        assert_eq!(ring.owner(last), ring.positions[&last]);
    }

    #[test]
    fn test_token_is_stable() {
        assert_eq!(Token::of(b"conversation"), Token::of(b"conversation"));
        assert_ne!(Token::of(b"a"), Token::of(b"b"));
    }
}
