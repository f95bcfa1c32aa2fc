//! Deduplicated sets of CIDR netblocks

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;

/// A deduplicated collection of CIDR strings
///
/// Members are keyed by their exact text, so `10.0.0.0/8` and `010.0.0.0/8`
/// are distinct entries. Iteration is in lexicographic order, which makes
/// [`CidrSet::best_match`] and [`CidrSet::arbitrary_member`] deterministic.
/// Strings that do not parse as CIDR blocks may be stored but never match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CidrSet {
    blocks: BTreeSet<String>,
}

impl CidrSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block; inserting an existing string is a no-op
    ///
    /// Returns `true` if the string was not already present.
    pub fn insert(&mut self, cidr: impl Into<String>) -> bool {
        self.blocks.insert(cidr.into())
    }

    /// Add every block from `other`
    pub fn union(&mut self, other: &CidrSet) {
        self.blocks.extend(other.blocks.iter().cloned());
    }

    /// Check whether this exact string is a member
    pub fn contains(&self, cidr: &str) -> bool {
        self.blocks.contains(cidr)
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Iterate members in lexicographic order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(String::as_str)
    }

    /// Return the member that best contains `address`
    ///
    /// The most specific block (longest prefix) wins; among equally specific
    /// blocks the lexicographically smallest string wins. Malformed members
    /// are skipped.
    pub fn best_match(&self, address: IpAddr) -> Option<&str> {
        let mut best: Option<(&str, u8)> = None;

        for (text, net) in self.parsed() {
            if !net.contains(&address) {
                continue;
            }
            match best {
                Some((_, len)) if len >= net.prefix_len() => {}
                _ => best = Some((text, net.prefix_len())),
            }
        }

        best.map(|(text, _)| text)
    }

    /// Check whether any member contains `address`
    pub fn contains_address(&self, address: IpAddr) -> bool {
        self.parsed().any(|(_, net)| net.contains(&address))
    }

    /// Return some member for use when no address-based match exists
    ///
    /// This is the lexicographically smallest member.
    pub fn arbitrary_member(&self) -> Option<&str> {
        self.blocks.iter().next().map(String::as_str)
    }

    /// Pick the prefix for a record: the best match for `address` if one was
    /// given and found, otherwise an arbitrary member
    pub fn select_prefix(&self, address: Option<IpAddr>) -> Option<&str> {
        address
            .and_then(|addr| self.best_match(addr))
            .or_else(|| self.arbitrary_member())
    }

    fn parsed(&self) -> impl Iterator<Item = (&str, IpNet)> {
        self.blocks
            .iter()
            .filter_map(|text| text.trim().parse::<IpNet>().ok().map(|net| (text.as_str(), net)))
    }
}

impl<S: Into<String>> FromIterator<S> for CidrSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            blocks: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<S: Into<String>> Extend<S> for CidrSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.blocks.extend(iter.into_iter().map(Into::into));
    }
}
