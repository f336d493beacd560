//! Alias table: union-find over every name a device is known by.
//!
//! Keys are namespaced (`ip:`, `name:`, `chassis:`) so an address and a
//! hostname that happen to look alike never collide. Each set carries at most
//! one canonical identity; a union that would join two distinct identities is
//! refused.

use std::collections::BTreeMap;
use std::net::IpAddr;

/// A raw identity a device can be referred to by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Alias {
    Address(IpAddr),
    Name(String),
    Chassis(String),
}

impl Alias {
    fn key(&self) -> String {
        match self {
            Self::Address(ip) => format!("ip:{}", ip),
            Self::Name(name) => format!("name:{}", name.trim().to_lowercase()),
            Self::Chassis(id) => format!("chassis:{}", normalize_chassis(id)),
        }
    }

    /// Names also match without their domain suffix.
    fn variants(&self) -> Vec<String> {
        let mut keys = vec![self.key()];
        if let Self::Name(name) = self {
            let name = name.trim();
            if name.parse::<IpAddr>().is_err() {
                if let Some((short, _)) = name.split_once('.') {
                    if !short.is_empty() {
                        keys.push(format!("name:{}", short.to_lowercase()));
                    }
                }
            }
        }
        keys
    }

    /// Parse free text (an inventory alias, a neighbor's reported address).
    pub fn parse(text: &str) -> Self {
        match text.trim().parse::<IpAddr>() {
            Ok(ip) => Self::Address(ip),
            Err(_) => Self::Name(text.trim().to_string()),
        }
    }
}

/// Chassis ids come as `0011.2233.4455`, `00-11-22-33-44-55` or
/// `00:11:22:33:44:55`; compare hex digits only.
fn normalize_chassis(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Why a union was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasConflict {
    pub kept: String,
    pub other: String,
    pub alias: String,
}

#[derive(Debug, Default)]
pub struct AliasTable {
    index: BTreeMap<String, usize>,
    parent: Vec<usize>,
    identity: Vec<Option<String>>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, key: String) -> usize {
        if let Some(&i) = self.index.get(&key) {
            return i;
        }
        let i = self.parent.len();
        self.parent.push(i);
        self.identity.push(None);
        self.index.insert(key, i);
        i
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, x: usize, y: usize) -> Result<usize, (String, String)> {
        let (rx, ry) = (self.find(x), self.find(y));
        if rx == ry {
            return Ok(rx);
        }
        match (&self.identity[rx], &self.identity[ry]) {
            (Some(a), Some(b)) if a != b => return Err((a.clone(), b.clone())),
            _ => {}
        }
        let (root, child) = if rx < ry { (rx, ry) } else { (ry, rx) };
        self.parent[child] = root;
        if self.identity[root].is_none() {
            self.identity[root] = self.identity[child].take();
        }
        Ok(root)
    }

    /// Register a device under `id` with all of its aliases.
    ///
    /// Aliases already owned by a different identity are skipped and
    /// reported.
    pub fn insert(&mut self, id: &str, aliases: &[Alias]) -> Vec<AliasConflict> {
        let own = self.slot(format!("id:{}", id));
        let root = self.find(own);
        if self.identity[root].is_none() {
            self.identity[root] = Some(id.to_string());
        }
        let mut conflicts = Vec::new();
        for alias in aliases {
            for key in alias.variants() {
                let slot = self.slot(key);
                if let Err((kept, other)) = self.union(own, slot) {
                    let (kept, other) = if kept == id { (kept, other) } else { (other, kept) };
                    conflicts.push(AliasConflict {
                        kept,
                        other,
                        alias: format!("{:?}", alias),
                    });
                }
            }
        }
        conflicts
    }

    /// Canonical identity an alias resolves to.
    pub fn resolve(&mut self, alias: &Alias) -> Option<String> {
        let key = alias.key();
        let i = *self.index.get(&key)?;
        let root = self.find(i);
        self.identity[root].clone()
    }

    /// Try each alias in order, returning the first hit.
    pub fn resolve_any(&mut self, aliases: &[Alias]) -> Option<String> {
        aliases.iter().find_map(|a| self.resolve(a))
    }

    /// Whether an identity is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(&format!("id:{}", id))
    }
}
