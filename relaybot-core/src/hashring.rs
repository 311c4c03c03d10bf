//! Consistent-hash ring mapping request keys to fleet member names.
//!
//! Every node contributes `vnodes_per_node` virtual nodes hashed from
//! `"{name}#{index}"` with CRC32 (IEEE). Lookups hash the key and take the
//! first virtual node clockwise, wrapping to the start of the ring.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualNode {
    pub hash: u32,
    pub node_name: String,
}

pub struct HashRing {
    vnodes_per_node: usize,
    vnodes: Mutex<Vec<VirtualNode>>,
}

impl HashRing {
    pub fn new(vnodes_per_node: usize) -> Self {
        Self {
            vnodes_per_node: vnodes_per_node.max(1),
            vnodes: Mutex::new(Vec::new()),
        }
    }

    pub fn vnodes_per_node(&self) -> usize {
        self.vnodes_per_node
    }

    fn lock(&self) -> MutexGuard<'_, Vec<VirtualNode>> {
        self.vnodes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds every name that is not already on the ring.
    pub fn add_nodes<S: AsRef<str>>(&self, names: &[S]) {
        let mut vnodes = self.lock();
        let mut present: HashSet<String> = vnodes.iter().map(|v| v.node_name.clone()).collect();

        let mut added = false;
        for name in names {
            let name = name.as_ref();
            if name.is_empty() || !present.insert(name.to_string()) {
                continue;
            }
            for index in 0..self.vnodes_per_node {
                vnodes.push(VirtualNode {
                    hash: hash_key(&format!("{}#{}", name, index)),
                    node_name: name.to_string(),
                });
            }
            added = true;
        }

        if added {
            // Ties on hash are broken by name so lookups stay deterministic.
            vnodes.sort_by(|a, b| a.hash.cmp(&b.hash).then_with(|| a.node_name.cmp(&b.node_name)));
        }
    }

    pub fn remove_nodes<S: AsRef<str>>(&self, names: &[S]) {
        let removed: HashSet<&str> = names.iter().map(|name| name.as_ref()).collect();
        self.lock()
            .retain(|vnode| !removed.contains(vnode.node_name.as_str()));
    }

    /// Returns the owner of `key`, or `None` when the ring is empty.
    pub fn get_node(&self, key: &str) -> Option<String> {
        let vnodes = self.lock();
        if vnodes.is_empty() {
            return None;
        }

        let hash = hash_key(key);
        let mut index = vnodes.partition_point(|vnode| vnode.hash < hash);
        if index == vnodes.len() {
            index = 0;
        }

        Some(vnodes[index].node_name.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().iter().any(|vnode| vnode.node_name == name)
    }

    /// Distinct node names currently on the ring, sorted.
    pub fn node_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .iter()
            .map(|vnode| vnode.node_name.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        names.sort();
        names
    }

    pub fn virtual_nodes(&self) -> Vec<VirtualNode> {
        self.lock().clone()
    }
}

pub fn hash_key(key: &str) -> u32 {
    crc32fast::hash(key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("objects/{}/blob-{}.bin", i % 97, i)).collect()
    }

    #[test]
    fn test_empty_ring_has_no_owner() {
        let ring = HashRing::new(8);
        assert_eq!(ring.get_node("obj/1"), None);
        assert!(!ring.contains("bot-a"));
    }

    #[test]
    fn test_virtual_nodes_sorted() {
        let ring = HashRing::new(16);
        ring.add_nodes(&["bot-a", "bot-b", "bot-c"]);

        let vnodes = ring.virtual_nodes();
        assert_eq!(vnodes.len(), 48);
        assert!(vnodes.windows(2).all(|pair| pair[0].hash <= pair[1].hash));
    }

    #[test]
    fn test_lookup_is_total_and_deterministic() {
        let ring = HashRing::new(32);
        ring.add_nodes(&["bot-a", "bot-b", "bot-c"]);

        for key in keys(500) {
            let first = ring.get_node(&key).unwrap();
            let second = ring.get_node(&key).unwrap();
            assert_eq!(first, second);
            assert!(["bot-a", "bot-b", "bot-c"].contains(&first.as_str()));
        }
    }

    #[test]
    fn test_lookup_independent_of_insertion_order() {
        let left = HashRing::new(32);
        left.add_nodes(&["bot-a", "bot-b", "bot-c"]);
        let right = HashRing::new(32);
        right.add_nodes(&["bot-c"]);
        right.add_nodes(&["bot-b", "bot-a"]);

        for key in keys(200) {
            assert_eq!(left.get_node(&key), right.get_node(&key));
        }
    }

    #[test]
    fn test_wraps_to_first_virtual_node() {
        let ring = HashRing::new(1);
        ring.add_nodes(&["bot-a", "bot-b"]);
        let vnodes = ring.virtual_nodes();
        let max_hash = vnodes.last().unwrap().hash;

        let key = keys(10_000)
            .into_iter()
            .find(|key| hash_key(key) > max_hash)
            .expect("a key hashing past the last virtual node");
        assert_eq!(ring.get_node(&key).unwrap(), vnodes[0].node_name);
    }

    #[test]
    fn test_add_and_remove_nodes() {
        let ring = HashRing::new(4);
        ring.add_nodes(&["bot-a", "bot-b"]);
        ring.add_nodes(&["bot-a"]);
        assert_eq!(ring.virtual_nodes().len(), 8);
        assert_eq!(ring.node_names(), vec!["bot-a", "bot-b"]);

        ring.remove_nodes(&["bot-a"]);
        assert!(!ring.contains("bot-a"));
        assert!(ring.contains("bot-b"));
        assert_eq!(ring.get_node("anything").unwrap(), "bot-b");

        ring.remove_nodes(&["bot-missing"]);
        assert_eq!(ring.virtual_nodes().len(), 4);
    }

    #[test]
    fn test_removal_only_remaps_departed_keys() {
        let ring = HashRing::new(100);
        ring.add_nodes(&["bot-a", "bot-b", "bot-c", "bot-d"]);

        let keys = keys(4000);
        let before: Vec<String> = keys.iter().map(|k| ring.get_node(k).unwrap()).collect();

        ring.remove_nodes(&["bot-c"]);
        let mut moved = 0usize;
        for (key, owner) in keys.iter().zip(&before) {
            let after = ring.get_node(key).unwrap();
            if owner != "bot-c" {
                assert_eq!(&after, owner, "key {} moved off a surviving node", key);
            } else {
                moved += 1;
            }
        }

        let fraction = moved as f64 / keys.len() as f64;
        assert!(fraction > 0.15 && fraction < 0.35, "moved fraction {}", fraction);
    }

    #[test]
    fn test_addition_remaps_about_one_over_n() {
        let ring = HashRing::new(100);
        ring.add_nodes(&["bot-a", "bot-b", "bot-c"]);

        let keys = keys(4000);
        let before: Vec<String> = keys.iter().map(|k| ring.get_node(k).unwrap()).collect();

        ring.add_nodes(&["bot-d"]);
        let mut moved = 0usize;
        for (key, owner) in keys.iter().zip(&before) {
            let after = ring.get_node(key).unwrap();
            if &after != owner {
                assert_eq!(after, "bot-d");
                moved += 1;
            }
        }

        let fraction = moved as f64 / keys.len() as f64;
        assert!(fraction > 0.15 && fraction < 0.35, "moved fraction {}", fraction);
    }
}
