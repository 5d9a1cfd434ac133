//! Process ancestry reconstruction
//!
//! Built once, bottom-up, from the final segregated process logs after the
//! streams have closed. Records may arrive in any order: a pid can be named
//! as a parent before its own record shows up, and a later record for the
//! same pid overwrites the earlier one (last write wins).
//!
//! Root ordering is deterministic: roots and child lists are sorted by pid,
//! never emitted in map iteration order.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::scan::Record;

/// One process with its owned children.
///
/// Ownership is via the child vector; lookup is by traversal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessNode {
    pub pid: i32,
    pub ppid: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub process_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ProcessNode>,
}

/// Multi-root ancestry tree over one scan session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessForest {
    pub roots: Vec<ProcessNode>,
}

/// Flat node state accumulated during the upsert pass.
#[derive(Debug, Clone)]
struct NodeSeed {
    pid: i32,
    ppid: i32,
    process_name: String,
    command: String,
}

impl ProcessForest {
    /// Reconstruct the forest from process-category records.
    ///
    /// Three passes: (1) upsert one seed per pid, last record wins;
    /// (2) link every node whose parent exists into that parent's child list;
    /// (3) everything else (ppid zero, self-parented, or orphaned) becomes a
    /// root exactly once.
    pub fn build(records: &[Record]) -> ProcessForest {
        let mut seeds: BTreeMap<i32, NodeSeed> = BTreeMap::new();
        for record in records {
            seeds.insert(
                record.host_pid,
                NodeSeed {
                    pid: record.host_pid,
                    ppid: record.host_ppid,
                    process_name: record.process_name.clone(),
                    command: record.resource.clone(),
                },
            );
        }

        let mut children: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
        let mut root_pids: Vec<i32> = Vec::new();
        let mut seen_roots: BTreeSet<i32> = BTreeSet::new();

        for seed in seeds.values() {
            let is_root =
                seed.ppid == 0 || seed.ppid == seed.pid || !seeds.contains_key(&seed.ppid);
            if is_root {
                // A pid must not land in the roots list twice even if the
                // upsert pass saw it several times.
                if seen_roots.insert(seed.pid) {
                    root_pids.push(seed.pid);
                }
            } else {
                children.entry(seed.ppid).or_default().push(seed.pid);
            }
        }

        root_pids.sort_unstable();

        let roots = root_pids
            .iter()
            .map(|pid| Self::materialize(*pid, &seeds, &children))
            .collect();

        ProcessForest { roots }
    }

    fn materialize(
        pid: i32,
        seeds: &BTreeMap<i32, NodeSeed>,
        children: &BTreeMap<i32, Vec<i32>>,
    ) -> ProcessNode {
        let seed = &seeds[&pid];
        // Child pid lists come out of a BTreeMap pass in insertion order;
        // sort them so sibling order is reproducible.
        let mut child_pids = children.get(&pid).cloned().unwrap_or_default();
        child_pids.sort_unstable();

        ProcessNode {
            pid: seed.pid,
            ppid: seed.ppid,
            process_name: seed.process_name.clone(),
            command: seed.command.clone(),
            children: child_pids
                .into_iter()
                .map(|c| Self::materialize(c, seeds, children))
                .collect(),
        }
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    /// Total nodes reachable from the roots.
    pub fn node_count(&self) -> usize {
        fn count(node: &ProcessNode) -> usize {
            1 + node.children.iter().map(count).sum::<usize>()
        }
        self.roots.iter().map(count).sum()
    }

    /// Find a node by pid via traversal.
    pub fn find(&self, pid: i32) -> Option<&ProcessNode> {
        fn walk<'a>(node: &'a ProcessNode, pid: i32) -> Option<&'a ProcessNode> {
            if node.pid == pid {
                return Some(node);
            }
            node.children.iter().find_map(|c| walk(c, pid))
        }
        self.roots.iter().find_map(|r| walk(r, pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process_log(pid: i32, ppid: i32, name: &str) -> Record {
        Record {
            host_pid: pid,
            host_ppid: ppid,
            process_name: name.to_string(),
            operation: "Process".to_string(),
            resource: format!("/usr/bin/{}", name),
            ..Record::default()
        }
    }

    #[test]
    fn test_init_child_and_orphan() {
        let records = vec![
            process_log(1, 0, "init"),
            process_log(2, 1, "sh"),
            process_log(3, 99, "orphan"),
        ];
        let forest = ProcessForest::build(&records);

        assert_eq!(forest.root_count(), 2);
        assert_eq!(forest.roots[0].pid, 1);
        assert_eq!(forest.roots[0].process_name, "init");
        assert_eq!(forest.roots[0].children.len(), 1);
        assert_eq!(forest.roots[0].children[0].process_name, "sh");
        assert_eq!(forest.roots[1].pid, 3);
        assert!(forest.roots[1].children.is_empty());
    }

    #[test]
    fn test_self_parented_node_is_a_root() {
        let forest = ProcessForest::build(&[process_log(7, 7, "kthreadd")]);
        assert_eq!(forest.root_count(), 1);
        assert_eq!(forest.roots[0].pid, 7);
    }

    #[test]
    fn test_out_of_order_arrival_links_correctly() {
        // Children arrive before their parent.
        let records = vec![
            process_log(30, 10, "b"),
            process_log(20, 10, "a"),
            process_log(10, 0, "parent"),
        ];
        let forest = ProcessForest::build(&records);

        assert_eq!(forest.root_count(), 1);
        let children: Vec<i32> = forest.roots[0].children.iter().map(|c| c.pid).collect();
        assert_eq!(children, vec![20, 30]);
    }

    #[test]
    fn test_last_record_wins_for_a_pid() {
        let records = vec![
            process_log(5, 1, "old-name"),
            process_log(1, 0, "init"),
            process_log(5, 1, "new-name"),
        ];
        let forest = ProcessForest::build(&records);
        assert_eq!(forest.find(5).unwrap().process_name, "new-name");
        assert_eq!(forest.node_count(), 2);
    }

    #[test]
    fn test_root_count_matches_root_predicate() {
        // zero-parent, self-parent, orphan, and one proper child.
        let records = vec![
            process_log(1, 0, "zero"),
            process_log(2, 2, "selfref"),
            process_log(3, 777, "orphan"),
            process_log(4, 1, "child"),
        ];
        let forest = ProcessForest::build(&records);
        assert_eq!(forest.root_count(), 3);

        let root_pids: Vec<i32> = forest.roots.iter().map(|r| r.pid).collect();
        assert_eq!(root_pids, vec![1, 2, 3]);
    }

    #[test]
    fn test_duplicate_records_produce_one_root() {
        let records = vec![
            process_log(1, 0, "init"),
            process_log(1, 0, "init"),
            process_log(1, 0, "init"),
        ];
        let forest = ProcessForest::build(&records);
        assert_eq!(forest.root_count(), 1);
    }

    #[test]
    fn test_child_lists_exactly_match_parent_pids() {
        let records = vec![
            process_log(1, 0, "init"),
            process_log(2, 1, "a"),
            process_log(3, 1, "b"),
            process_log(4, 2, "c"),
        ];
        let forest = ProcessForest::build(&records);

        let init = forest.find(1).unwrap();
        let child_pids: Vec<i32> = init.children.iter().map(|c| c.pid).collect();
        assert_eq!(child_pids, vec![2, 3]);
        assert_eq!(forest.find(2).unwrap().children[0].pid, 4);
        assert!(forest.find(3).unwrap().children.is_empty());
    }

    #[test]
    fn test_roots_serialize_under_roots_key() {
        let forest = ProcessForest::build(&[process_log(1, 0, "init")]);
        let json = serde_json::to_value(&forest).unwrap();
        assert!(json["roots"].is_array());
        assert_eq!(json["roots"][0]["pid"], 1);
        // Empty child lists are omitted from the artifact.
        assert!(json["roots"][0].get("children").is_none());
    }

    #[test]
    fn test_empty_input_builds_empty_forest() {
        let forest = ProcessForest::build(&[]);
        assert_eq!(forest.root_count(), 0);
        assert_eq!(forest.node_count(), 0);
    }
}
