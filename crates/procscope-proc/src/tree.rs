//! Process trees built from one enumeration snapshot.

use std::collections::{HashMap, HashSet};

use procscope_core::ProcscopeResult;

use crate::{processes, Fill, Process};

/// Every process from one snapshot, indexed by pid and by parent.
///
/// The map is never updated; build a new one for fresh data. Pid 0 is not
/// a process here, so a ppid of 0 creates no parent edge.
#[derive(Debug, Default)]
pub struct ProcessMap {
    processes: HashMap<u32, Process>,
    children: HashMap<u32, Vec<u32>>,
    parents: HashMap<u32, u32>,
    order: Vec<u32>,
}

impl ProcessMap {
    /// Index `processes`, keeping their order for child lists.
    ///
    /// Handles are expected to be eagerly filled; a process whose ppid
    /// cannot be read gets no parent edge and shows up as a root.
    pub fn build(processes: Vec<Process>) -> Self {
        let mut map = ProcessMap::default();

        for mut process in processes {
            let pid = process.pid();
            if let Ok(ppid) = process.ppid() {
                if ppid != 0 {
                    map.children.entry(ppid).or_default().push(pid);
                    map.parents.insert(pid, ppid);
                }
            }
            if map.processes.insert(pid, process).is_none() {
                map.order.push(pid);
            }
        }

        for (ppid, kids) in &map.children {
            if let Some(parent) = map.processes.get_mut(ppid) {
                parent.set_children(kids.clone());
            }
        }

        map
    }

    pub fn get(&self, pid: u32) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn get_mut(&mut self, pid: u32) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    /// Pids in enumeration order.
    pub fn pids(&self) -> &[u32] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Parent pid recorded for `pid`, if it had a non-zero one.
    pub fn parent(&self, pid: u32) -> Option<u32> {
        self.parents.get(&pid).copied()
    }

    /// Direct children of `pid` in enumeration order. Empty for leaves and
    /// unknown pids.
    pub fn children(&self, pid: u32) -> &[u32] {
        self.children.get(&pid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Processes whose parent is not in the map (or who have none).
    pub fn roots(&self) -> Vec<u32> {
        self.order
            .iter()
            .copied()
            .filter(|pid| match self.parent(*pid) {
                Some(ppid) => !self.processes.contains_key(&ppid),
                None => true,
            })
            .collect()
    }

    /// All descendants of `pid`: its direct children, then each child's
    /// descendants in turn. Empty if `pid` is not in the map.
    pub fn descendants(&self, pid: u32) -> Vec<u32> {
        let mut out = Vec::new();
        if !self.processes.contains_key(&pid) {
            return out;
        }
        let mut seen = HashSet::from([pid]);
        self.collect_descendants(pid, &mut seen, &mut out);
        out
    }

    fn collect_descendants(&self, pid: u32, seen: &mut HashSet<u32>, out: &mut Vec<u32>) {
        // A pid reused mid-snapshot can make the parent graph cyclic
        let kids: Vec<u32> = self
            .children(pid)
            .iter()
            .copied()
            .filter(|child| seen.insert(*child))
            .collect();
        out.extend_from_slice(&kids);
        for child in kids {
            self.collect_descendants(child, seen, out);
        }
    }

    /// Consume the map, yielding handles in enumeration order.
    pub fn into_processes(mut self) -> Vec<Process> {
        self.order
            .iter()
            .filter_map(|pid| self.processes.remove(pid))
            .collect()
    }
}

/// A map of every process on the system.
pub fn process_map() -> ProcscopeResult<ProcessMap> {
    Ok(ProcessMap::build(processes(Fill::Eager)?))
}

/// Direct children of `pid`, from a fresh snapshot.
pub fn children(pid: u32) -> ProcscopeResult<Vec<u32>> {
    Ok(process_map()?.children(pid).to_vec())
}

/// All descendants of `pid`, from a fresh snapshot.
pub fn descendants(pid: u32) -> ProcscopeResult<Vec<u32>> {
    Ok(process_map()?.descendants(pid))
}
