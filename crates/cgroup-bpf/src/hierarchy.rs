use std::{collections::HashMap, fmt, sync::Arc};

use strum::EnumCount;

use crate::{
    attach_type::AttachType,
    effective::EffectiveSlot,
    error::HierarchyError,
    policy::HookState,
    program::Verdict,
};

/// Identifier of a cgroup inside a [`Hierarchy`]. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CgroupId(u64);

impl CgroupId {
    pub const ROOT: CgroupId = CgroupId(1);
}

impl fmt::Display for CgroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cgroup#{}", self.0)
    }
}

/// The part of a cgroup visible to the traffic path.
///
/// Hooks keep an `Arc<Cgroup>` for every socket and run the effective chain
/// through it without ever touching the hierarchy lock.
pub struct Cgroup<C> {
    id: CgroupId,
    path: String,
    effective: [EffectiveSlot<C>; AttachType::COUNT],
}

impl<C> Cgroup<C> {
    fn new(id: CgroupId, path: String) -> Self {
        Self {
            id,
            path,
            effective: std::array::from_fn(|_| EffectiveSlot::default()),
        }
    }

    pub fn id(&self) -> CgroupId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn effective(&self, hook: AttachType) -> &EffectiveSlot<C> {
        &self.effective[hook.index()]
    }

    /// Run the effective chain for `hook` against `ctx`.
    ///
    /// Programs run in chain order and the first rejection wins. Without any
    /// program the operation is accepted.
    pub fn run(&self, hook: AttachType, ctx: &C) -> Verdict {
        self.effective(hook).with(|progs| {
            for prog in progs {
                if Verdict::from_raw(prog.run(ctx)) == Verdict::Reject {
                    log::trace!("{} rejected by {} on {hook}", self.path, prog.name());
                    return Verdict::Reject;
                }
            }
            Verdict::Accept
        })
    }
}

impl<C> fmt::Debug for Cgroup<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cgroup")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

pub(crate) struct Node<C> {
    pub(crate) handle: Arc<Cgroup<C>>,
    pub(crate) parent: Option<CgroupId>,
    pub(crate) children: Vec<CgroupId>,
    bpf: [HookState<C>; AttachType::COUNT],
}

impl<C> Node<C> {
    fn new(handle: Arc<Cgroup<C>>, parent: Option<CgroupId>) -> Self {
        Self {
            handle,
            parent,
            children: Vec::new(),
            bpf: std::array::from_fn(|_| HookState::default()),
        }
    }

    pub(crate) fn hook(&self, hook: AttachType) -> &HookState<C> {
        &self.bpf[hook.index()]
    }

    pub(crate) fn hook_mut(&mut self, hook: AttachType) -> &mut HookState<C> {
        &mut self.bpf[hook.index()]
    }
}

/// Tree of cgroups, starting from a root which can't be removed.
///
/// The hierarchy is only ever accessed under the engine lock, which
/// serializes tree edits and attach operations.
pub(crate) struct Hierarchy<C> {
    root: Arc<Cgroup<C>>,
    nodes: HashMap<CgroupId, Node<C>>,
    paths: HashMap<String, CgroupId>,
    next_id: u64,
}

impl<C> Hierarchy<C> {
    pub(crate) fn new() -> Self {
        let root = Arc::new(Cgroup::new(CgroupId::ROOT, "/".to_string()));
        Self {
            root: root.clone(),
            nodes: HashMap::from([(CgroupId::ROOT, Node::new(root, None))]),
            paths: HashMap::from([("/".to_string(), CgroupId::ROOT)]),
            next_id: CgroupId::ROOT.0 + 1,
        }
    }

    pub(crate) fn root(&self) -> &Arc<Cgroup<C>> {
        &self.root
    }

    pub(crate) fn node(&self, id: CgroupId) -> Result<&Node<C>, HierarchyError> {
        self.nodes.get(&id).ok_or(HierarchyError::UnknownCgroup(id))
    }

    pub(crate) fn node_mut(&mut self, id: CgroupId) -> Result<&mut Node<C>, HierarchyError> {
        self.nodes
            .get_mut(&id)
            .ok_or(HierarchyError::UnknownCgroup(id))
    }

    pub(crate) fn lookup(&self, path: &str) -> Option<CgroupId> {
        self.paths.get(path).copied()
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = CgroupId> + '_ {
        self.nodes.keys().copied()
    }

    /// Create a new cgroup `name` under `parent`. Effective chains are left
    /// empty: copying them from the parent is up to the caller.
    pub(crate) fn insert(&mut self, parent: CgroupId, name: &str) -> Result<CgroupId, HierarchyError> {
        if name.is_empty() || name.contains('/') {
            return Err(HierarchyError::InvalidName(name.to_string()));
        }
        let parent_path = self.node(parent)?.handle.path();
        let path = if parent_path == "/" {
            format!("/{name}")
        } else {
            format!("{parent_path}/{name}")
        };
        if self.paths.contains_key(&path) {
            return Err(HierarchyError::NameExists(path));
        }

        let id = CgroupId(self.next_id);
        self.next_id += 1;
        let handle = Arc::new(Cgroup::new(id, path.clone()));
        self.nodes.insert(id, Node::new(handle, Some(parent)));
        self.paths.insert(path, id);
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Unlink a cgroup without children from the tree.
    pub(crate) fn remove(&mut self, id: CgroupId) -> Result<Node<C>, HierarchyError> {
        let node = self.node(id)?;
        let Some(parent) = node.parent else {
            return Err(HierarchyError::RootRemoval);
        };
        if !node.children.is_empty() {
            return Err(HierarchyError::NotEmpty(id));
        }
        self.node_mut(parent)?.children.retain(|child| *child != id);
        let node = self.nodes.remove(&id).ok_or(HierarchyError::UnknownCgroup(id))?;
        self.paths.remove(node.handle.path());
        Ok(node)
    }

    /// Walk from the parent of `id` up to the root.
    pub(crate) fn ancestors(&self, id: CgroupId) -> Ancestors<'_, C> {
        let next = self.nodes.get(&id).and_then(|node| node.parent);
        Ancestors {
            hierarchy: self,
            next,
        }
    }

    /// Walk from `id` itself up to the root.
    pub(crate) fn self_and_ancestors(&self, id: CgroupId) -> Ancestors<'_, C> {
        Ancestors {
            hierarchy: self,
            next: Some(id),
        }
    }

    /// Pre-order walk of the subtree rooted in `id`, `id` included.
    pub(crate) fn descendants_pre(&self, id: CgroupId) -> DescendantsPre<'_, C> {
        DescendantsPre {
            hierarchy: self,
            stack: vec![id],
            expand: None,
        }
    }
}

pub(crate) struct Ancestors<'a, C> {
    hierarchy: &'a Hierarchy<C>,
    next: Option<CgroupId>,
}

impl<'a, C> Iterator for Ancestors<'a, C> {
    type Item = (CgroupId, &'a Node<C>);

    fn next(&mut self) -> Option<Self::Item> {
        let hierarchy = self.hierarchy;
        let id = self.next?;
        let node = hierarchy.nodes.get(&id)?;
        self.next = node.parent;
        Some((id, node))
    }
}

/// Pre-order iterator which can skip the subtree of the last returned cgroup.
pub(crate) struct DescendantsPre<'a, C> {
    hierarchy: &'a Hierarchy<C>,
    stack: Vec<CgroupId>,
    /// Last returned cgroup, its children are pushed lazily
    expand: Option<CgroupId>,
}

impl<C> DescendantsPre<'_, C> {
    /// Don't descend into the children of the cgroup returned last.
    pub(crate) fn skip_subtree(&mut self) {
        self.expand = None;
    }
}

impl<'a, C> Iterator for DescendantsPre<'a, C> {
    type Item = (CgroupId, &'a Node<C>);

    fn next(&mut self) -> Option<Self::Item> {
        let hierarchy = self.hierarchy;
        if let Some(node) = self.expand.take().and_then(|id| hierarchy.nodes.get(&id)) {
            self.stack.extend(node.children.iter().rev());
        }
        let id = self.stack.pop()?;
        let node = hierarchy.nodes.get(&id)?;
        self.expand = Some(id);
        Some((id, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> (Hierarchy<()>, [CgroupId; 5]) {
        // /
        // ├── a
        // │   ├── b
        // │   └── c
        // └── d
        let mut h = Hierarchy::new();
        let a = h.insert(CgroupId::ROOT, "a").unwrap();
        let b = h.insert(a, "b").unwrap();
        let c = h.insert(a, "c").unwrap();
        let d = h.insert(CgroupId::ROOT, "d").unwrap();
        (h, [CgroupId::ROOT, a, b, c, d])
    }

    #[test]
    fn pre_order_walk() {
        let (h, [root, a, b, c, d]) = tree();
        let order: Vec<_> = h.descendants_pre(root).map(|(id, _)| id).collect();
        assert_eq!(order, [root, a, b, c, d]);
        let order: Vec<_> = h.descendants_pre(a).map(|(id, _)| id).collect();
        assert_eq!(order, [a, b, c]);
    }

    #[test]
    fn skip_subtree_during_walk() {
        let (h, [root, a, _, _, d]) = tree();
        let mut walk = h.descendants_pre(root);
        let mut visited = Vec::new();
        while let Some((id, _)) = walk.next() {
            visited.push(id);
            if id == a {
                walk.skip_subtree();
            }
        }
        assert_eq!(visited, [root, a, d]);
    }

    #[test]
    fn ancestors_stop_at_root() {
        let (h, [root, a, b, _, _]) = tree();
        let up: Vec<_> = h.ancestors(b).map(|(id, _)| id).collect();
        assert_eq!(up, [a, root]);
        let up: Vec<_> = h.self_and_ancestors(b).map(|(id, _)| id).collect();
        assert_eq!(up, [b, a, root]);
        assert_eq!(h.ancestors(root).count(), 0);
    }

    #[test]
    fn paths_and_removal() {
        let (mut h, [root, a, b, _, _]) = tree();
        assert_eq!(h.lookup("/a/b"), Some(b));
        assert_eq!(h.node(b).unwrap().handle.path(), "/a/b");
        assert!(matches!(
            h.insert(a, "b"),
            Err(HierarchyError::NameExists(path)) if path == "/a/b"
        ));
        assert!(matches!(h.insert(a, "x/y"), Err(HierarchyError::InvalidName(_))));
        assert!(matches!(h.remove(a), Err(HierarchyError::NotEmpty(id)) if id == a));
        assert!(matches!(h.remove(root), Err(HierarchyError::RootRemoval)));

        h.remove(b).unwrap();
        assert_eq!(h.lookup("/a/b"), None);
        assert!(!h.node(a).unwrap().children.contains(&b));
        assert!(matches!(h.node(b), Err(HierarchyError::UnknownCgroup(_))));
    }
}
