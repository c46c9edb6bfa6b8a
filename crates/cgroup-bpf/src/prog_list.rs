use crate::program::{same_program, ProgRef};

/// Programs attached locally to a cgroup for one hook, in attach order.
///
/// Detaching first turns the entry into a tombstone, so the change can be
/// rolled back if the following propagation fails. Tombstones are skipped by
/// every reader of the list and removed by [`ProgList::purge`].
pub(crate) struct ProgList<C> {
    entries: Vec<Option<ProgRef<C>>>,
}

impl<C> Default for ProgList<C> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<C> ProgList<C> {
    /// Number of live programs.
    pub(crate) fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ProgRef<C>> {
        self.entries.iter().flatten()
    }

    pub(crate) fn contains(&self, prog: &ProgRef<C>) -> bool {
        self.position(prog).is_some()
    }

    pub(crate) fn position(&self, prog: &ProgRef<C>) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| matches!(entry, Some(p) if same_program(p, prog)))
    }

    /// Index of the most recently attached live program.
    pub(crate) fn last_live(&self) -> Option<usize> {
        self.entries.iter().rposition(Option::is_some)
    }

    pub(crate) fn append(&mut self, prog: ProgRef<C>) {
        self.entries.push(Some(prog));
    }

    /// Remove the entry added by the last [`ProgList::append`].
    pub(crate) fn pop(&mut self) -> Option<ProgRef<C>> {
        self.entries.pop().flatten()
    }

    /// Put `prog` in place of the entry at `index`, returning the old program.
    pub(crate) fn replace(&mut self, index: usize, prog: ProgRef<C>) -> Option<ProgRef<C>> {
        self.entries[index].replace(prog)
    }

    pub(crate) fn tombstone(&mut self, index: usize) -> Option<ProgRef<C>> {
        self.entries[index].take()
    }

    pub(crate) fn restore(&mut self, index: usize, prog: ProgRef<C>) {
        debug_assert!(self.entries[index].is_none());
        self.entries[index] = Some(prog);
    }

    pub(crate) fn purge(&mut self) {
        self.entries.retain(Option::is_some);
    }

    /// Remove every program, returning the live ones.
    pub(crate) fn drain(&mut self) -> Vec<ProgRef<C>> {
        self.entries.drain(..).flatten().collect()
    }
}
