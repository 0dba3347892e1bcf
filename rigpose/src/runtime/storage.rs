/// Where the value behind one slot lives.
///
/// Elements never hold references into storage. A slot is either an index into the
/// hierarchy's pooled arena or an index into the arrays of the linked pose adapter.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StorageLink {
    Pool(usize),
    Pose(usize),
}

impl StorageLink {
    pub fn is_pool(self) -> bool {
        matches!(self, Self::Pool(_))
    }

    pub fn is_pose(self) -> bool {
        matches!(self, Self::Pose(_))
    }

    pub(crate) fn pool_index(self) -> Option<usize> {
        match self {
            Self::Pool(index) => Some(index),
            Self::Pose(_) => None,
        }
    }
}

/// Arena with a free list. Deallocated slots are reused by later allocations and only
/// reclaimed by [`ReusableStorage::compact`].
#[derive(Clone, Debug)]
pub(crate) struct ReusableStorage<T> {
    values: Vec<T>,
    free: Vec<usize>,
}

impl<T> Default for ReusableStorage<T> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T: Clone> ReusableStorage<T> {
    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn free_len(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        self.values.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.values.get_mut(index)
    }

    pub(crate) fn allocate_one(&mut self, value: T) -> usize {
        if let Some(index) = self.free.pop() {
            self.values[index] = value;
            return index;
        }
        self.values.push(value);
        self.values.len() - 1
    }

    /// Allocates `count` slots initialized with `value`, reusing freed slots first.
    pub(crate) fn allocate(&mut self, count: usize, value: T) -> Vec<usize> {
        let mut indices = Vec::with_capacity(count);
        while indices.len() < count {
            let Some(index) = self.free.pop() else {
                break;
            };
            self.values[index] = value.clone();
            indices.push(index);
        }
        let remaining = count - indices.len();
        let first = self.values.len();
        self.values.resize(first + remaining, value);
        indices.extend(first..first + remaining);
        indices
    }

    pub(crate) fn deallocate(&mut self, indices: &[usize]) {
        for &index in indices {
            if index >= self.values.len() {
                continue;
            }
            debug_assert!(
                !self.free.contains(&index),
                "storage slot {index} deallocated twice"
            );
            self.free.push(index);
        }
    }

    /// Rebuilds the arena so that it holds exactly the slots listed in `order`, in that order.
    ///
    /// Returns the old-to-new index map. Slots not listed are dropped.
    pub(crate) fn compact(&mut self, order: &[usize]) -> Vec<Option<usize>> {
        let mut remap = vec![None; self.values.len()];
        let mut values = Vec::with_capacity(order.len());
        for &old in order {
            if old >= self.values.len() || remap[old].is_some() {
                continue;
            }
            remap[old] = Some(values.len());
            values.push(self.values[old].clone());
        }
        self.values = values;
        self.free.clear();
        remap
    }
}
