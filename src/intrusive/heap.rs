//! Intrusive binary min-heap.
//!
//! The heap stores nodes by pointer, linked through embedded
//! `parent`/`left`/`right` fields, and navigates to the array position of
//! the last element by walking the bits of the element count. Insert and
//! pop are O(log n); erase of an arbitrary known member is O(log n) with no
//! search.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};

/// The embedded link triple of a heap node.
#[derive(Debug)]
pub struct HeapLinks<T> {
    parent: *mut T,
    left: *mut T,
    right: *mut T,
}

impl<T> HeapLinks<T> {
    /// Creates detached links.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            parent: ptr::null_mut(),
            left: ptr::null_mut(),
            right: ptr::null_mut(),
        }
    }
}

impl<T> Default for HeapLinks<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Access to the embedded links and ordering key of a heap node.
///
/// # Safety
///
/// Implementations must return a stable links location that belongs to the
/// node and is used by no other container while the node is linked. The
/// key of a linked node must not change.
pub unsafe trait HeapNode: Sized {
    /// Ordering key type.
    type Key: Ord + Copy;

    /// Returns the node's link triple.
    unsafe fn links(this: NonNull<Self>) -> NonNull<HeapLinks<Self>>;

    /// Reads the node's key.
    unsafe fn key(this: NonNull<Self>) -> Self::Key;
}

/// Intrusive binary min-heap over nodes linked through [`HeapNode`].
pub struct Heap<T: HeapNode> {
    root: *mut T,
    size: usize,
    _marker: PhantomData<*mut T>,
}

// SAFETY: the heap stores only raw pointers to caller-owned nodes.
unsafe impl<T: HeapNode + Send> Send for Heap<T> {}

impl<T: HeapNode> Heap<T> {
    /// Creates an empty heap.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            root: ptr::null_mut(),
            size: 0,
            _marker: PhantomData,
        }
    }

    /// Number of linked nodes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` if the heap holds no nodes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The minimum node, if any.
    #[must_use]
    pub fn front(&self) -> Option<NonNull<T>> {
        NonNull::new(self.root)
    }

    /// Moves the whole heap out, leaving this one empty.
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            root: std::mem::replace(&mut self.root, ptr::null_mut()),
            size: std::mem::replace(&mut self.size, 0),
            _marker: PhantomData,
        }
    }

    unsafe fn links_mut<'a>(node: NonNull<T>) -> &'a mut HeapLinks<T> {
        &mut *T::links(node).as_ptr()
    }

    unsafe fn less(a: NonNull<T>, b: NonNull<T>) -> bool {
        T::key(a) < T::key(b)
    }

    /// Links `node` into the heap.
    ///
    /// # Safety
    ///
    /// `node` must be alive, un-moved while linked, and not currently a
    /// member of any container.
    pub unsafe fn insert(&mut self, node: NonNull<T>) {
        let links = Self::links_mut(node);
        links.parent = ptr::null_mut();
        links.left = ptr::null_mut();
        links.right = ptr::null_mut();

        let Some(_) = NonNull::new(self.root) else {
            self.root = node.as_ptr();
            self.size = 1;
            return;
        };

        let parent = self.parent_of(self.size + 1).expect("non-empty heap");
        let parent_links = Self::links_mut(parent);
        if parent_links.left.is_null() {
            parent_links.left = node.as_ptr();
        } else {
            parent_links.right = node.as_ptr();
        }
        Self::links_mut(node).parent = parent.as_ptr();
        self.size += 1;
        self.bottom_up_heapify(node);
    }

    /// Unlinks the minimum node.
    pub fn pop_front(&mut self) -> Option<NonNull<T>> {
        let root = NonNull::new(self.root)?;
        // SAFETY: all linked nodes are alive by the insert contract.
        unsafe {
            if self.size == 1 {
                self.root = ptr::null_mut();
                self.size = 0;
                return Some(root);
            }

            let leaf = self.back_node();
            self.detach_leaf(leaf);
            self.size -= 1;

            let root_links = Self::links_mut(root);
            let leaf_links = Self::links_mut(leaf);
            leaf_links.left = std::mem::replace(&mut root_links.left, ptr::null_mut());
            leaf_links.right = std::mem::replace(&mut root_links.right, ptr::null_mut());
            if let Some(left) = NonNull::new(leaf_links.left) {
                Self::links_mut(left).parent = leaf.as_ptr();
            }
            if let Some(right) = NonNull::new(leaf_links.right) {
                Self::links_mut(right).parent = leaf.as_ptr();
            }
            leaf_links.parent = ptr::null_mut();
            root_links.parent = ptr::null_mut();
            self.root = leaf.as_ptr();
            self.top_down_heapify(leaf);
        }
        Some(root)
    }

    /// Unlinks `node` if it is a member; returns whether it was.
    ///
    /// # Safety
    ///
    /// `node` must either be a member of this heap or detached (never a
    /// member of a different heap).
    pub unsafe fn erase(&mut self, node: NonNull<T>) -> bool {
        if !self.contains(node) {
            return false;
        }
        if self.size == 1 {
            self.root = ptr::null_mut();
            self.size = 0;
            *Self::links_mut(node) = HeapLinks::new();
            return true;
        }

        let leaf = self.back_node();
        self.detach_leaf(leaf);
        self.size -= 1;
        if node == leaf {
            *Self::links_mut(node) = HeapLinks::new();
            return true;
        }

        let node_links = Self::links_mut(node);
        let parent = node_links.parent;
        let left = node_links.left;
        let right = node_links.right;
        self.replace_child(parent, node.as_ptr(), leaf.as_ptr());

        let leaf_links = Self::links_mut(leaf);
        leaf_links.parent = parent;
        leaf_links.left = if left == leaf.as_ptr() { ptr::null_mut() } else { left };
        leaf_links.right = if right == leaf.as_ptr() { ptr::null_mut() } else { right };
        if let Some(l) = NonNull::new(leaf_links.left) {
            Self::links_mut(l).parent = leaf.as_ptr();
        }
        if let Some(r) = NonNull::new(leaf_links.right) {
            Self::links_mut(r).parent = leaf.as_ptr();
        }
        *Self::links_mut(node) = HeapLinks::new();

        let leaf_parent = Self::links_mut(leaf).parent;
        if let Some(p) = NonNull::new(leaf_parent) {
            if Self::less(leaf, p) {
                self.bottom_up_heapify(leaf);
                return true;
            }
        }
        self.top_down_heapify(leaf);
        true
    }

    unsafe fn contains(&self, node: NonNull<T>) -> bool {
        node.as_ptr() == self.root || !Self::links_mut(node).parent.is_null()
    }

    unsafe fn swap_parent_child(&mut self, parent: NonNull<T>, child: NonNull<T>) {
        let grand = Self::links_mut(parent).parent;
        self.replace_child(grand, parent.as_ptr(), child.as_ptr());
        Self::links_mut(child).parent = grand;

        let parent_links = Self::links_mut(parent);
        let child_links = Self::links_mut(child);
        if parent_links.left == child.as_ptr() {
            parent_links.left = std::mem::replace(&mut child_links.left, parent.as_ptr());
            std::mem::swap(&mut parent_links.right, &mut child_links.right);
        } else {
            parent_links.right = std::mem::replace(&mut child_links.right, parent.as_ptr());
            std::mem::swap(&mut parent_links.left, &mut child_links.left);
        }

        for p in [parent_links.left, parent_links.right] {
            if let Some(p) = NonNull::new(p) {
                Self::links_mut(p).parent = parent.as_ptr();
            }
        }
        for c in [child_links.left, child_links.right] {
            if let Some(c) = NonNull::new(c) {
                Self::links_mut(c).parent = child.as_ptr();
            }
        }
    }

    unsafe fn bottom_up_heapify(&mut self, node: NonNull<T>) {
        while let Some(parent) = NonNull::new(Self::links_mut(node).parent) {
            if !Self::less(node, parent) {
                break;
            }
            self.swap_parent_child(parent, node);
        }
    }

    unsafe fn top_down_heapify(&mut self, node: NonNull<T>) {
        while let Some(left) = NonNull::new(Self::links_mut(node).left) {
            let mut child = left;
            if let Some(right) = NonNull::new(Self::links_mut(node).right) {
                if Self::less(right, child) {
                    child = right;
                }
            }
            if Self::less(child, node) {
                self.swap_parent_child(node, child);
            } else {
                break;
            }
        }
    }

    unsafe fn detach_leaf(&mut self, leaf: NonNull<T>) {
        let Some(parent) = NonNull::new(Self::links_mut(leaf).parent) else {
            self.root = ptr::null_mut();
            return;
        };
        let parent_links = Self::links_mut(parent);
        if parent_links.left == leaf.as_ptr() {
            parent_links.left = ptr::null_mut();
        } else {
            parent_links.right = ptr::null_mut();
        }
        Self::links_mut(leaf).parent = ptr::null_mut();
    }

    unsafe fn replace_child(&mut self, parent: *mut T, current: *mut T, replacement: *mut T) {
        let Some(parent) = NonNull::new(parent) else {
            self.root = replacement;
            return;
        };
        let links = Self::links_mut(parent);
        if links.left == current {
            links.left = replacement;
        } else {
            links.right = replacement;
        }
    }

    /// Walks to the parent of the node at 1-based breadth-first `position`
    /// by reading the position's bits below the leading one.
    fn parent_of(&self, position: usize) -> Option<NonNull<T>> {
        let mut index = position.next_power_of_two();
        if index > position {
            index /= 4;
        } else {
            index /= 2;
        }
        let mut node = NonNull::new(self.root)?;
        while index > 1 {
            // SAFETY: the walk stays inside the complete-tree shape the
            // size invariant maintains.
            let links = unsafe { Self::links_mut(node) };
            let next = if position & index != 0 {
                links.right
            } else {
                links.left
            };
            node = NonNull::new(next)?;
            index /= 2;
        }
        Some(node)
    }

    unsafe fn back_node(&self) -> NonNull<T> {
        let Some(parent) = self.parent_of(self.size) else {
            return NonNull::new_unchecked(self.root);
        };
        let links = Self::links_mut(parent);
        NonNull::new(links.right)
            .or_else(|| NonNull::new(links.left))
            .unwrap_or(parent)
    }
}

impl<T: HeapNode> Default for Heap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Node {
        key: u64,
        links: HeapLinks<Node>,
    }

    impl Node {
        fn new(key: u64) -> Self {
            Self {
                key,
                links: HeapLinks::new(),
            }
        }
    }

    // SAFETY: `links` belongs to the node, keys never change while linked.
    unsafe impl HeapNode for Node {
        type Key = u64;

        unsafe fn links(this: NonNull<Self>) -> NonNull<HeapLinks<Self>> {
            NonNull::new_unchecked(std::ptr::addr_of_mut!((*this.as_ptr()).links))
        }

        unsafe fn key(this: NonNull<Self>) -> u64 {
            (*this.as_ptr()).key
        }
    }

    /// Deterministic shuffle, no external RNG.
    fn shuffled(n: u64, seed: u64) -> Vec<u64> {
        let mut values: Vec<u64> = (0..n).collect();
        let mut state = seed | 1;
        for i in (1..values.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let j = (state >> 33) as usize % (i + 1);
            values.swap(i, j);
        }
        values
    }

    fn check_invariant(heap: &Heap<Node>) {
        fn walk(node: *mut Node, count: &mut usize) {
            let Some(node) = NonNull::new(node) else { return };
            *count += 1;
            unsafe {
                let links = &*Node::links(node).as_ptr();
                for child in [links.left, links.right] {
                    if let Some(child) = NonNull::new(child) {
                        assert!(
                            Node::key(node) <= Node::key(child),
                            "heap order violated"
                        );
                        let child_links = &*Node::links(child).as_ptr();
                        assert_eq!(child_links.parent, node.as_ptr());
                        walk(child.as_ptr(), count);
                    }
                }
            }
        }
        let mut count = 0;
        walk(heap.root, &mut count);
        assert_eq!(count, heap.len());
    }

    #[test]
    fn shuffled_insert_pops_sorted() {
        let values = shuffled(64, 0x5EED);
        let mut nodes: Vec<Node> = values.iter().copied().map(Node::new).collect();
        let mut heap = Heap::new();
        for node in &mut nodes {
            unsafe { heap.insert(NonNull::from(node)) };
            check_invariant(&heap);
        }

        let mut out = Vec::new();
        while let Some(node) = heap.pop_front() {
            out.push(unsafe { node.as_ref().key });
            check_invariant(&heap);
        }
        let sorted: Vec<u64> = (0..64).collect();
        assert_eq!(out, sorted);
    }

    #[test]
    fn erase_preserves_invariant() {
        let values = shuffled(33, 0xACE);
        let mut nodes: Vec<Node> = values.iter().copied().map(Node::new).collect();
        let mut heap = Heap::new();
        for node in &mut nodes {
            unsafe { heap.insert(NonNull::from(node)) };
        }

        // Erase every third node, checking the shape after each removal.
        let mut erased = Vec::new();
        for (i, node) in nodes.iter_mut().enumerate() {
            if i % 3 == 0 {
                assert!(unsafe { heap.erase(NonNull::from(&mut *node)) });
                erased.push(node.key);
                check_invariant(&heap);
            }
        }

        // Double erase reports non-membership.
        for (i, node) in nodes.iter_mut().enumerate() {
            if i % 3 == 0 {
                assert!(!unsafe { heap.erase(NonNull::from(&mut *node)) });
            }
        }

        let mut out = Vec::new();
        while let Some(node) = heap.pop_front() {
            out.push(unsafe { node.as_ref().key });
        }
        let mut expected: Vec<u64> = values
            .iter()
            .copied()
            .filter(|v| !erased.contains(v))
            .collect();
        expected.sort_unstable();
        assert_eq!(out, expected);
    }

    #[test]
    fn take_leaves_source_empty() {
        let mut nodes: Vec<Node> = (0..10).map(Node::new).collect();
        let mut heap = Heap::new();
        for node in &mut nodes {
            unsafe { heap.insert(NonNull::from(node)) };
        }

        let mut moved = heap.take();
        assert!(heap.is_empty());
        assert_eq!(heap.len(), 0);
        assert!(heap.pop_front().is_none());

        let mut out = Vec::new();
        while let Some(node) = moved.pop_front() {
            out.push(unsafe { node.as_ref().key });
        }
        assert_eq!(out, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn front_is_minimum() {
        let mut nodes: Vec<Node> = [5u64, 3, 8, 1, 9].iter().copied().map(Node::new).collect();
        let mut heap = Heap::new();
        for node in &mut nodes {
            unsafe { heap.insert(NonNull::from(node)) };
        }
        let front = heap.front().unwrap();
        assert_eq!(unsafe { front.as_ref().key }, 1);
    }

    #[test]
    fn erase_root() {
        let mut nodes: Vec<Node> = (0..7).map(Node::new).collect();
        let mut heap = Heap::new();
        for node in &mut nodes {
            unsafe { heap.insert(NonNull::from(node)) };
        }
        let root = heap.front().unwrap();
        assert!(unsafe { heap.erase(root) });
        check_invariant(&heap);
        assert_eq!(unsafe { heap.front().unwrap().as_ref().key }, 1);
    }
}
