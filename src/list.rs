//! An index-stable doubly linked list
//!
//! Nodes live in a slot vector and link to each other by index, vacated slots
//! are chained into a free list and reused by later insertions. A `NodeId`
//! stays valid until its node is removed, after which the slot may be handed
//! out again.
//!
//! Every ordered collection in the runtime sits on top of this list: a heap's
//! live objects, a chunk heap's blocks and the shadow stack's frames.

use core::ops::{Index, IndexMut};

use rust_alloc::vec::Vec;


/// Handle to a node of a [`LinkList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node<T> {
    value: T,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

#[derive(Debug, Clone)]
enum Entry<T> {
    Occupied(Node<T>),
    // index of the next vacant slot
    Vacant(Option<usize>),
}

#[derive(Debug, Clone)]
pub struct LinkList<T> {
    entries: Vec<Entry<T>>,
    free_head: Option<usize>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
}

impl<T> Default for LinkList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LinkList<T> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_head: None,
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn front(&self) -> Option<NodeId> {
        self.head
    }

    pub fn back(&self) -> Option<NodeId> {
        self.tail
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.node(id).map(|node| &node.value)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        match self.entries.get_mut(id.0) {
            Some(Entry::Occupied(node)) => Some(&mut node.value),
            _ => None,
        }
    }

    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.next)
    }

    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|node| node.prev)
    }

    /// Appends `value` at the tail of the list.
    pub fn push_back(&mut self, value: T) -> NodeId {
        let id = self.claim_slot(Node {
            value,
            prev: self.tail,
            next: None,
        });

        match self.tail {
            Some(tail) => self.node_mut(tail).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        id
    }

    /// Inserts `value` directly after `at`, keeping every other node in place.
    ///
    /// Panics if `at` does not name a live node.
    pub fn insert_after(&mut self, at: NodeId, value: T) -> NodeId {
        let next = self.node(at).expect("insert_after: stale node id").next;

        let id = self.claim_slot(Node {
            value,
            prev: Some(at),
            next,
        });

        self.node_mut(at).next = Some(id);
        match next {
            Some(next) => self.node_mut(next).prev = Some(id),
            None => self.tail = Some(id),
        }
        id
    }

    /// Unlinks the node `id` and returns its value, or `None` if the id is stale.
    pub fn remove(&mut self, id: NodeId) -> Option<T> {
        let slot = self.entries.get_mut(id.0)?;
        if matches!(slot, Entry::Vacant(_)) {
            return None;
        }

        let Entry::Occupied(node) = core::mem::replace(slot, Entry::Vacant(self.free_head)) else {
            unreachable!()
        };
        self.free_head = Some(id.0);
        self.len -= 1;

        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.node_mut(next).prev = node.prev,
            None => self.tail = node.prev,
        }

        Some(node.value)
    }

    /// Removes and returns the value at the tail.
    pub fn pop_back(&mut self) -> Option<T> {
        self.tail.and_then(|tail| self.remove(tail))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.free_head = None;
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    /// Node handles from head to tail. Reverse with `.rev()`.
    pub fn ids(&self) -> Ids<'_, T> {
        Ids {
            list: self,
            front: self.head,
            back: self.tail,
            remaining: self.len,
        }
    }

    /// Values from head to tail. Reverse with `.rev()`.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        self.ids().map(move |id| &self[id])
    }

    fn node(&self, id: NodeId) -> Option<&Node<T>> {
        match self.entries.get(id.0) {
            Some(Entry::Occupied(node)) => Some(node),
            _ => None,
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        match self.entries.get_mut(id.0) {
            Some(Entry::Occupied(node)) => node,
            _ => panic!("link list corrupted: {id:?} is not a live node"),
        }
    }

    fn claim_slot(&mut self, node: Node<T>) -> NodeId {
        self.len += 1;
        match self.free_head {
            Some(index) => {
                let Entry::Vacant(next_free) = self.entries[index] else {
                    panic!("link list corrupted: free slot {index} is occupied")
                };
                self.free_head = next_free;
                self.entries[index] = Entry::Occupied(node);
                NodeId(index)
            }
            None => {
                self.entries.push(Entry::Occupied(node));
                NodeId(self.entries.len() - 1)
            }
        }
    }
}

impl<T> Index<NodeId> for LinkList<T> {
    type Output = T;

    fn index(&self, id: NodeId) -> &T {
        self.get(id).expect("stale node id")
    }
}

impl<T> IndexMut<NodeId> for LinkList<T> {
    fn index_mut(&mut self, id: NodeId) -> &mut T {
        self.get_mut(id).expect("stale node id")
    }
}

/// Iterator over the node handles of a [`LinkList`].
pub struct Ids<'a, T> {
    list: &'a LinkList<T>,
    front: Option<NodeId>,
    back: Option<NodeId>,
    remaining: usize,
}

impl<T> Iterator for Ids<'_, T> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.remaining == 0 {
            return None;
        }
        let id = self.front?;
        self.front = self.list.next(id);
        self.remaining -= 1;
        Some(id)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> DoubleEndedIterator for Ids<'_, T> {
    fn next_back(&mut self) -> Option<NodeId> {
        if self.remaining == 0 {
            return None;
        }
        let id = self.back?;
        self.back = self.list.prev(id);
        self.remaining -= 1;
        Some(id)
    }
}

impl<T> ExactSizeIterator for Ids<'_, T> {}
