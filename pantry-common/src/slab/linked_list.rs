// Copyright 2026 pantry Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::{Slab, Token};

#[derive(Debug)]
struct Node<T> {
    val: T,
    prev: Option<Token>,
    next: Option<Token>,
}

/// A doubly linked list whose nodes live in a [`Slab`].
///
/// Tokens returned by [`SlabLinkedList::push_back`] allow O(1) removal and reordering of any node.
#[derive(Debug)]
pub struct SlabLinkedList<T> {
    slab: Slab<Node<T>>,
    head: Option<Token>,
    tail: Option<Token>,
}

impl<T> Default for SlabLinkedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlabLinkedList<T> {
    /// Create an empty list.
    pub const fn new() -> Self {
        Self {
            slab: Slab::new(),
            head: None,
            tail: None,
        }
    }

    /// Create an empty list with room for `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slab: Slab::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.slab.len()
    }

    /// Returns `true` if the list has no nodes.
    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }

    /// Value at the head.
    pub fn front(&self) -> Option<&T> {
        self.head.and_then(|token| self.slab.get(token)).map(|node| &node.val)
    }

    /// Value at the tail.
    pub fn back(&self) -> Option<&T> {
        self.tail.and_then(|token| self.slab.get(token)).map(|node| &node.val)
    }

    /// Value addressed by `token`.
    pub fn get(&self, token: Token) -> Option<&T> {
        self.slab.get(token).map(|node| &node.val)
    }

    /// Mutable value addressed by `token`.
    pub fn get_mut(&mut self, token: Token) -> Option<&mut T> {
        self.slab.get_mut(token).map(|node| &mut node.val)
    }

    /// Append a value at the tail.
    pub fn push_back(&mut self, val: T) -> Token {
        let token = self.slab.insert(Node {
            val,
            prev: self.tail,
            next: None,
        });
        self.link_back(token);
        token
    }

    /// Remove and return the head.
    pub fn pop_front(&mut self) -> Option<T> {
        let token = self.head?;
        self.remove(token)
    }

    /// Remove the node addressed by `token`.
    pub fn remove(&mut self, token: Token) -> Option<T> {
        self.unlink(token)?;
        self.slab.remove(token).map(|node| node.val)
    }

    /// Move the node addressed by `token` to the tail. Returns `false` if the token is vacant.
    pub fn move_to_back(&mut self, token: Token) -> bool {
        if self.tail == Some(token) {
            return self.slab.get(token).is_some();
        }
        if self.unlink(token).is_none() {
            return false;
        }
        if let Some(node) = self.slab.get_mut(token) {
            node.prev = self.tail;
            node.next = None;
        }
        self.link_back(token);
        true
    }

    /// Remove every node, returning the values from head to tail.
    pub fn drain(&mut self) -> Vec<T> {
        let mut res = Vec::with_capacity(self.len());
        while let Some(val) = self.pop_front() {
            res.push(val);
        }
        res
    }

    /// Iterate from head to tail.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    fn link_back(&mut self, token: Token) {
        match self.tail {
            Some(tail) => {
                if let Some(node) = self.slab.get_mut(tail) {
                    node.next = Some(token);
                }
            }
            None => self.head = Some(token),
        }
        self.tail = Some(token);
    }

    /// Detach a node from its neighbours while keeping it in the slab.
    fn unlink(&mut self, token: Token) -> Option<()> {
        let (prev, next) = {
            let node = self.slab.get(token)?;
            (node.prev, node.next)
        };

        match prev {
            Some(prev) => {
                if let Some(node) = self.slab.get_mut(prev) {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(next) => {
                if let Some(node) = self.slab.get_mut(next) {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        Some(())
    }
}

/// Iterator over a [`SlabLinkedList`] from head to tail.
pub struct Iter<'a, T> {
    list: &'a SlabLinkedList<T>,
    cursor: Option<Token>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.list.slab.get(self.cursor?)?;
        self.cursor = node.next;
        Some(&node.val)
    }
}
