// src/graph/lifo.rs

//! LIFO buffer used by graph traversals and dependency expansion loops

/// A last-in, first-out stack
#[derive(Debug, Clone)]
pub struct Lifo<T> {
    buf: Vec<T>,
}

impl<T> Lifo<T> {
    /// Create an empty stack
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Push an item on top of the stack
    pub fn push(&mut self, item: T) {
        self.buf.push(item);
    }

    /// Pop the most recently pushed item
    pub fn pop(&mut self) -> Option<T> {
        self.buf.pop()
    }

    /// The top item, if any
    pub fn peek(&self) -> Option<&T> {
        self.buf.last()
    }

    /// Mutable access to the top item without removing it
    pub fn top_mut(&mut self) -> Option<&mut T> {
        self.buf.last_mut()
    }

    /// Whether the stack still holds items
    pub fn is_filled(&self) -> bool {
        !self.buf.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Drop every item
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl<T: PartialEq> Lifo<T> {
    /// Remove every stored item equal to `item`
    pub fn discard(&mut self, item: &T) {
        self.buf.retain(|x| x != item);
    }
}

impl<T> Default for Lifo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Extend<T> for Lifo<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.buf.extend(iter);
    }
}
