//! Bounded iteration over circular intrusive lists
//!
//! Kernel and loader lists embed a `{ next, prev }` link inside every node.
//! [`CircularList`] yields node addresses (link address minus the link
//! offset) and stops on any of:
//!
//! - an unreadable or zero link
//! - a link back to the sentinel (a list head embedded in its owner)
//! - a node equal to the start node (full circuit)
//! - a node equal to the current node (no progress)
//! - `max_steps` nodes yielded

use tracing::trace;

pub struct CircularList<F> {
    start: Option<u64>,
    link_offset: u64,
    max_steps: usize,
    sentinel: Option<u64>,
    read_link: F,
    current: Option<u64>,
    steps: usize,
    done: bool,
}

impl<F: FnMut(u64) -> Option<u64>> CircularList<F> {
    /// Iterate from the node at `start`; `read_link` returns the forward
    /// link stored at the given link address.
    pub fn new(start: u64, link_offset: u64, max_steps: usize, read_link: F) -> Self {
        Self {
            start: (start != 0).then_some(start),
            link_offset,
            max_steps,
            sentinel: None,
            read_link,
            current: None,
            steps: 0,
            done: false,
        }
    }

    /// Iterate the nodes hanging off a list head at `head`.
    ///
    /// The head itself is not a node; the walk ends when a link leads back
    /// to it.
    pub fn from_head(head: u64, link_offset: u64, max_steps: usize, mut read_link: F) -> Self {
        let start = match read_link(head) {
            Some(first) if first != 0 && first != head => first.wrapping_sub(link_offset),
            _ => 0,
        };
        Self::new(start, link_offset, max_steps, read_link).with_sentinel(head)
    }

    pub fn with_sentinel(mut self, link: u64) -> Self {
        self.sentinel = Some(link);
        self
    }

    /// Nodes yielded so far
    pub fn steps(&self) -> usize {
        self.steps
    }

    fn advance(&mut self, current: u64) -> Option<u64> {
        let link = (self.read_link)(current.wrapping_add(self.link_offset))?;
        if link == 0 || Some(link) == self.sentinel {
            return None;
        }

        let next = link.wrapping_sub(self.link_offset);
        if Some(next) == self.start || next == current {
            return None;
        }
        Some(next)
    }
}

impl<F: FnMut(u64) -> Option<u64>> Iterator for CircularList<F> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.done {
            return None;
        }

        let node = match self.current {
            None => self.start,
            Some(current) => self.advance(current),
        };
        let Some(node) = node else {
            self.done = true;
            return None;
        };

        if self.steps >= self.max_steps {
            trace!("List walk stopped after {} nodes", self.steps);
            self.done = true;
            return None;
        }

        self.steps += 1;
        self.current = Some(node);
        Some(node)
    }
}
