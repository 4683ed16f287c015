//! An intrusive doubly-linked list over the worker slab.
//!
//! The pool needs O(1) removal and O(1) move-to-front/move-to-back given a stable
//! position, for two independent orderings over the same `WorkerRecord`s: a group's
//! worker list (inactive prefix, active suffix) and the pool-wide inactive LRU. Rather
//! than allocate a node per list per worker, each `WorkerRecord` carries two `Links`
//! structs (see `worker.rs`) and this module thread the list through whichever one the
//! caller names via `LinkKind` — an arena of nodes keyed by stable slab indices, as
//! opposed to per-node heap allocation.

use slab::Slab;

use crate::ids::WorkerId;
use crate::worker::WorkerRecord;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LinkKind {
    Group,
    Inactive,
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Links {
    pub prev: Option<WorkerId>,
    pub next: Option<WorkerId>,
}

fn links_mut(slab: &mut Slab<WorkerRecord>, id: WorkerId, kind: LinkKind) -> &mut Links {
    let record = &mut slab[id.0];
    match kind {
        LinkKind::Group => &mut record.group_links,
        LinkKind::Inactive => &mut record.inactive_links,
    }
}

/// A doubly-linked list of `WorkerId`s threaded through one `Links` field per record.
#[derive(Debug, Default)]
pub(crate) struct DList {
    head: Option<WorkerId>,
    tail: Option<WorkerId>,
    len: usize,
}

impl DList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn front(&self) -> Option<WorkerId> {
        self.head
    }

    pub fn back(&self) -> Option<WorkerId> {
        self.tail
    }

    pub fn push_front(&mut self, slab: &mut Slab<WorkerRecord>, kind: LinkKind, id: WorkerId) {
        let old_head = self.head;
        {
            let links = links_mut(slab, id, kind);
            links.prev = None;
            links.next = old_head;
        }
        match old_head {
            Some(head) => links_mut(slab, head, kind).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.len += 1;
    }

    pub fn push_back(&mut self, slab: &mut Slab<WorkerRecord>, kind: LinkKind, id: WorkerId) {
        let old_tail = self.tail;
        {
            let links = links_mut(slab, id, kind);
            links.prev = old_tail;
            links.next = None;
        }
        match old_tail {
            Some(tail) => links_mut(slab, tail, kind).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    /// Removes `id` from this list. `id` must currently be a member; callers track
    /// membership (e.g. `WorkerRecord::in_inactive`) since a `Links` pair doesn't by
    /// itself distinguish "not in this list" from "sole member of this list".
    pub fn remove(&mut self, slab: &mut Slab<WorkerRecord>, kind: LinkKind, id: WorkerId) {
        let (prev, next) = {
            let links = links_mut(slab, id, kind);
            (links.prev, links.next)
        };
        match prev {
            Some(prev) => links_mut(slab, prev, kind).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => links_mut(slab, next, kind).prev = prev,
            None => self.tail = prev,
        }
        let links = links_mut(slab, id, kind);
        links.prev = None;
        links.next = None;
        self.len -= 1;
    }

    pub fn pop_front(&mut self, slab: &mut Slab<WorkerRecord>, kind: LinkKind) -> Option<WorkerId> {
        let id = self.head?;
        self.remove(slab, kind, id);
        Some(id)
    }

    /// Move-to-back, without the overhead of two slab index lookups.
    pub fn move_to_back(&mut self, slab: &mut Slab<WorkerRecord>, kind: LinkKind, id: WorkerId) {
        self.remove(slab, kind, id);
        self.push_back(slab, kind, id);
    }

    /// Move-to-front, without the overhead of two slab index lookups.
    pub fn move_to_front(&mut self, slab: &mut Slab<WorkerRecord>, kind: LinkKind, id: WorkerId) {
        self.remove(slab, kind, id);
        self.push_front(slab, kind, id);
    }

    /// Front-to-back iteration (oldest-first for the inactive LRU).
    pub fn iter<'a>(&self, slab: &'a Slab<WorkerRecord>, kind: LinkKind) -> Iter<'a> {
        Iter {
            slab,
            kind,
            next: self.head,
        }
    }
}

pub(crate) struct Iter<'a> {
    slab: &'a Slab<WorkerRecord>,
    kind: LinkKind,
    next: Option<WorkerId>,
}

impl Iterator for Iter<'_> {
    type Item = WorkerId;

    fn next(&mut self) -> Option<WorkerId> {
        let id = self.next?;
        self.next = match self.kind {
            LinkKind::Group => self.slab[id.0].group_links.next,
            LinkKind::Inactive => self.slab[id.0].inactive_links.next,
        };
        Some(id)
    }
}
