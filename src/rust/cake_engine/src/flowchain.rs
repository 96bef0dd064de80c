//! The new/old flow lists each tin schedules over.
//!
//! Flows live at fixed slots in the tin's flow table, so list membership is
//! kept as intrusive prev/next indices rather than by moving flows around.
//! Head/tail insertion and removal are O(1); a flow is on at most one list.

const NIL: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChainId {
    New,
    Old,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: u16,
    next: u16,
    on: Option<ChainId>,
}

#[derive(Debug, Clone, Copy)]
struct Ends {
    head: u16,
    tail: u16,
    len: u16,
}

impl Ends {
    fn empty() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }
}

#[derive(Debug)]
pub(crate) struct FlowChains {
    links: Vec<Link>,
    new: Ends,
    old: Ends,
}

impl FlowChains {
    pub fn new(flows: usize) -> Self {
        Self {
            links: vec![
                Link {
                    prev: NIL,
                    next: NIL,
                    on: None
                };
                flows
            ],
            new: Ends::empty(),
            old: Ends::empty(),
        }
    }

    fn ends(&self, chain: ChainId) -> &Ends {
        match chain {
            ChainId::New => &self.new,
            ChainId::Old => &self.old,
        }
    }

    fn ends_mut(&mut self, chain: ChainId) -> &mut Ends {
        match chain {
            ChainId::New => &mut self.new,
            ChainId::Old => &mut self.old,
        }
    }

    pub fn membership(&self, idx: u16) -> Option<ChainId> {
        self.links[idx as usize].on
    }

    pub fn is_queued(&self, idx: u16) -> bool {
        self.membership(idx).is_some()
    }

    pub fn head(&self, chain: ChainId) -> Option<u16> {
        match self.ends(chain).head {
            NIL => None,
            h => Some(h),
        }
    }

    pub fn len(&self, chain: ChainId) -> u16 {
        self.ends(chain).len
    }

    pub fn push_tail(&mut self, chain: ChainId, idx: u16) {
        debug_assert!(self.links[idx as usize].on.is_none());
        let old_tail = self.ends(chain).tail;
        {
            let link = &mut self.links[idx as usize];
            link.prev = old_tail;
            link.next = NIL;
            link.on = Some(chain);
        }
        if old_tail != NIL {
            self.links[old_tail as usize].next = idx;
        }
        let ends = self.ends_mut(chain);
        if ends.head == NIL {
            ends.head = idx;
        }
        ends.tail = idx;
        ends.len += 1;
    }

    pub fn remove(&mut self, idx: u16) {
        let Link { prev, next, on } = self.links[idx as usize];
        let Some(chain) = on else {
            debug_assert!(false, "removing flow {idx} that is not queued");
            return;
        };
        if prev != NIL {
            self.links[prev as usize].next = next;
        }
        if next != NIL {
            self.links[next as usize].prev = prev;
        }
        let ends = self.ends_mut(chain);
        if ends.head == idx {
            ends.head = next;
        }
        if ends.tail == idx {
            ends.tail = prev;
        }
        ends.len -= 1;
        let link = &mut self.links[idx as usize];
        link.prev = NIL;
        link.next = NIL;
        link.on = None;
    }

    pub fn move_to_tail(&mut self, chain: ChainId, idx: u16) {
        self.remove(idx);
        self.push_tail(chain, idx);
    }

    pub fn iter(&self, chain: ChainId) -> ChainIter<'_> {
        ChainIter {
            chains: self,
            cur: self.ends(chain).head,
        }
    }

    pub fn clear(&mut self) {
        for link in &mut self.links {
            link.prev = NIL;
            link.next = NIL;
            link.on = None;
        }
        self.new = Ends::empty();
        self.old = Ends::empty();
    }
}

pub(crate) struct ChainIter<'a> {
    chains: &'a FlowChains,
    cur: u16,
}

impl Iterator for ChainIter<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        if self.cur == NIL {
            return None;
        }
        let idx = self.cur;
        self.cur = self.chains.links[idx as usize].next;
        Some(idx)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn collect(chains: &FlowChains, chain: ChainId) -> Vec<u16> {
        chains.iter(chain).collect()
    }

    #[test]
    fn test_push_and_iterate() {
        let mut c = FlowChains::new(8);
        c.push_tail(ChainId::New, 3);
        c.push_tail(ChainId::New, 1);
        c.push_tail(ChainId::Old, 5);
        assert_eq!(collect(&c, ChainId::New), vec![3, 1]);
        assert_eq!(collect(&c, ChainId::Old), vec![5]);
        assert_eq!(c.head(ChainId::New), Some(3));
        assert_eq!(c.len(ChainId::New), 2);
        assert_eq!(c.membership(3), Some(ChainId::New));
        assert_eq!(c.membership(5), Some(ChainId::Old));
        assert_eq!(c.membership(0), None);
    }

    #[test]
    fn test_remove_middle_head_tail() {
        let mut c = FlowChains::new(8);
        for i in [2, 4, 6] {
            c.push_tail(ChainId::Old, i);
        }
        c.remove(4);
        assert_eq!(collect(&c, ChainId::Old), vec![2, 6]);
        c.remove(2);
        assert_eq!(collect(&c, ChainId::Old), vec![6]);
        c.remove(6);
        assert_eq!(collect(&c, ChainId::Old), Vec::<u16>::new());
        assert_eq!(c.head(ChainId::Old), None);
        assert_eq!(c.len(ChainId::Old), 0);
    }

    #[test]
    fn test_move_between_chains() {
        let mut c = FlowChains::new(8);
        c.push_tail(ChainId::New, 0);
        c.push_tail(ChainId::New, 1);
        c.push_tail(ChainId::Old, 7);
        c.move_to_tail(ChainId::Old, 0);
        assert_eq!(collect(&c, ChainId::New), vec![1]);
        assert_eq!(collect(&c, ChainId::Old), vec![7, 0]);
        // Rotating within a chain keeps it coherent.
        c.move_to_tail(ChainId::Old, 7);
        assert_eq!(collect(&c, ChainId::Old), vec![0, 7]);
        assert!(c.is_queued(7));
        assert!(!c.is_queued(3));
    }

    #[test]
    fn test_clear() {
        let mut c = FlowChains::new(4);
        c.push_tail(ChainId::New, 0);
        c.push_tail(ChainId::Old, 1);
        c.clear();
        assert_eq!(c.head(ChainId::New), None);
        assert_eq!(c.head(ChainId::Old), None);
        assert!(!c.is_queued(0));
        assert!(!c.is_queued(1));
    }
}
