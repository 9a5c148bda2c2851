//! Call-Site Liveness Analyzer
//!
//! Backward live-variable dataflow over a method body, followed by one
//! backward walk per block that records which reference-typed variables are
//! live across every call site (invocations, allocations, array clones and
//! class initialization). Those are the only points a collection can happen,
//! so the recorded sets are exactly what must be spilled to the shadow stack.

use kindle_model::{BlockId, Body, Var};
use rustc_hash::FxHashMap;

// ============================================================================
// Bit sets
// ============================================================================

/// Fixed-capacity bit set over variable indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
        }
    }

    pub fn insert(&mut self, index: usize) {
        if let Some(word) = self.words.get_mut(index / 64) {
            *word |= 1 << (index % 64);
        }
    }

    pub fn remove(&mut self, index: usize) {
        if let Some(word) = self.words.get_mut(index / 64) {
            *word &= !(1 << (index % 64));
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|word| word & (1 << (index % 64)) != 0)
    }

    /// Add every member of `other`; returns whether anything was added
    pub fn union_with(&mut self, other: &BitSet) -> bool {
        let mut changed = false;
        for (word, &theirs) in self.words.iter_mut().zip(other.words.iter()) {
            let merged = *word | theirs;
            changed |= merged != *word;
            *word = merged;
        }
        changed
    }

    pub fn subtract(&mut self, other: &BitSet) {
        for (word, &theirs) in self.words.iter_mut().zip(other.words.iter()) {
            *word &= !theirs;
        }
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            (0..64).filter(move |bit| word & (1 << bit) != 0).map(move |bit| i * 64 + bit)
        })
    }
}

// ============================================================================
// Analysis
// ============================================================================

/// Live references across one call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSiteLiveness {
    pub block: BlockId,
    /// Index of the instruction within its block
    pub instruction: usize,
    /// Live-after references, ascending, excluding the site's own result
    pub live: Vec<Var>,
}

#[derive(Debug, Clone)]
pub struct LivenessInfo {
    live_in: Vec<BitSet>,
    live_out: Vec<BitSet>,
    sites: Vec<CallSiteLiveness>,
    by_position: FxHashMap<(BlockId, usize), usize>,
    frame_size: usize,
}

impl LivenessInfo {
    /// Call sites in block and instruction order
    pub fn sites(&self) -> &[CallSiteLiveness] {
        &self.sites
    }

    pub fn site_at(&self, block: BlockId, instruction: usize) -> Option<&CallSiteLiveness> {
        self.by_position
            .get(&(block, instruction))
            .map(|&i| &self.sites[i])
    }

    /// Number of shadow-stack cells the method needs
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn live_in(&self, block: BlockId) -> Vec<Var> {
        to_vars(&self.live_in[block.index()])
    }

    pub fn live_out(&self, block: BlockId) -> Vec<Var> {
        to_vars(&self.live_out[block.index()])
    }
}

fn to_vars(set: &BitSet) -> Vec<Var> {
    set.iter().map(|i| Var(i as u32)).collect()
}

/// Run the dataflow and collect every call site's live references
pub fn analyze(body: &Body) -> LivenessInfo {
    let block_count = body.blocks.len();
    let var_count = body.variables.len();

    let mut uses: Vec<BitSet> = vec![BitSet::new(var_count); block_count];
    let mut defs: Vec<BitSet> = vec![BitSet::new(var_count); block_count];
    // Phi operands are live at the end of the predecessor they flow from
    let mut phi_uses: Vec<BitSet> = vec![BitSet::new(var_count); block_count];
    let mut predecessors: Vec<Vec<BlockId>> = vec![Vec::new(); block_count];
    let mut successors: Vec<Vec<BlockId>> = Vec::with_capacity(block_count);

    for (index, block) in body.blocks.iter().enumerate() {
        let id = BlockId(index as u32);
        let succs = body.successors(id);
        for &succ in &succs {
            if let Some(preds) = predecessors.get_mut(succ.index()) {
                preds.push(id);
            }
        }
        successors.push(succs);

        let (block_uses, block_defs) = (&mut uses[index], &mut defs[index]);
        for var in block.terminator.used() {
            block_uses.insert(var.index());
        }
        for instr in block.instructions.iter().rev() {
            if let Some(def) = instr.defined() {
                block_defs.insert(def.index());
                block_uses.remove(def.index());
            }
            for var in instr.used() {
                block_uses.insert(var.index());
            }
        }
        for phi in &block.phis {
            block_defs.insert(phi.receiver.index());
            block_uses.remove(phi.receiver.index());
        }
        if let Some(var) = block.exception_variable {
            block_defs.insert(var.index());
            block_uses.remove(var.index());
        }

        for phi in &block.phis {
            for incoming in &phi.incomings {
                if let Some(set) = phi_uses.get_mut(incoming.source.index()) {
                    set.insert(incoming.value.index());
                }
            }
        }
    }

    let mut live_in: Vec<BitSet> = vec![BitSet::new(var_count); block_count];
    let mut live_out: Vec<BitSet> = vec![BitSet::new(var_count); block_count];

    let order = reverse_post_order(&successors, block_count);
    let mut worklist: Vec<BlockId> = order.clone();
    worklist.reverse();
    let mut queued: Vec<bool> = vec![true; block_count];

    while let Some(id) = worklist.pop() {
        let index = id.index();
        queued[index] = false;

        let mut out = phi_uses[index].clone();
        for succ in &successors[index] {
            out.union_with(&live_in[succ.index()]);
        }
        let mut input = out.clone();
        input.subtract(&defs[index]);
        input.union_with(&uses[index]);

        live_out[index] = out;
        if input != live_in[index] {
            live_in[index] = input;
            for &pred in &predecessors[index] {
                if !queued[pred.index()] {
                    queued[pred.index()] = true;
                    worklist.push(pred);
                }
            }
        }
    }

    let is_reference = |index: usize| {
        body.variables
            .get(index)
            .is_some_and(|kind| kind.is_reference())
    };

    let mut sites: Vec<CallSiteLiveness> = Vec::new();
    for (index, block) in body.blocks.iter().enumerate() {
        let mut live = live_out[index].clone();
        for var in block.terminator.used() {
            live.insert(var.index());
        }
        let mut block_sites: Vec<CallSiteLiveness> = Vec::new();
        for (position, instr) in block.instructions.iter().enumerate().rev() {
            if let Some(def) = instr.defined() {
                live.remove(def.index());
            }
            if instr.is_call_site() {
                let refs = live
                    .iter()
                    .filter(|&i| is_reference(i))
                    .map(|i| Var(i as u32))
                    .collect();
                block_sites.push(CallSiteLiveness {
                    block: BlockId(index as u32),
                    instruction: position,
                    live: refs,
                });
            }
            for var in instr.used() {
                live.insert(var.index());
            }
        }
        block_sites.reverse();
        sites.extend(block_sites);
    }

    let frame_size = sites.iter().map(|s| s.live.len()).max().unwrap_or(0);
    let by_position = sites
        .iter()
        .enumerate()
        .map(|(i, s)| ((s.block, s.instruction), i))
        .collect();

    LivenessInfo {
        live_in,
        live_out,
        sites,
        by_position,
        frame_size,
    }
}

/// Reverse post-order from the entry block, followed by any block the entry
/// does not reach
fn reverse_post_order(successors: &[Vec<BlockId>], block_count: usize) -> Vec<BlockId> {
    let mut visited = vec![false; block_count];
    let mut post: Vec<BlockId> = Vec::with_capacity(block_count);

    let mut unreached: Vec<BlockId> = Vec::new();

    for root in 0..block_count {
        if visited[root] {
            continue;
        }
        let mut order: Vec<BlockId> = Vec::new();
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        visited[root] = true;
        while let Some((block, next)) = stack.pop() {
            match successors[block].get(next) {
                Some(succ) => {
                    stack.push((block, next + 1));
                    let s = succ.index();
                    if s < block_count && !visited[s] {
                        visited[s] = true;
                        stack.push((s, 0));
                    }
                }
                None => order.push(BlockId(block as u32)),
            }
        }
        if root == 0 {
            post.extend(order);
        } else {
            unreached.extend(order);
        }
    }

    post.reverse();
    post.extend(unreached);
    post
}
