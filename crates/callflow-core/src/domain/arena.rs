//! Addressable view over a flow's step tree
//!
//! The arena flattens a flow into numbered blocks. Block 0 is the top-level
//! list; every menu option, invalid branch, schedule branch and fallback gets
//! its own block, numbered depth-first in declaration order. A [`Cursor`]
//! names one step, so "the rest of this branch" is a cursor rather than a
//! copied list of steps.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::flow_definition::{CallFlowStep, StepAction};

/// Index of a block in the arena
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub usize);

impl BlockId {
    /// The flow's top-level step list
    pub const ROOT: BlockId = BlockId(0);
}

/// Position of a step inside the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
    /// Block holding the step
    pub block: BlockId,
    /// Index within the block
    pub index: usize,
}

impl Cursor {
    /// Cursor into the top-level list
    pub fn root(index: usize) -> Self {
        Self {
            block: BlockId::ROOT,
            index,
        }
    }

    /// First step of a block
    pub fn start_of(block: BlockId) -> Self {
        Self { block, index: 0 }
    }

    /// Following step in the same block
    pub fn next(self) -> Self {
        Self {
            block: self.block,
            index: self.index + 1,
        }
    }

    /// Whether the cursor points into the top-level list
    pub fn is_root(&self) -> bool {
        self.block == BlockId::ROOT
    }
}

/// Which nested list of a branching step to enter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BranchKey {
    /// Steps of a menu option, by digit
    MenuOption(String),
    /// Menu invalid-input steps
    MenuInvalid,
    /// Steps of the n-th schedule branch
    ScheduleBranch(usize),
    /// Schedule fallback steps
    ScheduleFallback,
}

/// Flattened, borrowed view of a flow
#[derive(Debug)]
pub struct FlowArena<'f> {
    blocks: Vec<&'f [CallFlowStep]>,
    children: HashMap<(Cursor, BranchKey), BlockId>,
}

impl<'f> FlowArena<'f> {
    /// Build the arena for a top-level step list
    pub fn new(steps: &'f [CallFlowStep]) -> Self {
        let mut arena = Self {
            blocks: Vec::new(),
            children: HashMap::new(),
        };
        arena.push_block(steps);
        arena
    }

    fn push_block(&mut self, steps: &'f [CallFlowStep]) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(steps);

        for (index, step) in steps.iter().enumerate() {
            let owner = Cursor { block: id, index };
            match &step.action {
                StepAction::Menu(menu) => {
                    for (digit, option) in &menu.options {
                        let child = self.push_block(&option.steps);
                        self.children
                            .insert((owner, BranchKey::MenuOption(digit.clone())), child);
                    }
                    if let Some(invalid) = &menu.invalid_steps {
                        let child = self.push_block(invalid);
                        self.children.insert((owner, BranchKey::MenuInvalid), child);
                    }
                }
                StepAction::Schedule(schedule) => {
                    for (position, branch) in schedule.branches.iter().enumerate() {
                        let child = self.push_block(&branch.steps);
                        self.children
                            .insert((owner, BranchKey::ScheduleBranch(position)), child);
                    }
                    if let Some(fallback) = &schedule.fallback_steps {
                        let child = self.push_block(fallback);
                        self.children.insert((owner, BranchKey::ScheduleFallback), child);
                    }
                }
                _ => {}
            }
        }
        id
    }

    /// Step at the cursor, `None` past the end of its block
    pub fn step(&self, cursor: Cursor) -> Option<&'f CallFlowStep> {
        self.blocks
            .get(cursor.block.0)
            .and_then(|block| block.get(cursor.index))
    }

    /// Block entered through `key` from the branching step at `owner`
    pub fn child(&self, owner: Cursor, key: &BranchKey) -> Option<BlockId> {
        self.children.get(&(owner, key.clone())).copied()
    }

    /// Total number of steps across all blocks
    pub fn step_count(&self) -> usize {
        self.blocks.iter().map(|block| block.len()).sum()
    }
}
