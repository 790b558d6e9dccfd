// Peephole Optimization Engine
// A generic buffer of emitted lines with label bookkeeping, plus a fixpoint
// optimizer: reachability analysis, branch chaining and inversion, dead
// label removal, and a pluggable pattern-window combiner.
//
// The engine knows nothing about instruction encodings. Everything
// target-specific comes in through the PeepholeCombiner implementation.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::operand::Label;

/// Control-flow classification of an emitted line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineType {
    /// Falls through to the next line.
    Plain,
    /// Never falls through (RETURN, RSTACK).
    Terminator,
    /// Never falls through and too expensive to duplicate (PRINTR, QUIT).
    HeavyTerminator,
    /// Unconditional branch.
    BranchAlways,
    /// Branches when the test is true.
    BranchPositive,
    /// Branches when the test is false.
    BranchNegative,
}

impl LineType {
    pub fn falls_through(self) -> bool {
        matches!(
            self,
            LineType::Plain | LineType::BranchPositive | LineType::BranchNegative
        )
    }

    pub fn is_conditional(self) -> bool {
        matches!(self, LineType::BranchPositive | LineType::BranchNegative)
    }

    pub fn has_target(self) -> bool {
        matches!(
            self,
            LineType::BranchAlways | LineType::BranchPositive | LineType::BranchNegative
        )
    }

    /// The opposite branch polarity. Panics for non-conditional lines.
    pub fn inverted(self) -> LineType {
        match self {
            LineType::BranchPositive => LineType::BranchNegative,
            LineType::BranchNegative => LineType::BranchPositive,
            other => panic!("cannot invert line type {:?}", other),
        }
    }
}

/// A read-only view of one line handed to the combiner.
pub struct CombinableLine<'a, C> {
    pub code: &'a C,
    pub target: Option<Label>,
    pub ty: LineType,
}

/// One replacement line produced by a combiner match.
pub struct NewLine<C> {
    pub code: C,
    pub target: Option<Label>,
    pub ty: LineType,
}

/// The outcome of a combiner match: how many window lines were consumed
/// and what (zero, one, or two lines) replaces them.
pub struct CombinerResult<C> {
    pub consumed: usize,
    pub lines: Vec<NewLine<C>>,
}

impl<C> CombinerResult<C> {
    pub fn replace(consumed: usize, lines: Vec<NewLine<C>>) -> CombinerResult<C> {
        CombinerResult { consumed, lines }
    }

    pub fn consume(consumed: usize) -> CombinerResult<C> {
        CombinerResult {
            consumed,
            lines: Vec::new(),
        }
    }
}

/// Relationship between two adjacent conditional tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameTestResult {
    Unrelated,
    /// Same outcome as the first test.
    SameTest,
    /// Opposite outcome from the first test.
    OppositeTest,
}

/// Whether a plain line statically decides the conditional branch after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlsCondition {
    Unrelated,
    /// A positive-polarity branch after this line always fires.
    CausesBranchIfPositive,
    /// A positive-polarity branch after this line never fires.
    CausesNoOpIfPositive,
}

/// Target-specific knowledge plugged into the optimizer.
pub trait PeepholeCombiner<C> {
    /// Try to match a pattern at the start of the window. The window holds
    /// one to `max_window` lines; lines after the first are unlabeled.
    fn apply(&mut self, window: &[CombinableLine<'_, C>]) -> Option<CombinerResult<C>>;

    /// Code for a synthesized unconditional jump.
    fn synthesize_branch_always(&self) -> C;

    fn are_identical(&self, a: &C, b: &C) -> bool;

    /// Merge two identical lines, keeping the earliest debug annotation.
    fn merge_identical(&self, a: &C, b: &C) -> C;

    /// Whether a terminator line may be copied over a jump to it.
    fn can_duplicate(&self, code: &C) -> bool;

    fn are_same_test(&self, a: &C, b: &C) -> SameTestResult;

    fn controls_conditional_branch(&self, a: &C, b: &C) -> ControlsCondition;

    fn max_window(&self) -> usize {
        3
    }
}

struct Line<C> {
    label: Option<Label>,
    code: C,
    target: Option<Label>,
    ty: LineType,
}

/// An append-only buffer of lines that is optimized as a whole when the
/// routine is finished.
pub struct PeepholeBuffer<C> {
    lines: Vec<Line<C>>,
    pending_label: Option<Label>,
    // later label -> first label marked at the same position
    aliases: HashMap<Label, Label>,
}

impl<C> Default for PeepholeBuffer<C> {
    fn default() -> Self {
        PeepholeBuffer {
            lines: Vec::new(),
            pending_label: None,
            aliases: HashMap::new(),
        }
    }
}

impl<C: Clone> PeepholeBuffer<C> {
    pub fn new() -> PeepholeBuffer<C> {
        PeepholeBuffer::default()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Append a line. Branch types require a target; all others forbid one.
    /// A pending label attaches to the new line.
    pub fn add_line(&mut self, code: C, target: Option<Label>, ty: LineType) {
        if ty.has_target() {
            assert!(target.is_some(), "branch line requires a target");
        } else {
            assert!(target.is_none(), "non-branch line may not carry a target");
        }
        let label = self.pending_label.take();
        self.lines.push(Line {
            label,
            code,
            target,
            ty,
        });
    }

    /// Mark a label at the current position. A second label marked at the
    /// same position becomes an alias of the first.
    pub fn mark_label(&mut self, label: Label) {
        match self.pending_label {
            None => self.pending_label = Some(label),
            Some(canonical) => {
                self.aliases.insert(label, canonical);
            }
        }
    }

    /// Splice another buffer's lines in front of this one. A label left
    /// pending in the other buffer attaches to this buffer's first line.
    pub fn insert_buffer_first(&mut self, mut other: PeepholeBuffer<C>) {
        if let Some(label) = other.pending_label.take() {
            match self.lines.first_mut() {
                Some(first) => match first.label {
                    Some(existing) => {
                        other.aliases.insert(label, existing);
                    }
                    None => first.label = Some(label),
                },
                None => self.mark_label(label),
            }
        }
        self.aliases.extend(other.aliases);
        let mut lines = other.lines;
        lines.append(&mut self.lines);
        self.lines = lines;
    }

    /// Optimize the buffer to a fixpoint, then hand every surviving line to
    /// the handler in order.
    pub fn finish<K, F>(mut self, combiner: &mut K, mut handler: F)
    where
        K: PeepholeCombiner<C> + ?Sized,
        F: FnMut(Option<Label>, &C, Option<Label>, LineType),
    {
        self.optimize(combiner);
        for line in &self.lines {
            handler(line.label, &line.code, line.target, line.ty);
        }
        if let Some(label) = self.pending_label {
            debug!("peephole: label {} marked after the last line", label);
        }
    }

    fn optimize<K>(&mut self, combiner: &mut K)
    where
        K: PeepholeCombiner<C> + ?Sized,
    {
        self.canonicalize_targets();

        let mut passes = 0;
        loop {
            if self.lines.is_empty() {
                break;
            }
            passes += 1;
            let mut changed = false;

            // drop unreachable lines; a reachable line never targets them,
            // so their labels (if any) are dead as well
            let (reachable, used_labels) = self.analyze();
            let mut idx = 0;
            self.lines.retain(|_| {
                let keep = reachable[idx];
                idx += 1;
                keep
            });
            if self.lines.len() != reachable.len() {
                changed = true;
            }

            // clear labels nothing branches to
            for line in &mut self.lines {
                if let Some(label) = line.label {
                    if !used_labels.contains(&label) {
                        line.label = None;
                        changed = true;
                    }
                }
            }

            if self.branch_pass(combiner) {
                changed = true;
            }
            if self.sequence_pass(combiner) {
                changed = true;
            }

            if !changed {
                break;
            }
        }
        debug!("peephole: settled after {} passes, {} lines", passes, self.lines.len());
    }

    /// Resolve branch targets through the alias map.
    fn canonicalize_targets(&mut self) {
        if self.aliases.is_empty() {
            return;
        }
        for line in &mut self.lines {
            if let Some(mut target) = line.target {
                while let Some(&canonical) = self.aliases.get(&target) {
                    target = canonical;
                }
                line.target = Some(target);
            }
        }
    }

    /// Reachability from the first line, plus the set of labels targeted by
    /// reachable lines.
    fn analyze(&self) -> (Vec<bool>, HashSet<Label>) {
        let n = self.lines.len();
        let mut reachable = vec![false; n];
        let mut used_labels = HashSet::new();
        let mut work = vec![0usize];
        while let Some(i) = work.pop() {
            if i >= n || reachable[i] {
                continue;
            }
            reachable[i] = true;
            if self.lines[i].ty.falls_through() {
                work.push(i + 1);
            }
            if let Some(target) = self.lines[i].target {
                used_labels.insert(target);
                if let Some(j) = self.index_of_label(target) {
                    work.push(j);
                }
            }
        }
        (reachable, used_labels)
    }

    fn index_of_label(&self, label: Label) -> Option<usize> {
        self.lines.iter().position(|line| line.label == Some(label))
    }

    fn rewrite_targets(&mut self, from: Label, to: Label) {
        for line in &mut self.lines {
            if line.target == Some(from) {
                line.target = Some(to);
            }
        }
    }

    /// Remove a line, keeping any label on it valid: the label moves to the
    /// following line, merges with that line's label, or (when the labeled
    /// line was last and still referenced) lands on a synthesized jump to
    /// the true label.
    fn delete_line<K>(&mut self, i: usize, combiner: &mut K)
    where
        K: PeepholeCombiner<C> + ?Sized,
    {
        let line = self.lines.remove(i);
        let label = match line.label {
            Some(label) => label,
            None => return,
        };
        if i < self.lines.len() {
            match self.lines[i].label {
                Some(existing) => self.rewrite_targets(label, existing),
                None => self.lines[i].label = Some(label),
            }
        } else if self.lines.iter().any(|l| l.target == Some(label)) {
            self.lines.push(Line {
                label: Some(label),
                code: combiner.synthesize_branch_always(),
                target: Some(Label::RTrue),
                ty: LineType::BranchAlways,
            });
        }
    }

    /// Branch-shape transforms: chaining through unconditional branches,
    /// deleting jumps to the next line, inverting a conditional branch over
    /// an unconditional one, and duplicating cheap terminators over jumps.
    fn branch_pass<K>(&mut self, combiner: &mut K) -> bool
    where
        K: PeepholeCombiner<C> + ?Sized,
    {
        let mut changed = false;
        let mut i = 0;
        while i < self.lines.len() {
            let target = match self.lines[i].target {
                Some(t) => t,
                None => {
                    i += 1;
                    continue;
                }
            };
            let j = match self.index_of_label(target) {
                Some(j) if j != i => j,
                _ => {
                    i += 1;
                    continue;
                }
            };

            // chain through an unconditional branch at the target; advance
            // rather than retrying so a cycle of jumps cannot spin here
            if self.lines[j].ty == LineType::BranchAlways && self.lines[j].target != Some(target) {
                self.lines[i].target = self.lines[j].target;
                changed = true;
                i += 1;
                continue;
            }

            match self.lines[i].ty {
                LineType::BranchAlways => {
                    if j == i + 1 {
                        // jump to the next line
                        self.delete_line(i, combiner);
                        changed = true;
                        continue;
                    }
                    if self.lines[j].ty == LineType::Terminator
                        && combiner.can_duplicate(&self.lines[j].code)
                    {
                        // copy the terminator over the jump
                        self.lines[i].code = self.lines[j].code.clone();
                        self.lines[i].ty = LineType::Terminator;
                        self.lines[i].target = None;
                        changed = true;
                        continue;
                    }
                }
                LineType::BranchPositive | LineType::BranchNegative => {
                    // conditional branch over an unconditional one
                    if j == i + 2
                        && self.lines[i + 1].ty == LineType::BranchAlways
                        && self.lines[i + 1].label.is_none()
                        && self.lines[i + 1].target != Some(target)
                    {
                        self.lines[i].ty = self.lines[i].ty.inverted();
                        self.lines[i].target = self.lines[i + 1].target;
                        self.delete_line(i + 1, combiner);
                        changed = true;
                        continue;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        changed
    }

    /// Adjacent-line transforms: merging identical non-falling lines,
    /// folding dominated tests, statically resolved branches, and the
    /// combiner's pattern window. A successful combine retries at the same
    /// position.
    fn sequence_pass<K>(&mut self, combiner: &mut K) -> bool
    where
        K: PeepholeCombiner<C> + ?Sized,
    {
        let mut changed = false;
        let mut i = 0;
        while i < self.lines.len() {
            // merge adjacent identical lines when the first never falls through
            if i + 1 < self.lines.len() {
                let (a, b) = (&self.lines[i], &self.lines[i + 1]);
                if !a.ty.falls_through()
                    && a.ty == b.ty
                    && a.target == b.target
                    && combiner.are_identical(&a.code, &b.code)
                {
                    self.lines[i + 1].code =
                        combiner.merge_identical(&self.lines[i].code, &self.lines[i + 1].code);
                    self.delete_line(i, combiner);
                    changed = true;
                    continue;
                }
            }

            // a second test whose outcome the first test fixed
            if self.lines[i].ty.is_conditional() && i + 1 < self.lines.len() {
                let b = &self.lines[i + 1];
                if b.label.is_none() && b.ty.is_conditional() {
                    let relation = combiner.are_same_test(&self.lines[i].code, &b.code);
                    if relation != SameTestResult::Unrelated {
                        // falling past the first branch fixes the test value
                        let value_after = self.lines[i].ty == LineType::BranchNegative;
                        let second_value = if relation == SameTestResult::SameTest {
                            value_after
                        } else {
                            !value_after
                        };
                        let taken =
                            second_value == (self.lines[i + 1].ty == LineType::BranchPositive);
                        if taken {
                            self.lines[i + 1].code = combiner.synthesize_branch_always();
                            self.lines[i + 1].ty = LineType::BranchAlways;
                        } else {
                            self.lines.remove(i + 1);
                        }
                        changed = true;
                        continue;
                    }
                }
            }

            // a conditional branch statically decided by the line before it
            if self.lines[i].ty == LineType::Plain && i + 1 < self.lines.len() {
                let b = &self.lines[i + 1];
                if b.label.is_none() && b.ty.is_conditional() {
                    let relation =
                        combiner.controls_conditional_branch(&self.lines[i].code, &b.code);
                    if relation != ControlsCondition::Unrelated {
                        let fires = (relation == ControlsCondition::CausesBranchIfPositive)
                            == (self.lines[i + 1].ty == LineType::BranchPositive);
                        let target = self.lines[i + 1].target;
                        self.lines.remove(i + 1);
                        if fires {
                            self.lines[i].code = combiner.synthesize_branch_always();
                            self.lines[i].ty = LineType::BranchAlways;
                            self.lines[i].target = target;
                        } else {
                            self.delete_line(i, combiner);
                        }
                        changed = true;
                        continue;
                    }
                }
            }

            // pattern window
            let result = {
                let mut window = Vec::new();
                for k in i..self.lines.len() {
                    if window.len() == combiner.max_window() {
                        break;
                    }
                    if k > i && self.lines[k].label.is_some() {
                        break;
                    }
                    let line = &self.lines[k];
                    window.push(CombinableLine {
                        code: &line.code,
                        target: line.target,
                        ty: line.ty,
                    });
                }
                combiner.apply(&window)
            };
            if let Some(result) = result {
                self.apply_result(i, result, combiner);
                changed = true;
                continue;
            }

            i += 1;
        }
        changed
    }

    fn apply_result<K>(&mut self, i: usize, result: CombinerResult<C>, combiner: &mut K)
    where
        K: PeepholeCombiner<C> + ?Sized,
    {
        let consumed = result.consumed;
        assert!(
            consumed >= 1 && i + consumed <= self.lines.len(),
            "combiner consumed {} lines out of range",
            consumed
        );
        let replacement_len = result.lines.len();
        // the window never extends past a label, so only the first consumed
        // line can carry one
        let label = self.lines[i].label.take();
        let replacements = result.lines.into_iter().map(|new_line| {
            if new_line.ty.has_target() {
                assert!(new_line.target.is_some(), "branch line requires a target");
            } else {
                assert!(
                    new_line.target.is_none(),
                    "non-branch line may not carry a target"
                );
            }
            Line {
                label: None,
                code: new_line.code,
                target: new_line.target,
                ty: new_line.ty,
            }
        });
        let _removed: Vec<Line<C>> = self.lines.splice(i..i + consumed, replacements).collect();

        if let Some(label) = label {
            if replacement_len > 0 {
                self.lines[i].label = Some(label);
            } else if i < self.lines.len() {
                match self.lines[i].label {
                    Some(existing) => self.rewrite_targets(label, existing),
                    None => self.lines[i].label = Some(label),
                }
            } else if self.lines.iter().any(|l| l.target == Some(label)) {
                self.lines.push(Line {
                    label: Some(label),
                    code: combiner.synthesize_branch_always(),
                    target: Some(Label::RTrue),
                    ty: LineType::BranchAlways,
                });
            }
        }
    }
}
