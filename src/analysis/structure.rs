//! Control-flow restructuring: CFG back to structured statements
//!
//! The lifters and the devirtualiser work on CFGs internally but must hand
//! an IR tree to the pipeline. This walker reconstructs linear chains,
//! if/else diamonds (join = immediate post-dominator) and natural while
//! loops. Regions it cannot restructure degrade to a linear emission of the
//! remaining blocks with an `IrregularControlFlow` warning; nothing is
//! fabricated.

use std::collections::HashSet;

use crate::common::types::{BlockId, UnaryOp, Warning, WarningKind};
use crate::analysis::cfg::{ControlFlowGraph, Terminator};
use crate::ir::factory;
use crate::ir::node::StmtNode;

/// Reconstruct a statement list from a CFG
pub fn restructure(cfg: &ControlFlowGraph) -> (Vec<StmtNode>, Vec<Warning>) {
    let mut walker = Walker {
        cfg,
        visited: HashSet::new(),
        warnings: Vec::new(),
        failed: false,
        loop_stack: Vec::new(),
    };
    let body = walker.emit_region(cfg.entry, None);
    if walker.failed {
        return linear_fallback(cfg, walker.warnings);
    }
    (body, walker.warnings)
}

struct LoopFrame {
    header: BlockId,
    exit: BlockId,
}

struct Walker<'a> {
    cfg: &'a ControlFlowGraph,
    visited: HashSet<BlockId>,
    warnings: Vec<Warning>,
    failed: bool,
    loop_stack: Vec<LoopFrame>,
}

impl Walker<'_> {
    fn emit_region(&mut self, start: BlockId, stop: Option<BlockId>) -> Vec<StmtNode> {
        let mut out = Vec::new();
        let mut current = start;
        loop {
            if self.failed {
                return out;
            }
            if Some(current) == stop || current == self.cfg.exit {
                return out;
            }
            if let Some(frame) = self.loop_stack.last() {
                if current == frame.header {
                    out.push(factory::continue_stmt(None));
                    return out;
                }
                if current == frame.exit {
                    out.push(factory::break_stmt(None));
                    return out;
                }
            }
            if !self.visited.insert(current) {
                self.mark_irregular(current);
                return out;
            }

            // A loop header carrying its own instructions must re-run them
            // every iteration; emit `while (true)` with an explicit break
            // instead of hoisting them out of the loop
            if let Terminator::Branch {
                condition,
                true_target,
                false_target,
            } = self.cfg.blocks[current].terminator.clone()
            {
                if self.is_loop_header(current)
                    && !self.cfg.blocks[current].instructions.is_empty()
                {
                    let Some((body_target, exit_target, negate)) =
                        self.classify_loop_exits(current, true_target, false_target)
                    else {
                        self.mark_irregular(current);
                        return out;
                    };
                    let mut loop_body: Vec<StmtNode> =
                        self.cfg.blocks[current].instructions.to_vec();
                    let break_test = if negate {
                        condition
                    } else {
                        factory::unary(UnaryOp::Not, condition)
                    };
                    loop_body.push(factory::if_stmt(
                        break_test,
                        factory::break_stmt(None),
                        None,
                    ));
                    self.loop_stack.push(LoopFrame {
                        header: current,
                        exit: exit_target,
                    });
                    loop_body.extend(self.emit_region(body_target, Some(current)));
                    self.loop_stack.pop();
                    out.push(factory::while_stmt(
                        factory::boolean(true),
                        factory::block(loop_body),
                    ));
                    current = exit_target;
                    continue;
                }
            }

            for stmt in &self.cfg.blocks[current].instructions {
                out.push(stmt.clone());
            }

            match self.cfg.blocks[current].terminator.clone() {
                Terminator::Return(argument) => {
                    out.push(factory::return_stmt(argument));
                    return out;
                }
                Terminator::Throw(argument) => {
                    out.push(factory::throw_stmt(argument));
                    return out;
                }
                Terminator::Exit => return out,
                Terminator::Jump(target) => {
                    if Some(target) == stop || target == self.cfg.exit {
                        return out;
                    }
                    if let Some(frame) = self.loop_stack.last() {
                        if target == frame.header {
                            out.push(factory::continue_stmt(None));
                            return out;
                        }
                        if target == frame.exit {
                            out.push(factory::break_stmt(None));
                            return out;
                        }
                    }
                    current = target;
                }
                Terminator::Branch {
                    condition,
                    true_target,
                    false_target,
                } => {
                    if self.is_loop_header(current) {
                        let (body_target, exit_target, negate) =
                            match self.classify_loop_exits(current, true_target, false_target) {
                                Some(split) => split,
                                None => {
                                    self.mark_irregular(current);
                                    return out;
                                }
                            };
                        let test = if negate {
                            factory::unary(UnaryOp::Not, condition)
                        } else {
                            condition
                        };
                        self.loop_stack.push(LoopFrame {
                            header: current,
                            exit: exit_target,
                        });
                        let body = self.emit_region(body_target, Some(current));
                        self.loop_stack.pop();
                        out.push(factory::while_stmt(test, factory::block(body)));
                        current = exit_target;
                    } else {
                        let Some(&join) = self.cfg.dominators.post_idom.get(&current) else {
                            self.mark_irregular(current);
                            return out;
                        };
                        let consequent = self.emit_region(true_target, Some(join));
                        let alternate = self.emit_region(false_target, Some(join));
                        let alternate = if alternate.is_empty() {
                            None
                        } else {
                            Some(factory::block(alternate))
                        };
                        out.push(factory::if_stmt(
                            condition,
                            factory::block(consequent),
                            alternate,
                        ));
                        current = join;
                    }
                }
            }
        }
    }

    fn is_loop_header(&self, block: BlockId) -> bool {
        self.cfg
            .predecessors(block)
            .iter()
            .any(|&pred| self.cfg.dominates(block, pred))
    }

    /// Split a loop header's branch targets into (body, exit, negate-test)
    fn classify_loop_exits(
        &self,
        header: BlockId,
        true_target: BlockId,
        false_target: BlockId,
    ) -> Option<(BlockId, BlockId, bool)> {
        let body = self.natural_loop_body(header);
        let true_in = body.contains(&true_target);
        let false_in = body.contains(&false_target);
        match (true_in, false_in) {
            (true, false) => Some((true_target, false_target, false)),
            (false, true) => Some((false_target, true_target, true)),
            _ => None,
        }
    }

    /// Blocks of the natural loop with the given header
    fn natural_loop_body(&self, header: BlockId) -> HashSet<BlockId> {
        let mut body: HashSet<BlockId> = HashSet::new();
        body.insert(header);
        let mut stack: Vec<BlockId> = self
            .cfg
            .predecessors(header)
            .iter()
            .copied()
            .filter(|&pred| self.cfg.dominates(header, pred))
            .collect();
        while let Some(block) = stack.pop() {
            if body.insert(block) {
                for &pred in self.cfg.predecessors(block) {
                    stack.push(pred);
                }
            }
        }
        body
    }

    fn mark_irregular(&mut self, block: BlockId) {
        self.failed = true;
        self.warnings.push(Warning::new(
            WarningKind::IrregularControlFlow,
            format!("control flow around block {} could not be restructured", block),
        ));
    }
}

/// Last-resort emission: block instructions in reverse postorder, with
/// branch conditions kept as expression statements so their effects survive
fn linear_fallback(
    cfg: &ControlFlowGraph,
    mut warnings: Vec<Warning>,
) -> (Vec<StmtNode>, Vec<Warning>) {
    warnings.push(Warning::new(
        WarningKind::IrregularControlFlow,
        "falling back to linear block emission",
    ));
    let mut out = Vec::new();
    for block in cfg.reverse_postorder() {
        for stmt in &cfg.blocks[block].instructions {
            out.push(stmt.clone());
        }
        match cfg.blocks[block].terminator.clone() {
            Terminator::Return(argument) => out.push(factory::return_stmt(argument)),
            Terminator::Throw(argument) => out.push(factory::throw_stmt(argument)),
            Terminator::Branch { condition, .. } => {
                out.push(factory::expression_stmt(condition));
            }
            Terminator::Jump(_) | Terminator::Exit => {}
        }
    }
    (out, warnings)
}
