//! Control-flow graph construction and dominance analysis
//!
//! Statements of a function body are linearised into basic blocks with an
//! ordered instruction list and a terminator. Edges carry a kind; exception
//! edges connect potentially-throwing statements to the innermost enclosing
//! catch block, or to the function exit when there is none. Dominator,
//! post-dominator and dominance-frontier relations are computed once at
//! build time and cached on the graph.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::common::errors::StructuralError;
use crate::common::types::{BinaryOp, BlockId, SsaName};
use crate::ir::factory;
use crate::ir::node::{ExprKind, ExprNode, StmtKind, StmtNode};

/// φ pseudo-assignment placed at a block head
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phi {
    /// Variable being merged
    pub var: String,
    /// SSA name defined by this φ
    pub target: SsaName,
    /// Incoming version per predecessor block; the key set equals the
    /// block's predecessor set
    pub operands: BTreeMap<BlockId, u32>,
}

/// Block terminator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    /// Unconditional transfer
    Jump(BlockId),
    /// Two-way conditional transfer
    Branch {
        condition: ExprNode,
        true_target: BlockId,
        false_target: BlockId,
    },
    /// Return from the function
    Return(Option<ExprNode>),
    /// Raise an exception
    Throw(ExprNode),
    /// Virtual exit block terminator
    Exit,
}

/// Edge classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Fallthrough,
    True,
    False,
    Jump,
    Exception,
}

/// A directed CFG edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: BlockId,
    pub to: BlockId,
    pub kind: EdgeKind,
}

/// A basic block: ordered instructions, φ list and a terminator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    /// Block identifier (index into the arena)
    pub id: BlockId,
    /// φ-nodes at the block head, filled in by the SSA builder
    pub phis: Vec<Phi>,
    /// Straight-line statements (expression statements, declarations)
    pub instructions: Vec<StmtNode>,
    /// Terminator
    pub terminator: Terminator,
}

impl BasicBlock {
    fn new(id: BlockId) -> Self {
        Self {
            id,
            phis: Vec::new(),
            instructions: Vec::new(),
            terminator: Terminator::Exit,
        }
    }
}

/// Cached dominance information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DominatorInfo {
    /// Immediate dominator of each reachable block except the entry
    pub idom: HashMap<BlockId, BlockId>,
    /// Dominator-tree children
    pub children: HashMap<BlockId, Vec<BlockId>>,
    /// Dominance frontier of each block
    pub frontier: HashMap<BlockId, BTreeSet<BlockId>>,
    /// Immediate post-dominator of each block that reaches the exit
    pub post_idom: HashMap<BlockId, BlockId>,
}

/// A function-level control-flow graph
///
/// Blocks live in an arena indexed by [`BlockId`]; adjacency is owned by the
/// graph container, so the cyclic structure involves no ownership cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlFlowGraph {
    /// Block arena
    pub blocks: Vec<BasicBlock>,
    /// All edges
    pub edges: Vec<Edge>,
    /// Entry block
    pub entry: BlockId,
    /// Virtual exit block
    pub exit: BlockId,
    /// Cached dominance relations
    pub dominators: DominatorInfo,
    preds: HashMap<BlockId, Vec<BlockId>>,
    succs: HashMap<BlockId, Vec<BlockId>>,
}

impl ControlFlowGraph {
    /// Assemble a graph from externally built blocks and edges, pruning
    /// unreachable blocks and computing dominance; used by the bytecode
    /// lifters and the devirtualiser, which construct blocks directly
    pub fn from_parts(
        blocks: Vec<BasicBlock>,
        edges: Vec<Edge>,
        entry: BlockId,
        exit: BlockId,
    ) -> Self {
        let mut cfg = ControlFlowGraph {
            blocks,
            edges,
            entry,
            exit,
            dominators: DominatorInfo::default(),
            preds: HashMap::new(),
            succs: HashMap::new(),
        };
        prune_unreachable(&mut cfg);
        cfg.recompute();
        cfg
    }

    /// An empty block shell for external construction
    pub fn make_block(id: BlockId) -> BasicBlock {
        BasicBlock::new(id)
    }

    /// Predecessor blocks, in edge insertion order, deduplicated
    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        self.preds.get(&block).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Successor blocks, in edge insertion order, deduplicated
    pub fn successors(&self, block: BlockId) -> &[BlockId] {
        self.succs.get(&block).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Blocks in reverse postorder from the entry
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = HashSet::new();
        let mut postorder = Vec::new();
        let mut stack = vec![(self.entry, 0usize)];
        visited.insert(self.entry);
        while let Some((block, child)) = stack.pop() {
            let succs = self.successors(block);
            if child < succs.len() {
                stack.push((block, child + 1));
                let next = succs[child];
                if visited.insert(next) {
                    stack.push((next, 0));
                }
            } else {
                postorder.push(block);
            }
        }
        postorder.reverse();
        postorder
    }

    /// True when `a` dominates `b`
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b || a == self.entry {
            return true;
        }
        let mut runner = b;
        while let Some(&idom) = self.dominators.idom.get(&runner) {
            if idom == a {
                return true;
            }
            if idom == runner {
                break;
            }
            runner = idom;
        }
        false
    }

    /// Back edges: edges whose target dominates their source
    pub fn back_edges(&self) -> Vec<Edge> {
        self.edges
            .iter()
            .copied()
            .filter(|e| self.dominates(e.to, e.from))
            .collect()
    }

    /// Rebuild adjacency and dominance caches from the edge list
    pub fn recompute(&mut self) {
        self.rebuild_adjacency();
        self.compute_dominators();
    }

    fn rebuild_adjacency(&mut self) {
        self.preds.clear();
        self.succs.clear();
        for block in &self.blocks {
            self.preds.entry(block.id).or_default();
            self.succs.entry(block.id).or_default();
        }
        for edge in &self.edges {
            let succs = self.succs.entry(edge.from).or_default();
            if !succs.contains(&edge.to) {
                succs.push(edge.to);
            }
            let preds = self.preds.entry(edge.to).or_default();
            if !preds.contains(&edge.from) {
                preds.push(edge.from);
            }
        }
    }

    fn compute_dominators(&mut self) {
        let mut graph = DiGraph::<BlockId, ()>::new();
        let mut index_of: HashMap<BlockId, NodeIndex> = HashMap::new();
        for block in &self.blocks {
            index_of.insert(block.id, graph.add_node(block.id));
        }
        for edge in &self.edges {
            graph.add_edge(index_of[&edge.from], index_of[&edge.to], ());
        }

        let mut info = DominatorInfo::default();

        let doms = petgraph::algo::dominators::simple_fast(&graph, index_of[&self.entry]);
        for block in &self.blocks {
            if block.id == self.entry {
                continue;
            }
            if let Some(idom_index) = doms.immediate_dominator(index_of[&block.id]) {
                let idom = graph[idom_index];
                info.idom.insert(block.id, idom);
                info.children.entry(idom).or_default().push(block.id);
            }
        }
        for children in info.children.values_mut() {
            children.sort_unstable();
        }

        // Dominance frontier per Cooper-Harvey-Kennedy
        for block in &self.blocks {
            let preds = self.predecessors(block.id);
            if preds.len() < 2 {
                continue;
            }
            let Some(&idom) = info.idom.get(&block.id) else {
                continue;
            };
            for &pred in preds {
                let mut runner = pred;
                loop {
                    if runner == idom {
                        break;
                    }
                    info.frontier.entry(runner).or_default().insert(block.id);
                    match info.idom.get(&runner) {
                        Some(&next) if next != runner => runner = next,
                        _ => break,
                    }
                }
            }
        }

        // Post-dominators over the reversed graph rooted at the exit
        let mut reversed = DiGraph::<BlockId, ()>::new();
        let mut rev_index: HashMap<BlockId, NodeIndex> = HashMap::new();
        for block in &self.blocks {
            rev_index.insert(block.id, reversed.add_node(block.id));
        }
        for edge in &self.edges {
            reversed.add_edge(rev_index[&edge.to], rev_index[&edge.from], ());
        }
        let post = petgraph::algo::dominators::simple_fast(&reversed, rev_index[&self.exit]);
        for block in &self.blocks {
            if block.id == self.exit {
                continue;
            }
            if let Some(pidom_index) = post.immediate_dominator(rev_index[&block.id]) {
                info.post_idom.insert(block.id, reversed[pidom_index]);
            }
        }

        self.dominators = info;
    }
}

struct LoopContext {
    label: Option<String>,
    break_target: BlockId,
    continue_target: Option<BlockId>,
}

/// Builds a [`ControlFlowGraph`] from an ordered statement list
pub struct CfgBuilder {
    blocks: Vec<BasicBlock>,
    edges: Vec<Edge>,
    exit: BlockId,
    current: BlockId,
    terminated: bool,
    loop_stack: Vec<LoopContext>,
    catch_stack: Vec<BlockId>,
    pending_label: Option<String>,
}

impl CfgBuilder {
    /// Build a CFG for the given function body
    ///
    /// Empty input produces a CFG of exactly two blocks (entry, exit)
    /// connected by one fallthrough edge. Malformed terminators (`break`
    /// without an enclosing loop) are a structural error that aborts this
    /// function only.
    pub fn build(body: &[StmtNode]) -> Result<ControlFlowGraph, StructuralError> {
        let mut builder = CfgBuilder {
            blocks: vec![BasicBlock::new(0), BasicBlock::new(1)],
            edges: Vec::new(),
            exit: 1,
            current: 0,
            terminated: false,
            loop_stack: Vec::new(),
            catch_stack: Vec::new(),
            pending_label: None,
        };
        builder.lower_stmts(body)?;
        if !builder.terminated {
            builder.seal_jump(builder.exit, EdgeKind::Fallthrough);
        }
        builder.finish()
    }

    fn finish(mut self) -> Result<ControlFlowGraph, StructuralError> {
        self.blocks[self.exit].terminator = Terminator::Exit;
        let mut cfg = ControlFlowGraph {
            blocks: self.blocks,
            edges: self.edges,
            entry: 0,
            exit: self.exit,
            dominators: DominatorInfo::default(),
            preds: HashMap::new(),
            succs: HashMap::new(),
        };
        prune_unreachable(&mut cfg);
        cfg.recompute();
        Ok(cfg)
    }

    fn new_block(&mut self) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(BasicBlock::new(id));
        id
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) {
        let edge = Edge { from, to, kind };
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }

    /// Seal the current block with an unconditional transfer
    fn seal_jump(&mut self, target: BlockId, kind: EdgeKind) {
        self.blocks[self.current].terminator = Terminator::Jump(target);
        self.add_edge(self.current, target, kind);
        self.terminated = true;
    }

    fn seal_branch(&mut self, condition: ExprNode, true_target: BlockId, false_target: BlockId) {
        self.blocks[self.current].terminator = Terminator::Branch {
            condition,
            true_target,
            false_target,
        };
        self.add_edge(self.current, true_target, EdgeKind::True);
        self.add_edge(self.current, false_target, EdgeKind::False);
        self.terminated = true;
    }

    /// Switch emission to `block`
    fn resume_at(&mut self, block: BlockId) {
        self.current = block;
        self.terminated = false;
    }

    fn innermost_catch(&self) -> Option<BlockId> {
        self.catch_stack.last().copied()
    }

    fn push_instruction(&mut self, stmt: StmtNode) {
        let throwing = stmt_may_throw(&stmt);
        self.blocks[self.current].instructions.push(stmt);
        if throwing {
            if let Some(catch) = self.innermost_catch() {
                self.add_edge(self.current, catch, EdgeKind::Exception);
            }
        }
    }

    fn lower_stmts(&mut self, stmts: &[StmtNode]) -> Result<(), StructuralError> {
        for stmt in stmts {
            if self.terminated {
                // Statements after a terminator are unreachable; keep
                // lowering into a fresh block so structural errors inside
                // them are still reported, then let pruning drop it.
                let dead = self.new_block();
                self.resume_at(dead);
            }
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &StmtNode) -> Result<(), StructuralError> {
        let label = self.pending_label.take();
        match &stmt.kind {
            StmtKind::Expression(_)
            | StmtKind::VarDecl { .. }
            | StmtKind::FunctionDecl { .. } => {
                self.push_instruction(stmt.clone());
                Ok(())
            }
            StmtKind::Empty => Ok(()),
            StmtKind::Block(body) => self.lower_stmts(body),
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                let then_block = self.new_block();
                let join = self.new_block();
                let else_block = if alternate.is_some() {
                    self.new_block()
                } else {
                    join
                };
                self.seal_branch(test.clone(), then_block, else_block);

                self.resume_at(then_block);
                self.lower_stmt(consequent)?;
                if !self.terminated {
                    self.seal_jump(join, EdgeKind::Fallthrough);
                }

                if let Some(alternate) = alternate {
                    self.resume_at(else_block);
                    self.lower_stmt(alternate)?;
                    if !self.terminated {
                        self.seal_jump(join, EdgeKind::Fallthrough);
                    }
                }

                self.resume_at(join);
                Ok(())
            }
            StmtKind::While { test, body } => {
                let header = self.new_block();
                let body_block = self.new_block();
                let exit_block = self.new_block();
                self.seal_jump(header, EdgeKind::Fallthrough);

                self.resume_at(header);
                self.seal_branch(test.clone(), body_block, exit_block);

                self.loop_stack.push(LoopContext {
                    label,
                    break_target: exit_block,
                    continue_target: Some(header),
                });
                self.resume_at(body_block);
                self.lower_stmt(body)?;
                if !self.terminated {
                    self.seal_jump(header, EdgeKind::Jump);
                }
                self.loop_stack.pop();

                self.resume_at(exit_block);
                Ok(())
            }
            StmtKind::DoWhile { body, test } => {
                let body_block = self.new_block();
                let test_block = self.new_block();
                let exit_block = self.new_block();
                self.seal_jump(body_block, EdgeKind::Fallthrough);

                self.loop_stack.push(LoopContext {
                    label,
                    break_target: exit_block,
                    continue_target: Some(test_block),
                });
                self.resume_at(body_block);
                self.lower_stmt(body)?;
                if !self.terminated {
                    self.seal_jump(test_block, EdgeKind::Fallthrough);
                }
                self.loop_stack.pop();

                self.resume_at(test_block);
                self.seal_branch(test.clone(), body_block, exit_block);

                self.resume_at(exit_block);
                Ok(())
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                if let Some(init) = init {
                    self.lower_stmt(init)?;
                }
                let header = self.new_block();
                let body_block = self.new_block();
                let update_block = self.new_block();
                let exit_block = self.new_block();
                if !self.terminated {
                    self.seal_jump(header, EdgeKind::Fallthrough);
                }

                self.resume_at(header);
                let condition = test
                    .clone()
                    .unwrap_or_else(|| factory::boolean(true));
                self.seal_branch(condition, body_block, exit_block);

                self.loop_stack.push(LoopContext {
                    label,
                    break_target: exit_block,
                    continue_target: Some(update_block),
                });
                self.resume_at(body_block);
                self.lower_stmt(body)?;
                if !self.terminated {
                    self.seal_jump(update_block, EdgeKind::Fallthrough);
                }
                self.loop_stack.pop();

                self.resume_at(update_block);
                if let Some(update) = update {
                    self.push_instruction(factory::expression_stmt(update.clone()));
                }
                self.seal_jump(header, EdgeKind::Jump);

                self.resume_at(exit_block);
                Ok(())
            }
            StmtKind::Switch {
                discriminant,
                cases,
            } => self.lower_switch(label, discriminant, cases),
            StmtKind::Return(argument) => {
                self.blocks[self.current].terminator = Terminator::Return(argument.clone());
                self.add_edge(self.current, self.exit, EdgeKind::Jump);
                self.terminated = true;
                Ok(())
            }
            StmtKind::Throw(argument) => {
                self.blocks[self.current].terminator = Terminator::Throw(argument.clone());
                let target = self.innermost_catch().unwrap_or(self.exit);
                self.add_edge(self.current, target, EdgeKind::Exception);
                self.terminated = true;
                Ok(())
            }
            StmtKind::Break(break_label) => {
                let target = self.find_break_target(break_label.as_deref())?;
                self.seal_jump(target, EdgeKind::Jump);
                Ok(())
            }
            StmtKind::Continue(continue_label) => {
                let target = self.find_continue_target(continue_label.as_deref())?;
                self.seal_jump(target, EdgeKind::Jump);
                Ok(())
            }
            StmtKind::Try {
                block,
                handler,
                finalizer,
            } => self.lower_try(block, handler.as_ref(), finalizer.as_deref()),
            StmtKind::Labeled { label, body } => {
                match &body.kind {
                    StmtKind::While { .. }
                    | StmtKind::DoWhile { .. }
                    | StmtKind::For { .. }
                    | StmtKind::Switch { .. } => {
                        self.pending_label = Some(label.clone());
                        self.lower_stmt(body)
                    }
                    _ => {
                        // A labeled plain statement is a breakable region
                        let join = self.new_block();
                        self.loop_stack.push(LoopContext {
                            label: Some(label.clone()),
                            break_target: join,
                            continue_target: None,
                        });
                        self.lower_stmt(body)?;
                        self.loop_stack.pop();
                        if !self.terminated {
                            self.seal_jump(join, EdgeKind::Fallthrough);
                        }
                        self.resume_at(join);
                        Ok(())
                    }
                }
            }
        }
    }

    fn lower_switch(
        &mut self,
        label: Option<String>,
        discriminant: &ExprNode,
        cases: &[crate::ir::node::SwitchCase],
    ) -> Result<(), StructuralError> {
        // Evaluate the discriminant once into a temp
        let temp = factory::fresh_variable_name();
        self.push_instruction(factory::let_single(temp.clone(), discriminant.clone()));

        let join = self.new_block();
        let body_blocks: Vec<BlockId> = cases.iter().map(|_| self.new_block()).collect();
        let default_index = cases.iter().position(|c| c.test.is_none());

        // Chain of test blocks over the non-default cases
        let mut chain_from = self.current;
        for (index, case) in cases.iter().enumerate() {
            let Some(test) = &case.test else { continue };
            let next_test = self.new_block();
            self.resume_at(chain_from);
            let condition = factory::binary(
                BinaryOp::StrictEq,
                factory::identifier(temp.clone()),
                test.clone(),
            );
            self.seal_branch(condition, body_blocks[index], next_test);
            chain_from = next_test;
        }
        // Exhausted chain: default body or join
        self.resume_at(chain_from);
        let fallback = default_index.map(|i| body_blocks[i]).unwrap_or(join);
        self.seal_jump(fallback, EdgeKind::Fallthrough);

        // Case bodies fall through to the next body in source order
        self.loop_stack.push(LoopContext {
            label,
            break_target: join,
            continue_target: None,
        });
        for (index, case) in cases.iter().enumerate() {
            self.resume_at(body_blocks[index]);
            self.lower_stmts(&case.body)?;
            if !self.terminated {
                let next = body_blocks.get(index + 1).copied().unwrap_or(join);
                self.seal_jump(next, EdgeKind::Fallthrough);
            }
        }
        self.loop_stack.pop();

        self.resume_at(join);
        Ok(())
    }

    fn lower_try(
        &mut self,
        block: &[StmtNode],
        handler: Option<&crate::ir::node::CatchClause>,
        finalizer: Option<&[StmtNode]>,
    ) -> Result<(), StructuralError> {
        let try_block = self.new_block();
        let catch_block = handler.map(|_| self.new_block());
        let after = self.new_block();
        self.seal_jump(try_block, EdgeKind::Fallthrough);

        self.resume_at(try_block);
        if let Some(catch) = catch_block {
            self.catch_stack.push(catch);
        }
        self.lower_stmts(block)?;
        if catch_block.is_some() {
            self.catch_stack.pop();
        }
        if !self.terminated {
            self.seal_jump(after, EdgeKind::Fallthrough);
        }

        if let (Some(catch), Some(handler)) = (catch_block, handler) {
            self.resume_at(catch);
            if let Some(param) = &handler.param {
                self.push_instruction(factory::let_single(
                    param.clone(),
                    factory::identifier("__exception"),
                ));
            }
            self.lower_stmts(&handler.body)?;
            if !self.terminated {
                self.seal_jump(after, EdgeKind::Fallthrough);
            }
        }

        self.resume_at(after);
        if let Some(finalizer) = finalizer {
            self.lower_stmts(finalizer)?;
        }
        Ok(())
    }

    fn find_break_target(&self, label: Option<&str>) -> Result<BlockId, StructuralError> {
        match label {
            None => self
                .loop_stack
                .last()
                .map(|ctx| ctx.break_target)
                .ok_or(StructuralError::BreakOutsideLoop),
            Some(label) => self
                .loop_stack
                .iter()
                .rev()
                .find(|ctx| ctx.label.as_deref() == Some(label))
                .map(|ctx| ctx.break_target)
                .ok_or_else(|| StructuralError::UnknownLabel {
                    label: label.to_string(),
                }),
        }
    }

    fn find_continue_target(&self, label: Option<&str>) -> Result<BlockId, StructuralError> {
        match label {
            None => self
                .loop_stack
                .iter()
                .rev()
                .find_map(|ctx| ctx.continue_target)
                .ok_or(StructuralError::ContinueOutsideLoop),
            Some(label) => self
                .loop_stack
                .iter()
                .rev()
                .find(|ctx| ctx.label.as_deref() == Some(label))
                .and_then(|ctx| ctx.continue_target)
                .ok_or_else(|| StructuralError::UnknownLabel {
                    label: label.to_string(),
                }),
        }
    }
}

/// True when the statement contains a call (may raise at runtime)
fn stmt_may_throw(stmt: &StmtNode) -> bool {
    let mut throwing = false;
    stmt.for_each_expr(&mut |e| {
        if matches!(e.kind, ExprKind::Call { .. }) {
            throwing = true;
        }
    });
    throwing
}

/// Drop blocks unreachable from the entry, remapping identifiers
fn prune_unreachable(cfg: &mut ControlFlowGraph) {
    let mut reachable: HashSet<BlockId> = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(cfg.entry);
    reachable.insert(cfg.entry);
    let mut succs_by_block: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for edge in &cfg.edges {
        succs_by_block.entry(edge.from).or_default().push(edge.to);
    }
    while let Some(block) = queue.pop_front() {
        for &next in succs_by_block.get(&block).map(|v| v.as_slice()).unwrap_or(&[]) {
            if reachable.insert(next) {
                queue.push_back(next);
            }
        }
    }
    // The virtual exit always survives so the graph keeps a sink
    reachable.insert(cfg.exit);

    if reachable.len() == cfg.blocks.len() {
        return;
    }

    let mut remap: HashMap<BlockId, BlockId> = HashMap::new();
    let mut kept = Vec::new();
    for block in cfg.blocks.drain(..) {
        if reachable.contains(&block.id) {
            remap.insert(block.id, kept.len());
            kept.push(block);
        }
    }
    for (index, block) in kept.iter_mut().enumerate() {
        block.id = index;
        match &mut block.terminator {
            Terminator::Jump(target) => *target = remap[target],
            Terminator::Branch {
                true_target,
                false_target,
                ..
            } => {
                *true_target = remap[true_target];
                *false_target = remap[false_target];
            }
            Terminator::Return(_) | Terminator::Throw(_) | Terminator::Exit => {}
        }
    }
    cfg.blocks = kept;
    cfg.edges = cfg
        .edges
        .iter()
        .filter(|e| reachable.contains(&e.from) && reachable.contains(&e.to))
        .map(|e| Edge {
            from: remap[&e.from],
            to: remap[&e.to],
            kind: e.kind,
        })
        .collect();
    cfg.entry = remap[&cfg.entry];
    cfg.exit = remap[&cfg.exit];
}

/// Extract the literal test constant from a branch, when decidable
pub fn branch_constant(condition: &ExprNode) -> Option<bool> {
    match &condition.kind {
        ExprKind::Literal(lit) => lit.to_boolean(),
        _ => None,
    }
}

/// Helper used by tests and passes: true when a terminator leaves the
/// function (return or throw)
pub fn is_exit_terminator(terminator: &Terminator) -> bool {
    matches!(terminator, Terminator::Return(_) | Terminator::Throw(_))
}
