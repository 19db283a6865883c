//! SSA construction: φ insertion and dominator-tree renaming
//!
//! φ-nodes are inserted at the iterated dominance frontier of every block
//! defining a variable, pruned to variables live into the frontier block.
//! Renaming walks the dominator tree pre-order with a per-variable version
//! stack; every definition pushes a fresh version, every use reads the top,
//! and a block's successors have their φ operands set to the version current
//! at the end of the block.
//!
//! Renaming does not rewrite the instruction nodes; use and definition sites
//! are recorded in side tables keyed by node identifier, which the cloned
//! tree nodes share. A use with no reaching definition resolves to the
//! live-on-entry version 0 with a warning; this is not fatal.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::common::errors::InvariantError;
use crate::common::types::{AssignOp, BlockId, NodeId, SsaName, Warning, WarningKind};
use crate::analysis::cfg::{ControlFlowGraph, Phi, Terminator};
use crate::ir::factory::VersionAllocator;
use crate::ir::node::{ExprKind, ExprNode, StmtKind, StmtNode};

/// SSA annotation produced for one function CFG
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SsaForm {
    /// SSA name read at each identifier use site
    pub use_names: HashMap<NodeId, SsaName>,
    /// SSA name written at each definition site
    pub def_names: HashMap<NodeId, SsaName>,
    /// Final version counter per variable
    pub versions: HashMap<String, u32>,
    /// Variables live into each block
    pub live_in: HashMap<BlockId, BTreeSet<String>>,
    /// Blocks holding a φ for each variable
    pub phi_blocks: HashMap<String, BTreeSet<BlockId>>,
}

/// Builds SSA form over a CFG, inserting φ-nodes into the blocks
pub struct SsaBuilder;

struct RenameState {
    stacks: HashMap<String, Vec<u32>>,
    versions: VersionAllocator,
    form: SsaForm,
    defined_vars: HashSet<String>,
    warned_vars: HashSet<String>,
    warnings: Vec<Warning>,
}

impl RenameState {
    fn current(&mut self, var: &str, block: BlockId) -> u32 {
        if let Some(stack) = self.stacks.get(var) {
            if let Some(&top) = stack.last() {
                return top;
            }
        }
        // No reaching definition. Free variables (never defined in this
        // function) read the ambient version 0 silently; defined variables
        // reaching here mean a def-free path and deserve a warning.
        if self.defined_vars.contains(var) && self.warned_vars.insert(var.to_string()) {
            self.warnings.push(Warning::new(
                WarningKind::MissingDefinition,
                format!("use of `{}` in block {} has no reaching definition", var, block),
            ));
        }
        0
    }

    fn push_fresh(&mut self, var: &str) -> u32 {
        let version = self.versions.fresh_version(var);
        self.stacks.entry(var.to_string()).or_default().push(version);
        version
    }

    fn use_of(&mut self, node: NodeId, var: &str, block: BlockId) {
        let version = self.current(var, block);
        self.form
            .use_names
            .insert(node, SsaName::new(var, version));
    }

    fn def_of(&mut self, node: NodeId, var: &str) {
        let version = self.push_fresh(var);
        self.form
            .def_names
            .insert(node, SsaName::new(var, version));
    }
}

impl SsaBuilder {
    /// Build SSA form for a CFG; parameters are live on entry at version 0
    pub fn build(
        cfg: &mut ControlFlowGraph,
        params: &[String],
    ) -> (SsaForm, Vec<Warning>) {
        let defs = collect_definition_sites(cfg);
        let (upward_exposed, block_defs) = collect_local_sets(cfg);
        let live_in = compute_liveness(cfg, &upward_exposed, &block_defs);

        insert_phis(cfg, &defs, &live_in);

        let mut state = RenameState {
            stacks: HashMap::new(),
            versions: VersionAllocator::new(),
            form: SsaForm {
                live_in: live_in.clone(),
                ..SsaForm::default()
            },
            defined_vars: defs.keys().cloned().collect(),
            warned_vars: HashSet::new(),
            warnings: Vec::new(),
        };
        for param in params {
            state.stacks.entry(param.clone()).or_default().push(0);
        }

        let entry = cfg.entry;
        rename_block(cfg, entry, &mut state);

        for (var, blocks) in phi_placements(cfg) {
            state.form.phi_blocks.insert(var, blocks);
        }
        state.form.versions = state.versions.into_versions();
        let warnings = std::mem::take(&mut state.warnings);
        (state.form, warnings)
    }
}

/// Blocks defining each variable
fn collect_definition_sites(cfg: &ControlFlowGraph) -> HashMap<String, BTreeSet<BlockId>> {
    let mut defs: HashMap<String, BTreeSet<BlockId>> = HashMap::new();
    for block in &cfg.blocks {
        for stmt in &block.instructions {
            for_each_def(stmt, &mut |name| {
                defs.entry(name.to_string()).or_default().insert(block.id);
            });
        }
    }
    defs
}

/// Upward-exposed uses and defined names per block, in evaluation order
fn collect_local_sets(
    cfg: &ControlFlowGraph,
) -> (
    HashMap<BlockId, BTreeSet<String>>,
    HashMap<BlockId, BTreeSet<String>>,
) {
    let mut upward: HashMap<BlockId, BTreeSet<String>> = HashMap::new();
    let mut defined: HashMap<BlockId, BTreeSet<String>> = HashMap::new();
    for block in &cfg.blocks {
        let ue = upward.entry(block.id).or_default();
        let defs = defined.entry(block.id).or_default();
        let mut local = LocalScan { ue, defs };
        for stmt in &block.instructions {
            scan_stmt(stmt, &mut local);
        }
        match &block.terminator {
            Terminator::Branch { condition, .. } => scan_uses(condition, &mut local),
            Terminator::Return(Some(argument)) | Terminator::Throw(argument) => {
                scan_uses(argument, &mut local)
            }
            _ => {}
        }
    }
    (upward, defined)
}

struct LocalScan<'a> {
    ue: &'a mut BTreeSet<String>,
    defs: &'a mut BTreeSet<String>,
}

impl LocalScan<'_> {
    fn read(&mut self, name: &str) {
        if !self.defs.contains(name) {
            self.ue.insert(name.to_string());
        }
    }

    fn write(&mut self, name: &str) {
        self.defs.insert(name.to_string());
    }
}

fn scan_stmt(stmt: &StmtNode, scan: &mut LocalScan<'_>) {
    match &stmt.kind {
        StmtKind::Expression(expr) => scan_uses(expr, scan),
        StmtKind::VarDecl { declarators, .. } => {
            for declarator in declarators {
                if let Some(init) = &declarator.init {
                    scan_uses(init, scan);
                }
                scan.write(&declarator.name);
            }
        }
        // Nested declarations are opaque at this level
        StmtKind::FunctionDecl { name, .. } => scan.write(name),
        _ => {}
    }
}

/// Walk an expression in evaluation order, classifying reads and writes
fn scan_uses(expr: &ExprNode, scan: &mut LocalScan<'_>) {
    match &expr.kind {
        ExprKind::Identifier { name, .. } => scan.read(name),
        ExprKind::Literal(_) | ExprKind::Phi { .. } | ExprKind::Function { .. } => {}
        ExprKind::Assignment { op, target, value } => {
            if let ExprKind::Identifier { name, .. } = &target.kind {
                if matches!(op, AssignOp::Compound(_)) {
                    scan.read(name);
                }
                scan_uses(value, scan);
                scan.write(name);
            } else {
                scan_uses(target, scan);
                scan_uses(value, scan);
            }
        }
        ExprKind::Update { argument, .. } => {
            if let ExprKind::Identifier { name, .. } = &argument.kind {
                scan.read(name);
                scan.write(name);
            } else {
                scan_uses(argument, scan);
            }
        }
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            scan_uses(left, scan);
            scan_uses(right, scan);
        }
        ExprKind::Unary { argument, .. } => scan_uses(argument, scan),
        ExprKind::Conditional {
            test,
            consequent,
            alternate,
        } => {
            scan_uses(test, scan);
            scan_uses(consequent, scan);
            scan_uses(alternate, scan);
        }
        ExprKind::Call { callee, arguments } => {
            scan_uses(callee, scan);
            for argument in arguments {
                scan_uses(argument, scan);
            }
        }
        ExprKind::Member {
            object, property, ..
        } => {
            scan_uses(object, scan);
            scan_uses(property, scan);
        }
        ExprKind::Array { elements } => {
            for element in elements {
                scan_uses(element, scan);
            }
        }
        ExprKind::Object { properties } => {
            for property in properties {
                scan_uses(&property.value, scan);
            }
        }
    }
}

/// Definition sites in a statement (assignment targets, declarators,
/// update expressions, nested function names)
fn for_each_def(stmt: &StmtNode, f: &mut impl FnMut(&str)) {
    match &stmt.kind {
        StmtKind::VarDecl { declarators, .. } => {
            for declarator in declarators {
                f(&declarator.name);
            }
        }
        StmtKind::FunctionDecl { name, .. } => f(name),
        StmtKind::Expression(expr) => {
            expr.for_each_expr(&mut |e| match &e.kind {
                ExprKind::Assignment { target, .. } => {
                    if let ExprKind::Identifier { name, .. } = &target.kind {
                        f(name);
                    }
                }
                ExprKind::Update { argument, .. } => {
                    if let ExprKind::Identifier { name, .. } = &argument.kind {
                        f(name);
                    }
                }
                _ => {}
            });
        }
        _ => {}
    }
}

/// Backward liveness to a fixed point
fn compute_liveness(
    cfg: &ControlFlowGraph,
    upward_exposed: &HashMap<BlockId, BTreeSet<String>>,
    block_defs: &HashMap<BlockId, BTreeSet<String>>,
) -> HashMap<BlockId, BTreeSet<String>> {
    let mut live_in: HashMap<BlockId, BTreeSet<String>> = HashMap::new();
    for block in &cfg.blocks {
        live_in.insert(block.id, upward_exposed[&block.id].clone());
    }
    let mut worklist: VecDeque<BlockId> = cfg.blocks.iter().map(|b| b.id).collect();
    while let Some(block) = worklist.pop_front() {
        let mut live_out: BTreeSet<String> = BTreeSet::new();
        for &succ in cfg.successors(block) {
            live_out.extend(live_in[&succ].iter().cloned());
        }
        let defs = &block_defs[&block];
        let mut updated = upward_exposed[&block].clone();
        updated.extend(live_out.into_iter().filter(|v| !defs.contains(v)));
        if updated != live_in[&block] {
            live_in.insert(block, updated);
            for &pred in cfg.predecessors(block) {
                worklist.push_back(pred);
            }
        }
    }
    live_in
}

/// Insert pruned φ-nodes at iterated dominance frontiers
fn insert_phis(
    cfg: &mut ControlFlowGraph,
    defs: &HashMap<String, BTreeSet<BlockId>>,
    live_in: &HashMap<BlockId, BTreeSet<String>>,
) {
    for (var, def_blocks) in defs {
        let mut has_phi: HashSet<BlockId> = HashSet::new();
        let mut worklist: VecDeque<BlockId> = def_blocks.iter().copied().collect();
        let mut enqueued: HashSet<BlockId> = def_blocks.iter().copied().collect();
        while let Some(block) = worklist.pop_front() {
            let frontier = match cfg.dominators.frontier.get(&block) {
                Some(f) => f.clone(),
                None => continue,
            };
            for target in frontier {
                if has_phi.contains(&target) {
                    continue;
                }
                let live = live_in
                    .get(&target)
                    .map(|l| l.contains(var))
                    .unwrap_or(false);
                if !live {
                    continue;
                }
                cfg.blocks[target].phis.push(Phi {
                    var: var.clone(),
                    target: SsaName::entry(var.clone()),
                    operands: BTreeMap::new(),
                });
                has_phi.insert(target);
                if enqueued.insert(target) {
                    worklist.push_back(target);
                }
            }
        }
    }
}

fn phi_placements(cfg: &ControlFlowGraph) -> HashMap<String, BTreeSet<BlockId>> {
    let mut placements: HashMap<String, BTreeSet<BlockId>> = HashMap::new();
    for block in &cfg.blocks {
        for phi in &block.phis {
            placements
                .entry(phi.var.clone())
                .or_default()
                .insert(block.id);
        }
    }
    placements
}

fn rename_block(cfg: &mut ControlFlowGraph, block: BlockId, state: &mut RenameState) {
    let mut pushed: Vec<String> = Vec::new();

    // φ targets define first
    let phi_vars: Vec<String> = cfg.blocks[block].phis.iter().map(|p| p.var.clone()).collect();
    for (index, var) in phi_vars.iter().enumerate() {
        let version = state.push_fresh(var);
        cfg.blocks[block].phis[index].target = SsaName::new(var.clone(), version);
        pushed.push(var.clone());
    }

    // Instructions in order
    let instructions = cfg.blocks[block].instructions.clone();
    for stmt in &instructions {
        rename_stmt(stmt, block, state, &mut pushed);
    }
    match cfg.blocks[block].terminator.clone() {
        Terminator::Branch { condition, .. } => {
            rename_expr(&condition, block, state, &mut pushed)
        }
        Terminator::Return(Some(argument)) | Terminator::Throw(argument) => {
            rename_expr(&argument, block, state, &mut pushed)
        }
        _ => {}
    }

    // Fill φ operands of successors with the versions current here
    let successors: Vec<BlockId> = cfg.successors(block).to_vec();
    for succ in successors {
        for phi in cfg.blocks[succ].phis.iter_mut() {
            let var = phi.var.clone();
            let version = state
                .stacks
                .get(&var)
                .and_then(|s| s.last().copied())
                .unwrap_or_else(|| {
                    if state.defined_vars.contains(&var)
                        && state.warned_vars.insert(var.clone())
                    {
                        state.warnings.push(Warning::new(
                            WarningKind::MissingDefinition,
                            format!(
                                "phi for `{}` at block {} synthesises entry version on edge from block {}",
                                var, succ, block
                            ),
                        ));
                    }
                    0
                });
            phi.operands.insert(block, version);
        }
    }

    // Dominator-tree children
    let children = cfg
        .dominators
        .children
        .get(&block)
        .cloned()
        .unwrap_or_default();
    for child in children {
        rename_block(cfg, child, state);
    }

    for var in pushed {
        if let Some(stack) = state.stacks.get_mut(&var) {
            stack.pop();
        }
    }
}

fn rename_stmt(
    stmt: &StmtNode,
    block: BlockId,
    state: &mut RenameState,
    pushed: &mut Vec<String>,
) {
    match &stmt.kind {
        StmtKind::Expression(expr) => rename_expr(expr, block, state, pushed),
        StmtKind::VarDecl { declarators, .. } => {
            for declarator in declarators {
                if let Some(init) = &declarator.init {
                    rename_expr(init, block, state, pushed);
                }
                state.def_of(declarator.id, &declarator.name);
                pushed.push(declarator.name.clone());
            }
        }
        StmtKind::FunctionDecl { name, .. } => {
            // The declaration's own node id records the definition
            state.def_of(stmt.id, name);
            pushed.push(name.clone());
        }
        _ => {}
    }
}

fn rename_expr(
    expr: &ExprNode,
    block: BlockId,
    state: &mut RenameState,
    pushed: &mut Vec<String>,
) {
    match &expr.kind {
        ExprKind::Identifier { name, .. } => state.use_of(expr.id, name, block),
        ExprKind::Literal(_) | ExprKind::Phi { .. } | ExprKind::Function { .. } => {}
        ExprKind::Assignment { op, target, value } => {
            if let ExprKind::Identifier { name, .. } = &target.kind {
                if matches!(op, AssignOp::Compound(_)) {
                    state.use_of(target.id, name, block);
                }
                rename_expr(value, block, state, pushed);
                state.def_of(target.id, name);
                pushed.push(name.clone());
            } else {
                rename_expr(target, block, state, pushed);
                rename_expr(value, block, state, pushed);
            }
        }
        ExprKind::Update { argument, .. } => {
            if let ExprKind::Identifier { name, .. } = &argument.kind {
                state.use_of(argument.id, name, block);
                state.def_of(argument.id, name);
                pushed.push(name.clone());
            } else {
                rename_expr(argument, block, state, pushed);
            }
        }
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            rename_expr(left, block, state, pushed);
            rename_expr(right, block, state, pushed);
        }
        ExprKind::Unary { argument, .. } => rename_expr(argument, block, state, pushed),
        ExprKind::Conditional {
            test,
            consequent,
            alternate,
        } => {
            rename_expr(test, block, state, pushed);
            rename_expr(consequent, block, state, pushed);
            rename_expr(alternate, block, state, pushed);
        }
        ExprKind::Call { callee, arguments } => {
            rename_expr(callee, block, state, pushed);
            for argument in arguments {
                rename_expr(argument, block, state, pushed);
            }
        }
        ExprKind::Member {
            object, property, ..
        } => {
            rename_expr(object, block, state, pushed);
            rename_expr(property, block, state, pushed);
        }
        ExprKind::Array { elements } => {
            for element in elements {
                rename_expr(element, block, state, pushed);
            }
        }
        ExprKind::Object { properties } => {
            for property in properties {
                rename_expr(&property.value, block, state, pushed);
            }
        }
    }
}

/// Check the SSA invariant: every φ's operand keys equal its block's
/// predecessor set, and every recorded use resolves to a defined version
pub fn validate_ssa(cfg: &ControlFlowGraph, _ssa: &SsaForm) -> Result<(), InvariantError> {
    for block in &cfg.blocks {
        let preds: BTreeSet<BlockId> = cfg.predecessors(block.id).iter().copied().collect();
        for phi in &block.phis {
            let keys: BTreeSet<BlockId> = phi.operands.keys().copied().collect();
            if keys != preds {
                return Err(InvariantError::new(
                    block.id as u64,
                    format!(
                        "phi for `{}` at block {} has operands {:?} but predecessors {:?}",
                        phi.var, block.id, keys, preds
                    ),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cfg::CfgBuilder;
    use crate::ir::factory;

    fn build_ssa(body: Vec<StmtNode>) -> (ControlFlowGraph, SsaForm, Vec<Warning>) {
        let mut cfg = CfgBuilder::build(&body).unwrap();
        let (ssa, warnings) = SsaBuilder::build(&mut cfg, &[]);
        (cfg, ssa, warnings)
    }

    #[test]
    fn test_straight_line_versions_increment() {
        let body = vec![
            factory::let_single("x", factory::number(1.0)),
            factory::expression_stmt(factory::assign(
                factory::identifier("x"),
                factory::number(2.0),
            )),
            factory::return_stmt(Some(factory::identifier("x"))),
        ];
        let (_cfg, ssa, warnings) = build_ssa(body);
        assert!(warnings.is_empty());
        assert_eq!(ssa.versions.get("x"), Some(&2));
        // The return reads the second version
        let read_versions: Vec<u32> = ssa
            .use_names
            .values()
            .filter(|n| n.var == "x")
            .map(|n| n.version)
            .collect();
        assert_eq!(read_versions, vec![2]);
    }

    #[test]
    fn test_diamond_inserts_phi_at_join() {
        let body = vec![
            factory::let_single("x", factory::number(0.0)),
            factory::if_stmt(
                factory::identifier("c"),
                factory::expression_stmt(factory::assign(
                    factory::identifier("x"),
                    factory::number(1.0),
                )),
                Some(factory::expression_stmt(factory::assign(
                    factory::identifier("x"),
                    factory::number(2.0),
                ))),
            ),
            factory::return_stmt(Some(factory::identifier("x"))),
        ];
        let (cfg, ssa, _warnings) = build_ssa(body);
        let phis: Vec<&Phi> = cfg.blocks.iter().flat_map(|b| b.phis.iter()).collect();
        assert_eq!(phis.len(), 1, "expected exactly one phi for x");
        let phi = phis[0];
        assert_eq!(phi.var, "x");
        assert_eq!(phi.operands.len(), 2);
        // Each arm contributes a distinct non-entry version
        let versions: Vec<u32> = phi.operands.values().copied().collect();
        assert!(versions.iter().all(|&v| v > 0));
        assert_ne!(versions[0], versions[1]);
        assert!(!versions.contains(&phi.target.version));
        validate_ssa(&cfg, &ssa).unwrap();
    }

    #[test]
    fn test_loop_carried_phi() {
        let body = vec![
            factory::let_single("i", factory::number(0.0)),
            factory::while_stmt(
                factory::binary(
                    crate::common::types::BinaryOp::Lt,
                    factory::identifier("i"),
                    factory::number(10.0),
                ),
                factory::expression_stmt(factory::compound_assign(
                    crate::common::types::BinaryOp::Add,
                    factory::identifier("i"),
                    factory::number(1.0),
                )),
            ),
            factory::return_stmt(Some(factory::identifier("i"))),
        ];
        let (cfg, ssa, warnings) = build_ssa(body);
        assert!(warnings.is_empty());
        // The loop header carries a phi merging entry and latch versions
        let header_phis: Vec<&Phi> = cfg
            .blocks
            .iter()
            .flat_map(|b| b.phis.iter())
            .filter(|p| p.var == "i")
            .collect();
        assert!(!header_phis.is_empty());
        assert!(header_phis.iter().any(|p| p.operands.len() == 2));
        validate_ssa(&cfg, &ssa).unwrap();
    }

    #[test]
    fn test_free_variables_read_entry_version_silently() {
        let body = vec![factory::return_stmt(Some(factory::identifier("console")))];
        let (_cfg, ssa, warnings) = build_ssa(body);
        assert!(warnings.is_empty());
        let name = ssa.use_names.values().next().unwrap();
        assert_eq!(name.version, 0);
    }

    #[test]
    fn test_partial_definition_warns() {
        // x is defined on one path only; the join use has no def on the
        // other path and resolves to the entry version with a warning
        let body = vec![
            factory::if_stmt(
                factory::identifier("c"),
                factory::expression_stmt(factory::assign(
                    factory::identifier("x"),
                    factory::number(1.0),
                )),
                None,
            ),
            factory::return_stmt(Some(factory::identifier("x"))),
        ];
        let (_cfg, _ssa, warnings) = build_ssa(body);
        assert!(warnings
            .iter()
            .any(|w| w.kind == WarningKind::MissingDefinition));
    }

    #[test]
    fn test_params_live_on_entry() {
        let body = vec![factory::return_stmt(Some(factory::binary(
            crate::common::types::BinaryOp::Add,
            factory::identifier("a"),
            factory::identifier("b"),
        )))];
        let mut cfg = CfgBuilder::build(&body).unwrap();
        let (ssa, warnings) = SsaBuilder::build(&mut cfg, &["a".into(), "b".into()]);
        assert!(warnings.is_empty());
        for name in ssa.use_names.values() {
            assert_eq!(name.version, 0);
        }
    }
}
