use unweave_bytecode::bytecode::Instruction;

use super::NodeId;

/// A straight-line run of instructions. Only the block builder creates these.
#[derive(Debug, Clone)]
pub struct Block {
    /// Position in the entry's address-ordered block list.
    pub index: usize,
    pub instructions: Vec<Instruction>,
}

impl Block {
    pub fn last(&self) -> Option<&Instruction> {
        self.instructions.last()
    }
}

/// One function, constructor or struct body.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub name: String,
    /// First node of the body.
    pub entry: Option<NodeId>,
    /// Raw blocks lexically inside this fragment (not inside nested ones),
    /// in address order.
    pub blocks: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    While {
        /// No separable incrementor exists, so a `for` rendering is impossible.
        must_be_while_loop: bool,
        for_loop_incrementor: Option<NodeId>,
    },
    DoUntil,
    Repeat,
    With {
        /// The `popenv <drop>` block that `break` leaves through.
        break_block: Option<NodeId>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Loop {
    pub kind: LoopKind,
    pub head: NodeId,
    pub tail: NodeId,
    /// First node of the interior, `None` for an empty loop.
    pub body: Option<NodeId>,
    /// Synthesized empty node standing for the point after the loop.
    pub after: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicKind {
    And,
    Or,
}

/// A `&&`/`||` chain collapsed into a single value-producing node. Each
/// condition is the first node of one operand.
#[derive(Debug, Clone)]
pub struct ShortCircuit {
    pub logic: LogicKind,
    pub conditions: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy)]
pub struct BinaryBranch {
    pub condition: NodeId,
    pub true_branch: NodeId,
    pub false_branch: NodeId,
    /// Present only when the source had an explicit `else`, even an empty one.
    pub else_branch: Option<NodeId>,
}

#[derive(Debug, Clone, Copy)]
pub struct Switch {
    /// Computes the switched value and holds the dispatch comparisons.
    pub cases: NodeId,
    pub body: Option<NodeId>,
    /// Trailing labels that fall straight through to the exit.
    pub end_case_destinations: Option<NodeId>,
}

#[derive(Debug, Clone, Copy)]
pub struct StaticInit {
    pub head: NodeId,
}

/// Closed set of node variants.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Block(Block),
    Fragment(Fragment),
    Loop(Loop),
    ShortCircuit(ShortCircuit),
    BinaryBranch(BinaryBranch),
    Switch(Switch),
    CaseJump,
    CaseDestination { is_default: bool },
    StaticInit(StaticInit),
    Empty,
    Break,
    Continue,
    Return,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Block(_) => "block",
            Self::Fragment(_) => "fragment",
            Self::Loop(l) => match l.kind {
                LoopKind::While { .. } => "while",
                LoopKind::DoUntil => "do-until",
                LoopKind::Repeat => "repeat",
                LoopKind::With { .. } => "with",
            },
            Self::ShortCircuit(sc) => match sc.logic {
                LogicKind::And => "and",
                LogicKind::Or => "or",
            },
            Self::BinaryBranch(_) => "if",
            Self::Switch(_) => "switch",
            Self::CaseJump => "case-jump",
            Self::CaseDestination { is_default: false } => "case",
            Self::CaseDestination { is_default: true } => "default",
            Self::StaticInit(_) => "static-init",
            Self::Empty => "empty",
            Self::Break => "break",
            Self::Continue => "continue",
            Self::Return => "return",
        }
    }

    /// Replace every structure slot holding `old` with `new`.
    pub(crate) fn replace_child(&mut self, old: NodeId, new: NodeId) {
        let swap = |slot: &mut NodeId| {
            if *slot == old {
                *slot = new;
            }
        };
        let swap_opt = |slot: &mut Option<NodeId>| {
            if *slot == Some(old) {
                *slot = Some(new);
            }
        };
        match self {
            Self::Fragment(f) => swap_opt(&mut f.entry),
            Self::Loop(l) => {
                swap(&mut l.head);
                swap(&mut l.tail);
                swap_opt(&mut l.body);
                match &mut l.kind {
                    LoopKind::While { for_loop_incrementor, .. } => swap_opt(for_loop_incrementor),
                    LoopKind::With { break_block } => swap_opt(break_block),
                    LoopKind::DoUntil | LoopKind::Repeat => {}
                }
            }
            Self::ShortCircuit(sc) => sc.conditions.iter_mut().for_each(|c| swap(c)),
            Self::BinaryBranch(bb) => {
                swap(&mut bb.condition);
                swap(&mut bb.true_branch);
                swap(&mut bb.false_branch);
                swap_opt(&mut bb.else_branch);
            }
            Self::Switch(sw) => {
                swap(&mut sw.cases);
                swap_opt(&mut sw.body);
                swap_opt(&mut sw.end_case_destinations);
            }
            Self::StaticInit(si) => swap(&mut si.head),
            Self::Block(_)
            | Self::CaseJump
            | Self::CaseDestination { .. }
            | Self::Empty
            | Self::Break
            | Self::Continue
            | Self::Return => {}
        }
    }
}
