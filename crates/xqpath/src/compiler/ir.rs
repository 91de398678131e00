use std::sync::Arc;

use crate::engine::runtime::StaticContext;
use crate::eqname::{NameTest, NamespaceTable};
use crate::model::QName;
use crate::xdm::{ExpandedName, XdmAtomicValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisIR {
    Child,
    Attribute,
    SelfAxis,
    DescendantOrSelf,
    Descendant,
    Parent,
    Ancestor,
    AncestorOrSelf,
    PrecedingSibling,
    FollowingSibling,
    Preceding,
    Following,
    Namespace,
}

impl AxisIR {
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            AxisIR::Parent | AxisIR::Ancestor | AxisIR::AncestorOrSelf | AxisIR::PrecedingSibling | AxisIR::Preceding
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NameOrWildcard {
    Name(ExpandedName),
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeTestIR {
    AnyKind,                                  // node()
    Name(NameTest),                           // QName or wildcard, principal node kind of the axis
    KindText,                                 // text()
    KindComment,                              // comment()
    KindNamespace,                            // namespace-node()
    KindProcessingInstruction(Option<String>), // processing-instruction('target'?)
    KindDocument(Option<Box<NodeTestIR>>),    // document-node(element(...)?)
    KindElement {
        name: Option<NameOrWildcard>,
        /// `Some(false)` for a type annotation untyped nodes can never carry.
        type_matches: bool,
    },
    KindAttribute {
        name: Option<NameOrWildcard>,
        type_matches: bool,
    },
}

/// Name of a constructed node: resolved at compile time, or computed and resolved against
/// the namespaces in scope where the constructor appears.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstructorName {
    Static(QName),
    Dynamic(Arc<NamespaceTable>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpCode {
    // Data and variables
    PushAtomic(XdmAtomicValue),
    LoadVarByName(ExpandedName),
    LoadContextItem,
    Position,
    Last,
    ToRoot,

    // Steps / filters
    /// Axis step over the node sequence on TOS; `first` selects the error for atomic input.
    AxisStep { axis: AxisIR, test: NodeTestIR, preds: Vec<InstrSeq>, first: bool },
    /// `E1/E2` where E2 is not an axis step: evaluates the body once per node of TOS.
    PathMap(InstrSeq),
    /// `E1 ! E2`: evaluates the body once per item of TOS and concatenates the results in order.
    SimpleMap(InstrSeq),
    /// Apply n predicates to TOS sequence; each predicate is a separate InstrSeq.
    ApplyPredicates(Vec<InstrSeq>),

    // Arithmetic / logic
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Neg,
    Plus,
    ToEBV,
    Pop,
    JumpIfTrue(usize),  // relative forward
    JumpIfFalse(usize), // relative forward
    Jump(usize),        // relative forward (unconditional)

    // Comparisons
    CompareValue(ComparisonOp),
    CompareGeneral(ComparisonOp),
    NodeIs,
    NodeBefore,
    NodeAfter,

    // Sequences and sets
    MakeSeq(usize),
    /// `a || b || ...` over n operands.
    StringConcat(usize),
    Union,
    Intersect,
    Except,
    RangeTo,

    // Bindings and iteration
    LetStartByName(ExpandedName),
    LetEnd,
    ForLoop { var: ExpandedName, pos_var: Option<ExpandedName>, body: InstrSeq },
    QuantLoop { kind: QuantifierKind, var: ExpandedName, body: InstrSeq },

    // Types
    Cast(SingleTypeIR),
    Castable(SingleTypeIR),
    Treat(SeqTypeIR),
    InstanceOf(SeqTypeIR),
    /// Function-conversion rules for declared types (variables, parameters, results).
    Coerce(SeqTypeIR),

    // Functions
    CallByName(ExpandedName, usize /* argc */),
    CallUser(usize /* function index */, usize /* argc */),

    // Node constructors
    /// TOS holds the content sequence.
    ConstructDocument,
    ConstructText,
    ConstructComment,
    /// Without a static target the computed target lies below the content.
    ConstructPI(Option<String>),
    /// Attribute value parts joined into one string; a dynamic name lies below it.
    ConstructAttribute(ConstructorName),
    /// `parts` content sequences on the stack, a dynamic name below them.
    ConstructElement { name: ConstructorName, namespaces: Vec<(Option<String>, String)>, parts: usize },
    /// Atomizes TOS and joins the strings with single spaces into one `xs:string`.
    JoinAtomized,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrSeq(pub Vec<OpCode>);

#[derive(Debug, Clone, PartialEq)]
pub struct SingleTypeIR {
    pub atomic: ExpandedName,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemTypeIR {
    AnyItem,
    Atomic(ExpandedName),
    Kind(NodeTestIR),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccurrenceIR {
    One,
    ZeroOrOne,
    ZeroOrMore,
    OneOrMore,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeqTypeIR {
    EmptySequence,
    Typed { item: ItemTypeIR, occ: OccurrenceIR },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantifierKind {
    Some,
    Every,
}

/// A function declared in the prolog.
#[derive(Debug, Clone, PartialEq)]
pub struct UserFunction {
    pub name: ExpandedName,
    pub params: Vec<(ExpandedName, Option<SeqTypeIR>)>,
    pub return_type: Option<SeqTypeIR>,
    pub body: InstrSeq,
}

/// A variable declared in the prolog.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVar {
    pub name: ExpandedName,
    pub ty: Option<SeqTypeIR>,
    pub external: bool,
    /// Initializer, or the default value of an external variable.
    pub init: Option<InstrSeq>,
}

#[derive(Debug, Clone)]
pub struct CompiledXQuery {
    pub instrs: InstrSeq,
    pub static_ctx: Arc<StaticContext>,
    pub functions: Arc<Vec<UserFunction>>,
    pub globals: Vec<GlobalVar>,
    pub source: String,
}
