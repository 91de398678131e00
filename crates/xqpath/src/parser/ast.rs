//! AST for the supported XQuery 3.0 subset. Names stay lexical; the compiler resolves
//! them against the in-scope namespaces.

use crate::eqname::{LexicalName, LexicalNameTest};

pub type Name = LexicalName;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Decimal(f64),
    Double(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnarySign {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneralComp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueComp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeComp {
    Is,
    Precedes,
    Follows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Some,
    Every,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    EmptySequence,
    VarRef(Name),
    ContextItem,
    FunctionCall {
        name: Name,
        args: Vec<Expr>,
    },
    Sequence(Vec<Expr>),
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    StringConcat(Vec<Expr>),
    /// `a ! b ! c`: each operand after the first is evaluated once per item of the running result.
    SimpleMap(Vec<Expr>),
    GeneralComparison {
        left: Box<Expr>,
        op: GeneralComp,
        right: Box<Expr>,
    },
    ValueComparison {
        left: Box<Expr>,
        op: ValueComp,
        right: Box<Expr>,
    },
    NodeComparison {
        left: Box<Expr>,
        op: NodeComp,
        right: Box<Expr>,
    },
    Unary {
        sign: UnarySign,
        expr: Box<Expr>,
    },
    IfThenElse {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
    },
    InstanceOf {
        expr: Box<Expr>,
        ty: SequenceType,
    },
    TreatAs {
        expr: Box<Expr>,
        ty: SequenceType,
    },
    CastableAs {
        expr: Box<Expr>,
        ty: SingleType,
    },
    CastAs {
        expr: Box<Expr>,
        ty: SingleType,
    },
    Path(PathExpr),
    /// `primary[p1][p2]...`
    Filter {
        input: Box<Expr>,
        predicates: Vec<Expr>,
    },
    SetOp {
        left: Box<Expr>,
        op: SetOp,
        right: Box<Expr>,
    },
    Flwor {
        clauses: Vec<Clause>,
        return_expr: Box<Expr>,
    },
    Quantified {
        kind: Quantifier,
        bindings: Vec<QuantifiedBinding>,
        satisfies: Box<Expr>,
    },
    /// `ordered { }` / `unordered { }`; evaluation order is unaffected.
    Ordering(Box<Expr>),
    Extension {
        pragmas: Vec<Pragma>,
        expr: Option<Box<Expr>>,
    },
    Constructor(Constructor),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    For(ForBinding),
    Let(LetBinding),
    Where(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForBinding {
    pub var: Name,
    pub positional: Option<Name>,
    pub ty: Option<SequenceType>,
    pub in_expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LetBinding {
    pub var: Name,
    pub ty: Option<SequenceType>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuantifiedBinding {
    pub var: Name,
    pub ty: Option<SequenceType>,
    pub in_expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pragma {
    pub name: Name,
    pub content: String,
}

// ===== Constructors =====

#[derive(Debug, Clone, PartialEq)]
pub enum Constructor {
    DirElement(DirElement),
    DirComment(String),
    DirPi { target: String, content: String },
    Document(Option<Box<Expr>>),
    Element { name: ComputedName, content: Option<Box<Expr>> },
    Attribute { name: ComputedName, content: Option<Box<Expr>> },
    Text(Option<Box<Expr>>),
    Comment(Option<Box<Expr>>),
    ProcessingInstruction { target: ComputedName, content: Option<Box<Expr>> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComputedName {
    Static(Name),
    Dynamic(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirElement {
    /// Lexical QName (`prefix:local` or `local`); braced URIs are not allowed here.
    pub name: String,
    pub attributes: Vec<DirAttribute>,
    pub content: Vec<DirContent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirAttribute {
    pub name: String,
    pub value: Vec<AttrValuePart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValuePart {
    Text(String),
    Enclosed(Option<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DirContent {
    /// Literal characters, references and CDATA sections merged; boundary whitespace is already dropped.
    Text(String),
    Enclosed(Option<Expr>),
    Node(Expr),
}

// ===== Paths and steps =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStart {
    Root,
    RootDescendant,
    Relative,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    pub start: PathStart,
    pub steps: Vec<StepExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepExpr {
    Axis(Step),
    /// Any other step expression, e.g. `(a|b)`, `f()`, `<e/>`, `$x[1]`.
    Filter(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    Attribute,
    SelfAxis,
    DescendantOrSelf,
    FollowingSibling,
    Following,
    Namespace,
    Parent,
    Ancestor,
    PrecedingSibling,
    Preceding,
    AncestorOrSelf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeTest {
    Name(LexicalNameTest),
    Kind(KindTest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum KindTest {
    AnyKind,
    Document(Option<Box<KindTest>>),
    Text,
    Comment,
    NamespaceNode,
    ProcessingInstruction(Option<String>),
    Element { name: Option<ElementNameOrWildcard>, ty: Option<Name>, nillable: bool },
    Attribute { name: Option<ElementNameOrWildcard>, ty: Option<Name> },
    SchemaElement(Name),
    SchemaAttribute(Name),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementNameOrWildcard {
    Name(Name),
    Any,
}

// ===== Types =====

#[derive(Debug, Clone, PartialEq)]
pub struct SingleType {
    pub atomic: Name,
    pub optional: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    One,
    ZeroOrOne,
    ZeroOrMore,
    OneOrMore,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemType {
    Kind(KindTest),
    Item,
    Atomic(Name),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SequenceType {
    EmptySequence,
    Typed { item: ItemType, occ: Occurrence },
}

// ===== Modules =====

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub version: Option<String>,
    pub prolog: Vec<Decl>,
    pub body: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultNamespaceKind {
    Element,
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    DefaultNamespace { kind: DefaultNamespaceKind, uri: String },
    Namespace { prefix: String, uri: String },
    Option { name: Name, value: String },
    /// `name` is `None` for `declare default decimal-format`.
    DecimalFormat { name: Option<Name>, properties: Vec<(String, String)> },
    Variable(VarDecl),
    Function(FunctionDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: Name,
    pub ty: Option<SequenceType>,
    pub external: bool,
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Name,
    pub ty: Option<SequenceType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Name,
    pub params: Vec<Param>,
    pub return_type: Option<SequenceType>,
    /// `None` for `external` functions, which are rejected at compile time.
    pub body: Option<Expr>,
}
