//! XQuery/XPath path-expression engine over immutable XML-like trees.
//!
//! ```
//! use xqpath::{DynamicContextBuilder, evaluate_expr, model::xml::parse_document};
//!
//! let doc = parse_document("<a><b>1</b><b>2</b></a>").unwrap();
//! let ctx = DynamicContextBuilder::new().with_context_item(doc).build();
//! let result = evaluate_expr("sum(/a/b)", &ctx).unwrap();
//! assert_eq!(xqpath::serialize_sequence(&result).unwrap(), "3");
//! ```

pub mod compiler;
pub mod consts;
pub mod engine;
pub mod eqname;
pub mod model;
pub mod parser;
pub mod serialize;
pub mod xdm;

pub use compiler::ir::CompiledXQuery;
pub use compiler::{compile_xquery, compile_xquery_with_context};
pub use engine::evaluator::{evaluate, evaluate_expr};
pub use engine::runtime::{
    DynamicContext, DynamicContextBuilder, Error, ErrorCode, ErrorKind, StaticContext, StaticContextBuilder,
};
pub use model::{Node, NodeKind, QName};
pub use serialize::serialize_sequence;
pub use xdm::{ExpandedName, XdmAtomicValue, XdmItem, XdmSequence};
