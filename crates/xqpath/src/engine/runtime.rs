use core::fmt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::eqname::NamespaceTable;
use crate::model::Node;
use crate::xdm::{ExpandedName, XdmItem, XdmSequence};

pub type Arity = usize;

/// Broad category of an error condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Syntax and other static errors, raised before evaluation starts.
    Static,
    /// Errors raised while evaluating (absent focus, arithmetic, casting).
    Dynamic,
    /// Constructed content that violates lexical rules (comments, PIs).
    Content,
    /// Operand of the wrong type.
    Type,
}

macro_rules! error_codes {
    ($($code:ident => $kind:ident),+ $(,)?) => {
        /// W3C error codes emitted by the engine.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ErrorCode {
            $($code,)+
            /// A code outside the known set (e.g. raised by `fn:error`).
            Unknown,
        }

        impl ErrorCode {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ErrorCode::$code => stringify!($code),)+
                    ErrorCode::Unknown => "UNKNOWN",
                }
            }

            /// Accepts `XPST0003` or `err:XPST0003`.
            pub fn from_code(s: &str) -> Self {
                match s.strip_prefix("err:").unwrap_or(s) {
                    $(stringify!($code) => ErrorCode::$code,)+
                    _ => ErrorCode::Unknown,
                }
            }

            pub fn kind(&self) -> ErrorKind {
                match self {
                    $(ErrorCode::$code => ErrorKind::$kind,)+
                    ErrorCode::Unknown => ErrorKind::Dynamic,
                }
            }
        }
    };
}

error_codes! {
    XPST0003 => Static,
    XPST0008 => Static,
    XPST0017 => Static,
    XPST0051 => Static,
    XPST0080 => Static,
    XPST0081 => Static,
    XQST0022 => Static,
    XQST0031 => Static,
    XQST0033 => Static,
    XQST0034 => Static,
    XQST0039 => Static,
    XQST0040 => Static,
    XQST0045 => Static,
    XQST0049 => Static,
    XQST0060 => Static,
    XQST0066 => Static,
    XQST0070 => Static,
    XQST0071 => Static,
    XQST0079 => Static,
    XQST0097 => Static,
    XQST0111 => Static,
    XQST0114 => Static,
    XQST0118 => Static,
    XPDY0002 => Dynamic,
    XPDY0050 => Dynamic,
    XQDY0025 => Dynamic,
    XQDY0041 => Dynamic,
    XQDY0044 => Dynamic,
    XQDY0064 => Dynamic,
    XQDY0074 => Dynamic,
    XQDY0096 => Dynamic,
    XQDY0102 => Dynamic,
    XQDY0026 => Content,
    XQDY0072 => Content,
    XPTY0004 => Type,
    XPTY0018 => Type,
    XPTY0019 => Type,
    XPTY0020 => Type,
    XQTY0024 => Type,
    FORG0006 => Type,
    FOAR0001 => Dynamic,
    FOAR0002 => Dynamic,
    FOCA0002 => Dynamic,
    FOCH0001 => Dynamic,
    FODC0002 => Dynamic,
    FODC0006 => Dynamic,
    FODF1280 => Dynamic,
    FODF1310 => Dynamic,
    FOER0000 => Dynamic,
    FONS0004 => Dynamic,
    FORG0001 => Dynamic,
    FORG0003 => Dynamic,
    FORG0004 => Dynamic,
    FORG0005 => Dynamic,
}

impl ErrorCode {
    pub fn qname(&self) -> ExpandedName {
        ExpandedName::in_ns(crate::consts::ERR_NS, self.as_str())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "err:{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
}

impl Error {
    pub fn from_code(code: ErrorCode, msg: impl Into<String>) -> Self {
        let error = Self { code, message: msg.into() };
        tracing::trace!(code = %error.code, message = %error.message, "raising error");
        error
    }

    pub fn code_enum(&self) -> ErrorCode {
        self.code
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    pub fn format_code(&self) -> String {
        self.code.to_string()
    }
}

/// The focus of an evaluation: context item, position and size.
///
/// Passed by reference into nested evaluations; a predicate builds a fresh focus per item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Focus {
    pub item: Option<XdmItem>,
    pub position: usize,
    pub size: usize,
}

impl Focus {
    /// No context item (function bodies, queries evaluated without input).
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn new(item: XdmItem, position: usize, size: usize) -> Self {
        Self { item: Some(item), position, size }
    }

    pub fn of(item: impl Into<XdmItem>) -> Self {
        Self::new(item.into(), 1, 1)
    }

    pub fn context_item(&self) -> Result<&XdmItem, Error> {
        self.item
            .as_ref()
            .ok_or_else(|| Error::from_code(ErrorCode::XPDY0002, "context item is absent"))
    }

    pub fn context_node(&self) -> Result<&Node, Error> {
        match self.context_item()? {
            XdmItem::Node(n) => Ok(n),
            XdmItem::Atomic(a) => Err(Error::from_code(
                ErrorCode::XPTY0020,
                format!("context item is not a node: {}", a.type_name()),
            )),
        }
    }

    pub fn position(&self) -> Result<usize, Error> {
        self.context_item()?;
        Ok(self.position)
    }

    pub fn size(&self) -> Result<usize, Error> {
        self.context_item()?;
        Ok(self.size)
    }
}

/// Properties of a decimal format used by `fn:format-number`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecimalFormat {
    pub decimal_separator: char,
    pub grouping_separator: char,
    pub infinity: String,
    pub minus_sign: char,
    pub nan: String,
    pub percent: char,
    pub per_mille: char,
    pub zero_digit: char,
    pub digit: char,
    pub pattern_separator: char,
    pub exponent_separator: char,
}

impl Default for DecimalFormat {
    fn default() -> Self {
        Self {
            decimal_separator: '.',
            grouping_separator: ',',
            infinity: "Infinity".to_string(),
            minus_sign: '-',
            nan: "NaN".to_string(),
            percent: '%',
            per_mille: '\u{2030}',
            zero_digit: '0',
            digit: '#',
            pattern_separator: ';',
            exponent_separator: 'e',
        }
    }
}

impl DecimalFormat {
    /// Applies one `name = "value"` property; `XQST0097` for invalid values.
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<(), Error> {
        let single = || {
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(Error::from_code(
                    ErrorCode::XQST0097,
                    format!("decimal-format property {name} requires a single character, got '{value}'"),
                )),
            }
        };
        match name {
            "decimal-separator" => self.decimal_separator = single()?,
            "grouping-separator" => self.grouping_separator = single()?,
            "infinity" => self.infinity = value.to_string(),
            "minus-sign" => self.minus_sign = single()?,
            "NaN" => self.nan = value.to_string(),
            "percent" => self.percent = single()?,
            "per-mille" => self.per_mille = single()?,
            "zero-digit" => {
                let c = single()?;
                if c.to_digit(10) != Some(0) {
                    return Err(Error::from_code(ErrorCode::XQST0097, format!("'{value}' is not a zero digit")));
                }
                self.zero_digit = c;
            }
            "digit" => self.digit = single()?,
            "pattern-separator" => self.pattern_separator = single()?,
            "exponent-separator" => self.exponent_separator = single()?,
            _ => {
                return Err(Error::from_code(ErrorCode::XPST0003, format!("unknown decimal-format property {name}")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StaticContext {
    pub base_uri: Option<String>,
    pub namespaces: NamespaceTable,
    /// External variables that may be referenced without a prolog declaration.
    pub in_scope_variables: HashSet<ExpandedName>,
    pub options: HashMap<ExpandedName, String>,
    /// Keyed by name; `None` is the default (unnamed) format.
    pub decimal_formats: HashMap<Option<ExpandedName>, DecimalFormat>,
    pub functions: Arc<FunctionRegistry>,
}

impl Default for StaticContext {
    fn default() -> Self {
        let mut decimal_formats = HashMap::new();
        decimal_formats.insert(None, DecimalFormat::default());
        Self {
            base_uri: None,
            namespaces: NamespaceTable::default(),
            in_scope_variables: HashSet::new(),
            options: HashMap::new(),
            decimal_formats,
            functions: crate::engine::functions::default_function_registry(),
        }
    }
}

impl StaticContext {
    pub fn option(&self, name: &ExpandedName) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    pub fn decimal_format(&self, name: Option<&ExpandedName>) -> Option<&DecimalFormat> {
        self.decimal_formats.get(&name.cloned())
    }
}

/// Builder for [`StaticContext`]. The built context is captured by the compiled query;
/// prolog declarations extend the captured copy.
#[derive(Default)]
pub struct StaticContextBuilder {
    ctx: StaticContext,
}

impl StaticContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_uri(mut self, uri: impl Into<String>) -> Self {
        self.ctx.base_uri = Some(uri.into());
        self
    }

    /// Registers a prefix binding. Attempts to rebind `xml` or `xmlns` are ignored.
    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let uri = uri.into();
        if let Err(error) = self.ctx.namespaces.bind(&prefix, &uri) {
            tracing::warn!(%prefix, %error, "ignored namespace binding");
        }
        self
    }

    pub fn with_default_element_namespace(mut self, uri: impl Into<String>) -> Self {
        self.ctx.namespaces.set_default_element_namespace(Some(uri.into()));
        self
    }

    pub fn with_default_function_namespace(mut self, uri: impl Into<String>) -> Self {
        self.ctx.namespaces.set_default_function_namespace(Some(uri.into()));
        self
    }

    /// Declares an external variable supplied through the dynamic context.
    pub fn with_variable(mut self, name: ExpandedName) -> Self {
        self.ctx.in_scope_variables.insert(name);
        self
    }

    pub fn with_functions(mut self, registry: Arc<FunctionRegistry>) -> Self {
        self.ctx.functions = registry;
        self
    }

    pub fn build(self) -> StaticContext {
        self.ctx
    }
}

#[derive(Debug, Clone, Default)]
pub struct DynamicContext {
    pub context_item: Option<XdmItem>,
    pub variables: HashMap<ExpandedName, XdmSequence>,
}

impl DynamicContext {
    pub fn variable(&self, name: &ExpandedName) -> Option<&XdmSequence> {
        self.variables.get(name)
    }
}

#[derive(Default)]
pub struct DynamicContextBuilder {
    ctx: DynamicContext,
}

impl DynamicContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context_item(mut self, item: impl Into<XdmItem>) -> Self {
        self.ctx.context_item = Some(item.into());
        self
    }

    pub fn with_variable(mut self, name: ExpandedName, value: impl Into<XdmSequence>) -> Self {
        self.ctx.variables.insert(name, value.into());
        self
    }

    pub fn build(self) -> DynamicContext {
        self.ctx
    }
}

/// Context handed to built-in function implementations.
pub struct CallCtx<'a> {
    pub dyn_ctx: &'a DynamicContext,
    pub static_ctx: &'a StaticContext,
    pub focus: &'a Focus,
}

pub type FunctionImpl = Arc<dyn Fn(&CallCtx<'_>, &[XdmSequence]) -> Result<XdmSequence, Error> + Send + Sync>;

type FunctionOverload = (Arity, Option<Arity>, FunctionImpl);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    Unknown(ExpandedName),
    WrongArity { name: ExpandedName, available: Vec<Arity> },
}

impl ResolveError {
    pub fn into_error(self, arity: Arity) -> Error {
        match self {
            ResolveError::Unknown(name) => {
                Error::from_code(ErrorCode::XPST0017, format!("unknown function {name}#{arity}"))
            }
            ResolveError::WrongArity { name, available } => Error::from_code(
                ErrorCode::XPST0017,
                format!("function {name} has no arity {arity} (available: {available:?})"),
            ),
        }
    }
}

/// Built-in functions keyed by expanded name, each with one or more arity ranges.
#[derive(Default)]
pub struct FunctionRegistry {
    fns: HashMap<ExpandedName, Vec<FunctionOverload>>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry").field("functions", &self.fns.len()).finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_range(&mut self, name: ExpandedName, min_arity: Arity, max_arity: Option<Arity>, func: FunctionImpl) {
        let overloads = self.fns.entry(name).or_default();
        overloads.push((min_arity, max_arity, func));
        // Most specific first: higher minimum, then bounded before variadic.
        overloads.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.unwrap_or(Arity::MAX).cmp(&b.1.unwrap_or(Arity::MAX))));
    }

    pub fn register_ns<F>(&mut self, ns_uri: &str, local: &str, arity: Arity, f: F)
    where
        F: 'static + Send + Sync + Fn(&CallCtx<'_>, &[XdmSequence]) -> Result<XdmSequence, Error>,
    {
        self.register_range(ExpandedName::in_ns(ns_uri, local), arity, Some(arity), Arc::new(f));
    }

    pub fn register_ns_range<F>(&mut self, ns_uri: &str, local: &str, min_arity: Arity, max_arity: Arity, f: F)
    where
        F: 'static + Send + Sync + Fn(&CallCtx<'_>, &[XdmSequence]) -> Result<XdmSequence, Error>,
    {
        self.register_range(ExpandedName::in_ns(ns_uri, local), min_arity, Some(max_arity), Arc::new(f));
    }

    pub fn register_ns_variadic<F>(&mut self, ns_uri: &str, local: &str, min_arity: Arity, f: F)
    where
        F: 'static + Send + Sync + Fn(&CallCtx<'_>, &[XdmSequence]) -> Result<XdmSequence, Error>,
    {
        self.register_range(ExpandedName::in_ns(ns_uri, local), min_arity, None, Arc::new(f));
    }

    pub fn contains(&self, name: &ExpandedName) -> bool {
        self.fns.contains_key(name)
    }

    pub fn resolve(&self, name: &ExpandedName, arity: Arity) -> Result<&FunctionImpl, ResolveError> {
        let Some(candidates) = self.fns.get(name) else {
            return Err(ResolveError::Unknown(name.clone()));
        };
        if let Some((_, _, f)) = candidates.iter().find(|(min, max, _)| arity >= *min && max.is_none_or(|m| arity <= m)) {
            return Ok(f);
        }
        let mut available: Vec<Arity> = candidates
            .iter()
            .flat_map(|(min, max, _)| *min..=max.unwrap_or(*min))
            .collect();
        available.sort_unstable();
        available.dedup();
        Err(ResolveError::WrongArity { name: name.clone(), available })
    }
}
