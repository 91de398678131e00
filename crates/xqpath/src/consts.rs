//! Well-known namespace URIs.

pub const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS_URI: &str = "http://www.w3.org/2000/xmlns/";
pub const XS: &str = "http://www.w3.org/2001/XMLSchema";
pub const XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const FNS: &str = "http://www.w3.org/2005/xpath-functions";
pub const LOCAL_NS: &str = "http://www.w3.org/2005/xquery-local-functions";
pub const ERR_NS: &str = "http://www.w3.org/2005/xqt-errors";
/// Namespace of unprefixed option names (`declare option`).
pub const XQUERY_OPTIONS_NS: &str = "http://www.w3.org/2012/xquery";
