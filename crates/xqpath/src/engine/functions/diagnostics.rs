use super::common::{opt_atomic, string_arg};
use crate::consts::ERR_NS;
use crate::engine::runtime::{CallCtx, Error, ErrorCode};
use crate::xdm::{XdmAtomicValue, XdmSequence};

/// `fn:error`: codes in the `err` namespace map onto [`ErrorCode`], any other QName is
/// reported as [`ErrorCode::Unknown`] with the name in the message.
pub(super) fn error_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let description = match args.get(1) {
        Some(d) => Some(string_arg(d, "fn:error")?),
        None => None,
    };
    let (code, name) = match args.first().map(|a| opt_atomic(a, "fn:error")).transpose()?.flatten() {
        None => (ErrorCode::FOER0000, None),
        Some(XdmAtomicValue::QName { ns_uri, local, .. }) => {
            if ns_uri.as_deref() == Some(ERR_NS) {
                (ErrorCode::from_code(&local), Some(local))
            } else {
                let name = match ns_uri {
                    Some(ns) => format!("Q{{{ns}}}{local}"),
                    None => local,
                };
                (ErrorCode::Unknown, Some(name))
            }
        }
        Some(other) => {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("fn:error expects xs:QName as error code, got {}", other.type_name()),
            ));
        }
    };
    let message = match (description, name) {
        (Some(d), _) => d,
        (None, Some(n)) => format!("error {n} raised by fn:error"),
        (None, None) => "error raised by fn:error".to_string(),
    };
    Err(Error::from_code(code, message))
}

/// `fn:trace`: logs the value and returns it unchanged.
pub(super) fn trace_fn(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let label = match args.get(1) {
        Some(l) => string_arg(l, "fn:trace")?,
        None => String::new(),
    };
    let rendered: Vec<String> = args[0].iter().map(ToString::to_string).collect();
    tracing::info!(label = %label, items = args[0].len(), value = %rendered.join(" "), "fn:trace");
    Ok(args[0].clone())
}
