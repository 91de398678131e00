use super::common::{arg_or_context, boolean};
use crate::engine::runtime::{CallCtx, Error};
use crate::engine::step::effective_boolean_value;
use crate::xdm::{XdmItem, XdmSequence};

pub(super) fn fn_true(_ctx: &CallCtx<'_>, _args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(boolean(true))
}

pub(super) fn fn_false(_ctx: &CallCtx<'_>, _args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(boolean(false))
}

pub(super) fn fn_not(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(boolean(!effective_boolean_value(&args[0])?))
}

pub(super) fn fn_boolean(_ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    Ok(boolean(effective_boolean_value(&args[0])?))
}

pub(super) fn data_fn(ctx: &CallCtx<'_>, args: &[XdmSequence]) -> Result<XdmSequence, Error> {
    let seq = arg_or_context(ctx, args)?;
    Ok(seq.iter().map(|item| XdmItem::Atomic(item.atomize())).collect())
}
