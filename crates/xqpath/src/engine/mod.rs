pub mod axes;
pub mod constructors;
pub mod evaluator;
pub mod functions;
pub mod runtime;
pub mod step;
