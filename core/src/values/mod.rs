pub mod function;
pub mod ops;
pub mod value;

pub use function::{Callable, Function, FunctionProto, NativeFn, NativeFunction};
pub use ops::{BinaryOp, CompareOp, UnaryOp};
pub use value::{ListRef, MapKey, MapRef, Value, ValueKind};

#[cfg(test)]
mod value_test;
