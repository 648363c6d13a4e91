use ecow::EcoString;

use crate::errors::{ExecutionError, RuntimeError};
use crate::values::{NativeFunction, Value, ValueKind};
use crate::vm::NativeContext;

/// Kelp's VM doesn't know Rust types: it just executes instructions over
/// dynamic values. To give host function authors a typed API, a
/// `FunctionAdapter` converts at the boundary between the VM and the host:
/// arguments are checked and converted on the way in, results are converted
/// back to [`Value`]s on the way out.
///
/// Implemented for closures taking up to four [`FromValue`] arguments and
/// returning `Result<R, RuntimeError>` where `R: IntoValue`.
///
/// ```ignore
/// vm.register_fn("add", |a: i64, b: i64| Ok(a + b));
/// ```
pub trait FunctionAdapter<Args>: Send + Sync + Sized + 'static {
    fn num_args() -> usize;

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, ExecutionError>;

    fn into_native(self, name: &str) -> NativeFunction {
        let owned = EcoString::from(name);
        NativeFunction::new(name, move |_: &NativeContext<'_>, args: &[Value]| {
            if args.len() != Self::num_args() {
                return Err(RuntimeError::ArgumentCount {
                    name: owned.to_string(),
                    expected: Self::num_args(),
                    got: args.len(),
                }
                .into());
            }
            self.call(&owned, args)
        })
    }
}

/// Conversion from a dynamic argument.
pub trait FromValue: Sized {
    /// The kind reported when conversion fails.
    const KIND: ValueKind;

    fn from_value(value: &Value) -> Option<Self>;
}

/// Conversion of a host result into a dynamic value.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl FromValue for Value {
    const KIND: ValueKind = ValueKind::Undefined;

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for i64 {
    const KIND: ValueKind = ValueKind::Int;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_int()
    }
}

impl FromValue for f64 {
    const KIND: ValueKind = ValueKind::Float;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_float()
    }
}

impl FromValue for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for EcoString {
    const KIND: ValueKind = ValueKind::Str;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for String {
    const KIND: ValueKind = ValueKind::Str;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromValue for Vec<Value> {
    const KIND: ValueKind = ValueKind::List;

    fn from_value(value: &Value) -> Option<Self> {
        value.to_vec()
    }
}

impl FromValue for Vec<u8> {
    const KIND: ValueKind = ValueKind::Bytes;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bytes().map(<[u8]>::to_vec)
    }
}

macro_rules! impl_into_value {
    ($($ty:ty),*) => {
        $(
            impl IntoValue for $ty {
                fn into_value(self) -> Value {
                    Value::from(self)
                }
            }
        )*
    };
}

impl_into_value!(Value, bool, i64, i32, usize, f64, String, EcoString, &str, Vec<Value>);

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::Undefined
    }
}

fn convert<T: FromValue>(name: &str, index: usize, value: &Value) -> Result<T, RuntimeError> {
    T::from_value(value).ok_or_else(|| RuntimeError::ArgumentType {
        name: name.to_string(),
        index,
        expected: T::KIND,
        got: value.kind(),
    })
}

macro_rules! impl_function_adapter {
    ($count:expr; $($arg:ident : $idx:tt),*) => {
        impl<F, R, $($arg),*> FunctionAdapter<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> Result<R, RuntimeError> + Send + Sync + 'static,
            R: IntoValue,
            $($arg: FromValue,)*
        {
            fn num_args() -> usize {
                $count
            }

            #[allow(unused_variables)]
            fn call(&self, name: &str, args: &[Value]) -> Result<Value, ExecutionError> {
                let result = (self)($(convert::<$arg>(name, $idx, &args[$idx])?),*)?;
                Ok(result.into_value())
            }
        }
    };
}

impl_function_adapter!(0;);
impl_function_adapter!(1; A: 0);
impl_function_adapter!(2; A: 0, B: 1);
impl_function_adapter!(3; A: 0, B: 1, C: 2);
impl_function_adapter!(4; A: 0, B: 1, C: 2, D: 3);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ExecutionContext;
    use crate::vm::VM;

    #[test]
    fn test_typed_function() {
        let vm = VM::default();
        vm.register_fn("add", |a: i64, b: i64| Ok(a + b));
        let add = vm.get_global("add").unwrap();
        let result = vm
            .call_function(&ExecutionContext::new(), &add, vec![Value::Int(2), Value::Int(3)])
            .unwrap();
        assert_eq!(result, Value::Int(5));
    }

    #[test]
    fn test_argument_type_error() {
        let vm = VM::default();
        vm.register_fn("shout", |s: String| Ok(s.to_uppercase()));
        let shout = vm.get_global("shout").unwrap();
        let err = vm
            .call_function(&ExecutionContext::new(), &shout, vec![Value::Int(1)])
            .unwrap_err();
        assert_eq!(
            err.runtime().unwrap().to_string(),
            "shout: argument 0 should be string, got int"
        );
    }

    #[test]
    fn test_argument_count_error() {
        let vm = VM::default();
        vm.register_fn("unit", || Ok(()));
        let unit = vm.get_global("unit").unwrap();
        let ctx = ExecutionContext::new();
        assert!(vm.call_function(&ctx, &unit, vec![]).unwrap().is_undefined());
        let err = vm.call_function(&ctx, &unit, vec![Value::Int(1)]).unwrap_err();
        assert!(matches!(
            err.runtime(),
            Some(RuntimeError::ArgumentCount { expected: 0, got: 1, .. })
        ));
    }

    #[test]
    fn test_float_arguments_accept_ints() {
        let vm = VM::default();
        vm.register_fn("half", |x: f64| Ok(x / 2.0));
        let half = vm.get_global("half").unwrap();
        let result = vm
            .call_function(&ExecutionContext::new(), &half, vec![Value::Int(3)])
            .unwrap();
        assert_eq!(result, Value::Float(1.5));
    }
}
