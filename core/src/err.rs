use std::fmt;

use crate::val::ObjId;

/// VM error codes. Codes in the `BadType*` family and the argument/index
/// families are recoverable: the dispatch loop materializes them into
/// exception objects and hands them to the exception router. Everything a
/// well-formed image cannot trigger (pool ranges, stack bounds, malformed
/// headers) stays fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrCode {
    BadTypeAdd,
    BadTypeSub,
    BadTypeMul,
    BadTypeDiv,
    BadTypeMod,
    BadTypeNeg,
    BadTypeBitwise,
    BadTypeShift,
    BadTypeCompare,
    BadTypeCond,
    BadTypeIndex,
    BadTypeCall,
    BadTypeThrow,
    BadTypeSay,
    NumArgsMismatch,
    IndexOutOfRange,
    DivByZero,
    IntOverflow,
    PropNotDefined,
    ObjNotFound,
    WrongMetaclass,
    SayNotInstalled,
}

impl ErrCode {
    pub fn message(&self) -> &'static str {
        match self {
            ErrCode::BadTypeAdd => "invalid types for addition",
            ErrCode::BadTypeSub => "invalid types for subtraction",
            ErrCode::BadTypeMul => "invalid types for multiplication",
            ErrCode::BadTypeDiv => "invalid types for division",
            ErrCode::BadTypeMod => "invalid types for modulo",
            ErrCode::BadTypeNeg => "invalid type for negation",
            ErrCode::BadTypeBitwise => "invalid types for bitwise operation",
            ErrCode::BadTypeShift => "invalid types for shift",
            ErrCode::BadTypeCompare => "values are not comparable",
            ErrCode::BadTypeCond => "invalid type for condition",
            ErrCode::BadTypeIndex => "value cannot be indexed",
            ErrCode::BadTypeCall => "value is not callable",
            ErrCode::BadTypeThrow => "thrown value is not an object",
            ErrCode::BadTypeSay => "value has no text representation",
            ErrCode::NumArgsMismatch => "wrong number of arguments",
            ErrCode::IndexOutOfRange => "index out of range",
            ErrCode::DivByZero => "division by zero",
            ErrCode::IntOverflow => "integer overflow",
            ErrCode::PropNotDefined => "property not defined",
            ErrCode::ObjNotFound => "invalid object reference",
            ErrCode::WrongMetaclass => "object has the wrong metaclass",
            ErrCode::SayNotInstalled => "no say function installed",
        }
    }
}

impl fmt::Display for ErrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// A fault raised during execution.
///
/// `Throw` carries an exception object already in flight. `Runtime` is a
/// typed VM error that has not yet been materialized as a heap object; the
/// run loop turns it into an instance of the image's `RuntimeError` class
/// before routing. `Fatal` aborts the run unconditionally.
#[derive(Debug)]
pub enum Fault {
    Throw(ObjId),
    Runtime(ErrCode, String),
    Fatal(anyhow::Error),
}

impl Fault {
    pub fn runtime(code: ErrCode) -> Self {
        Fault::Runtime(code, code.message().to_string())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Fault::Fatal(anyhow::anyhow!(msg.into()))
    }
}

impl From<anyhow::Error> for Fault {
    fn from(err: anyhow::Error) -> Self {
        Fault::Fatal(err)
    }
}

pub type VmResult<T> = Result<T, Fault>;

/// Shorthand used by operator and native-method implementations.
pub fn type_err<T>(code: ErrCode, detail: impl fmt::Display) -> VmResult<T> {
    Err(Fault::Runtime(code, format!("{}: {detail}", code.message())))
}
