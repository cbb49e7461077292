// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Scalar functions and the registry that resolves them by name.

use std::collections::BTreeMap;
use std::fmt;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use quill_repr::{Datum, ScalarType};

use crate::scalar::{EvalError, Expression, FuncError};

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Func {
    Eq,
    NotEq,
    /// The null-safe equality `<=>`.
    NullEq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Xor,
    Not,
    Plus,
    Minus,
    Mul,
    Div,
    IntDiv,
    Mod,
    UnaryMinus,
    BitAnd,
    BitOr,
    BitXor,
    LeftShift,
    RightShift,
    BitNeg,
    IsNull,
    IsTrue,
    IsFalse,
    /// `In(subject, candidates...)`.
    In,
    /// `Like(subject, pattern, escape)`.
    Like,
    Regexp,
    /// `Case(cond1, result1, ..., condN, resultN[, else])`.
    Case,
    Cast(CastFunc),
    /// The row constructor `(a, b, ...)`.
    Row,
    /// `SetVar(name, value)` assigns a user variable.
    SetVar,
    /// `GetVar(name)` reads a user variable.
    GetVar,
    Abs,
    Ceil,
    Floor,
    Round,
    Concat,
    Lower,
    Upper,
    Length,
    Substring,
    Coalesce,
    IfNull,
    If,
    NullIf,
    Greatest,
    Least,
}

impl Func {
    /// The bounds on the number of arguments, as `(min, max)`.
    fn arity(&self) -> (usize, Option<usize>) {
        use Func::*;
        match self {
            Eq | NotEq | NullEq | Lt | Lte | Gt | Gte | And | Or | Xor | Plus | Minus | Mul
            | Div | IntDiv | Mod | BitAnd | BitOr | BitXor | LeftShift | RightShift | Regexp
            | SetVar | IfNull | NullIf => (2, Some(2)),
            Not | UnaryMinus | BitNeg | IsNull | IsTrue | IsFalse | Cast(_) | GetVar | Abs
            | Ceil | Floor | Lower | Upper | Length => (1, Some(1)),
            Like | If => (3, Some(3)),
            Round => (1, Some(2)),
            Substring => (2, Some(3)),
            In | Case | Greatest | Least => (2, None),
            Row | Concat | Coalesce => (1, None),
        }
    }

    pub(crate) fn check_arity(&self, got: usize) -> Result<(), FuncError> {
        let (min, max) = self.arity();
        if got >= min && max.map_or(true, |max| got <= max) {
            return Ok(());
        }
        let expected = match max {
            Some(max) if max == min => min.to_string(),
            Some(max) => format!("{} to {}", min, max),
            None => format!("at least {}", min),
        };
        Err(FuncError::WrongArgumentCount {
            func: self.to_string(),
            expected,
            got,
        })
    }

    /// Reports whether this function is one of the comparisons that can be
    /// distributed over the components of a row with AND.
    pub fn is_equality_class(&self) -> bool {
        matches!(self, Func::Eq | Func::NotEq | Func::NullEq)
    }

    /// Reports whether evaluating this function has side effects.
    pub fn is_volatile(&self) -> bool {
        matches!(self, Func::SetVar)
    }

    /// Infers the type a call of this function over `args` returns.
    pub fn output_type(&self, args: &[Expression]) -> ScalarType {
        use Func::*;
        match self {
            Eq | NotEq | NullEq | Lt | Lte | Gt | Gte | And | Or | Xor | Not | IsNull | IsTrue
            | IsFalse | In | Like | Regexp => ScalarType::Bool,
            Plus | Minus | Mul | Mod | UnaryMinus | Abs | Round => numeric_type(args),
            Div => ScalarType::Float64,
            IntDiv | Ceil | Floor | Length => ScalarType::Int64,
            BitAnd | BitOr | BitXor | LeftShift | RightShift | BitNeg => ScalarType::UInt64,
            Concat | Lower | Upper | Substring | GetVar => ScalarType::String,
            Cast(cast) => cast.target(),
            Row => ScalarType::Row(args.iter().map(|a| a.typ()).collect()),
            SetVar => args[1].typ(),
            If => first_known_type(&args[1..]),
            NullIf => args[0].typ(),
            Coalesce | IfNull | Greatest | Least => first_known_type(args),
            Case => {
                // Results sit at odd positions, plus a trailing else.
                let results: Vec<_> = args
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| i % 2 == 1 || *i == args.len() - 1)
                    .map(|(_, a)| a.clone())
                    .collect();
                first_known_type(&results)
            }
        }
    }
}

fn numeric_type(args: &[Expression]) -> ScalarType {
    let types: Vec<_> = args.iter().map(|a| a.typ()).collect();
    if types.iter().all(|t| *t == ScalarType::UInt64) {
        ScalarType::UInt64
    } else if types
        .iter()
        .all(|t| matches!(t, ScalarType::Int64 | ScalarType::UInt64 | ScalarType::Null))
    {
        ScalarType::Int64
    } else {
        ScalarType::Float64
    }
}

fn first_known_type(args: &[Expression]) -> ScalarType {
    args.iter()
        .map(|a| a.typ())
        .find(|t| *t != ScalarType::Null)
        .unwrap_or(ScalarType::Null)
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Func::*;
        let name = match self {
            Eq => "eq",
            NotEq => "ne",
            NullEq => "nulleq",
            Lt => "lt",
            Lte => "le",
            Gt => "gt",
            Gte => "ge",
            And => "and",
            Or => "or",
            Xor => "xor",
            Not => "not",
            Plus => "plus",
            Minus => "minus",
            Mul => "mul",
            Div => "div",
            IntDiv => "intdiv",
            Mod => "mod",
            UnaryMinus => "unaryminus",
            BitAnd => "bitand",
            BitOr => "bitor",
            BitXor => "bitxor",
            LeftShift => "leftshift",
            RightShift => "rightshift",
            BitNeg => "bitneg",
            IsNull => "isnull",
            IsTrue => "istrue",
            IsFalse => "isfalse",
            In => "in",
            Like => "like",
            Regexp => "regexp",
            Case => "case",
            Cast(_) => "cast",
            Row => "row",
            SetVar => "setvar",
            GetVar => "getvar",
            Abs => "abs",
            Ceil => "ceil",
            Floor => "floor",
            Round => "round",
            Concat => "concat",
            Lower => "lower",
            Upper => "upper",
            Length => "length",
            Substring => "substring",
            Coalesce => "coalesce",
            IfNull => "ifnull",
            If => "if",
            NullIf => "nullif",
            Greatest => "greatest",
            Least => "least",
        };
        f.write_str(name)
    }
}

/// The conversion routine a `CAST` applies, chosen by its target type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum CastFunc {
    ToBool,
    ToInt64,
    ToUInt64,
    ToFloat64,
    ToString,
    ToBytes,
}

impl CastFunc {
    /// Looks up the conversion routine for `target`.
    pub fn for_type(target: &ScalarType) -> Result<CastFunc, FuncError> {
        Ok(match target {
            ScalarType::Bool => CastFunc::ToBool,
            ScalarType::Int64 => CastFunc::ToInt64,
            ScalarType::UInt64 => CastFunc::ToUInt64,
            ScalarType::Float64 => CastFunc::ToFloat64,
            ScalarType::String => CastFunc::ToString,
            ScalarType::Bytes => CastFunc::ToBytes,
            ScalarType::Null | ScalarType::Row(_) => {
                return Err(FuncError::UnsupportedCast(target.clone()))
            }
        })
    }

    pub fn target(&self) -> ScalarType {
        match self {
            CastFunc::ToBool => ScalarType::Bool,
            CastFunc::ToInt64 => ScalarType::Int64,
            CastFunc::ToUInt64 => ScalarType::UInt64,
            CastFunc::ToFloat64 => ScalarType::Float64,
            CastFunc::ToString => ScalarType::String,
            CastFunc::ToBytes => ScalarType::Bytes,
        }
    }

    /// Converts `datum` to the target type. Null converts to null.
    pub fn eval(&self, datum: &Datum) -> Result<Datum, EvalError> {
        let invalid = || EvalError::InvalidCast {
            value: datum.to_string(),
            target: self.target(),
        };
        if datum.is_null() {
            return Ok(Datum::Null);
        }
        Ok(match (self, datum) {
            (CastFunc::ToBool, d) => Datum::Bool(d.as_truth().ok_or_else(invalid)?),
            (CastFunc::ToInt64, Datum::Bool(b)) => Datum::Int64(i64::from(*b)),
            (CastFunc::ToInt64, Datum::Int64(i)) => Datum::Int64(*i),
            (CastFunc::ToInt64, Datum::UInt64(u)) => {
                Datum::Int64(i64::try_from(*u).map_err(|_| invalid())?)
            }
            (CastFunc::ToInt64, Datum::Float64(f)) => Datum::Int64(f.0.round() as i64),
            (CastFunc::ToInt64, Datum::String(s)) => {
                Datum::Int64(s.trim().parse().map_err(|_| invalid())?)
            }
            (CastFunc::ToUInt64, Datum::Bool(b)) => Datum::UInt64(u64::from(*b)),
            (CastFunc::ToUInt64, Datum::Int64(i)) => {
                Datum::UInt64(u64::try_from(*i).map_err(|_| invalid())?)
            }
            (CastFunc::ToUInt64, Datum::UInt64(u)) => Datum::UInt64(*u),
            (CastFunc::ToUInt64, Datum::String(s)) => {
                Datum::UInt64(s.trim().parse().map_err(|_| invalid())?)
            }
            (CastFunc::ToFloat64, Datum::Int64(i)) => Datum::Float64(OrderedFloat(*i as f64)),
            (CastFunc::ToFloat64, Datum::UInt64(u)) => Datum::Float64(OrderedFloat(*u as f64)),
            (CastFunc::ToFloat64, Datum::Float64(f)) => Datum::Float64(*f),
            (CastFunc::ToFloat64, Datum::String(s)) => {
                Datum::Float64(OrderedFloat(s.trim().parse().map_err(|_| invalid())?))
            }
            (CastFunc::ToString, Datum::String(s)) => Datum::String(s.clone()),
            (CastFunc::ToString, Datum::Bytes(b)) => {
                Datum::String(String::from_utf8(b.clone()).map_err(|_| invalid())?)
            }
            (CastFunc::ToString, d) => Datum::String(d.to_string()),
            (CastFunc::ToBytes, Datum::Bytes(b)) => Datum::Bytes(b.clone()),
            (CastFunc::ToBytes, Datum::String(s)) => Datum::Bytes(s.as_bytes().to_vec()),
            (CastFunc::ToBytes, d) => Datum::Bytes(d.to_string().into_bytes()),
            _ => return Err(invalid()),
        })
    }
}

/// Resolves lowercase function names to [`Func`]s.
#[derive(Clone, Debug)]
pub struct FunctionRegistry {
    funcs: BTreeMap<String, Func>,
}

impl FunctionRegistry {
    /// A registry that knows every builtin function and operator by its
    /// canonical name.
    pub fn builtin() -> FunctionRegistry {
        use Func::*;
        let funcs = [
            Eq, NotEq, NullEq, Lt, Lte, Gt, Gte, And, Or, Xor, Not, Plus, Minus, Mul, Div, IntDiv,
            Mod, UnaryMinus, BitAnd, BitOr, BitXor, LeftShift, RightShift, BitNeg, IsNull, IsTrue,
            IsFalse, In, Like, Regexp, Case, Row, SetVar, GetVar, Abs, Ceil, Floor, Round, Concat,
            Lower, Upper, Length, Substring, Coalesce, IfNull, If, NullIf, Greatest, Least,
        ]
        .into_iter()
        .map(|func| (func.to_string(), func))
        .collect();
        let mut registry = FunctionRegistry { funcs };
        registry.register("ceiling", Ceil);
        registry.register("substr", Substring);
        registry.register("char_length", Length);
        registry
    }

    /// Makes `func` resolvable as `name`.
    pub fn register(&mut self, name: &str, func: Func) {
        self.funcs.insert(name.to_lowercase(), func);
    }

    /// Resolves `name`, which must already be lowercase.
    pub fn resolve(&self, name: &str) -> Result<Func, FuncError> {
        self.funcs
            .get(name)
            .cloned()
            .ok_or_else(|| FuncError::UnknownFunction(name.to_owned()))
    }

    /// Resolves `name` and builds a call over `args`.
    pub fn call(&self, name: &str, args: Vec<Expression>) -> Result<Expression, FuncError> {
        let func = self.resolve(name)?;
        Expression::call(func, args)
    }
}

impl Default for FunctionRegistry {
    fn default() -> FunctionRegistry {
        FunctionRegistry::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(i: i64) -> Expression {
        Expression::literal_datum(Datum::Int64(i))
    }

    #[test]
    fn test_registry_resolution() {
        let registry = FunctionRegistry::builtin();
        assert_eq!(registry.resolve("substr"), Ok(Func::Substring));
        assert_eq!(
            registry.resolve("frobnicate"),
            Err(FuncError::UnknownFunction("frobnicate".into()))
        );

        let call = registry.call("abs", vec![lit(-1)]).unwrap();
        assert_eq!(call.typ(), ScalarType::Int64);

        let err = registry.call("substring", vec![lit(1)]).unwrap_err();
        assert_eq!(
            err,
            FuncError::WrongArgumentCount {
                func: "substring".into(),
                expected: "2 to 3".into(),
                got: 1,
            }
        );
    }

    #[test]
    fn test_case_output_type() {
        let case = Expression::call(
            Func::Case,
            vec![
                Expression::literal_true(),
                Expression::literal_null(),
                Expression::literal_true(),
                Expression::literal_datum(Datum::from("x")),
            ],
        )
        .unwrap();
        assert_eq!(case.typ(), ScalarType::String);
    }

    #[test]
    fn test_cast_routines() {
        assert_eq!(
            CastFunc::for_type(&ScalarType::Row(vec![])),
            Err(FuncError::UnsupportedCast(ScalarType::Row(vec![])))
        );
        let to_int = CastFunc::for_type(&ScalarType::Int64).unwrap();
        assert_eq!(to_int.eval(&Datum::from(" 42 ")), Ok(Datum::Int64(42)));
        assert_eq!(to_int.eval(&Datum::Null), Ok(Datum::Null));
        assert!(to_int.eval(&Datum::from("forty-two")).is_err());
        let to_string = CastFunc::for_type(&ScalarType::String).unwrap();
        assert_eq!(to_string.eval(&Datum::Int64(7)), Ok(Datum::from("7")));
    }
}
