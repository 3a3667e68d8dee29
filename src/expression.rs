//! Expression gateway
//!
//! Conditions, mappings and scripts are opaque strings to the engine. It
//! strips the `=` expression prefix and hands the rest to an
//! [`ExpressionGateway`]. [`BasicExpressions`] is the built-in gateway: a
//! small evaluator covering literals, variable paths, comparisons, boolean
//! connectives and `+`/`-`.

use anyhow::anyhow;
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, none_of},
    combinator::{all_consuming, map, map_res, not, opt, recognize, value, verify},
    error::VerboseError,
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use serde_json::{Number, Value};

use crate::variables::Variables;

/// Marks a value as an expression rather than a literal.
pub const EXPRESSION_PREFIX: char = '=';

/// Remove the expression prefix, if present.
pub fn strip_prefix(text: &str) -> &str {
    text.strip_prefix(EXPRESSION_PREFIX).unwrap_or(text)
}

/// External expression evaluation.
pub trait ExpressionGateway: Send + Sync {
    fn evaluate(&self, expression: &str, variables: &Variables) -> anyhow::Result<Value>;

    /// Conditions hold only when the expression yields boolean `true`.
    fn evaluate_condition(&self, expression: &str, variables: &Variables) -> anyhow::Result<bool> {
        Ok(matches!(self.evaluate(expression, variables)?, Value::Bool(true)))
    }
}

// ============================================================================
// Built-in evaluator
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Not(Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BasicExpressions;

impl BasicExpressions {
    pub fn parse(expression: &str) -> anyhow::Result<Expr> {
        match all_consuming(ws(disjunction))(expression) {
            Ok((_, expr)) => Ok(expr),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(anyhow!(
                "cannot parse expression `{}`:\n{}",
                expression,
                nom::error::convert_error(expression, e)
            )),
            Err(nom::Err::Incomplete(_)) => {
                Err(anyhow!("cannot parse expression `{expression}`: incomplete input"))
            }
        }
    }

    pub fn eval(expr: &Expr, variables: &Variables) -> Value {
        match expr {
            Expr::Literal(v) => v.clone(),
            Expr::Path(path) => variables
                .lookup_path(path.as_slice())
                .cloned()
                .unwrap_or(Value::Null),
            Expr::Not(inner) => Value::Bool(!is_true(&Self::eval(inner, variables))),
            Expr::Binary(lhs, BinOp::And, rhs) => Value::Bool(
                is_true(&Self::eval(lhs, variables)) && is_true(&Self::eval(rhs, variables)),
            ),
            Expr::Binary(lhs, BinOp::Or, rhs) => Value::Bool(
                is_true(&Self::eval(lhs, variables)) || is_true(&Self::eval(rhs, variables)),
            ),
            Expr::Binary(lhs, op, rhs) => {
                apply(*op, Self::eval(lhs, variables), Self::eval(rhs, variables))
            }
        }
    }
}

impl ExpressionGateway for BasicExpressions {
    fn evaluate(&self, expression: &str, variables: &Variables) -> anyhow::Result<Value> {
        let expr = Self::parse(expression)?;
        Ok(Self::eval(&expr, variables))
    }
}

fn is_true(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

fn apply(op: BinOp, lhs: Value, rhs: Value) -> Value {
    match op {
        BinOp::Eq => Value::Bool(values_equal(&lhs, &rhs)),
        BinOp::Ne => Value::Bool(!values_equal(&lhs, &rhs)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (&lhs, &rhs) {
                (Value::Number(a), Value::Number(b)) => {
                    a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b))
                }
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            match ordering {
                Some(o) => Value::Bool(match op {
                    BinOp::Lt => o.is_lt(),
                    BinOp::Le => o.is_le(),
                    BinOp::Gt => o.is_gt(),
                    _ => o.is_ge(),
                }),
                None => Value::Null,
            }
        }
        BinOp::Add => match (&lhs, &rhs) {
            (Value::Number(a), Value::Number(b)) => arithmetic(a, b, i64::checked_add, |x, y| x + y),
            (Value::String(_), _) | (_, Value::String(_)) => {
                Value::String(format!("{}{}", display(&lhs), display(&rhs)))
            }
            _ => Value::Null,
        },
        BinOp::Sub => match (&lhs, &rhs) {
            (Value::Number(a), Value::Number(b)) => arithmetic(a, b, i64::checked_sub, |x, y| x - y),
            _ => Value::Null,
        },
        BinOp::And | BinOp::Or => Value::Bool(is_true(&lhs) && is_true(&rhs)),
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn arithmetic(
    a: &Number,
    b: &Number,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(result) = int_op(x, y) {
            return Value::Number(result.into());
        }
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Number::from_f64(float_op(x, y))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// Grammar
// ============================================================================
//
// disjunction := conjunction ("or" conjunction)*
// conjunction := comparison ("and" comparison)*
// comparison  := additive (cmp_op additive)?
// additive    := unary (("+" | "-") unary)*
// unary       := "not" "(" disjunction ")" | primary
// primary     := "(" disjunction ")" | literal | path

type Res<'a, O> = IResult<&'a str, O, VerboseError<&'a str>>;

fn ws<'a, O>(inner: impl FnMut(&'a str) -> Res<'a, O>) -> impl FnMut(&'a str) -> Res<'a, O> {
    delimited(multispace0, inner, multispace0)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> Res<'a, &'a str> {
    terminated(tag(word), not(alt((alphanumeric1, tag("_")))))
}

fn fold(first: Expr, rest: Vec<(BinOp, Expr)>) -> Expr {
    rest.into_iter().fold(first, |lhs, (op, rhs)| {
        Expr::Binary(Box::new(lhs), op, Box::new(rhs))
    })
}

fn disjunction(input: &str) -> Res<'_, Expr> {
    let (input, first) = conjunction(input)?;
    let (input, rest) = many0(pair(value(BinOp::Or, ws(keyword("or"))), conjunction))(input)?;
    Ok((input, fold(first, rest)))
}

fn conjunction(input: &str) -> Res<'_, Expr> {
    let (input, first) = comparison(input)?;
    let (input, rest) = many0(pair(value(BinOp::And, ws(keyword("and"))), comparison))(input)?;
    Ok((input, fold(first, rest)))
}

fn comparison(input: &str) -> Res<'_, Expr> {
    let (input, lhs) = additive(input)?;
    let (input, rhs) = opt(pair(ws(comparison_op), additive))(input)?;
    Ok((
        input,
        match rhs {
            Some((op, rhs)) => Expr::Binary(Box::new(lhs), op, Box::new(rhs)),
            None => lhs,
        },
    ))
}

fn comparison_op(input: &str) -> Res<'_, BinOp> {
    alt((
        value(BinOp::Eq, tag("==")),
        value(BinOp::Ne, tag("!=")),
        value(BinOp::Le, tag("<=")),
        value(BinOp::Ge, tag(">=")),
        value(BinOp::Lt, char('<')),
        value(BinOp::Gt, char('>')),
        value(BinOp::Eq, char('=')),
    ))(input)
}

fn additive(input: &str) -> Res<'_, Expr> {
    let (input, first) = unary(input)?;
    let (input, rest) = many0(pair(
        ws(alt((value(BinOp::Add, char('+')), value(BinOp::Sub, char('-'))))),
        unary,
    ))(input)?;
    Ok((input, fold(first, rest)))
}

fn unary(input: &str) -> Res<'_, Expr> {
    ws(alt((
        map(
            preceded(
                keyword("not"),
                delimited(ws(char('(')), disjunction, ws(char(')'))),
            ),
            |inner| Expr::Not(Box::new(inner)),
        ),
        primary,
    )))(input)
}

fn primary(input: &str) -> Res<'_, Expr> {
    alt((
        delimited(char('('), ws(disjunction), char(')')),
        map(literal, Expr::Literal),
        map(path, Expr::Path),
    ))(input)
}

fn literal(input: &str) -> Res<'_, Value> {
    alt((
        value(Value::Bool(true), keyword("true")),
        value(Value::Bool(false), keyword("false")),
        value(Value::Null, keyword("null")),
        map(string_literal, Value::String),
        number,
    ))(input)
}

fn string_literal(input: &str) -> Res<'_, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                none_of("\"\\"),
                '\\',
                alt((
                    value('\n', char('n')),
                    value('\t', char('t')),
                    value('\\', char('\\')),
                    value('"', char('"')),
                )),
            )),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(input)
}

fn number(input: &str) -> Res<'_, Value> {
    map_res(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
        ))),
        |text: &str| -> Result<Value, String> {
            if text.contains('.') {
                let parsed = text.parse::<f64>().map_err(|e| e.to_string())?;
                Number::from_f64(parsed)
                    .map(Value::Number)
                    .ok_or_else(|| format!("{text} is not a finite number"))
            } else {
                text.parse::<i64>()
                    .map(|n| Value::Number(n.into()))
                    .map_err(|e| e.to_string())
            }
        },
    )(input)
}

const RESERVED: [&str; 6] = ["and", "or", "not", "true", "false", "null"];

fn identifier(input: &str) -> Res<'_, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn path(input: &str) -> Res<'_, Vec<String>> {
    map(
        verify(separated_list1(char('.'), identifier), |segments: &Vec<&str>| {
            !RESERVED.contains(&segments[0])
        }),
        |segments| segments.into_iter().map(str::to_string).collect(),
    )(input)
}
