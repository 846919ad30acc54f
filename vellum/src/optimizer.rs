//! A constant folding pass over the parsed template.
//!
//! Sub-expressions whose operands are all compile-time constants are
//! replaced with literals.  Folding is conservative: any operation
//! that would fail is left untouched so the error surfaces at render
//! time with the original location, and impure callables are never
//! evaluated early.

use std::sync::Arc;

use crate::ast::{self, Spanned};
use crate::value::{ops, Value, ValueMap};

/// Resolves a filter application for folding purposes.
///
/// Returns `None` if the filter is unknown, impure or failed, in which
/// case the expression stays unfolded.
pub(crate) type FilterFolder<'x> = dyn Fn(&str, &[Value]) -> Option<Value> + 'x;

/// Filters that may be evaluated at compile time.
///
/// Everything here is a pure function of its arguments.  Filters that
/// consult render state (`escape`, `tojson`, `urlize`) or that are
/// intentionally non-deterministic (`random`) must not appear.
pub(crate) const PURE_FILTERS: &[&str] = &[
    "abs",
    "batch",
    "capitalize",
    "count",
    "first",
    "float",
    "int",
    "join",
    "last",
    "length",
    "lower",
    "replace",
    "reverse",
    "round",
    "string",
    "title",
    "trim",
    "upper",
    "wordcount",
];

/// Optimizes a parsed template in place.
pub(crate) fn optimize(stmt: &mut ast::Stmt, filters: &FilterFolder<'_>) {
    walk_stmt(stmt, filters);
}

/// Folds a standalone expression without filter support.
pub(crate) fn fold_standalone(expr: &mut ast::Expr) {
    fold_expr(expr, &|_, _| None);
}

fn walk_stmts(stmts: &mut [ast::Stmt], filters: &FilterFolder<'_>) {
    for stmt in stmts {
        walk_stmt(stmt, filters);
    }
}

fn walk_shared_body(body: &mut Arc<Vec<ast::Stmt>>, filters: &FilterFolder<'_>) {
    // bodies are not shared yet while the template is being compiled
    if let Some(body) = Arc::get_mut(body) {
        walk_stmts(body, filters);
    }
}

fn walk_stmt(stmt: &mut ast::Stmt, filters: &FilterFolder<'_>) {
    match stmt {
        ast::Stmt::Template(node) => walk_stmts(&mut node.children, filters),
        ast::Stmt::EmitExpr(node) => fold_expr(&mut node.expr, filters),
        ast::Stmt::EmitRaw(_) => {}
        ast::Stmt::ForLoop(node) => {
            fold_expr(&mut node.iter, filters);
            if let Some(ref mut filter_expr) = node.filter_expr {
                fold_expr(filter_expr, filters);
            }
            walk_shared_body(&mut node.body, filters);
            walk_stmts(&mut node.else_body, filters);
        }
        ast::Stmt::IfCond(node) => {
            fold_expr(&mut node.expr, filters);
            walk_stmts(&mut node.true_body, filters);
            walk_stmts(&mut node.false_body, filters);
        }
        ast::Stmt::WithBlock(node) => {
            for (_, expr) in &mut node.assignments {
                fold_expr(expr, filters);
            }
            walk_stmts(&mut node.body, filters);
        }
        ast::Stmt::Set(node) => fold_expr(&mut node.expr, filters),
        ast::Stmt::SetBlock(node) => {
            if let Some(ref mut filter) = node.filter {
                fold_expr(filter, filters);
            }
            walk_stmts(&mut node.body, filters);
        }
        ast::Stmt::AutoEscape(node) => {
            fold_expr(&mut node.enabled, filters);
            walk_stmts(&mut node.body, filters);
        }
        ast::Stmt::FilterBlock(node) => {
            fold_expr(&mut node.filter, filters);
            walk_stmts(&mut node.body, filters);
        }
        ast::Stmt::Block(node) => walk_shared_body(&mut node.body, filters),
        ast::Stmt::Extends(node) => fold_expr(&mut node.name, filters),
        ast::Stmt::Include(node) => fold_expr(&mut node.name, filters),
        ast::Stmt::Import(node) => fold_expr(&mut node.expr, filters),
        ast::Stmt::FromImport(node) => fold_expr(&mut node.expr, filters),
        ast::Stmt::Macro(node) => {
            for default in &mut node.defaults {
                fold_expr(default, filters);
            }
            walk_shared_body(&mut node.body, filters);
        }
        ast::Stmt::CallBlock(node) => {
            fold_call_args(&mut node.call.args, filters);
            fold_expr(&mut node.call.expr, filters);
            walk_shared_body(&mut node.macro_decl.body, filters);
        }
        ast::Stmt::Do(node) => fold_expr(&mut node.expr, filters),
        ast::Stmt::Trans(node) => {
            for (_, expr) in &mut node.vars {
                fold_expr(expr, filters);
            }
        }
        ast::Stmt::Continue(_) | ast::Stmt::Break(_) => {}
    }
}

fn fold_call_args(args: &mut [ast::CallArg], filters: &FilterFolder<'_>) {
    for arg in args {
        match arg {
            ast::CallArg::Pos(expr)
            | ast::CallArg::Kwarg(_, expr)
            | ast::CallArg::PosSplat(expr)
            | ast::CallArg::KwargSplat(expr) => fold_expr(expr, filters),
        }
    }
}

fn as_const(expr: &ast::Expr) -> Option<&Value> {
    match expr {
        ast::Expr::Const(node) => Some(&node.value),
        _ => None,
    }
}

/// Collects positional arguments if every argument is constant.
/// Keyword arguments and splats disable folding.
fn const_args(args: &[ast::CallArg]) -> Option<Vec<Value>> {
    let mut rv = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            ast::CallArg::Pos(expr) => rv.push(as_const(expr)?.clone()),
            _ => return None,
        }
    }
    Some(rv)
}

fn fold_expr(expr: &mut ast::Expr, filters: &FilterFolder<'_>) {
    let folded = match expr {
        ast::Expr::Var(_) | ast::Expr::Const(_) => None,
        ast::Expr::UnaryOp(node) => {
            fold_expr(&mut node.expr, filters);
            as_const(&node.expr).and_then(|val| match node.op {
                ast::UnaryOpKind::Not => Some(Value::from(!val.is_true())),
                ast::UnaryOpKind::Neg => ops::neg(val).ok(),
            })
        }
        ast::Expr::BinOp(node) => {
            fold_expr(&mut node.left, filters);
            fold_expr(&mut node.right, filters);
            fold_binop(node)
        }
        ast::Expr::Compare(node) => {
            fold_expr(&mut node.expr, filters);
            for (_, operand) in &mut node.ops {
                fold_expr(operand, filters);
            }
            fold_compare(node)
        }
        ast::Expr::IfExpr(node) => {
            fold_expr(&mut node.test_expr, filters);
            fold_expr(&mut node.true_expr, filters);
            if let Some(ref mut false_expr) = node.false_expr {
                fold_expr(false_expr, filters);
            }
            match as_const(&node.test_expr) {
                Some(test) if test.is_true() => as_const(&node.true_expr).cloned(),
                Some(_) => match node.false_expr {
                    Some(ref false_expr) => as_const(false_expr).cloned(),
                    // the implicit undefined is produced at render
                    // time so that it keeps its undefined nature
                    None => None,
                },
                None => None,
            }
        }
        ast::Expr::Filter(node) => {
            if let Some(ref mut piped) = node.expr {
                fold_expr(piped, filters);
            }
            fold_call_args(&mut node.args, filters);
            match node.expr.as_ref().and_then(|x| as_const(x)) {
                Some(piped) if PURE_FILTERS.contains(&node.name.as_str()) => {
                    const_args(&node.args).and_then(|mut args| {
                        args.insert(0, piped.clone());
                        filters(&node.name, &args)
                    })
                }
                _ => None,
            }
        }
        ast::Expr::Test(node) => {
            fold_expr(&mut node.expr, filters);
            fold_call_args(&mut node.args, filters);
            None
        }
        ast::Expr::GetAttr(node) => {
            fold_expr(&mut node.expr, filters);
            as_const(&node.expr).and_then(|val| val.get_attr_fast(&node.name))
        }
        ast::Expr::GetItem(node) => {
            fold_expr(&mut node.expr, filters);
            fold_expr(&mut node.subscript_expr, filters);
            match (as_const(&node.expr), as_const(&node.subscript_expr)) {
                (Some(val), Some(key)) => val.get_item_opt(key),
                _ => None,
            }
        }
        ast::Expr::Slice(node) => {
            fold_expr(&mut node.expr, filters);
            let node_mut = &mut **node;
            for part in [&mut node_mut.start, &mut node_mut.stop, &mut node_mut.step]
                .into_iter()
                .flatten()
            {
                fold_expr(part, filters);
            }
            fold_slice(node)
        }
        ast::Expr::Call(node) => {
            fold_expr(&mut node.expr, filters);
            fold_call_args(&mut node.args, filters);
            // calls are never folded; globals like range() may be
            // impure or expensive
            None
        }
        ast::Expr::List(node) => {
            for item in &mut node.items {
                fold_expr(item, filters);
            }
            if node.items.iter().all(|x| as_const(x).is_some()) {
                Some(Value::from(
                    node.items
                        .iter()
                        .map(|x| as_const(x).unwrap().clone())
                        .collect::<Vec<_>>(),
                ))
            } else {
                None
            }
        }
        ast::Expr::Map(node) => {
            let node_mut = &mut **node;
            for part in node_mut.keys.iter_mut().chain(node_mut.values.iter_mut()) {
                fold_expr(part, filters);
            }
            if node
                .keys
                .iter()
                .chain(node.values.iter())
                .all(|x| as_const(x).is_some())
            {
                let mut rv = ValueMap::new();
                for (key, value) in node.keys.iter().zip(node.values.iter()) {
                    rv.insert(
                        as_const(key).unwrap().clone(),
                        as_const(value).unwrap().clone(),
                    );
                }
                Some(Value::from_map(rv))
            } else {
                None
            }
        }
    };

    if let Some(value) = folded {
        let span = expr.span();
        *expr = ast::Expr::Const(Spanned::new(ast::Const { value }, span));
    }
}

fn fold_binop(node: &ast::BinOp) -> Option<Value> {
    let left = as_const(&node.left);
    match node.op {
        // short circuit operators can resolve with only the left side
        ast::BinOpKind::ScAnd => {
            let left = left?;
            return if !left.is_true() {
                Some(left.clone())
            } else {
                as_const(&node.right).cloned()
            };
        }
        ast::BinOpKind::ScOr => {
            let left = left?;
            return if left.is_true() {
                Some(left.clone())
            } else {
                as_const(&node.right).cloned()
            };
        }
        _ => {}
    }
    let left = left?;
    let right = as_const(&node.right)?;
    if left.is_undefined() || right.is_undefined() {
        return None;
    }
    match node.op {
        ast::BinOpKind::Add => ops::add(left, right).ok(),
        ast::BinOpKind::Sub => ops::sub(left, right).ok(),
        ast::BinOpKind::Mul => ops::mul(left, right).ok(),
        ast::BinOpKind::Div => ops::div(left, right).ok(),
        ast::BinOpKind::FloorDiv => ops::int_div(left, right).ok(),
        ast::BinOpKind::Rem => ops::rem(left, right).ok(),
        ast::BinOpKind::Pow => ops::pow(left, right).ok(),
        ast::BinOpKind::Concat => Some(ops::string_concat(left, right)),
        ast::BinOpKind::ScAnd | ast::BinOpKind::ScOr => unreachable!(),
    }
}

fn fold_compare(node: &ast::Compare) -> Option<Value> {
    let mut left = as_const(&node.expr)?;
    if left.is_undefined() {
        return None;
    }
    for (op, operand) in &node.ops {
        let right = as_const(operand)?;
        if right.is_undefined() {
            return None;
        }
        match ops::compare_op(*op, left, right) {
            Ok(true) => left = right,
            Ok(false) => return Some(Value::from(false)),
            Err(_) => return None,
        }
    }
    Some(Value::from(true))
}

fn fold_slice(node: &ast::Slice) -> Option<Value> {
    let base = as_const(&node.expr)?.clone();
    let mut parts = Vec::with_capacity(3);
    for part in [&node.start, &node.stop, &node.step] {
        parts.push(match part {
            Some(expr) => as_const(expr)?.clone(),
            None => Value::from(()),
        });
    }
    let step = parts.pop().unwrap();
    let stop = parts.pop().unwrap();
    let start = parts.pop().unwrap();
    ops::slice(base, start, stop, step).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expr;

    fn fold(source: &str) -> ast::Expr {
        let mut expr = parse_expr(source).unwrap();
        fold_expr(&mut expr, &|_, _| None);
        expr
    }

    fn fold_to_value(source: &str) -> Value {
        match fold(source) {
            ast::Expr::Const(node) => node.value.clone(),
            other => panic!("did not fold to constant: {}", other.description()),
        }
    }

    #[test]
    fn test_arithmetic_folds() {
        assert_eq!(fold_to_value("1 + 2 * 3"), Value::from(7));
        assert_eq!(fold_to_value("'a' ~ 'b'"), Value::from("ab"));
        assert_eq!(fold_to_value("[1, 2, 3]"), Value::from(vec![
            Value::from(1),
            Value::from(2),
            Value::from(3)
        ]));
    }

    #[test]
    fn test_chained_comparison_folds() {
        assert_eq!(fold_to_value("1 < 2 < 3"), Value::from(true));
        assert_eq!(fold_to_value("1 < 2 < 1"), Value::from(false));
    }

    #[test]
    fn test_error_is_deferred() {
        // division by zero stays unfolded and errors at render time
        assert!(matches!(fold("1 / 0"), ast::Expr::BinOp(_)));
    }

    #[test]
    fn test_conditional_folds() {
        assert_eq!(fold_to_value("1 if true else 2"), Value::from(1));
        assert_eq!(fold_to_value("1 if false else 2"), Value::from(2));
        // missing else must keep its undefined nature
        assert!(matches!(fold("1 if false"), ast::Expr::IfExpr(_)));
    }

    #[test]
    fn test_variables_do_not_fold() {
        assert!(matches!(fold("a + 1"), ast::Expr::BinOp(_)));
    }
}
