use std::collections::BTreeSet;

use crate::ast;

/// Collects the names a macro body references.
///
/// The result is used to enclose values from the defining scope when a
/// macro is declared.  The analysis intentionally over-approximates:
/// names that turn out to be shadowed by arguments or local
/// assignments are captured too and simply never consulted.
pub(crate) fn find_macro_closure(body: &[ast::Stmt]) -> (Vec<String>, bool) {
    let mut names = BTreeSet::new();
    for stmt in body {
        collect_stmt(stmt, &mut names);
    }
    let caller = names.remove("caller");
    names.remove("loop");
    names.remove("self");
    (names.into_iter().collect(), caller)
}

fn collect_stmts(stmts: &[ast::Stmt], names: &mut BTreeSet<String>) {
    for stmt in stmts {
        collect_stmt(stmt, names);
    }
}

fn collect_stmt(stmt: &ast::Stmt, names: &mut BTreeSet<String>) {
    match stmt {
        ast::Stmt::Template(node) => collect_stmts(&node.children, names),
        ast::Stmt::EmitExpr(node) => collect_expr(&node.expr, names),
        ast::Stmt::EmitRaw(_) => {}
        ast::Stmt::ForLoop(node) => {
            collect_expr(&node.iter, names);
            if let Some(ref filter) = node.filter_expr {
                collect_expr(filter, names);
            }
            collect_stmts(&node.body, names);
            collect_stmts(&node.else_body, names);
        }
        ast::Stmt::IfCond(node) => {
            collect_expr(&node.expr, names);
            collect_stmts(&node.true_body, names);
            collect_stmts(&node.false_body, names);
        }
        ast::Stmt::WithBlock(node) => {
            for (_, expr) in &node.assignments {
                collect_expr(expr, names);
            }
            collect_stmts(&node.body, names);
        }
        ast::Stmt::Set(node) => collect_expr(&node.expr, names),
        ast::Stmt::SetBlock(node) => {
            if let Some(ref filter) = node.filter {
                collect_expr(filter, names);
            }
            collect_stmts(&node.body, names);
        }
        ast::Stmt::AutoEscape(node) => {
            collect_expr(&node.enabled, names);
            collect_stmts(&node.body, names);
        }
        ast::Stmt::FilterBlock(node) => {
            collect_expr(&node.filter, names);
            collect_stmts(&node.body, names);
        }
        ast::Stmt::Block(node) => collect_stmts(&node.body, names),
        ast::Stmt::Extends(node) => collect_expr(&node.name, names),
        ast::Stmt::Include(node) => collect_expr(&node.name, names),
        ast::Stmt::Import(node) => collect_expr(&node.expr, names),
        ast::Stmt::FromImport(node) => collect_expr(&node.expr, names),
        ast::Stmt::Macro(node) => {
            for default in &node.defaults {
                collect_expr(default, names);
            }
            collect_stmts(&node.body, names);
        }
        ast::Stmt::CallBlock(node) => {
            collect_call(&node.call, names);
            collect_stmts(&node.macro_decl.body, names);
        }
        ast::Stmt::Do(node) => collect_expr(&node.expr, names),
        ast::Stmt::Trans(node) => {
            for (_, expr) in &node.vars {
                collect_expr(expr, names);
            }
            for piece in node
                .singular
                .iter()
                .chain(node.plural.iter().flat_map(|p| p.pieces.iter()))
            {
                if let ast::TransPiece::Var(name) = piece {
                    names.insert(name.clone());
                }
            }
        }
        ast::Stmt::Continue(_) | ast::Stmt::Break(_) => {}
    }
}

fn collect_call_args(args: &[ast::CallArg], names: &mut BTreeSet<String>) {
    for arg in args {
        match arg {
            ast::CallArg::Pos(expr)
            | ast::CallArg::Kwarg(_, expr)
            | ast::CallArg::PosSplat(expr)
            | ast::CallArg::KwargSplat(expr) => collect_expr(expr, names),
        }
    }
}

fn collect_call(call: &ast::Call, names: &mut BTreeSet<String>) {
    collect_expr(&call.expr, names);
    collect_call_args(&call.args, names);
}

fn collect_expr(expr: &ast::Expr, names: &mut BTreeSet<String>) {
    match expr {
        ast::Expr::Var(node) => {
            names.insert(node.id.clone());
        }
        ast::Expr::Const(_) => {}
        ast::Expr::Slice(node) => {
            collect_expr(&node.expr, names);
            for part in [&node.start, &node.stop, &node.step].into_iter().flatten() {
                collect_expr(part, names);
            }
        }
        ast::Expr::UnaryOp(node) => collect_expr(&node.expr, names),
        ast::Expr::BinOp(node) => {
            collect_expr(&node.left, names);
            collect_expr(&node.right, names);
        }
        ast::Expr::Compare(node) => {
            collect_expr(&node.expr, names);
            for (_, expr) in &node.ops {
                collect_expr(expr, names);
            }
        }
        ast::Expr::IfExpr(node) => {
            collect_expr(&node.test_expr, names);
            collect_expr(&node.true_expr, names);
            if let Some(ref false_expr) = node.false_expr {
                collect_expr(false_expr, names);
            }
        }
        ast::Expr::Filter(node) => {
            if let Some(ref expr) = node.expr {
                collect_expr(expr, names);
            }
            collect_call_args(&node.args, names);
        }
        ast::Expr::Test(node) => {
            collect_expr(&node.expr, names);
            collect_call_args(&node.args, names);
        }
        ast::Expr::GetAttr(node) => collect_expr(&node.expr, names),
        ast::Expr::GetItem(node) => {
            collect_expr(&node.expr, names);
            collect_expr(&node.subscript_expr, names);
        }
        ast::Expr::Call(node) => collect_call(node, names),
        ast::Expr::List(node) => {
            for item in &node.items {
                collect_expr(item, names);
            }
        }
        ast::Expr::Map(node) => {
            for expr in node.keys.iter().chain(node.values.iter()) {
                collect_expr(expr, names);
            }
        }
    }
}
