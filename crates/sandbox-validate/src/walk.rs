use std::collections::HashSet;

use rustpython_parser::ast::{Arguments, Comprehension, ExceptHandler, Expr, Pattern, Stmt};

use crate::policy::{BLOCKED_BUILTINS, check_import};

/// Collects every policy violation in one pass over the AST.
pub(crate) struct Checker<'a> {
    allowed_dependencies: &'a HashSet<String>,
    allow_network: bool,
    errors: Vec<String>,
}

impl<'a> Checker<'a> {
    pub(crate) fn new(allowed_dependencies: &'a HashSet<String>, allow_network: bool) -> Self {
        Self {
            allowed_dependencies,
            allow_network,
            errors: Vec::new(),
        }
    }

    pub(crate) fn check(mut self, suite: &[Stmt]) -> Vec<String> {
        self.visit_body(suite);
        self.errors
    }

    fn flag_import(&mut self, module: &str) {
        if let Some(error) = check_import(module, self.allowed_dependencies, self.allow_network) {
            self.errors.push(error);
        }
    }

    fn visit_body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Import(import) => {
                for alias in &import.names {
                    self.flag_import(alias.name.as_str());
                }
            }
            Stmt::ImportFrom(import) => {
                if import.level.as_ref().is_some_and(|level| level.to_u32() > 0) {
                    self.errors
                        .push("relative imports are not allowed".to_string());
                } else if let Some(module) = &import.module {
                    self.flag_import(module.as_str());
                }
            }
            Stmt::FunctionDef(def) => {
                self.visit_arguments(&def.args);
                self.visit_exprs(&def.decorator_list);
                if let Some(returns) = &def.returns {
                    self.visit_expr(returns);
                }
                self.visit_body(&def.body);
            }
            Stmt::AsyncFunctionDef(def) => {
                self.visit_arguments(&def.args);
                self.visit_exprs(&def.decorator_list);
                if let Some(returns) = &def.returns {
                    self.visit_expr(returns);
                }
                self.visit_body(&def.body);
            }
            Stmt::ClassDef(def) => {
                self.visit_exprs(&def.bases);
                for keyword in &def.keywords {
                    self.visit_expr(&keyword.value);
                }
                self.visit_exprs(&def.decorator_list);
                self.visit_body(&def.body);
            }
            Stmt::Return(ret) => {
                if let Some(value) = &ret.value {
                    self.visit_expr(value);
                }
            }
            Stmt::Delete(del) => self.visit_exprs(&del.targets),
            Stmt::Assign(assign) => {
                self.visit_exprs(&assign.targets);
                self.visit_expr(&assign.value);
            }
            Stmt::AugAssign(assign) => {
                self.visit_expr(&assign.target);
                self.visit_expr(&assign.value);
            }
            Stmt::AnnAssign(assign) => {
                self.visit_expr(&assign.target);
                self.visit_expr(&assign.annotation);
                if let Some(value) = &assign.value {
                    self.visit_expr(value);
                }
            }
            Stmt::For(stmt) => {
                self.visit_expr(&stmt.target);
                self.visit_expr(&stmt.iter);
                self.visit_body(&stmt.body);
                self.visit_body(&stmt.orelse);
            }
            Stmt::AsyncFor(stmt) => {
                self.visit_expr(&stmt.target);
                self.visit_expr(&stmt.iter);
                self.visit_body(&stmt.body);
                self.visit_body(&stmt.orelse);
            }
            Stmt::While(stmt) => {
                self.visit_expr(&stmt.test);
                self.visit_body(&stmt.body);
                self.visit_body(&stmt.orelse);
            }
            Stmt::If(stmt) => {
                self.visit_expr(&stmt.test);
                self.visit_body(&stmt.body);
                self.visit_body(&stmt.orelse);
            }
            Stmt::With(stmt) => {
                for item in &stmt.items {
                    self.visit_expr(&item.context_expr);
                    if let Some(vars) = &item.optional_vars {
                        self.visit_expr(vars);
                    }
                }
                self.visit_body(&stmt.body);
            }
            Stmt::AsyncWith(stmt) => {
                for item in &stmt.items {
                    self.visit_expr(&item.context_expr);
                    if let Some(vars) = &item.optional_vars {
                        self.visit_expr(vars);
                    }
                }
                self.visit_body(&stmt.body);
            }
            Stmt::Match(stmt) => {
                self.visit_expr(&stmt.subject);
                for case in &stmt.cases {
                    self.visit_pattern(&case.pattern);
                    if let Some(guard) = &case.guard {
                        self.visit_expr(guard);
                    }
                    self.visit_body(&case.body);
                }
            }
            Stmt::Raise(stmt) => {
                if let Some(exc) = &stmt.exc {
                    self.visit_expr(exc);
                }
                if let Some(cause) = &stmt.cause {
                    self.visit_expr(cause);
                }
            }
            Stmt::Try(stmt) => {
                self.visit_body(&stmt.body);
                self.visit_handlers(&stmt.handlers);
                self.visit_body(&stmt.orelse);
                self.visit_body(&stmt.finalbody);
            }
            Stmt::TryStar(stmt) => {
                self.visit_body(&stmt.body);
                self.visit_handlers(&stmt.handlers);
                self.visit_body(&stmt.orelse);
                self.visit_body(&stmt.finalbody);
            }
            Stmt::Assert(stmt) => {
                self.visit_expr(&stmt.test);
                if let Some(msg) = &stmt.msg {
                    self.visit_expr(msg);
                }
            }
            Stmt::Expr(stmt) => self.visit_expr(&stmt.value),
            // Pass, Break, Continue, Global, Nonlocal: no nested code.
            _ => {}
        }
    }

    fn visit_handlers(&mut self, handlers: &[ExceptHandler]) {
        for handler in handlers {
            let ExceptHandler::ExceptHandler(handler) = handler;
            if let Some(type_) = &handler.type_ {
                self.visit_expr(type_);
            }
            self.visit_body(&handler.body);
        }
    }

    fn visit_pattern(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::MatchValue(p) => self.visit_expr(&p.value),
            Pattern::MatchSequence(p) => {
                for inner in &p.patterns {
                    self.visit_pattern(inner);
                }
            }
            Pattern::MatchMapping(p) => {
                self.visit_exprs(&p.keys);
                for inner in &p.patterns {
                    self.visit_pattern(inner);
                }
            }
            Pattern::MatchClass(p) => {
                self.visit_expr(&p.cls);
                for inner in &p.patterns {
                    self.visit_pattern(inner);
                }
                for inner in &p.kwd_patterns {
                    self.visit_pattern(inner);
                }
            }
            Pattern::MatchAs(p) => {
                if let Some(inner) = &p.pattern {
                    self.visit_pattern(inner);
                }
            }
            Pattern::MatchOr(p) => {
                for inner in &p.patterns {
                    self.visit_pattern(inner);
                }
            }
            _ => {}
        }
    }

    fn visit_arguments(&mut self, args: &Arguments) {
        for arg in args
            .posonlyargs
            .iter()
            .chain(&args.args)
            .chain(&args.kwonlyargs)
        {
            if let Some(annotation) = &arg.def.annotation {
                self.visit_expr(annotation);
            }
            if let Some(default) = &arg.default {
                self.visit_expr(default);
            }
        }
    }

    fn visit_comprehensions(&mut self, generators: &[Comprehension]) {
        for generator in generators {
            self.visit_expr(&generator.target);
            self.visit_expr(&generator.iter);
            self.visit_exprs(&generator.ifs);
        }
    }

    fn visit_exprs(&mut self, exprs: &[Expr]) {
        for expr in exprs {
            self.visit_expr(expr);
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Call(call) => {
                // eval/exec/compile/__import__ exist to defeat import
                // analysis; flag them as bare names and through attribute
                // aliases alike.
                match call.func.as_ref() {
                    Expr::Name(name) if BLOCKED_BUILTINS.contains(&name.id.as_str()) => {
                        self.errors.push(format!(
                            "call to builtin '{}' is not allowed",
                            name.id.as_str()
                        ));
                    }
                    Expr::Attribute(attr) if BLOCKED_BUILTINS.contains(&attr.attr.as_str()) => {
                        self.errors.push(format!(
                            "call to '{}' via attribute access is not allowed",
                            attr.attr.as_str()
                        ));
                    }
                    _ => {}
                }
                self.visit_expr(&call.func);
                self.visit_exprs(&call.args);
                for keyword in &call.keywords {
                    self.visit_expr(&keyword.value);
                }
            }
            Expr::Attribute(attr) => {
                if let Expr::Name(name) = attr.value.as_ref()
                    && name.id.as_str() == "os"
                    && attr.attr.as_str() == "environ"
                {
                    self.errors
                        .push("access to os.environ is not allowed".to_string());
                }
                self.visit_expr(&attr.value);
            }
            Expr::Subscript(sub) => {
                self.visit_expr(&sub.value);
                self.visit_expr(&sub.slice);
            }
            Expr::BoolOp(op) => self.visit_exprs(&op.values),
            Expr::NamedExpr(named) => {
                self.visit_expr(&named.target);
                self.visit_expr(&named.value);
            }
            Expr::BinOp(op) => {
                self.visit_expr(&op.left);
                self.visit_expr(&op.right);
            }
            Expr::UnaryOp(op) => self.visit_expr(&op.operand),
            Expr::Lambda(lambda) => {
                self.visit_arguments(&lambda.args);
                self.visit_expr(&lambda.body);
            }
            Expr::IfExp(ifexp) => {
                self.visit_expr(&ifexp.test);
                self.visit_expr(&ifexp.body);
                self.visit_expr(&ifexp.orelse);
            }
            Expr::Dict(dict) => {
                for key in dict.keys.iter().flatten() {
                    self.visit_expr(key);
                }
                self.visit_exprs(&dict.values);
            }
            Expr::Set(set) => self.visit_exprs(&set.elts),
            Expr::ListComp(comp) => {
                self.visit_expr(&comp.elt);
                self.visit_comprehensions(&comp.generators);
            }
            Expr::SetComp(comp) => {
                self.visit_expr(&comp.elt);
                self.visit_comprehensions(&comp.generators);
            }
            Expr::DictComp(comp) => {
                self.visit_expr(&comp.key);
                self.visit_expr(&comp.value);
                self.visit_comprehensions(&comp.generators);
            }
            Expr::GeneratorExp(comp) => {
                self.visit_expr(&comp.elt);
                self.visit_comprehensions(&comp.generators);
            }
            Expr::Await(await_) => self.visit_expr(&await_.value),
            Expr::Yield(yield_) => {
                if let Some(value) = &yield_.value {
                    self.visit_expr(value);
                }
            }
            Expr::YieldFrom(yield_) => self.visit_expr(&yield_.value),
            Expr::Compare(compare) => {
                self.visit_expr(&compare.left);
                self.visit_exprs(&compare.comparators);
            }
            Expr::FormattedValue(value) => {
                self.visit_expr(&value.value);
                if let Some(spec) = &value.format_spec {
                    self.visit_expr(spec);
                }
            }
            Expr::JoinedStr(joined) => self.visit_exprs(&joined.values),
            Expr::Starred(starred) => self.visit_expr(&starred.value),
            Expr::List(list) => self.visit_exprs(&list.elts),
            Expr::Tuple(tuple) => self.visit_exprs(&tuple.elts),
            Expr::Slice(slice) => {
                if let Some(lower) = &slice.lower {
                    self.visit_expr(lower);
                }
                if let Some(upper) = &slice.upper {
                    self.visit_expr(upper);
                }
                if let Some(step) = &slice.step {
                    self.visit_expr(step);
                }
            }
            // Name and Constant: leaves.
            _ => {}
        }
    }
}
