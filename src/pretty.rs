//! Surface-syntax rendering of programs and expressions.
//!
//! Pure formatting: one statement per line, blocks braced only when they
//! hold more than one statement, `clocked` as a same-line prefix. Colors are
//! plain ANSI escapes, switched by [`Style`]; identifiers render yellow and
//! constants green, block keywords cyan, and the constructs this compiler
//! exists to remove (`advance`, `clocked`) red.

use crate::ast::{Instruction, InstructionKind};
use crate::expr::{BinaryOp, Expr, UnaryOp};

pub const RESET: &str = "\x1b[0m";
pub const RED: &str = "\x1b[31m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const BLUE: &str = "\x1b[34m";
pub const CYAN: &str = "\x1b[36m";
pub const BOLD: &str = "\x1b[1m";

/// Indentation flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndentStyle {
    /// Four spaces per level.
    #[default]
    Spaces,
    /// One tab per level.
    Tabs,
}

impl IndentStyle {
    fn unit(self) -> &'static str {
        match self {
            IndentStyle::Spaces => "    ",
            IndentStyle::Tabs => "\t",
        }
    }
}

/// Formatter configuration, threaded explicitly through every printer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Style {
    pub color: bool,
    pub indent: IndentStyle,
}

impl Style {
    pub fn colored() -> Style {
        Style {
            color: true,
            ..Style::default()
        }
    }
}

/// Render a whole program.
pub fn program_to_string(program: &[Instruction], style: &Style) -> String {
    let mut printer = Printer::new(style);
    printer.write_list(program);
    printer.out
}

/// Render a single expression; identifiers and constants are colored when
/// the style asks for it.
pub fn expr_to_string(expr: &Expr, style: &Style) -> String {
    let mut out = String::new();
    write_expr(&mut out, expr, style);
    out
}

fn write_expr(out: &mut String, expr: &Expr, style: &Style) {
    match expr {
        Expr::Number(n) => paint(out, &n.to_string(), GREEN, style),
        Expr::Bool(b) => paint(out, &b.to_string(), GREEN, style),
        Expr::Ident(name) => paint(out, name, YELLOW, style),
        Expr::Unary(op, operand) => {
            out.push_str(match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "!",
            });
            write_expr(out, operand, style);
        }
        Expr::Binary(op @ (BinaryOp::Min | BinaryOp::Max), left, right) => {
            out.push_str(op.symbol());
            out.push('(');
            write_expr(out, left, style);
            out.push_str(", ");
            write_expr(out, right, style);
            out.push(')');
        }
        Expr::Binary(op, left, right) => {
            out.push('(');
            write_expr(out, left, style);
            out.push(' ');
            out.push_str(op.symbol());
            out.push(' ');
            write_expr(out, right, style);
            out.push(')');
        }
    }
}

fn paint(out: &mut String, text: &str, color: &str, style: &Style) {
    if style.color {
        out.push_str(color);
        out.push_str(text);
        out.push_str(RESET);
    } else {
        out.push_str(text);
    }
}

struct Printer<'a> {
    style: &'a Style,
    level: usize,
    out: String,
}

impl<'a> Printer<'a> {
    fn new(style: &'a Style) -> Printer<'a> {
        Printer {
            style,
            level: 0,
            out: String::new(),
        }
    }

    fn indent(&mut self) {
        for _ in 0..self.level {
            self.out.push_str(self.style.indent.unit());
        }
    }

    fn keyword(&mut self, word: &str, color: &str) {
        paint(&mut self.out, word, color, self.style);
    }

    fn write_list(&mut self, list: &[Instruction]) {
        for instruction in list {
            self.write_instruction(instruction);
        }
    }

    /// Indent, write the body, dedent; braces only around multi-statement
    /// bodies.
    fn write_block(&mut self, body: &[Instruction]) {
        let braces = body.len() > 1;
        if braces {
            self.indent();
            self.out.push_str("{\n");
        }
        self.level += 1;
        self.write_list(body);
        self.level -= 1;
        if braces {
            self.indent();
            self.out.push_str("}\n");
        }
    }

    fn write_instruction(&mut self, instruction: &Instruction) {
        match &instruction.kind {
            InstructionKind::Call { name, args } => {
                self.indent();
                self.keyword(name, BOLD);
                self.out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    write_expr(&mut self.out, arg, self.style);
                }
                self.out.push_str(");\n");
            }
            InstructionKind::For {
                identifier,
                lower,
                upper,
                body,
            } => {
                self.indent();
                self.keyword("for", BLUE);
                self.out.push(' ');
                paint(&mut self.out, identifier, YELLOW, self.style);
                self.out.push(' ');
                self.keyword("in", BLUE);
                self.out.push_str(" (");
                write_expr(&mut self.out, lower, self.style);
                self.out.push_str("..");
                write_expr(&mut self.out, upper, self.style);
                self.out.push_str(")\n");
                self.write_block(body);
            }
            InstructionKind::If {
                condition,
                then_body,
                else_body,
            } => {
                self.indent();
                self.keyword("if", BLUE);
                self.out.push_str(" (");
                write_expr(&mut self.out, condition, self.style);
                self.out.push_str(")\n");
                self.write_block(then_body);
                if let Some(else_body) = else_body {
                    self.indent();
                    self.keyword("else", BLUE);
                    self.out.push('\n');
                    self.write_block(else_body);
                }
            }
            InstructionKind::Advance => {
                self.indent();
                self.keyword("advance", RED);
                self.out.push_str(";\n");
            }
            InstructionKind::Finish(body) => {
                self.indent();
                self.keyword("finish", CYAN);
                self.out.push('\n');
                self.write_block(body);
            }
            InstructionKind::Async(body) => {
                self.indent();
                self.keyword("async", CYAN);
                self.out.push('\n');
                self.write_block(body);
            }
            InstructionKind::ClockedFinish(body) => {
                self.indent();
                self.keyword("clocked ", RED);
                self.keyword("finish", CYAN);
                self.out.push('\n');
                self.write_block(body);
            }
            InstructionKind::ClockedAsync(body) => {
                self.indent();
                self.keyword("clocked ", RED);
                self.keyword("async", CYAN);
                self.out.push('\n');
                self.write_block(body);
            }
        }
    }
}
