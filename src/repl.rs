//! Interactive REPL.
//!
//! Each complete input is read form by form; every form's result prints on
//! its own line. Reader and evaluator errors print a message and discard the
//! remainder of the buffered input before the next prompt. Multi-line input
//! is detected by tracking unclosed parentheses and strings.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::ports::ByteStream;
use crate::printer;
use crate::reader;
use crate::vm::Vm;

const HISTORY_FILE: &str = ".kat-history";

pub struct Repl {
    vm: Vm,
}

impl Repl {
    pub fn new() -> Self {
        Repl { vm: Vm::new() }
    }

    pub fn run(&self) {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("{}: {}", "failed to start line editor".red(), e);
                return;
            }
        };
        let _ = rl.load_history(HISTORY_FILE);

        println!("kat scheme. {} to exit.", "Ctrl-D".yellow());

        let mut buffer = String::new();
        loop {
            let prompt = if buffer.is_empty() {
                "kat> ".to_string()
            } else {
                format!("{}  ", "...".dimmed())
            };

            match rl.readline(&prompt) {
                Ok(line) => {
                    if !buffer.is_empty() {
                        buffer.push('\n');
                    }
                    buffer.push_str(&line);

                    if is_incomplete(&buffer) {
                        continue;
                    }

                    if !buffer.trim().is_empty() {
                        let _ = rl.add_history_entry(buffer.as_str());
                        let _ = rl.save_history(HISTORY_FILE);
                        self.eval_and_print(&buffer);
                    }
                    buffer.clear();
                }
                Err(ReadlineError::Interrupted) => {
                    if !buffer.is_empty() {
                        println!("{}", "input cancelled".dimmed());
                        buffer.clear();
                    }
                }
                Err(ReadlineError::Eof) => break,
                Err(e) => {
                    eprintln!("{}: {}", "read error".red(), e);
                    break;
                }
            }
        }
    }

    /// Reads and evaluates every form in `input`. An error discards the
    /// rest of the buffered input, matching the line-flush behavior of a
    /// stream-driven prompt.
    fn eval_and_print(&self, input: &str) {
        let vm = &self.vm;
        let mut src = ByteStream::from_str(input);
        loop {
            let expr = match reader::read(&vm.heap, &mut src) {
                Ok(Some(expr)) => expr,
                Ok(None) => break,
                Err(e) => {
                    println!("{}", e.to_string().red());
                    break;
                }
            };
            let scope = vm.heap.scope_with(&[expr]);
            match vm.eval_in_global(expr) {
                Ok(value) => {
                    println!("{}", colorize(&printer::to_string(&vm.heap, value)))
                }
                Err(e) => {
                    println!("{}", e.to_string().red());
                    break;
                }
            }
            drop(scope);
        }
    }
}

impl Default for Repl {
    fn default() -> Self {
        Self::new()
    }
}

/// True when the input has unclosed parentheses or an open string literal
/// and the reader would hit end of input.
fn is_incomplete(input: &str) -> bool {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;
    let mut in_comment = false;

    for c in input.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if in_comment {
            if c == '\n' {
                in_comment = false;
            }
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            ';' if !in_string => in_comment = true,
            '(' if !in_string => depth += 1,
            ')' if !in_string => depth -= 1,
            _ => {}
        }
    }

    depth > 0 || in_string
}

/// Light output coloring by shape of the printed form.
fn colorize(out: &str) -> String {
    if out == "#t" {
        return out.green().to_string();
    }
    if out == "#f" {
        return out.red().to_string();
    }
    if out.starts_with("#<") {
        return out.magenta().to_string();
    }
    if out.parse::<i64>().is_ok() {
        return out.blue().to_string();
    }
    out.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incompleteness_detection() {
        assert!(is_incomplete("(define (f x)"));
        assert!(is_incomplete("\"open string"));
        assert!(!is_incomplete("(+ 1 2)"));
        assert!(!is_incomplete("(f \")\")"));
        // A comment swallows the rest of its line only.
        assert!(!is_incomplete("(+ 1 2) ; (unclosed in comment"));
        assert!(is_incomplete("(+ 1 ; comment\n"));
    }
}
