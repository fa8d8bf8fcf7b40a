// Compile-time error and warning reporting.
//
// Renders rustc-style diagnostics to stderr: a severity header with a code,
// the source location, the offending line with a caret span, and an optional
// help line. The compiler only depends on the counting contract: errors and
// warnings accumulate, and compilation stops once the error cap is reached.

use std::io::IsTerminal;

use smol_str::SmolStr;

const ANSI_RESET: &str = "\x1b[0m";
const ANSI_BOLD: &str = "\x1b[1m";
const ANSI_RED: &str = "\x1b[31m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_BLUE: &str = "\x1b[34m";
const ANSI_CYAN: &str = "\x1b[36m";

/// Hard stop after this many errors.
pub const MAX_ERRORS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// Error codes
pub const E_UNEXPECTED_CHAR: u16 = 1;
pub const E_UNTERMINATED_STR: u16 = 2;
pub const E_EXPECT_EXPRESSION: u16 = 3;
pub const E_EXPECT_TOKEN: u16 = 4;
pub const E_REDECLARED_VAR: u16 = 6;
pub const E_INVALID_ASSIGN: u16 = 7;
pub const E_BREAK_OUTSIDE_LOOP: u16 = 8;
pub const E_SELF_OUTSIDE_CLASS: u16 = 9;
pub const E_SUPER_NO_SUPERCLASS: u16 = 10;
pub const E_RETURN_TOP_LEVEL: u16 = 11;
pub const E_TOO_MANY_CONSTANTS: u16 = 12;
pub const E_TOO_MANY_LOCALS: u16 = 13;
pub const E_TOO_MANY_PARAMS: u16 = 14;
pub const E_TOO_MANY_ARGS: u16 = 15;
pub const E_INHERIT_SELF: u16 = 16;
pub const E_JUMP_TOO_FAR: u16 = 17;

// Warning codes
pub const W_UNUSED_VARIABLE: u16 = 1;

/// Source span a diagnostic points at (1-based line and column).
#[derive(Debug, Clone, Copy)]
pub struct SourceLoc {
    pub line: u32,
    pub column: u32,
    pub length: u32,
}

/// Holds the source being compiled plus running error/warning counts.
pub struct DiagContext<'src> {
    source: &'src str,
    filename: SmolStr,
    pub error_count: usize,
    pub warning_count: usize,
    use_colors: bool,
}

impl<'src> DiagContext<'src> {
    pub fn new(source: &'src str, filename: Option<&str>) -> Self {
        DiagContext {
            source,
            filename: SmolStr::new(filename.unwrap_or("<stdin>")),
            error_count: 0,
            warning_count: 0,
            use_colors: std::io::stderr().is_terminal(),
        }
    }

    /// True once the error cap is hit; the compiler bails out.
    pub fn should_stop(&self) -> bool {
        self.error_count >= MAX_ERRORS
    }

    pub fn report(
        &mut self,
        level: DiagLevel,
        code: u16,
        loc: SourceLoc,
        message: &str,
        help: Option<&str>,
    ) {
        match level {
            DiagLevel::Error => self.error_count += 1,
            DiagLevel::Warning => self.warning_count += 1,
        }

        self.print_header(level, code, message);
        self.print_location(loc);
        self.print_gutter();
        self.print_source_context(level, loc);
        self.print_gutter();
        if let Some(help) = help {
            if self.use_colors {
                eprintln!("{ANSI_BOLD}{ANSI_CYAN}help{ANSI_RESET}: {help}");
            } else {
                eprintln!("help: {help}");
            }
        }
        eprintln!();
    }

    /// One-line trailer after compilation, mirroring the counts.
    pub fn print_summary(&self) {
        if self.error_count == 0 && self.warning_count == 0 {
            return;
        }
        let mut parts = Vec::new();
        if self.error_count > 0 {
            parts.push(format!("compilation failed: {} error(s)", self.error_count));
        }
        if self.warning_count > 0 {
            parts.push(format!("{} warning(s)", self.warning_count));
        }
        let line = parts.join(", ");
        if self.use_colors {
            eprintln!("{ANSI_BOLD}{line}{ANSI_RESET}");
        } else {
            eprintln!("{line}");
        }
    }

    fn print_header(&self, level: DiagLevel, code: u16, message: &str) {
        if self.use_colors {
            match level {
                DiagLevel::Error => eprint!(
                    "{ANSI_BOLD}{ANSI_RED}error{ANSI_RESET}{ANSI_BOLD}[E{code:03}]{ANSI_RESET}"
                ),
                DiagLevel::Warning => eprint!(
                    "{ANSI_BOLD}{ANSI_YELLOW}warning{ANSI_RESET}{ANSI_BOLD}[W{code:03}]{ANSI_RESET}"
                ),
            }
        } else {
            match level {
                DiagLevel::Error => eprint!("error[E{code:03}]"),
                DiagLevel::Warning => eprint!("warning[W{code:03}]"),
            }
        }
        eprintln!(": {message}");
    }

    fn print_location(&self, loc: SourceLoc) {
        if self.use_colors {
            eprint!("{ANSI_BOLD}{ANSI_BLUE}  --> {ANSI_RESET}");
        } else {
            eprint!("  --> ");
        }
        eprintln!("{}:{}:{}", self.filename, loc.line, loc.column);
    }

    fn print_gutter(&self) {
        if self.use_colors {
            eprintln!("{ANSI_BOLD}{ANSI_BLUE}     |{ANSI_RESET}");
        } else {
            eprintln!("     |");
        }
    }

    fn print_source_context(&self, level: DiagLevel, loc: SourceLoc) {
        let Some(source_line) = self.source.lines().nth(loc.line.saturating_sub(1) as usize)
        else {
            return;
        };

        if self.use_colors {
            eprint!("{ANSI_BOLD}{ANSI_BLUE}{:4} | {ANSI_RESET}", loc.line);
        } else {
            eprint!("{:4} | ", loc.line);
        }
        eprintln!("{source_line}");

        if self.use_colors {
            eprint!("{ANSI_BOLD}{ANSI_BLUE}     | {ANSI_RESET}");
        } else {
            eprint!("     | ");
        }

        // Pad to the column, preserving tabs so the caret stays aligned.
        let bytes = source_line.as_bytes();
        for i in 1..loc.column {
            let idx = (i - 1) as usize;
            if idx >= bytes.len() {
                break;
            }
            if bytes[idx] == b'\t' {
                eprint!("\t");
            } else {
                eprint!(" ");
            }
        }

        let caret_color = if self.use_colors {
            match level {
                DiagLevel::Error => format!("{ANSI_BOLD}{ANSI_RED}"),
                DiagLevel::Warning => format!("{ANSI_BOLD}{ANSI_YELLOW}"),
            }
        } else {
            String::new()
        };
        let carets = "^".repeat(loc.length.max(1) as usize);
        if self.use_colors {
            eprintln!("{caret_color}{carets}{ANSI_RESET}");
        } else {
            eprintln!("{carets}");
        }
    }
}
