// VM construction options.

/// Tracing switches, toggled by the CLI flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugFlags {
    /// Disassemble each function as it finishes compiling.
    pub print_code: bool,
    /// Print the stack and the decoded instruction before every step.
    pub trace_execution: bool,
    /// Report collection begin/end with byte counts.
    pub log_gc: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VmOptions {
    pub debug: DebugFlags,
    /// Collect before every growing allocation instead of waiting for the
    /// threshold. Programs must behave identically with this on.
    pub stress_gc: bool,
}
