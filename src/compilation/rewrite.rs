//! Standard-output redirection
//!
//! User code prints with the console API; the child process needs those
//! calls to go through the script runtime so they reach the host as
//! framed messages. `ConsoleRedirect` does this by plain text
//! substitution. It is not syntax aware: a `Console.WriteLine(` inside a
//! string literal or comment is rewritten too.

/// Rewrites user code so console I/O goes through the script runtime
pub trait OutputRewriter: Send + Sync {
    fn rewrite(&self, code: &str) -> String;
}

/// Console call -> runtime call. Longer patterns first so
/// `Console.WriteLine(` is not caught by `Console.Write(`.
const CONSOLE_CALLS: &[(&str, &str)] = &[
    ("System.Console.WriteLine(", "ScriptRuntime.WriteLine("),
    ("System.Console.Write(", "ScriptRuntime.WriteText("),
    ("System.Console.ReadLine(", "ScriptRuntime.ReadLine("),
    ("Console.WriteLine(", "ScriptRuntime.WriteLine("),
    ("Console.Write(", "ScriptRuntime.WriteText("),
    ("Console.ReadLine(", "ScriptRuntime.ReadLine("),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleRedirect;

impl OutputRewriter for ConsoleRedirect {
    fn rewrite(&self, code: &str) -> String {
        let mut rewritten = String::with_capacity(code.len());
        let mut rest = code;

        'scan: while !rest.is_empty() {
            for (from, to) in CONSOLE_CALLS {
                if rest.starts_with(from) && !preceded_by_identifier(code, rest) {
                    rewritten.push_str(to);
                    rest = &rest[from.len()..];
                    continue 'scan;
                }
            }
            let Some(c) = rest.chars().next() else { break };
            rewritten.push(c);
            rest = &rest[c.len_utf8()..];
        }

        rewritten
    }
}

/// True when `rest` (a suffix of `code`) directly follows an identifier
/// character, as in `MyConsole.WriteLine(`.
fn preceded_by_identifier(code: &str, rest: &str) -> bool {
    let offset = code.len() - rest.len();
    code[..offset]
        .chars()
        .next_back()
        .is_some_and(|c| c.is_alphanumeric() || c == '_')
}

/// Leaves code untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRewrite;

impl OutputRewriter for NoRewrite {
    fn rewrite(&self, code: &str) -> String {
        code.to_string()
    }
}
