//! Code parsing
//!
//! Turns user text plus its kind into a compilable program:
//!
//! - `statements`: wrapped in `UserScript.RunAsync()`; the bootstrap
//!   `Main` awaits it and reports completion to the host.
//! - `expression`: wrapped as `(<code>).Dump();`, then as statements.
//! - `program`: used verbatim; the bootstrap only adds the runtime and
//!   the `Dump` extension.
//!
//! The bootstrap also carries `ScriptRuntime`, which frames output as
//! `{seq, type, data}` lines on stdout and reads host replies from stdin.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::dependencies::SourceCode;
use crate::error::{Result, ScriptpadError};
use crate::scripts::{Script, ScriptKind, DEFAULT_NAMESPACES};

use super::rewrite::{ConsoleRedirect, OutputRewriter};

/// Runtime and `Dump` extension, present for every kind
const RUNTIME_TEMPLATE: &str = r#"public static class ScriptRuntime
{
    public const string SCRIPT_ID = {{SCRIPT_ID}};
    public const string SCRIPT_NAME = {{SCRIPT_NAME}};
    public const string? SCRIPT_LOCATION = {{SCRIPT_LOCATION}};

    private static readonly object SendLock = new object();
    private static long _seq;
    private static readonly System.Text.Json.JsonSerializerOptions DumpOptions = new System.Text.Json.JsonSerializerOptions
    {
        WriteIndented = true,
        ReferenceHandler = System.Text.Json.Serialization.ReferenceHandler.IgnoreCycles,
    };

    public static void Send(string type, object data)
    {
        var payload = System.Text.Json.JsonSerializer.Serialize(data, data.GetType());
        lock (SendLock)
        {
            var seq = ++_seq;
            System.Console.Out.WriteLine(System.Text.Json.JsonSerializer.Serialize(new { seq, type, data = payload }));
            System.Console.Out.Flush();
        }
    }

    public static void Write(object? value, string? title = null, string kind = "result")
    {
        Send("output", new { kind, title, body = Format(value) });
    }

    public static void WriteText(object? value) => Write(value is null ? "" : Format(value), null, "text");

    public static void WriteText(string format, params object?[] args) => Write(string.Format(format, args), null, "text");

    public static void WriteLine() => Write("\n", null, "text");

    public static void WriteLine(object? value) => Write((value is null ? "" : Format(value)) + "\n", null, "text");

    public static void WriteLine(string format, params object?[] args) => Write(string.Format(format, args) + "\n", null, "text");

    public static string? ReadLine()
    {
        Send("requestInput", new { });
        var line = System.Console.In.ReadLine();
        if (line is null) return null;
        using var envelope = System.Text.Json.JsonDocument.Parse(line);
        var data = envelope.RootElement.GetProperty("data").GetString();
        if (data is null) return null;
        using var payload = System.Text.Json.JsonDocument.Parse(data);
        return payload.RootElement.TryGetProperty("input", out var input)
            && input.ValueKind == System.Text.Json.JsonValueKind.String
                ? input.GetString()
                : null;
    }

    private static string Format(object? value)
    {
        if (value is null) return "null";
        if (value is string s) return s;
        if (value is System.IFormattable || value is bool || value is char)
            return System.Convert.ToString(value, System.Globalization.CultureInfo.InvariantCulture) ?? "";
        try
        {
            return System.Text.Json.JsonSerializer.Serialize(value, value.GetType(), DumpOptions);
        }
        catch (System.Exception)
        {
            return value.ToString() ?? "";
        }
    }
}

public static class DumpExtension
{
    public static T Dump<T>(this T value, string? title = null)
    {
        ScriptRuntime.Write(value, title);
        return value;
    }
}
"#;

/// Entry point for the statements and expression kinds
const MAIN_TEMPLATE: &str = r#"public static class ScriptProgram
{
    public static async System.Threading.Tasks.Task<int> Main()
    {
        try
        {
            await UserScript.RunAsync();
            ScriptRuntime.Send("runComplete", new { error = (string?)null });
            return 0;
        }
        catch (System.Exception ex)
        {
            ScriptRuntime.Write(ex.ToString(), null, "error");
            ScriptRuntime.Send("runComplete", new { error = ex.Message });
            return 1;
        }
    }
}
"#;

const USER_SCRIPT_HEADER: &str = "public static class UserScript
{
    public static async System.Threading.Tasks.Task RunAsync()
    {
";

const USER_SCRIPT_FOOTER: &str = "        await System.Threading.Tasks.Task.CompletedTask;
    }
}
";

/// Identity baked into the bootstrap plus code compiled alongside
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub script_id: Uuid,
    pub script_name: String,
    pub script_location: Option<PathBuf>,
    pub additional_code: Vec<SourceCode>,
}

impl ParseOptions {
    pub fn for_script(script: &Script, additional_code: Vec<SourceCode>) -> Self {
        Self {
            script_id: script.id(),
            script_name: script.name().to_string(),
            script_location: script.path().map(|p| p.to_path_buf()),
            additional_code,
        }
    }
}

/// Program text ready for the compiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullProgram {
    pub code: String,
    /// 1-based line of the first line of user code
    pub user_program_start_line: usize,
}

#[derive(Debug, Clone)]
pub struct CodeParsingResult {
    /// Sorted, unique
    pub namespaces: Vec<String>,
    pub user_program: String,
    pub bootstrap_program: String,
    pub additional_code: Vec<SourceCode>,
    /// Wrapper lines in `user_program` before the user's first line
    user_code_offset: usize,
}

impl CodeParsingResult {
    /// Usings, additional code, bootstrap, then the user program
    pub fn full_program(&self) -> FullProgram {
        let mut code = String::new();
        for namespace in &self.namespaces {
            code.push_str("using ");
            code.push_str(namespace);
            code.push_str(";\n");
        }
        for source in &self.additional_code {
            code.push('\n');
            push_block(&mut code, &source.code);
        }
        code.push('\n');
        push_block(&mut code, &self.bootstrap_program);
        code.push('\n');

        let user_program_start_line = code.matches('\n').count() + self.user_code_offset + 1;
        push_block(&mut code, &self.user_program);

        FullProgram {
            code,
            user_program_start_line,
        }
    }
}

fn push_block(out: &mut String, block: &str) {
    out.push_str(block);
    if !block.ends_with('\n') {
        out.push('\n');
    }
}

pub trait CodeParser: Send + Sync {
    fn parse(
        &self,
        code: &str,
        kind: ScriptKind,
        namespaces: &[String],
        options: &ParseOptions,
    ) -> Result<CodeParsingResult>;
}

/// Parser for C#-syntax scripts
#[derive(Clone)]
pub struct CSharpParser {
    rewriter: Arc<dyn OutputRewriter>,
}

impl Default for CSharpParser {
    fn default() -> Self {
        Self::new(Arc::new(ConsoleRedirect))
    }
}

impl CSharpParser {
    pub fn new(rewriter: Arc<dyn OutputRewriter>) -> Self {
        Self { rewriter }
    }

    fn bootstrap(&self, kind: ScriptKind, options: &ParseOptions) -> String {
        let location = options
            .script_location
            .as_ref()
            .map(|p| csharp_string_literal(&p.to_string_lossy()))
            .unwrap_or_else(|| "null".to_string());

        let mut bootstrap = RUNTIME_TEMPLATE
            .replace("{{SCRIPT_ID}}", &csharp_string_literal(&options.script_id.to_string()))
            .replace("{{SCRIPT_NAME}}", &csharp_string_literal(&options.script_name))
            .replace("{{SCRIPT_LOCATION}}", &location);

        if kind != ScriptKind::Program {
            bootstrap.push('\n');
            bootstrap.push_str(MAIN_TEMPLATE);
        }
        bootstrap
    }
}

impl CodeParser for CSharpParser {
    fn parse(
        &self,
        code: &str,
        kind: ScriptKind,
        namespaces: &[String],
        options: &ParseOptions,
    ) -> Result<CodeParsingResult> {
        for namespace in namespaces {
            validate_namespace(namespace)?;
        }

        let mut merged: BTreeSet<String> = DEFAULT_NAMESPACES.iter().map(|s| s.to_string()).collect();
        merged.extend(namespaces.iter().cloned());
        merged.extend(
            options
                .additional_code
                .iter()
                .flat_map(|source| source.namespaces.iter().cloned()),
        );

        let rewritten = self.rewriter.rewrite(code);
        let (user_program, user_code_offset) = match kind {
            ScriptKind::Program => (rewritten, 0),
            ScriptKind::Statements => (wrap_statements(&rewritten), USER_SCRIPT_HEADER.lines().count()),
            ScriptKind::Expression => {
                let expression = format!("({}).Dump();", rewritten.trim());
                (wrap_statements(&expression), USER_SCRIPT_HEADER.lines().count())
            }
        };

        debug!(%kind, namespaces = merged.len(), "Parsed script code");
        Ok(CodeParsingResult {
            namespaces: merged.into_iter().collect(),
            user_program,
            bootstrap_program: self.bootstrap(kind, options),
            additional_code: options.additional_code.clone(),
            user_code_offset,
        })
    }
}

fn wrap_statements(code: &str) -> String {
    let mut program = String::from(USER_SCRIPT_HEADER);
    push_block(&mut program, code);
    program.push_str(USER_SCRIPT_FOOTER);
    program
}

/// A namespace must be a dotted identifier; `using` and `;` are added here
fn validate_namespace(namespace: &str) -> Result<()> {
    let valid = !namespace.is_empty()
        && namespace.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_alphabetic() || c == '_')
                && chars.all(|c| c.is_alphanumeric() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(ScriptpadError::Configuration(format!(
            "invalid namespace '{}'",
            namespace
        )))
    }
}

/// Quote `s` as a regular C# string literal
pub(crate) fn csharp_string_literal(s: &str) -> String {
    let mut literal = String::with_capacity(s.len() + 2);
    literal.push('"');
    for c in s.chars() {
        match c {
            '\\' => literal.push_str("\\\\"),
            '"' => literal.push_str("\\\""),
            '\n' => literal.push_str("\\n"),
            '\r' => literal.push_str("\\r"),
            '\t' => literal.push_str("\\t"),
            '\0' => literal.push_str("\\0"),
            c => literal.push(c),
        }
    }
    literal.push('"');
    literal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compilation::rewrite::NoRewrite;

    fn options() -> ParseOptions {
        ParseOptions {
            script_id: Uuid::nil(),
            script_name: "Query \"1\"".into(),
            script_location: None,
            additional_code: vec![],
        }
    }

    fn parse(code: &str, kind: ScriptKind) -> CodeParsingResult {
        CSharpParser::default()
            .parse(code, kind, &[], &options())
            .unwrap()
    }

    #[test]
    fn test_statements_are_wrapped_in_entry_method() {
        let result = parse("var x = 1;\nx.Dump();", ScriptKind::Statements);
        assert!(result.user_program.starts_with("public static class UserScript"));
        assert!(result.user_program.contains("var x = 1;\nx.Dump();\n"));
        assert!(result.bootstrap_program.contains("await UserScript.RunAsync();"));
    }

    #[test]
    fn test_expression_is_dumped() {
        let result = parse("  4 + 7  ", ScriptKind::Expression);
        assert!(result.user_program.contains("(4 + 7).Dump();"));
    }

    #[test]
    fn test_program_kind_is_verbatim_without_main() {
        let code = "class P { static void Main() { } }";
        let result = parse(code, ScriptKind::Program);
        assert_eq!(result.user_program, code);
        assert!(!result.bootstrap_program.contains("Main()"));
        assert!(result.bootstrap_program.contains("public static T Dump<T>"));
    }

    #[test]
    fn test_identity_substituted() {
        let mut opts = options();
        opts.script_location = Some(PathBuf::from("/scripts/q.csx"));
        let result = CSharpParser::default()
            .parse("1;", ScriptKind::Statements, &[], &opts)
            .unwrap();
        assert!(result
            .bootstrap_program
            .contains("SCRIPT_ID = \"00000000-0000-0000-0000-000000000000\";"));
        assert!(result
            .bootstrap_program
            .contains(r#"SCRIPT_NAME = "Query \"1\"";"#));
        assert!(result
            .bootstrap_program
            .contains(r#"SCRIPT_LOCATION = "/scripts/q.csx";"#));
        assert!(!result.bootstrap_program.contains("{{"));
    }

    #[test]
    fn test_missing_location_is_null() {
        let result = parse("1;", ScriptKind::Statements);
        assert!(result.bootstrap_program.contains("SCRIPT_LOCATION = null;"));
    }

    #[test]
    fn test_namespaces_merged_sorted_unique() {
        let mut opts = options();
        opts.additional_code = vec![SourceCode::parse(
            "Db.cs",
            "using Northwind.Data;\nusing System;\npublic class Db {}",
        )];
        let result = CSharpParser::default()
            .parse(
                "1;",
                ScriptKind::Statements,
                &["Acme.Tools".to_string(), "System.Linq".to_string()],
                &opts,
            )
            .unwrap();

        let ns = &result.namespaces;
        assert!(ns.windows(2).all(|w| w[0] < w[1]));
        assert!(ns.contains(&"Acme.Tools".to_string()));
        assert!(ns.contains(&"Northwind.Data".to_string()));
        assert_eq!(ns.iter().filter(|n| *n == "System").count(), 1);
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let err = CSharpParser::default()
            .parse("1;", ScriptKind::Statements, &["System;".to_string()], &options())
            .unwrap_err();
        assert!(matches!(err, ScriptpadError::Configuration(_)));
    }

    #[test]
    fn test_console_calls_redirected_in_user_code_only() {
        let result = parse("Console.WriteLine(1);", ScriptKind::Statements);
        assert!(result.user_program.contains("ScriptRuntime.WriteLine(1);"));

        let plain = CSharpParser::new(Arc::new(NoRewrite))
            .parse("Console.WriteLine(1);", ScriptKind::Statements, &[], &options())
            .unwrap();
        assert!(plain.user_program.contains("Console.WriteLine(1);"));
    }

    #[test]
    fn test_full_program_reports_user_start_line() {
        let mut opts = options();
        opts.additional_code = vec![SourceCode::parse("Db.cs", "public class Db\n{\n}\n")];
        let result = CSharpParser::default()
            .parse("var first = 1;\nvar second = 2;", ScriptKind::Statements, &[], &opts)
            .unwrap();

        let program = result.full_program();
        let lines: Vec<&str> = program.code.lines().collect();
        assert_eq!(lines[program.user_program_start_line - 1], "var first = 1;");
        assert!(program.code.starts_with("using System;\n"));

        let db = program.code.find("public class Db").unwrap();
        let runtime = program.code.find("public static class ScriptRuntime").unwrap();
        let user = program.code.find("public static class UserScript").unwrap();
        assert!(db < runtime && runtime < user);
    }

    #[test]
    fn test_program_kind_start_line() {
        let result = parse("class P\n{\n}", ScriptKind::Program);
        let program = result.full_program();
        let lines: Vec<&str> = program.code.lines().collect();
        assert_eq!(lines[program.user_program_start_line - 1], "class P");
    }

    #[test]
    fn test_csharp_string_literal() {
        assert_eq!(csharp_string_literal(r"C:\a"), r#""C:\\a""#);
        assert_eq!(csharp_string_literal("a\nb"), r#""a\nb""#);
    }
}
